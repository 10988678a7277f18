//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Login session state for the secure module.
//!
//! A single session at a time: the module rejects new logins until logout.
//! Pin comparison is constant-time over the salted digest; the cleartext pin
//! is retained only inside the zeroizing session and wiped on drop.

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::secrets::{hash_pin, DeviceSecrets};

/// The logged-in user. Dropping the session zeroizes the retained pin.
pub struct Session {
    pub uid: u32,
    pub username: String,
    pin: Zeroizing<String>,
}

impl Session {
    /// Authenticate against the provisioned user table. `None` means the
    /// username is unknown/unprovisioned or the pin digest does not match;
    /// the caller cannot distinguish the two.
    pub fn authenticate(secrets: &DeviceSecrets, username: &str, pin: &str) -> Option<Session> {
        let user = secrets.user_by_name(username)?;
        if !secrets.is_provisioned_user(user.uid) {
            return None;
        }
        let digest = hash_pin(pin, &user.salt);
        if digest.ct_eq(&user.pin_hash).into() {
            Some(Session {
                uid: user.uid,
                username: user.username.clone(),
                pin: Zeroizing::new(pin.to_string()),
            })
        } else {
            None
        }
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }
}
