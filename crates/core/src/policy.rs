//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! The DRM policy engine: pure decisions over (session, song, device).
//!
//! Playback access and share authorization both live here so they can be
//! exercised without a channel, a cipher, or hardware. The streaming
//! pipeline asks exactly once per song, at the moment the first chunk is
//! about to be released.

use thiserror::Error;

use tonegate_types::{SongMetadata, MAX_USERS};

use crate::secrets::DeviceSecrets;
use crate::session::Session;

/// Playback decision. Denied playback is not an error: it degrades to a
/// 30-second preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Full,
    Preview,
}

/// Full access requires a region match and an identity match: the song must
/// be licensed for a region this device provisions, and the session must be
/// the owner or a user the song was shared with.
pub fn playback_access(
    session: Option<&Session>,
    md: &SongMetadata,
    device: &DeviceSecrets,
) -> Access {
    let Some(session) = session else {
        return Access::Preview;
    };
    for &rid in &md.region_ids {
        if !device.is_provisioned_region(rid) {
            continue;
        }
        if session.uid == md.owner_id {
            return Access::Full;
        }
        if md.user_ids.contains(&session.uid) {
            return Access::Full;
        }
    }
    Access::Preview
}

/// Why a share request was refused. Surfaced to the host only as the
/// `share_rejected` flag; the reasons stay on the secure side's log.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareRefusal {
    #[error("no user is logged in")]
    NotLoggedIn,

    #[error("session user does not own this song")]
    NotOwner,

    #[error("target username is not a provisioned user")]
    UnknownUser,

    #[error("target already owns this song")]
    TargetIsOwner,

    #[error("song already shared with target")]
    AlreadyShared,

    #[error("song shared with the maximum number of users")]
    UserTableFull,
}

/// Authorize sharing `md`'s song with `target_username`. Returns the target
/// uid on success.
pub fn authorize_share(
    session: Option<&Session>,
    md: &SongMetadata,
    device: &DeviceSecrets,
    target_username: &str,
) -> Result<u32, ShareRefusal> {
    let session = session.ok_or(ShareRefusal::NotLoggedIn)?;
    if session.uid != md.owner_id {
        return Err(ShareRefusal::NotOwner);
    }
    let target = device
        .provisioned_uid_for_name(target_username)
        .ok_or(ShareRefusal::UnknownUser)?;
    if target == md.owner_id {
        return Err(ShareRefusal::TargetIsOwner);
    }
    if md.user_ids.contains(&target) {
        return Err(ShareRefusal::AlreadyShared);
    }
    if md.user_ids.len() >= MAX_USERS {
        return Err(ShareRefusal::UserTableFull);
    }
    Ok(target)
}
