//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Device identity: the long-term key, user and region tables, and the
//! provisioned subsets stamped into the device at build time.
//!
//! The provisioning artifact is a JSON document produced by the build
//! tooling. Key material and pin hashes travel hex-encoded and are decoded
//! into fixed arrays here; the key itself lives in a zeroize-on-drop wrapper
//! that redacts in `Debug` and never serializes.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use tonegate_types::{KEY_LEN, PIN_LEN, SALT_LEN, USERNAME_LEN};

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("invalid device key: {0}")]
    InvalidKey(String),

    #[error("invalid pin hash for user '{0}'")]
    InvalidPinHash(String),

    #[error("invalid username '{0}': must be 1..={USERNAME_LEN} chars of [A-Za-z0-9_]")]
    InvalidUsername(String),

    #[error("invalid salt for user '{0}': must be at most {SALT_LEN} bytes")]
    InvalidSalt(String),

    #[error("duplicate uid {0} in user table")]
    DuplicateUid(u32),

    #[error("provisioned id {0} has no entry in the device table")]
    UnknownProvisionedId(u32),

    #[error("malformed provisioning artifact: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The device's 256-bit symmetric secret. Zeroized on drop, redacted in
/// `Debug`, exposed only to the envelope layer.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey([u8; KEY_LEN]);

impl DeviceKey {
    pub fn from_hex(hex_str: &str) -> Result<Self, SecretsError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| SecretsError::InvalidKey(format!("bad hex: {e}")))?;
        let raw: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| SecretsError::InvalidKey(format!("need {KEY_LEN} bytes")))?;
        Ok(DeviceKey(raw))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey([REDACTED])")
    }
}

/// One entry of the device user table.
#[derive(Debug, Clone)]
pub struct DeviceUser {
    pub uid: u32,
    pub username: String,
    pub pin_hash: [u8; 32],
    pub salt: String,
}

/// One entry of the device region table.
#[derive(Debug, Clone)]
pub struct DeviceRegion {
    pub id: u32,
    pub name: String,
}

/// The full provisioning payload. The `provisioned_*` subsets gate who may
/// log in here and which song regions count as local.
pub struct DeviceSecrets {
    key: DeviceKey,
    users: Vec<DeviceUser>,
    regions: Vec<DeviceRegion>,
    provisioned_users: Vec<u32>,
    provisioned_regions: Vec<u32>,
}

impl fmt::Debug for DeviceSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSecrets")
            .field("key", &self.key)
            .field("users", &self.users.len())
            .field("regions", &self.regions.len())
            .finish()
    }
}

#[derive(Deserialize)]
struct RawUser {
    uid: u32,
    username: String,
    pin_hash: String,
    salt: String,
}

#[derive(Deserialize)]
struct RawRegion {
    id: u32,
    name: String,
}

#[derive(Deserialize)]
struct RawSecrets {
    device_key: String,
    users: Vec<RawUser>,
    regions: Vec<RawRegion>,
    provisioned_users: Vec<u32>,
    provisioned_regions: Vec<u32>,
}

/// Username shape shared by provisioning and the host prompt.
pub fn valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= USERNAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Pin shape: decimal digits only, at most the channel field width.
pub fn valid_pin(pin: &str) -> bool {
    !pin.is_empty() && pin.len() <= PIN_LEN && pin.chars().all(|c| c.is_ascii_digit())
}

/// Salted pin digest: SHA-256(pin ‖ salt).
pub fn hash_pin(pin: &str, salt: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.finalize().into()
}

impl DeviceSecrets {
    pub fn from_json(json: &str) -> Result<Self, SecretsError> {
        let raw: RawSecrets = serde_json::from_str(json)?;
        let key = DeviceKey::from_hex(&raw.device_key)?;

        let mut users = Vec::with_capacity(raw.users.len());
        for u in raw.users {
            if !valid_username(&u.username) {
                return Err(SecretsError::InvalidUsername(u.username));
            }
            if u.salt.len() > SALT_LEN {
                return Err(SecretsError::InvalidSalt(u.username));
            }
            if users.iter().any(|e: &DeviceUser| e.uid == u.uid) {
                return Err(SecretsError::DuplicateUid(u.uid));
            }
            let digest = hex::decode(&u.pin_hash)
                .ok()
                .and_then(|b| <[u8; 32]>::try_from(b).ok())
                .ok_or_else(|| SecretsError::InvalidPinHash(u.username.clone()))?;
            users.push(DeviceUser {
                uid: u.uid,
                username: u.username,
                pin_hash: digest,
                salt: u.salt,
            });
        }

        let regions = raw
            .regions
            .into_iter()
            .map(|r| DeviceRegion {
                id: r.id,
                name: r.name,
            })
            .collect::<Vec<_>>();

        for &uid in &raw.provisioned_users {
            if !users.iter().any(|u| u.uid == uid) {
                return Err(SecretsError::UnknownProvisionedId(uid));
            }
        }
        for &rid in &raw.provisioned_regions {
            if !regions.iter().any(|r| r.id == rid) {
                return Err(SecretsError::UnknownProvisionedId(rid));
            }
        }

        Ok(DeviceSecrets {
            key,
            users,
            regions,
            provisioned_users: raw.provisioned_users,
            provisioned_regions: raw.provisioned_regions,
        })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read provisioning artifact {}", path.display()))?;
        Ok(Self::from_json(&json).context("parse provisioning artifact")?)
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn user_by_name(&self, name: &str) -> Option<&DeviceUser> {
        self.users.iter().find(|u| u.username == name)
    }

    pub fn user_by_uid(&self, uid: u32) -> Option<&DeviceUser> {
        self.users.iter().find(|u| u.uid == uid)
    }

    /// Display name for a uid; unknown ids render as a placeholder, matching
    /// query output on devices that lack the entry.
    pub fn username_or_placeholder(&self, uid: u32) -> &str {
        self.user_by_uid(uid)
            .map(|u| u.username.as_str())
            .unwrap_or("<unknown user>")
    }

    pub fn region_name_or_placeholder(&self, rid: u32) -> &str {
        self.regions
            .iter()
            .find(|r| r.id == rid)
            .map(|r| r.name.as_str())
            .unwrap_or("<unknown region>")
    }

    pub fn is_provisioned_user(&self, uid: u32) -> bool {
        self.provisioned_users.contains(&uid)
    }

    pub fn is_provisioned_region(&self, rid: u32) -> bool {
        self.provisioned_regions.contains(&rid)
    }

    /// Target lookup for the share path: the username must name a
    /// provisioned device user.
    pub fn provisioned_uid_for_name(&self, name: &str) -> Option<u32> {
        self.user_by_name(name)
            .map(|u| u.uid)
            .filter(|&uid| self.is_provisioned_user(uid))
    }

    pub fn provisioned_usernames(&self) -> Vec<String> {
        self.provisioned_users
            .iter()
            .map(|&uid| self.username_or_placeholder(uid).to_string())
            .collect()
    }

    pub fn provisioned_region_names(&self) -> Vec<String> {
        self.provisioned_regions
            .iter()
            .map(|&rid| self.region_name_or_placeholder(rid).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> String {
        let alice = hex::encode(hash_pin("1234", "s1"));
        let bob = hex::encode(hash_pin("5678", "s2"));
        format!(
            r#"{{
                "device_key": "{}",
                "users": [
                    {{"uid": 1, "username": "alice", "pin_hash": "{alice}", "salt": "s1"}},
                    {{"uid": 2, "username": "bob", "pin_hash": "{bob}", "salt": "s2"}}
                ],
                "regions": [
                    {{"id": 10, "name": "United States"}},
                    {{"id": 11, "name": "Canada"}}
                ],
                "provisioned_users": [1, 2],
                "provisioned_regions": [10]
            }}"#,
            "ab".repeat(32)
        )
    }

    #[test]
    fn test_parse_artifact() {
        let secrets = DeviceSecrets::from_json(&artifact()).unwrap();
        assert_eq!(secrets.user_by_name("alice").unwrap().uid, 1);
        assert!(secrets.is_provisioned_region(10));
        assert!(!secrets.is_provisioned_region(11));
        assert_eq!(secrets.provisioned_uid_for_name("bob"), Some(2));
        assert_eq!(secrets.provisioned_uid_for_name("mallory"), None);
    }

    #[test]
    fn test_key_is_redacted() {
        let secrets = DeviceSecrets::from_json(&artifact()).unwrap();
        let debug = format!("{:?}", secrets);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("abab"));
    }

    #[test]
    fn test_bad_key_rejected() {
        assert!(DeviceKey::from_hex("zz").is_err());
        assert!(DeviceKey::from_hex(&"ab".repeat(16)).is_err());
    }

    #[test]
    fn test_username_shape() {
        assert!(valid_username("alice_01"));
        assert!(!valid_username(""));
        assert!(!valid_username("way_too_long_a_username"));
        assert!(!valid_username("bad name"));
    }

    #[test]
    fn test_pin_shape() {
        assert!(valid_pin("12345678"));
        assert!(!valid_pin("123456789"));
        assert!(!valid_pin("12a4"));
        assert!(!valid_pin(""));
    }

    #[test]
    fn test_unknown_provisioned_id_rejected() {
        let mut json: serde_json::Value = serde_json::from_str(&artifact()).unwrap();
        json["provisioned_users"] = serde_json::json!([1, 99]);
        assert!(DeviceSecrets::from_json(&json.to_string()).is_err());
    }

    #[test]
    fn test_pin_hash_matches_known_vector() {
        // SHA-256("1234" ‖ "s1") recomputed independently.
        let mut h = Sha256::new();
        h.update(b"1234s1");
        let expected: [u8; 32] = h.finalize().into();
        assert_eq!(hash_pin("1234", "s1"), expected);
    }
}
