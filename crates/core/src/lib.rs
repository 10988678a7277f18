//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! # Tonegate Core
//!
//! The secure-module side of the tonegate audio DRM pipeline: AEAD
//! envelopes over the device key, the provisioning tables, the login and
//! policy engines, the command dispatch loop, the streaming decryption
//! pipeline, the share rewrite, and the producer-side packager.
//!
//! ## Trust boundary
//!
//! Everything here assumes it runs on the isolated side: the device key
//! never crosses the command channel, and every decision that releases
//! plaintext (playback, digital out, query, share) happens behind an AEAD
//! open. The host driver in `tonegate-cli` only moves ciphertext and polls
//! states.
//!
//! ## Quick start
//!
//! ```rust
//! use tonegate_core::{seal_song, spawn_module, CaptureSink, DeviceSecrets, SongRecipe};
//! # use tonegate_core::secrets::hash_pin;
//!
//! # fn main() -> anyhow::Result<()> {
//! let artifact = format!(
//!     r#"{{"device_key": "{}",
//!         "users": [{{"uid": 1, "username": "alice", "pin_hash": "{}", "salt": "s1"}}],
//!         "regions": [{{"id": 10, "name": "United States"}}],
//!         "provisioned_users": [1], "provisioned_regions": [10]}}"#,
//!     "ab".repeat(32),
//!     hex::encode(hash_pin("1234", "s1")),
//! );
//! let secrets = DeviceSecrets::from_json(&artifact)?;
//!
//! // Produce a protected song...
//! let mut wav = tonegate_types::WavHeader::for_pcm(16_000).0.to_vec();
//! wav.extend(std::iter::repeat(0u8).take(16_000));
//! let recipe = SongRecipe { owner_id: 1, region_ids: vec![10], user_ids: vec![] };
//! let song = seal_song(secrets.key(), &wav, &recipe)?;
//! assert!(song.len() > wav.len());
//!
//! // ...and boot a module for the host driver to talk to.
//! let (sink, _pcm) = CaptureSink::new();
//! let (host, handle) = spawn_module(secrets, Box::new(sink));
//! host.power_off();
//! handle.join().unwrap();
//! # Ok(())
//! # }
//! ```

pub mod envelope;
pub mod module;
pub mod pack;
pub mod pipeline;
pub mod policy;
pub mod secrets;
pub mod session;
pub mod share;
pub mod sink;

pub use envelope::{derive_metadata_nonce, EnvelopeError, SongCipher, HEADER_AAD, METADATA_AAD};
pub use module::{spawn_module, SecureModule};
pub use pack::{seal_song, seal_song_with_rng, PackError, SongRecipe};
pub use pipeline::{StreamEnd, StreamMode, StreamPipeline};
pub use policy::{authorize_share, playback_access, Access, ShareRefusal};
pub use secrets::{hash_pin, DeviceKey, DeviceSecrets, DeviceUser, SecretsError};
pub use session::Session;
pub use share::{reshare_metadata, with_added_user};
pub use sink::{AudioSink, CaptureSink, ModelDmaSink};
