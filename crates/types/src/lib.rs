//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! # Tonegate Types
//!
//! Shared wire types for the tonegate audio DRM pipeline: the bit-exact song
//! file blocks, the fixed-size song metadata codec, the command/state
//! vocabulary, and the command channel that couples the untrusted host driver
//! to the secure module.
//!
//! Everything in this crate is visible to both sides of the trust boundary.
//! Nothing here touches key material; sealing and opening the envelopes lives
//! in `tonegate-core`.

pub mod channel;
pub mod command;
pub mod wire;

pub use channel::{channel_pair, CommandChannel, HostPort, ModulePort, QueryBlock};
pub use command::{Command, DrmState, PlayState};
pub use wire::{
    chunk_count, chunk_len, EncChunk, EncFileHeader, EncMetadata, HeaderInfo, SongMetadata,
    WavHeader, WireError,
};

/// AEAD nonce length (IETF ChaCha20-Poly1305).
pub const NONCE_LEN: usize = 12;
/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;
/// Device symmetric key length.
pub const KEY_LEN: usize = 32;

/// Canonical RIFF/WAVE header carried in the clear part of the file header.
pub const WAV_HEADER_LEN: usize = 44;
/// File header plaintext: wav header ‖ metadata size (u32 LE).
pub const HEADER_PLAINTEXT_LEN: usize = WAV_HEADER_LEN + 4;
/// Encrypted file header block: nonce ‖ ciphertext ‖ tag.
pub const ENC_FILE_HEADER_LEN: usize = NONCE_LEN + HEADER_PLAINTEXT_LEN + TAG_LEN;

/// Fixed size of the song metadata plaintext block.
pub const SONG_MD_LEN: usize = 32 + 4 + 1 + 1 + 4 * MAX_REGIONS + 4 * MAX_USERS;
/// Encrypted metadata block: nonce ‖ tag ‖ ciphertext.
pub const ENC_METADATA_LEN: usize = NONCE_LEN + TAG_LEN + SONG_MD_LEN;

/// PCM bytes per song chunk.
pub const SONG_CHUNK_LEN: usize = 16000;
/// Encrypted chunk block at full size: nonce ‖ tag ‖ ciphertext.
pub const ENC_CHUNK_LEN: usize = NONCE_LEN + TAG_LEN + SONG_CHUNK_LEN;

/// Slots in the encrypted chunk ring.
pub const RING_SLOTS: usize = 60;
/// Slots per ring half; host and module each own one half at a time.
pub const HALF_SLOTS: usize = RING_SLOTS / 2;

/// Maximum regions a song may be licensed for.
pub const MAX_REGIONS: usize = 32;
/// Maximum users a song may be shared with.
pub const MAX_USERS: usize = 64;

/// Channel username field width.
pub const USERNAME_LEN: usize = 16;
/// Channel pin field width.
pub const PIN_LEN: usize = 8;
/// Maximum pin salt length.
pub const SALT_LEN: usize = 7;

/// Preview allowance when policy denies full access: 30 s × 48 kHz × 2 B.
pub const PREVIEW_LEN: usize = 30 * 48_000 * 2;

/// COPY-phase DMA sub-chunk size.
pub const DMA_SUB_CHUNK: usize = 16000;
/// Audio FIFO capacity in bytes.
pub const FIFO_CAP: usize = 4096 * 4;
/// COPY waits for at least this much FIFO headroom.
pub const FIFO_HEADROOM: usize = 32;
