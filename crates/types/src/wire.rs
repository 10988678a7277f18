//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Bit-exact codecs for the song file blocks.
//!
//! A song file is the concatenation of three AEAD envelopes:
//!
//! 1. encrypted file header: `nonce[12] ‖ ct[48] ‖ tag[16]`
//! 2. encrypted metadata: `nonce[12] ‖ tag[16] ‖ ct[422]`
//! 3. encrypted chunks: `nonce[12] ‖ tag[16] ‖ ct[≤16000]` each
//!
//! All multi-byte integers are little-endian. Serialization here is
//! deterministic, fixed-offset slicing; no self-describing framing.

use thiserror::Error;

use crate::{
    ENC_FILE_HEADER_LEN, ENC_METADATA_LEN, HEADER_PLAINTEXT_LEN, MAX_REGIONS, MAX_USERS,
    NONCE_LEN, SONG_CHUNK_LEN, SONG_MD_LEN, TAG_LEN, WAV_HEADER_LEN,
};

/// Errors decoding wire blocks. Shape errors only; authentication failures
/// are reported by the envelope layer in `tonegate-core`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated block: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("not a RIFF/WAVE header")]
    BadWavMagic,

    #[error("{field} count {value} exceeds maximum {max}")]
    CountOutOfRange {
        field: &'static str,
        value: u8,
        max: usize,
    },

    #[error("unknown command byte: {0}")]
    UnknownCommand(u8),

    #[error("unknown state byte: {0}")]
    UnknownState(u8),
}

fn need(buf: &[u8], expected: usize) -> Result<(), WireError> {
    if buf.len() < expected {
        return Err(WireError::Truncated {
            expected,
            found: buf.len(),
        });
    }
    Ok(())
}

/// The 44-byte canonical RIFF/WAVE header, kept opaque except for the fields
/// the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader(pub [u8; WAV_HEADER_LEN]);

impl WavHeader {
    /// Parse and sanity-check the RIFF/WAVE magic.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        need(bytes, WAV_HEADER_LEN)?;
        let mut raw = [0u8; WAV_HEADER_LEN];
        raw.copy_from_slice(&bytes[..WAV_HEADER_LEN]);
        if &raw[0..4] != b"RIFF" || &raw[8..12] != b"WAVE" {
            return Err(WireError::BadWavMagic);
        }
        Ok(WavHeader(raw))
    }

    /// PCM payload length from the data-chunk size field.
    pub fn data_len(&self) -> u32 {
        u32::from_le_bytes([self.0[40], self.0[41], self.0[42], self.0[43]])
    }

    /// Build a canonical header for a mono 16-bit 48 kHz PCM payload.
    pub fn for_pcm(data_len: u32) -> Self {
        let mut raw = [0u8; WAV_HEADER_LEN];
        raw[0..4].copy_from_slice(b"RIFF");
        raw[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
        raw[8..12].copy_from_slice(b"WAVE");
        raw[12..16].copy_from_slice(b"fmt ");
        raw[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt chunk size
        raw[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
        raw[22..24].copy_from_slice(&1u16.to_le_bytes()); // mono
        raw[24..28].copy_from_slice(&48_000u32.to_le_bytes());
        raw[28..32].copy_from_slice(&96_000u32.to_le_bytes()); // byte rate
        raw[32..34].copy_from_slice(&2u16.to_le_bytes()); // block align
        raw[34..36].copy_from_slice(&16u16.to_le_bytes()); // bits per sample
        raw[36..40].copy_from_slice(b"data");
        raw[40..44].copy_from_slice(&data_len.to_le_bytes());
        WavHeader(raw)
    }
}

/// Plaintext of the encrypted file header: the WAV header plus the size of
/// the metadata block that follows it in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub wav_header: WavHeader,
    pub metadata_size: u32,
}

impl HeaderInfo {
    pub fn to_bytes(&self) -> [u8; HEADER_PLAINTEXT_LEN] {
        let mut out = [0u8; HEADER_PLAINTEXT_LEN];
        out[..WAV_HEADER_LEN].copy_from_slice(&self.wav_header.0);
        out[WAV_HEADER_LEN..].copy_from_slice(&self.metadata_size.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        need(bytes, HEADER_PLAINTEXT_LEN)?;
        let wav_header = WavHeader::parse(&bytes[..WAV_HEADER_LEN])?;
        let metadata_size = u32::from_le_bytes([
            bytes[WAV_HEADER_LEN],
            bytes[WAV_HEADER_LEN + 1],
            bytes[WAV_HEADER_LEN + 2],
            bytes[WAV_HEADER_LEN + 3],
        ]);
        Ok(HeaderInfo {
            wav_header,
            metadata_size,
        })
    }
}

/// Encrypted file header block: `nonce ‖ ciphertext ‖ tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncFileHeader {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: [u8; HEADER_PLAINTEXT_LEN],
    pub tag: [u8; TAG_LEN],
}

impl EncFileHeader {
    pub fn to_bytes(&self) -> [u8; ENC_FILE_HEADER_LEN] {
        let mut out = [0u8; ENC_FILE_HEADER_LEN];
        out[..NONCE_LEN].copy_from_slice(&self.nonce);
        out[NONCE_LEN..NONCE_LEN + HEADER_PLAINTEXT_LEN].copy_from_slice(&self.ciphertext);
        out[NONCE_LEN + HEADER_PLAINTEXT_LEN..].copy_from_slice(&self.tag);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        need(bytes, ENC_FILE_HEADER_LEN)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        let mut ciphertext = [0u8; HEADER_PLAINTEXT_LEN];
        ciphertext.copy_from_slice(&bytes[NONCE_LEN..NONCE_LEN + HEADER_PLAINTEXT_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[NONCE_LEN + HEADER_PLAINTEXT_LEN..ENC_FILE_HEADER_LEN]);
        Ok(EncFileHeader {
            nonce,
            ciphertext,
            tag,
        })
    }
}

/// Encrypted metadata block: `nonce ‖ tag ‖ ciphertext`.
///
/// Field order differs from the file header block; the layout is historical
/// and load-bearing for files already in the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncMetadata {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: [u8; SONG_MD_LEN],
}

impl EncMetadata {
    pub fn to_bytes(&self) -> [u8; ENC_METADATA_LEN] {
        let mut out = [0u8; ENC_METADATA_LEN];
        out[..NONCE_LEN].copy_from_slice(&self.nonce);
        out[NONCE_LEN..NONCE_LEN + TAG_LEN].copy_from_slice(&self.tag);
        out[NONCE_LEN + TAG_LEN..].copy_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        need(bytes, ENC_METADATA_LEN)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[NONCE_LEN..NONCE_LEN + TAG_LEN]);
        let mut ciphertext = [0u8; SONG_MD_LEN];
        ciphertext.copy_from_slice(&bytes[NONCE_LEN + TAG_LEN..ENC_METADATA_LEN]);
        Ok(EncMetadata {
            nonce,
            tag,
            ciphertext,
        })
    }
}

/// Encrypted song chunk: `nonce ‖ tag ‖ ciphertext`; the final chunk of a
/// song may carry fewer than [`SONG_CHUNK_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncChunk {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncChunk {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Decode a chunk whose ciphertext length is already known from the
    /// header arithmetic (the wire carries no per-chunk length field).
    pub fn from_bytes(bytes: &[u8], ciphertext_len: usize) -> Result<Self, WireError> {
        need(bytes, NONCE_LEN + TAG_LEN + ciphertext_len)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[NONCE_LEN..NONCE_LEN + TAG_LEN]);
        let ciphertext = bytes[NONCE_LEN + TAG_LEN..NONCE_LEN + TAG_LEN + ciphertext_len].to_vec();
        Ok(EncChunk {
            nonce,
            tag,
            ciphertext,
        })
    }
}

/// Song metadata plaintext: fixed 422-byte block, zero-padded array slots.
///
/// `sha256sum` is the song's identity and the associated data binding every
/// chunk to it; re-sharing must never change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongMetadata {
    pub sha256sum: [u8; 32],
    pub owner_id: u32,
    pub region_ids: Vec<u32>,
    pub user_ids: Vec<u32>,
}

impl SongMetadata {
    pub fn to_bytes(&self) -> [u8; SONG_MD_LEN] {
        let mut out = [0u8; SONG_MD_LEN];
        out[..32].copy_from_slice(&self.sha256sum);
        out[32..36].copy_from_slice(&self.owner_id.to_le_bytes());
        out[36] = self.region_ids.len() as u8;
        out[37] = self.user_ids.len() as u8;
        for (i, rid) in self.region_ids.iter().enumerate() {
            out[38 + 4 * i..42 + 4 * i].copy_from_slice(&rid.to_le_bytes());
        }
        let users_off = 38 + 4 * MAX_REGIONS;
        for (i, uid) in self.user_ids.iter().enumerate() {
            out[users_off + 4 * i..users_off + 4 * (i + 1)].copy_from_slice(&uid.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        need(bytes, SONG_MD_LEN)?;
        let mut sha256sum = [0u8; 32];
        sha256sum.copy_from_slice(&bytes[..32]);
        let owner_id = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);

        let num_regions = bytes[36];
        if num_regions as usize > MAX_REGIONS {
            return Err(WireError::CountOutOfRange {
                field: "num_regions",
                value: num_regions,
                max: MAX_REGIONS,
            });
        }
        let num_users = bytes[37];
        if num_users as usize > MAX_USERS {
            return Err(WireError::CountOutOfRange {
                field: "num_users",
                value: num_users,
                max: MAX_USERS,
            });
        }

        let mut region_ids = Vec::with_capacity(num_regions as usize);
        for i in 0..num_regions as usize {
            let off = 38 + 4 * i;
            region_ids.push(u32::from_le_bytes([
                bytes[off],
                bytes[off + 1],
                bytes[off + 2],
                bytes[off + 3],
            ]));
        }
        let users_off = 38 + 4 * MAX_REGIONS;
        let mut user_ids = Vec::with_capacity(num_users as usize);
        for i in 0..num_users as usize {
            let off = users_off + 4 * i;
            user_ids.push(u32::from_le_bytes([
                bytes[off],
                bytes[off + 1],
                bytes[off + 2],
                bytes[off + 3],
            ]));
        }

        Ok(SongMetadata {
            sha256sum,
            owner_id,
            region_ids,
            user_ids,
        })
    }
}

/// Number of chunks a song of `wav_size` PCM bytes is cut into.
pub fn chunk_count(wav_size: u32) -> u32 {
    wav_size.div_ceil(SONG_CHUNK_LEN as u32)
}

/// Ciphertext length of 1-based chunk `index` for a song of `wav_size` bytes.
pub fn chunk_len(index: u32, wav_size: u32) -> usize {
    let total = chunk_count(wav_size);
    debug_assert!(index >= 1 && index <= total);
    if index == total && wav_size % SONG_CHUNK_LEN as u32 != 0 {
        (wav_size % SONG_CHUNK_LEN as u32) as usize
    } else {
        SONG_CHUNK_LEN
    }
}
