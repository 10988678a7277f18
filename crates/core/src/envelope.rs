//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! The three AEAD envelopes of the song file format.
//!
//! All three tiers use IETF ChaCha20-Poly1305 under the single device key,
//! distinguished by associated data so ciphertexts cannot be substituted
//! between layers:
//!
//! | envelope | AAD |
//! |---|---|
//! | file header | `"wave_header"` (NUL-terminated, 12 bytes) |
//! | metadata | `"meta_data"` (NUL-terminated, 10 bytes) |
//! | song chunk | the 32-byte song digest from the metadata |
//!
//! Tag verification is constant-time inside the cipher implementation. Any
//! authentication failure is fatal to the operation in progress; callers map
//! it to the STOPPED state.

use aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

use tonegate_types::{
    EncChunk, EncFileHeader, EncMetadata, HeaderInfo, SongMetadata, WireError, NONCE_LEN,
    SONG_CHUNK_LEN, SONG_MD_LEN, TAG_LEN,
};

use crate::secrets::DeviceKey;

/// AAD binding the file header envelope, NUL terminator included.
pub const HEADER_AAD: &[u8; 12] = b"wave_header\0";
/// AAD binding the metadata envelope, NUL terminator included.
pub const METADATA_AAD: &[u8; 10] = b"meta_data\0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Tag mismatch at any tier. Carries no detail on purpose.
    #[error("authentication failed")]
    Authentication,

    #[error("encryption failed")]
    Encryption,

    /// The envelope opened but its plaintext does not decode.
    #[error("malformed plaintext: {0}")]
    Malformed(#[from] WireError),

    #[error("chunk plaintext exceeds {SONG_CHUNK_LEN} bytes")]
    OversizedChunk,
}

/// All sealing and opening under the device key. Lives exclusively inside
/// the secure module; the host never constructs one.
pub struct SongCipher {
    cipher: ChaCha20Poly1305,
}

impl SongCipher {
    pub fn new(key: &DeviceKey) -> Self {
        SongCipher {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    fn seal(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), EnvelopeError> {
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| EnvelopeError::Encryption)?;
        let split = sealed.len() - TAG_LEN;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&sealed[split..]);
        Ok((sealed[..split].to_vec(), tag))
    }

    fn open(
        &self,
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &sealed,
                    aad,
                },
            )
            .map_err(|_| EnvelopeError::Authentication)
    }

    /// Seal the file header plaintext under a caller-chosen nonce.
    pub fn seal_header(
        &self,
        info: &HeaderInfo,
        nonce: [u8; NONCE_LEN],
    ) -> Result<EncFileHeader, EnvelopeError> {
        let (ct, tag) = self.seal(&nonce, HEADER_AAD, &info.to_bytes())?;
        let mut ciphertext = [0u8; tonegate_types::HEADER_PLAINTEXT_LEN];
        ciphertext.copy_from_slice(&ct);
        Ok(EncFileHeader {
            nonce,
            ciphertext,
            tag,
        })
    }

    pub fn open_header(&self, block: &EncFileHeader) -> Result<HeaderInfo, EnvelopeError> {
        let pt = self.open(&block.nonce, HEADER_AAD, &block.ciphertext, &block.tag)?;
        Ok(HeaderInfo::from_bytes(&pt)?)
    }

    /// Seal a metadata block. The nonce is the first 12 bytes of SHA-256 of
    /// the plaintext: deterministic, so re-encrypting an unchanged block
    /// reproduces the identical ciphertext (a no-op share).
    pub fn seal_metadata(&self, md: &SongMetadata) -> Result<EncMetadata, EnvelopeError> {
        let pt = md.to_bytes();
        let nonce = derive_metadata_nonce(&pt);
        let (ct, tag) = self.seal(&nonce, METADATA_AAD, &pt)?;
        let mut ciphertext = [0u8; SONG_MD_LEN];
        ciphertext.copy_from_slice(&ct);
        Ok(EncMetadata {
            nonce,
            tag,
            ciphertext,
        })
    }

    pub fn open_metadata(&self, block: &EncMetadata) -> Result<SongMetadata, EnvelopeError> {
        let pt = self.open(&block.nonce, METADATA_AAD, &block.ciphertext, &block.tag)?;
        Ok(SongMetadata::from_bytes(&pt)?)
    }

    /// Seal one PCM chunk, bound to its song by the metadata digest.
    pub fn seal_chunk(
        &self,
        pcm: &[u8],
        song_hash: &[u8; 32],
        nonce: [u8; NONCE_LEN],
    ) -> Result<EncChunk, EnvelopeError> {
        if pcm.len() > SONG_CHUNK_LEN {
            return Err(EnvelopeError::OversizedChunk);
        }
        let (ciphertext, tag) = self.seal(&nonce, song_hash, pcm)?;
        Ok(EncChunk {
            nonce,
            tag,
            ciphertext,
        })
    }

    pub fn open_chunk(
        &self,
        chunk: &EncChunk,
        song_hash: &[u8; 32],
    ) -> Result<Vec<u8>, EnvelopeError> {
        self.open(&chunk.nonce, song_hash, &chunk.ciphertext, &chunk.tag)
    }
}

/// First 12 bytes of SHA-256 over the metadata plaintext.
pub fn derive_metadata_nonce(plaintext: &[u8]) -> [u8; NONCE_LEN] {
    let digest = Sha256::digest(plaintext);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    nonce
}
