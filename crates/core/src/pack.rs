//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Producer-side packager: turn a plain WAV file into a protected song.
//!
//! The inverse of the streaming pipeline, run at song-production time with
//! access to the same device key. The song digest sealed into the metadata
//! is SHA-256 over the PCM payload; every chunk is bound to it through its
//! AAD. Header and chunk nonces are drawn from the OS RNG; the metadata
//! nonce is derived from its plaintext (see the envelope layer).

use rand::rngs::OsRng;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

use tonegate_types::{
    chunk_count, HeaderInfo, SongMetadata, WavHeader, WireError, MAX_REGIONS, MAX_USERS,
    NONCE_LEN, SONG_CHUNK_LEN, SONG_MD_LEN, WAV_HEADER_LEN,
};

use crate::envelope::{EnvelopeError, SongCipher};
use crate::secrets::DeviceKey;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("input is not a WAV file: {0}")]
    BadInput(#[from] WireError),

    #[error("WAV data size field ({header}) does not match payload ({actual})")]
    SizeMismatch { header: u32, actual: usize },

    #[error("song licensed for {0} regions; the format carries at most {MAX_REGIONS}")]
    TooManyRegions(usize),

    #[error("song shared with {0} users; the format carries at most {MAX_USERS}")]
    TooManyUsers(usize),

    #[error("sealing failed: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Licensing inputs for a song.
#[derive(Debug, Clone)]
pub struct SongRecipe {
    pub owner_id: u32,
    pub region_ids: Vec<u32>,
    pub user_ids: Vec<u32>,
}

/// Seal `wav` (a complete 44-byte-header WAV file) into the protected song
/// format under the device key.
pub fn seal_song(key: &DeviceKey, wav: &[u8], recipe: &SongRecipe) -> Result<Vec<u8>, PackError> {
    seal_song_with_rng(key, wav, recipe, &mut OsRng)
}

/// Deterministic-RNG variant for fixtures.
pub fn seal_song_with_rng(
    key: &DeviceKey,
    wav: &[u8],
    recipe: &SongRecipe,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<u8>, PackError> {
    if recipe.region_ids.len() > MAX_REGIONS {
        return Err(PackError::TooManyRegions(recipe.region_ids.len()));
    }
    if recipe.user_ids.len() > MAX_USERS {
        return Err(PackError::TooManyUsers(recipe.user_ids.len()));
    }

    let wav_header = WavHeader::parse(wav)?;
    let pcm = &wav[WAV_HEADER_LEN..];
    if wav_header.data_len() as usize != pcm.len() {
        return Err(PackError::SizeMismatch {
            header: wav_header.data_len(),
            actual: pcm.len(),
        });
    }

    let sha256sum: [u8; 32] = Sha256::digest(pcm).into();
    let md = SongMetadata {
        sha256sum,
        owner_id: recipe.owner_id,
        region_ids: recipe.region_ids.clone(),
        user_ids: recipe.user_ids.clone(),
    };

    let cipher = SongCipher::new(key);
    let header = HeaderInfo {
        wav_header,
        metadata_size: SONG_MD_LEN as u32,
    };

    let mut out = Vec::with_capacity(wav.len() + wav.len() / SONG_CHUNK_LEN * 28 + 600);
    out.extend_from_slice(&cipher.seal_header(&header, fresh_nonce(rng))?.to_bytes());
    out.extend_from_slice(&cipher.seal_metadata(&md)?.to_bytes());

    let total = chunk_count(pcm.len() as u32);
    for index in 1..=total {
        let start = (index as usize - 1) * SONG_CHUNK_LEN;
        let end = (start + SONG_CHUNK_LEN).min(pcm.len());
        let sealed = cipher.seal_chunk(&pcm[start..end], &sha256sum, fresh_nonce(rng))?;
        out.extend_from_slice(&sealed.to_bytes());
    }

    Ok(out)
}

fn fresh_nonce(rng: &mut (impl RngCore + CryptoRng)) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    nonce
}
