//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Share rewrite: append one authorized user to a song's metadata and
//! re-seal the block.
//!
//! The rewrite is surgical. `sha256sum`, `owner_id`, the region list and
//! every existing user are byte-preserved; only the user count and the new
//! tail slot change. Because chunk authentication binds to `sha256sum`
//! alone, the header and every chunk of the file remain valid untouched;
//! the host splices the new 450-byte metadata block in place and is done.

use tonegate_types::{EncMetadata, SongMetadata, MAX_USERS};

use crate::envelope::{EnvelopeError, SongCipher};

/// Copy `md` with `new_uid` appended to the user list.
///
/// Authorization (ownership, duplicates, capacity) is the policy engine's
/// job; this only guards the hard capacity invariant.
pub fn with_added_user(md: &SongMetadata, new_uid: u32) -> SongMetadata {
    debug_assert!(md.user_ids.len() < MAX_USERS);
    let mut out = md.clone();
    out.user_ids.push(new_uid);
    out
}

/// Build the replacement encrypted metadata block for a granted share.
pub fn reshare_metadata(
    cipher: &SongCipher,
    md: &SongMetadata,
    new_uid: u32,
) -> Result<(SongMetadata, EncMetadata), EnvelopeError> {
    let updated = with_added_user(md, new_uid);
    let sealed = cipher.seal_metadata(&updated)?;
    Ok((updated, sealed))
}
