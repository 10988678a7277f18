//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Host-side driver library for the tonegate CLI: command sequencing, the
//! playback feeder, song file rewrites, and the REPL.

pub mod driver;
pub mod repl;

pub use driver::{HostDriver, PlaybackSession};
