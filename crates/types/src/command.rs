//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Command and state vocabulary for the shared channel.
//!
//! Each value travels as a single byte in the channel's signal fields. Unknown
//! bytes decode to an error; the module treats them as a no-op (protocol
//! violations are ignored, not fatal).

use crate::wire::WireError;

/// Commands the host writes into the channel before ringing the doorbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Login = 1,
    Logout = 2,
    QueryPlayer = 3,
    QuerySong = 4,
    ShareSong = 5,
    DigitalOut = 6,
    PlaySong = 7,
    ReadHeader = 8,
    ReadMetadata = 9,
    WaitForChunk = 10,
    ReadChunk = 11,
    Pause = 12,
    Play = 13,
    Restart = 14,
    Stop = 15,
}

impl TryFrom<u8> for Command {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Command::Login,
            2 => Command::Logout,
            3 => Command::QueryPlayer,
            4 => Command::QuerySong,
            5 => Command::ShareSong,
            6 => Command::DigitalOut,
            7 => Command::PlaySong,
            8 => Command::ReadHeader,
            9 => Command::ReadMetadata,
            10 => Command::WaitForChunk,
            11 => Command::ReadChunk,
            12 => Command::Pause,
            13 => Command::Play,
            14 => Command::Restart,
            15 => Command::Stop,
            _ => return Err(WireError::UnknownCommand(value)),
        })
    }
}

/// Module-owned DRM state, polled by the host to serialize commands.
///
/// Only the secure module writes this field. STOPPED and WORKING are terminal
/// for synchronous commands; the waiting states drive the streaming handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrmState {
    Stopped = 0,
    Working = 1,
    Playing = 2,
    Paused = 3,
    WaitingFileHeader = 4,
    WaitingMetadata = 5,
    WaitingChunk = 6,
    ReadingChunk = 7,
}

impl TryFrom<u8> for DrmState {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => DrmState::Stopped,
            1 => DrmState::Working,
            2 => DrmState::Playing,
            3 => DrmState::Paused,
            4 => DrmState::WaitingFileHeader,
            5 => DrmState::WaitingMetadata,
            6 => DrmState::WaitingChunk,
            7 => DrmState::ReadingChunk,
            _ => return Err(WireError::UnknownState(value)),
        })
    }
}

/// Sub-state of the streaming pipeline while a chunk pump is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Decrypt,
    Copy,
    Request,
}
