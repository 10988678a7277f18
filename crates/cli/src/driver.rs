//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! The host driver: untrusted mechanics around the secure module.
//!
//! This side owns file I/O and command sequencing; it moves ciphertext into
//! the channel, polls `drm_state` to serialize against the module, and pulls
//! results back out. Every synchronous command follows the same discipline:
//! wait for STOPPED, write parameters, write `cmd`, ring, then poll until
//! the state leaves WORKING. During playback a feeder thread keeps the
//! encrypted ring topped up.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use tonegate_core::secrets::{valid_pin, valid_username};
use tonegate_types::{
    chunk_len, Command, DrmState, HostPort, QueryBlock, ENC_CHUNK_LEN, ENC_FILE_HEADER_LEN,
    ENC_METADATA_LEN, HALF_SLOTS, NONCE_LEN, RING_SLOTS, TAG_LEN,
};

const POLL: Duration = Duration::from_micros(500);

pub struct HostDriver {
    port: HostPort,
}

impl HostDriver {
    pub fn new(port: HostPort) -> Self {
        HostDriver { port }
    }

    pub fn port(&self) -> &HostPort {
        &self.port
    }

    /// Wait for the module to be idle between commands.
    fn wait_idle(&self) {
        while self.port.state() != DrmState::Stopped {
            thread::sleep(POLL);
        }
    }

    /// Post-command barrier: give the module time to enter WORKING, then
    /// poll until it leaves.
    fn wait_settled(&self) {
        thread::sleep(Duration::from_millis(10));
        while self.port.state() == DrmState::Working {
            thread::sleep(POLL);
        }
        self.wait_idle();
    }

    fn wait_state(&self, wanted: DrmState) {
        while self.port.state() != wanted {
            thread::sleep(POLL);
        }
    }

    /// Either of two states, whichever the module reaches first.
    fn wait_either(&self, a: DrmState, b: DrmState) -> DrmState {
        loop {
            let state = self.port.state();
            if state == a || state == b {
                return state;
            }
            thread::sleep(POLL);
        }
    }

    pub fn login(&self, username: &str, pin: &str) -> Result<bool> {
        if !valid_username(username) {
            bail!("invalid username: 1..=16 characters of [A-Za-z0-9_]");
        }
        if !valid_pin(pin) {
            bail!("invalid pin: 1..=8 decimal digits");
        }
        self.wait_idle();
        self.port.set_credentials(username, pin);
        self.port.send(Command::Login);
        self.wait_settled();
        Ok(self.port.login_status())
    }

    pub fn logout(&self) -> Result<()> {
        self.wait_idle();
        self.port.send(Command::Logout);
        self.wait_settled();
        Ok(())
    }

    pub fn query_player(&self) -> Result<QueryBlock> {
        self.wait_idle();
        self.port.send(Command::QueryPlayer);
        self.wait_settled();
        Ok(self.port.query_snapshot())
    }

    pub fn query_song(&self, path: &Path) -> Result<QueryBlock> {
        let song = read_song(path)?;
        self.wait_idle();
        self.port.load_enc_metadata(&metadata_block(&song));
        self.port.send(Command::QuerySong);
        self.wait_settled();
        let query = self.port.query_snapshot();
        if query.owner.is_empty() && query.regions.is_empty() {
            bail!("song metadata could not be authenticated");
        }
        Ok(query)
    }

    /// Share a song with another user, rewriting the file in place on
    /// success. A rejected share leaves the file untouched.
    pub fn share(&self, path: &Path, username: &str) -> Result<()> {
        if !valid_username(username) {
            bail!("invalid username: 1..=16 characters of [A-Za-z0-9_]");
        }
        let song = read_song(path)?;

        self.wait_idle();
        self.port.load_enc_metadata(&metadata_block(&song));
        self.port.set_username(username);
        self.port.send(Command::ShareSong);
        self.wait_settled();

        if self.port.share_rejected() {
            bail!("share rejected");
        }

        // Splice the rewritten metadata block; header and chunks are
        // untouched. Write a sibling and rename for atomicity.
        let mut rewritten = song;
        rewritten[ENC_FILE_HEADER_LEN..ENC_FILE_HEADER_LEN + ENC_METADATA_LEN]
            .copy_from_slice(&self.port.enc_metadata());

        let tmp = path.with_extension("temp");
        fs::write(&tmp, &rewritten)
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }

    /// Decrypt a song to `<path>.dout`: the plain WAV the producer started
    /// from.
    pub fn digital_out(&self, path: &Path) -> Result<PathBuf> {
        let song = read_song(path)?;

        self.wait_idle();
        self.port.send(Command::DigitalOut);
        self.wait_state(DrmState::WaitingFileHeader);

        self.port.load_enc_header(&header_block(&song));
        self.port.send(Command::ReadHeader);
        if self.wait_either(DrmState::WaitingMetadata, DrmState::Stopped) == DrmState::Stopped {
            bail!("song header could not be authenticated");
        }

        let mut out = Vec::new();
        out.extend_from_slice(&self.port.wav_header());

        self.port.load_enc_metadata(&metadata_block(&song));
        self.port.send(Command::ReadMetadata);
        if self.wait_either(DrmState::WaitingChunk, DrmState::Stopped) == DrmState::Stopped {
            bail!("song metadata could not be authenticated");
        }

        let total = self.port.total_chunks();
        let wav_size = wav_size_from(total, self.port.chunk_size(), self.port.chunk_remainder());
        let mut feeder = FileFeeder::new(&song, total, wav_size);

        feeder.fill_slots(&self.port, 0, RING_SLOTS);
        self.port.send(Command::ReadChunk);
        while self.port.state() == DrmState::WaitingChunk {
            thread::sleep(POLL);
        }

        let mut drained: u32 = 0;
        loop {
            match self.port.state() {
                DrmState::WaitingChunk => {
                    let half = (1 - self.port.buffer_offset()) as usize;
                    for i in 0..HALF_SLOTS {
                        if drained == total {
                            break;
                        }
                        drained += 1;
                        let len = chunk_len(drained, wav_size);
                        out.extend(self.port.read_out_slot(half * HALF_SLOTS + i, len));
                    }
                    feeder.fill_slots(&self.port, half * HALF_SLOTS, HALF_SLOTS);
                    self.port.send(Command::ReadChunk);
                    while self.port.state() == DrmState::WaitingChunk {
                        thread::sleep(POLL);
                    }
                }
                DrmState::Stopped => break,
                _ => thread::sleep(POLL),
            }
        }

        // The final partial half: the module stops mid-half without
        // toggling, so the chunks sit in the half it was reading.
        let half = self.port.buffer_offset() as usize;
        let mut slot = half * HALF_SLOTS;
        while drained < total {
            drained += 1;
            let len = chunk_len(drained, wav_size);
            out.extend(self.port.read_out_slot(slot, len));
            slot += 1;
        }

        let dout = dout_path(path);
        fs::write(&dout, &out).with_context(|| format!("write {}", dout.display()))?;
        Ok(dout)
    }

    /// Start playback; returns a handle carrying the feeder thread and the
    /// in-playback controls.
    pub fn play(&self, path: &Path) -> Result<PlaybackSession> {
        let song = read_song(path)?;

        self.wait_idle();
        self.port.send(Command::PlaySong);
        self.wait_state(DrmState::WaitingFileHeader);

        let mut session = PlaybackSession {
            port: self.port.clone(),
            song: Arc::new(song),
            stop_feeder: Arc::new(AtomicBool::new(false)),
            feeder: None,
        };
        session.drive_headers()?;
        session.spawn_feeder();
        Ok(session)
    }
}

/// A song mid-playback: the feeder thread plus the fast-control surface.
pub struct PlaybackSession {
    port: HostPort,
    song: Arc<Vec<u8>>,
    stop_feeder: Arc<AtomicBool>,
    feeder: Option<thread::JoinHandle<()>>,
}

impl PlaybackSession {
    /// Push header and metadata; leaves the module in WAITING_CHUNK.
    fn drive_headers(&self) -> Result<()> {
        self.port.load_enc_header(&header_block(&self.song));
        self.port.send(Command::ReadHeader);
        loop {
            match self.port.state() {
                DrmState::WaitingMetadata => break,
                DrmState::Stopped => bail!("song header could not be authenticated"),
                _ => thread::sleep(POLL),
            }
        }

        self.port.load_enc_metadata(&metadata_block(&self.song));
        self.port.send(Command::ReadMetadata);
        loop {
            match self.port.state() {
                DrmState::WaitingChunk => return Ok(()),
                DrmState::Stopped => bail!("song metadata could not be authenticated"),
                _ => thread::sleep(POLL),
            }
        }
    }

    fn spawn_feeder(&mut self) {
        self.stop_feeder.store(false, Ordering::Release);
        let port = self.port.clone();
        let song = Arc::clone(&self.song);
        let stop = Arc::clone(&self.stop_feeder);

        let handle = thread::Builder::new()
            .name("chunk-feeder".into())
            .spawn(move || {
                let total = port.total_chunks();
                let wav_size = wav_size_from(total, port.chunk_size(), port.chunk_remainder());
                let mut feeder = FileFeeder::new(&song, total, wav_size);

                feeder.fill_slots(&port, 0, RING_SLOTS);
                port.send(Command::ReadChunk);
                while port.state() == DrmState::WaitingChunk && !stop.load(Ordering::Acquire) {
                    thread::sleep(POLL);
                }

                // Refill at most once per buffer_offset flip; a pause can
                // bounce the state back to WAITING_CHUNK for a half that
                // was already refilled.
                let mut last_refilled: Option<u32> = None;
                loop {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    match port.state() {
                        DrmState::WaitingChunk => {
                            let offset = port.buffer_offset();
                            if last_refilled != Some(offset) {
                                let half = (1 - offset) as usize;
                                feeder.fill_slots(&port, half * HALF_SLOTS, HALF_SLOTS);
                                last_refilled = Some(offset);
                            }
                            port.send(Command::ReadChunk);
                            while port.state() == DrmState::WaitingChunk
                                && !stop.load(Ordering::Acquire)
                            {
                                thread::sleep(POLL);
                            }
                        }
                        DrmState::Stopped => return,
                        _ => thread::sleep(POLL),
                    }
                }
            })
            .expect("spawn chunk feeder thread");
        self.feeder = Some(handle);
    }

    fn join_feeder(&mut self) {
        self.stop_feeder.store(true, Ordering::Release);
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
    }

    pub fn finished(&self) -> bool {
        self.port.state() == DrmState::Stopped
    }

    pub fn pause(&self) {
        self.port.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.port.send(Command::Play);
    }

    pub fn stop(&mut self) {
        self.port.send(Command::Stop);
        self.join_feeder();
        while self.port.state() != DrmState::Stopped {
            thread::sleep(POLL);
        }
    }

    /// Rewind to the top of the song: stop the feeder, bounce the module
    /// back to the header phase, and re-drive the whole handshake.
    pub fn restart(&mut self) -> Result<()> {
        self.join_feeder();
        self.port.send(Command::Restart);
        loop {
            match self.port.state() {
                DrmState::WaitingFileHeader => break,
                DrmState::Stopped => bail!("module stopped during restart"),
                _ => thread::sleep(POLL),
            }
        }
        self.drive_headers()?;
        self.spawn_feeder();
        Ok(())
    }

    /// Block until the module finishes or stops the song.
    pub fn wait_finished(&mut self) {
        while !self.finished() {
            thread::sleep(Duration::from_millis(2));
        }
        self.join_feeder();
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.join_feeder();
    }
}

/// Sequential chunk reader over an in-memory song file.
struct FileFeeder<'a> {
    song: &'a [u8],
    next: u32,
    total: u32,
    wav_size: u32,
}

impl<'a> FileFeeder<'a> {
    fn new(song: &'a [u8], total: u32, wav_size: u32) -> Self {
        FileFeeder {
            song,
            next: 1,
            total,
            wav_size,
        }
    }

    /// Copy up to `count` chunks into consecutive ring slots from `start`.
    fn fill_slots(&mut self, port: &HostPort, start: usize, count: usize) {
        for i in 0..count {
            if self.next > self.total {
                return;
            }
            let len = NONCE_LEN + TAG_LEN + chunk_len(self.next, self.wav_size);
            let off =
                ENC_FILE_HEADER_LEN + ENC_METADATA_LEN + (self.next as usize - 1) * ENC_CHUNK_LEN;
            port.write_ring_slot(start + i, &self.song[off..off + len]);
            self.next += 1;
        }
    }
}

fn read_song(path: &Path) -> Result<Vec<u8>> {
    let song = fs::read(path).with_context(|| format!("open {}", path.display()))?;
    if song.len() < ENC_FILE_HEADER_LEN + ENC_METADATA_LEN {
        bail!("{} is too short to be a protected song", path.display());
    }
    Ok(song)
}

fn header_block(song: &[u8]) -> [u8; ENC_FILE_HEADER_LEN] {
    let mut out = [0u8; ENC_FILE_HEADER_LEN];
    out.copy_from_slice(&song[..ENC_FILE_HEADER_LEN]);
    out
}

fn metadata_block(song: &[u8]) -> [u8; ENC_METADATA_LEN] {
    let mut out = [0u8; ENC_METADATA_LEN];
    out.copy_from_slice(&song[ENC_FILE_HEADER_LEN..ENC_FILE_HEADER_LEN + ENC_METADATA_LEN]);
    out
}

/// Reconstruct the PCM byte count from the published chunk geometry.
fn wav_size_from(total: u32, chunk_size: u32, remainder: u32) -> u32 {
    if total == 0 {
        0
    } else if remainder == 0 {
        total * chunk_size
    } else {
        (total - 1) * chunk_size + remainder
    }
}

/// `song.drm` → `song.drm.dout`.
fn dout_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".dout");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_size_reconstruction() {
        assert_eq!(wav_size_from(0, 16000, 0), 0);
        assert_eq!(wav_size_from(3, 16000, 0), 48_000);
        assert_eq!(wav_size_from(3, 16000, 500), 32_500);
    }

    #[test]
    fn test_dout_path_appends_suffix() {
        assert_eq!(
            dout_path(Path::new("/tmp/song.drm")),
            PathBuf::from("/tmp/song.drm.dout")
        );
    }
}
