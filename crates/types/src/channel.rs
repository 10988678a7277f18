//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! The command channel between the untrusted host driver and the secure
//! module.
//!
//! The original hardware couples the two cores through one raw shared-memory
//! mapping plus a GPIO doorbell interrupt. This module is the typed rendition
//! of that boundary: signal fields are atomics, payload regions are mutexes
//! over fixed-size byte blocks, and the doorbell is a condvar-backed sequence
//! counter whose lock handoff doubles as the release fence the interrupt
//! provided.
//!
//! Ownership is split across two facades over the same [`CommandChannel`]:
//!
//! - [`HostPort`]: writes `cmd`, credentials and the encrypted input
//!   regions; reads states and results. It cannot write `drm_state`.
//! - [`ModulePort`]: sole writer of `drm_state`, `buffer_offset` and every
//!   result field; reads the encrypted inputs.
//!
//! The encrypted chunk ring is double-buffered: two halves of
//! [`HALF_SLOTS`](crate::HALF_SLOTS) slots. `buffer_offset` names the half
//! the module reads next; after draining a half the module toggles it and
//! parks in WAITING_CHUNK, and the host refills half `1 - buffer_offset`.
//! The two sides therefore never touch the same half.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use zeroize::Zeroize;

use crate::command::{Command, DrmState};
use crate::{
    ENC_CHUNK_LEN, ENC_FILE_HEADER_LEN, ENC_METADATA_LEN, HALF_SLOTS, PIN_LEN, RING_SLOTS,
    SONG_CHUNK_LEN, USERNAME_LEN, WAV_HEADER_LEN,
};

/// Doorbell between the two sides: the stand-in for the cross-core GPIO
/// interrupt. `ring` bumps a sequence number under the lock and notifies;
/// waiters compare against the last sequence they observed.
struct Doorbell {
    seq: Mutex<u64>,
    cv: Condvar,
}

impl Doorbell {
    fn new() -> Self {
        Doorbell {
            seq: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn ring(&self) {
        let mut seq = self.seq.lock();
        *seq += 1;
        self.cv.notify_all();
    }

    /// Block until the sequence moves past `seen`; returns the new value.
    fn wait(&self, seen: u64) -> u64 {
        let mut seq = self.seq.lock();
        while *seq == seen {
            self.cv.wait(&mut seq);
        }
        *seq
    }

    /// Non-blocking check for a new ring since `seen`.
    fn poll(&self, seen: u64) -> Option<u64> {
        let seq = self.seq.lock();
        if *seq != seen {
            Some(*seq)
        } else {
            None
        }
    }
}

/// Typed query output region: player info or song info, depending on the
/// command that filled it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBlock {
    pub owner: String,
    pub regions: Vec<String>,
    pub users: Vec<String>,
}

/// The shared channel. Constructed zeroed, as the firmware zeroes the
/// mapped region at boot.
pub struct CommandChannel {
    cmd: AtomicU8,
    drm_state: AtomicU8,
    login_status: AtomicU8,
    share_rejected: AtomicU8,
    power_off: AtomicBool,

    metadata_size: AtomicU32,
    total_chunks: AtomicU32,
    chunk_size: AtomicU32,
    chunk_remainder: AtomicU32,
    buffer_offset: AtomicU32,

    username: Mutex<[u8; USERNAME_LEN]>,
    pin: Mutex<[u8; PIN_LEN]>,
    wav_header: Mutex<[u8; WAV_HEADER_LEN]>,
    enc_header: Mutex<[u8; ENC_FILE_HEADER_LEN]>,
    enc_metadata: Mutex<[u8; ENC_METADATA_LEN]>,
    query: Mutex<QueryBlock>,

    // Host-owned input halves and module-owned output halves of the
    // double-buffered chunk ring.
    enc_ring: [Mutex<Box<[u8]>>; 2],
    out_ring: [Mutex<Box<[u8]>>; 2],

    doorbell: Doorbell,
}

impl CommandChannel {
    fn new() -> Self {
        let enc_half = || Mutex::new(vec![0u8; HALF_SLOTS * ENC_CHUNK_LEN].into_boxed_slice());
        let out_half = || Mutex::new(vec![0u8; HALF_SLOTS * SONG_CHUNK_LEN].into_boxed_slice());
        CommandChannel {
            cmd: AtomicU8::new(0),
            drm_state: AtomicU8::new(DrmState::Stopped as u8),
            login_status: AtomicU8::new(0),
            share_rejected: AtomicU8::new(0),
            power_off: AtomicBool::new(false),
            metadata_size: AtomicU32::new(0),
            total_chunks: AtomicU32::new(0),
            chunk_size: AtomicU32::new(0),
            chunk_remainder: AtomicU32::new(0),
            buffer_offset: AtomicU32::new(0),
            username: Mutex::new([0u8; USERNAME_LEN]),
            pin: Mutex::new([0u8; PIN_LEN]),
            wav_header: Mutex::new([0u8; WAV_HEADER_LEN]),
            enc_header: Mutex::new([0u8; ENC_FILE_HEADER_LEN]),
            enc_metadata: Mutex::new([0u8; ENC_METADATA_LEN]),
            query: Mutex::new(QueryBlock::default()),
            enc_ring: [enc_half(), enc_half()],
            out_ring: [out_half(), out_half()],
            doorbell: Doorbell::new(),
        }
    }

    fn state(&self) -> DrmState {
        // The module is the sole writer and only stores valid discriminants.
        DrmState::try_from(self.drm_state.load(Ordering::Acquire)).unwrap_or(DrmState::Stopped)
    }
}

fn write_padded(dst: &mut [u8], src: &str) {
    dst.zeroize();
    let bytes = src.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn read_padded(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// Create a fresh zeroed channel and the two ports over it.
pub fn channel_pair() -> (HostPort, ModulePort) {
    let chan = Arc::new(CommandChannel::new());
    (
        HostPort {
            chan: Arc::clone(&chan),
        },
        ModulePort { chan, seen: 0 },
    )
}

/// Host-side facade. Cloneable so the REPL thread and the chunk feeder
/// thread can drive the same channel.
#[derive(Clone)]
pub struct HostPort {
    chan: Arc<CommandChannel>,
}

impl HostPort {
    /// Store a command byte and ring the doorbell.
    pub fn send(&self, cmd: Command) {
        self.chan.cmd.store(cmd as u8, Ordering::Release);
        self.chan.doorbell.ring();
    }

    /// Request the module loop to exit. Test/shutdown plumbing; not part of
    /// the device protocol.
    pub fn power_off(&self) {
        self.chan.power_off.store(true, Ordering::Release);
        self.chan.doorbell.ring();
    }

    pub fn state(&self) -> DrmState {
        self.chan.state()
    }

    pub fn login_status(&self) -> bool {
        self.chan.login_status.load(Ordering::Acquire) != 0
    }

    pub fn share_rejected(&self) -> bool {
        self.chan.share_rejected.load(Ordering::Acquire) != 0
    }

    pub fn metadata_size(&self) -> u32 {
        self.chan.metadata_size.load(Ordering::Acquire)
    }

    pub fn total_chunks(&self) -> u32 {
        self.chan.total_chunks.load(Ordering::Acquire)
    }

    pub fn chunk_size(&self) -> u32 {
        self.chan.chunk_size.load(Ordering::Acquire)
    }

    pub fn chunk_remainder(&self) -> u32 {
        self.chan.chunk_remainder.load(Ordering::Acquire)
    }

    /// Half the module reads next; the host fills `1 - buffer_offset`.
    pub fn buffer_offset(&self) -> u32 {
        self.chan.buffer_offset.load(Ordering::Acquire)
    }

    pub fn set_credentials(&self, username: &str, pin: &str) {
        write_padded(&mut self.chan.username.lock()[..], username);
        write_padded(&mut self.chan.pin.lock()[..], pin);
    }

    /// Share path: only the target username travels in the channel.
    pub fn set_username(&self, username: &str) {
        write_padded(&mut self.chan.username.lock()[..], username);
    }

    pub fn username(&self) -> String {
        read_padded(&self.chan.username.lock()[..])
    }

    pub fn pin_bytes(&self) -> [u8; PIN_LEN] {
        *self.chan.pin.lock()
    }

    pub fn username_bytes(&self) -> [u8; USERNAME_LEN] {
        *self.chan.username.lock()
    }

    pub fn load_enc_header(&self, bytes: &[u8; ENC_FILE_HEADER_LEN]) {
        self.chan.enc_header.lock().copy_from_slice(bytes);
    }

    pub fn load_enc_metadata(&self, bytes: &[u8; ENC_METADATA_LEN]) {
        self.chan.enc_metadata.lock().copy_from_slice(bytes);
    }

    /// Read back the metadata region after a share produced a rewrite.
    pub fn enc_metadata(&self) -> [u8; ENC_METADATA_LEN] {
        *self.chan.enc_metadata.lock()
    }

    pub fn wav_header(&self) -> [u8; WAV_HEADER_LEN] {
        *self.chan.wav_header.lock()
    }

    pub fn query_snapshot(&self) -> QueryBlock {
        self.chan.query.lock().clone()
    }

    /// Write one encrypted chunk into ring slot `slot` (0..RING_SLOTS).
    pub fn write_ring_slot(&self, slot: usize, bytes: &[u8]) {
        assert!(slot < RING_SLOTS, "ring slot out of range");
        assert!(bytes.len() <= ENC_CHUNK_LEN, "encrypted chunk too large");
        let mut half = self.chan.enc_ring[slot / HALF_SLOTS].lock();
        let off = (slot % HALF_SLOTS) * ENC_CHUNK_LEN;
        half[off..off + bytes.len()].copy_from_slice(bytes);
    }

    /// Read `len` plaintext bytes back out of decrypted ring slot `slot`.
    pub fn read_out_slot(&self, slot: usize, len: usize) -> Vec<u8> {
        assert!(slot < RING_SLOTS, "ring slot out of range");
        assert!(len <= SONG_CHUNK_LEN, "chunk length out of range");
        let half = self.chan.out_ring[slot / HALF_SLOTS].lock();
        let off = (slot % HALF_SLOTS) * SONG_CHUNK_LEN;
        half[off..off + len].to_vec()
    }
}

/// Module-side facade; owned by the secure module thread. Tracks the last
/// doorbell sequence it consumed, so command delivery is level-exact.
pub struct ModulePort {
    chan: Arc<CommandChannel>,
    seen: u64,
}

impl ModulePort {
    /// Park until the host rings. Returns the pending command, if the byte
    /// decodes; unknown bytes are a silent no-op per the protocol.
    pub fn wait_interrupt(&mut self) -> Option<Command> {
        self.seen = self.chan.doorbell.wait(self.seen);
        self.command()
    }

    /// Between pipeline steps: has the host rung since we last looked?
    pub fn poll_interrupt(&mut self) -> Option<Command> {
        let seq = self.chan.doorbell.poll(self.seen)?;
        self.seen = seq;
        self.command()
    }

    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.chan.cmd.load(Ordering::Acquire)).ok()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.chan.power_off.load(Ordering::Acquire)
    }

    /// Sole writer of `drm_state`.
    pub fn set_state(&self, state: DrmState) {
        self.chan.drm_state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> DrmState {
        self.chan.state()
    }

    pub fn set_login_status(&self, logged_in: bool) {
        self.chan
            .login_status
            .store(logged_in as u8, Ordering::Release);
    }

    pub fn set_share_rejected(&self, rejected: bool) {
        self.chan
            .share_rejected
            .store(rejected as u8, Ordering::Release);
    }

    pub fn publish_metadata_size(&self, size: u32) {
        self.chan.metadata_size.store(size, Ordering::Release);
    }

    pub fn publish_chunk_info(&self, total: u32, size: u32, remainder: u32) {
        self.chan.total_chunks.store(total, Ordering::Release);
        self.chan.chunk_size.store(size, Ordering::Release);
        self.chan.chunk_remainder.store(remainder, Ordering::Release);
    }

    pub fn buffer_offset(&self) -> u32 {
        self.chan.buffer_offset.load(Ordering::Acquire)
    }

    pub fn set_buffer_offset(&self, half: u32) {
        debug_assert!(half < 2);
        self.chan.buffer_offset.store(half, Ordering::Release);
    }

    pub fn credentials(&self) -> (String, String) {
        (
            read_padded(&self.chan.username.lock()[..]),
            read_padded(&self.chan.pin.lock()[..]),
        )
    }

    pub fn username(&self) -> String {
        read_padded(&self.chan.username.lock()[..])
    }

    /// Restore the session's username into the channel (epilogue of every
    /// top-level command).
    pub fn publish_username(&self, username: &str) {
        write_padded(&mut self.chan.username.lock()[..], username);
    }

    pub fn zeroize_username(&self) {
        self.chan.username.lock().zeroize();
    }

    pub fn zeroize_pin(&self) {
        self.chan.pin.lock().zeroize();
    }

    pub fn enc_header(&self) -> [u8; ENC_FILE_HEADER_LEN] {
        *self.chan.enc_header.lock()
    }

    pub fn enc_metadata(&self) -> [u8; ENC_METADATA_LEN] {
        *self.chan.enc_metadata.lock()
    }

    /// Share path: publish the rewritten metadata block for the host to
    /// splice back into the file.
    pub fn publish_enc_metadata(&self, bytes: &[u8; ENC_METADATA_LEN]) {
        self.chan.enc_metadata.lock().copy_from_slice(bytes);
    }

    pub fn publish_wav_header(&self, bytes: &[u8; WAV_HEADER_LEN]) {
        self.chan.wav_header.lock().copy_from_slice(bytes);
    }

    pub fn publish_query(&self, query: QueryBlock) {
        *self.chan.query.lock() = query;
    }

    pub fn zeroize_query(&self) {
        *self.chan.query.lock() = QueryBlock::default();
    }

    /// Copy one encrypted chunk out of ring slot `slot`.
    pub fn read_ring_slot(&self, slot: usize, len: usize) -> Vec<u8> {
        assert!(slot < RING_SLOTS, "ring slot out of range");
        assert!(len <= ENC_CHUNK_LEN, "encrypted chunk length out of range");
        let half = self.chan.enc_ring[slot / HALF_SLOTS].lock();
        let off = (slot % HALF_SLOTS) * ENC_CHUNK_LEN;
        half[off..off + len].to_vec()
    }

    /// Digital-out: place a decrypted chunk into the slot mirroring the one
    /// it was consumed from.
    pub fn write_out_slot(&self, slot: usize, pcm: &[u8]) {
        assert!(slot < RING_SLOTS, "ring slot out of range");
        assert!(pcm.len() <= SONG_CHUNK_LEN, "chunk too large");
        let mut half = self.chan.out_ring[slot / HALF_SLOTS].lock();
        let off = (slot % HALF_SLOTS) * SONG_CHUNK_LEN;
        half[off..off + pcm.len()].copy_from_slice(pcm);
    }
}
