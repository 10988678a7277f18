//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Integration tests for the streaming pipeline over a live channel: a
//! secure module on its own thread, this test acting as the host driver.

use std::thread;
use std::time::{Duration, Instant};

use tonegate_core::secrets::hash_pin;
use tonegate_core::{seal_song, spawn_module, CaptureSink, DeviceSecrets, SongRecipe};
use tonegate_types::{
    chunk_count, chunk_len, Command, DrmState, HostPort, ENC_CHUNK_LEN, ENC_FILE_HEADER_LEN,
    ENC_METADATA_LEN, HALF_SLOTS, NONCE_LEN, PREVIEW_LEN, RING_SLOTS, SONG_CHUNK_LEN, TAG_LEN,
    WAV_HEADER_LEN,
};

fn secrets() -> DeviceSecrets {
    let alice = hex::encode(hash_pin("1234", "s1"));
    let bob = hex::encode(hash_pin("5678", "s2"));
    DeviceSecrets::from_json(&format!(
        r#"{{
            "device_key": "{}",
            "users": [
                {{"uid": 1, "username": "alice", "pin_hash": "{alice}", "salt": "s1"}},
                {{"uid": 2, "username": "bob", "pin_hash": "{bob}", "salt": "s2"}}
            ],
            "regions": [{{"id": 10, "name": "United States"}}],
            "provisioned_users": [1, 2],
            "provisioned_regions": [10]
        }}"#,
        "ab".repeat(32)
    ))
    .unwrap()
}

fn patterned_wav(pcm_len: usize) -> Vec<u8> {
    let mut out = tonegate_types::WavHeader::for_pcm(pcm_len as u32).0.to_vec();
    out.extend((0..pcm_len).map(|i| (i * 7 % 253) as u8));
    out
}

fn make_song(pcm_len: usize, regions: Vec<u32>) -> (Vec<u8>, Vec<u8>) {
    let wav = patterned_wav(pcm_len);
    let recipe = SongRecipe {
        owner_id: 1,
        region_ids: regions,
        user_ids: vec![],
    };
    let song = seal_song(secrets().key(), &wav, &recipe).unwrap();
    (song, wav[WAV_HEADER_LEN..].to_vec())
}

/// Byte offset of 1-based chunk `index` inside a song file.
fn chunk_offset(index: u32) -> usize {
    ENC_FILE_HEADER_LEN + ENC_METADATA_LEN + (index as usize - 1) * ENC_CHUNK_LEN
}

fn wait_for<F: FnMut() -> bool>(mut cond: F, what: &str) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(30),
            "timed out waiting for {what}"
        );
        thread::sleep(Duration::from_micros(500));
    }
}

/// Host side of the streaming handshake up to WAITING_CHUNK. Returns false
/// if the module stopped early (authentication failure).
fn start_stream(host: &HostPort, song: &[u8], cmd: Command) -> bool {
    host.send(cmd);
    wait_for(
        || host.state() == DrmState::WaitingFileHeader,
        "waiting-file-header",
    );

    let mut header = [0u8; ENC_FILE_HEADER_LEN];
    header.copy_from_slice(&song[..ENC_FILE_HEADER_LEN]);
    host.load_enc_header(&header);
    host.send(Command::ReadHeader);
    wait_for(
        || matches!(host.state(), DrmState::WaitingMetadata | DrmState::Stopped),
        "header verdict",
    );
    if host.state() == DrmState::Stopped {
        return false;
    }

    let mut md = [0u8; ENC_METADATA_LEN];
    md.copy_from_slice(&song[ENC_FILE_HEADER_LEN..ENC_FILE_HEADER_LEN + ENC_METADATA_LEN]);
    host.load_enc_metadata(&md);
    host.send(Command::ReadMetadata);
    wait_for(
        || matches!(host.state(), DrmState::WaitingChunk | DrmState::Stopped),
        "metadata verdict",
    );
    host.state() == DrmState::WaitingChunk
}

/// Feed every chunk through the ring until the module stops. Returns the
/// sequence of `buffer_offset` values observed at each half-drain.
fn feed_chunks(host: &HostPort, song: &[u8], wav_size: u32) -> Vec<u32> {
    let total = host.total_chunks();
    let mut next: u32 = 1;
    let mut offsets = Vec::new();

    for slot in 0..RING_SLOTS {
        if next > total {
            break;
        }
        let len = NONCE_LEN + TAG_LEN + chunk_len(next, wav_size);
        let off = chunk_offset(next);
        host.write_ring_slot(slot, &song[off..off + len]);
        next += 1;
    }
    host.send(Command::ReadChunk);
    wait_for(
        || host.state() != DrmState::WaitingChunk,
        "pump start",
    );

    loop {
        match host.state() {
            DrmState::WaitingChunk => {
                offsets.push(host.buffer_offset());
                let half = (1 - host.buffer_offset()) as usize;
                for i in 0..HALF_SLOTS {
                    if next > total {
                        break;
                    }
                    let len = NONCE_LEN + TAG_LEN + chunk_len(next, wav_size);
                    let off = chunk_offset(next);
                    host.write_ring_slot(half * HALF_SLOTS + i, &song[off..off + len]);
                    next += 1;
                }
                host.send(Command::ReadChunk);
                wait_for(
                    || host.state() != DrmState::WaitingChunk,
                    "pump resume",
                );
            }
            DrmState::Stopped => return offsets,
            _ => thread::sleep(Duration::from_micros(500)),
        }
    }
}

fn login(host: &HostPort, user: &str, pin: &str) {
    host.set_credentials(user, pin);
    host.send(Command::Login);
    wait_for(|| host.state() == DrmState::Stopped && host.login_status(), "login");
}

#[test]
fn test_owner_in_region_plays_full_song() {
    // 75 chunks: two full ring halves plus a partial one, short final chunk.
    let pcm_len = 74 * SONG_CHUNK_LEN + 5_000;
    let (song, pcm) = make_song(pcm_len, vec![10]);

    let (sink, captured) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(start_stream(&host, &song, Command::PlaySong));
    assert_eq!(host.total_chunks(), chunk_count(pcm_len as u32));
    let offsets = feed_chunks(&host, &song, pcm_len as u32);

    // Bit-identical PCM out of the producer's input.
    assert_eq!(*captured.lock(), pcm);

    // buffer_offset alternates across successive half-drains.
    for pair in offsets.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_foreign_region_gets_exactly_preview() {
    // 190 chunks: larger than the 180-chunk preview allowance.
    let pcm_len = 190 * SONG_CHUNK_LEN;
    let (song, pcm) = make_song(pcm_len, vec![99]);

    let (sink, captured) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    // Even the owner only gets the preview outside provisioned regions.
    login(&host, "alice", "1234");
    assert!(start_stream(&host, &song, Command::PlaySong));
    feed_chunks(&host, &song, pcm_len as u32);

    let captured = captured.lock();
    assert_eq!(captured.len(), PREVIEW_LEN);
    assert_eq!(*captured, pcm[..PREVIEW_LEN]);

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_logged_out_session_gets_preview() {
    let pcm_len = 185 * SONG_CHUNK_LEN;
    let (song, _) = make_song(pcm_len, vec![10]);

    let (sink, captured) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    assert!(start_stream(&host, &song, Command::PlaySong));
    feed_chunks(&host, &song, pcm_len as u32);
    assert_eq!(captured.lock().len(), PREVIEW_LEN);

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_tampered_chunk_stops_playback_cold() {
    let pcm_len = 10 * SONG_CHUNK_LEN;
    let (mut song, pcm) = make_song(pcm_len, vec![10]);

    // Flip one bit in the tag of chunk 3.
    let tag_off = chunk_offset(3) + NONCE_LEN;
    song[tag_off] ^= 0x01;

    let (sink, captured) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(start_stream(&host, &song, Command::PlaySong));
    feed_chunks(&host, &song, pcm_len as u32);

    // Chunks 1 and 2 played; nothing from chunk 3 onward.
    let captured = captured.lock();
    assert_eq!(captured.len(), 2 * SONG_CHUNK_LEN);
    assert_eq!(*captured, pcm[..2 * SONG_CHUNK_LEN]);
    assert_eq!(host.state(), DrmState::Stopped);

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_tampered_header_rejected() {
    let (mut song, _) = make_song(SONG_CHUNK_LEN, vec![10]);
    song[NONCE_LEN] ^= 0x80; // inside the header ciphertext

    let (sink, captured) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    assert!(!start_stream(&host, &song, Command::PlaySong));
    assert!(captured.lock().is_empty());

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_tampered_metadata_rejected() {
    let (mut song, _) = make_song(SONG_CHUNK_LEN, vec![10]);
    song[ENC_FILE_HEADER_LEN + NONCE_LEN] ^= 0x01; // metadata tag byte

    let (sink, captured) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    assert!(!start_stream(&host, &song, Command::PlaySong));
    assert!(captured.lock().is_empty());

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_digital_out_recovers_bit_identical_pcm() {
    // Exercises refills plus the host-side final-half drain.
    let pcm_len = 37 * SONG_CHUNK_LEN + 123;
    let (song, pcm) = make_song(pcm_len, vec![10]);

    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(start_stream(&host, &song, Command::DigitalOut));

    let total = host.total_chunks();
    let remainder = host.chunk_remainder();
    let wav_size = pcm_len as u32;

    let mut next: u32 = 1;
    let mut out: Vec<u8> = Vec::with_capacity(pcm_len);

    for slot in 0..RING_SLOTS {
        if next > total {
            break;
        }
        let len = NONCE_LEN + TAG_LEN + chunk_len(next, wav_size);
        let off = chunk_offset(next);
        host.write_ring_slot(slot, &song[off..off + len]);
        next += 1;
    }
    host.send(Command::ReadChunk);
    wait_for(|| host.state() != DrmState::WaitingChunk, "pump start");

    let mut drained: u32 = 0;
    loop {
        match host.state() {
            DrmState::WaitingChunk => {
                // The just-drained half holds thirty decrypted chunks.
                let half = (1 - host.buffer_offset()) as usize;
                for i in 0..HALF_SLOTS {
                    drained += 1;
                    let len = chunk_len(drained, wav_size);
                    out.extend(host.read_out_slot(half * HALF_SLOTS + i, len));
                }
                for i in 0..HALF_SLOTS {
                    if next > total {
                        break;
                    }
                    let len = NONCE_LEN + TAG_LEN + chunk_len(next, wav_size);
                    let off = chunk_offset(next);
                    host.write_ring_slot(half * HALF_SLOTS + i, &song[off..off + len]);
                    next += 1;
                }
                host.send(Command::ReadChunk);
                wait_for(|| host.state() != DrmState::WaitingChunk, "pump resume");
            }
            DrmState::Stopped => break,
            _ => thread::sleep(Duration::from_micros(500)),
        }
    }

    // Final partial half: the module stopped mid-half without toggling.
    let last_chunks = if total % HALF_SLOTS as u32 == 0 {
        HALF_SLOTS as u32
    } else {
        total % HALF_SLOTS as u32
    };
    let half = host.buffer_offset() as usize;
    for i in 0..last_chunks {
        drained += 1;
        let len = chunk_len(drained, wav_size);
        out.extend(host.read_out_slot(half * HALF_SLOTS + i as usize, len));
    }

    assert_eq!(drained, total);
    assert_eq!(remainder as usize, 123);
    assert_eq!(out, pcm);

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_digital_out_small_song_single_half() {
    // Fewer chunks than one ring half: the module stops without ever
    // requesting a refill and the host drains everything after the fact.
    let pcm_len = 3 * SONG_CHUNK_LEN + 777;
    let (song, pcm) = make_song(pcm_len, vec![10]);

    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(start_stream(&host, &song, Command::DigitalOut));

    let total = host.total_chunks();
    let wav_size = pcm_len as u32;
    for index in 1..=total {
        let len = NONCE_LEN + TAG_LEN + chunk_len(index, wav_size);
        let off = chunk_offset(index);
        host.write_ring_slot(index as usize - 1, &song[off..off + len]);
    }
    host.send(Command::ReadChunk);
    wait_for(|| host.state() == DrmState::Stopped, "digital out");

    let mut out = Vec::new();
    for index in 1..=total {
        out.extend(host.read_out_slot(index as usize - 1, chunk_len(index, wav_size)));
    }
    assert_eq!(out, pcm);

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_stop_command_halts_pump() {
    let pcm_len = 100 * SONG_CHUNK_LEN;
    let (song, _) = make_song(pcm_len, vec![10]);

    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(start_stream(&host, &song, Command::PlaySong));

    // Feed one ring's worth, then stop instead of refilling.
    let wav_size = pcm_len as u32;
    for slot in 0..RING_SLOTS {
        let index = slot as u32 + 1;
        let len = NONCE_LEN + TAG_LEN + chunk_len(index, wav_size);
        let off = chunk_offset(index);
        host.write_ring_slot(slot, &song[off..off + len]);
    }
    host.send(Command::ReadChunk);
    wait_for(|| host.state() == DrmState::WaitingChunk, "first half drained");

    host.send(Command::Stop);
    wait_for(|| host.state() == DrmState::Stopped, "stop");

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_pause_and_resume_during_playback() {
    let pcm_len = 100 * SONG_CHUNK_LEN;
    let (song, pcm) = make_song(pcm_len, vec![10]);

    let (sink, captured) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(start_stream(&host, &song, Command::PlaySong));

    let wav_size = pcm_len as u32;
    let total = host.total_chunks();
    let mut next: u32 = 1;
    for slot in 0..RING_SLOTS {
        let len = NONCE_LEN + TAG_LEN + chunk_len(next, wav_size);
        let off = chunk_offset(next);
        host.write_ring_slot(slot, &song[off..off + len]);
        next += 1;
    }
    host.send(Command::ReadChunk);
    wait_for(|| host.state() != DrmState::WaitingChunk, "pump start");

    host.send(Command::Pause);
    wait_for(|| host.state() == DrmState::Paused, "pause");
    let frozen = captured.lock().len();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(captured.lock().len(), frozen, "paused module kept playing");

    host.send(Command::Play);
    wait_for(|| host.state() != DrmState::Paused, "resume");

    // Finish the song.
    loop {
        match host.state() {
            DrmState::WaitingChunk => {
                let half = (1 - host.buffer_offset()) as usize;
                for i in 0..HALF_SLOTS {
                    if next > total {
                        break;
                    }
                    let len = NONCE_LEN + TAG_LEN + chunk_len(next, wav_size);
                    let off = chunk_offset(next);
                    host.write_ring_slot(half * HALF_SLOTS + i, &song[off..off + len]);
                    next += 1;
                }
                host.send(Command::ReadChunk);
                wait_for(|| host.state() != DrmState::WaitingChunk, "pump resume");
            }
            DrmState::Stopped => break,
            _ => thread::sleep(Duration::from_micros(500)),
        }
    }

    assert_eq!(*captured.lock(), pcm);

    host.power_off();
    handle.join().unwrap();
}
