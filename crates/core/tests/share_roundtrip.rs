//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Share rewrite over a live channel: authorization, the bit-exact metadata
//! splice, and the laws about what a share may and may not change.

use std::thread;
use std::time::{Duration, Instant};

use tonegate_core::secrets::hash_pin;
use tonegate_core::{seal_song, spawn_module, CaptureSink, DeviceSecrets, SongCipher, SongRecipe};
use tonegate_types::{
    chunk_count, chunk_len, Command, DrmState, EncChunk, EncMetadata, HostPort,
    ENC_CHUNK_LEN, ENC_FILE_HEADER_LEN, ENC_METADATA_LEN, NONCE_LEN, SONG_CHUNK_LEN, TAG_LEN,
};

fn secrets() -> DeviceSecrets {
    let alice = hex::encode(hash_pin("1234", "s1"));
    let bob = hex::encode(hash_pin("5678", "s2"));
    let carol = hex::encode(hash_pin("2468", "s3"));
    DeviceSecrets::from_json(&format!(
        r#"{{
            "device_key": "{}",
            "users": [
                {{"uid": 1, "username": "alice", "pin_hash": "{alice}", "salt": "s1"}},
                {{"uid": 2, "username": "bob", "pin_hash": "{bob}", "salt": "s2"}},
                {{"uid": 7, "username": "carol", "pin_hash": "{carol}", "salt": "s3"}}
            ],
            "regions": [{{"id": 10, "name": "United States"}}],
            "provisioned_users": [1, 2, 7],
            "provisioned_regions": [10]
        }}"#,
        "ab".repeat(32)
    ))
    .unwrap()
}

fn make_song(pcm_len: usize) -> Vec<u8> {
    let mut wav = tonegate_types::WavHeader::for_pcm(pcm_len as u32).0.to_vec();
    wav.extend((0..pcm_len).map(|i| (i % 241) as u8));
    seal_song(
        secrets().key(),
        &wav,
        &SongRecipe {
            owner_id: 1,
            region_ids: vec![10],
            user_ids: vec![2],
        },
    )
    .unwrap()
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

fn settle(host: &HostPort) {
    // Observe the WORKING window pass after a synchronous command.
    thread::sleep(Duration::from_millis(25));
    wait_for(|| host.state() == DrmState::Stopped, "command settle");
}

fn login(host: &HostPort, user: &str, pin: &str) {
    host.set_credentials(user, pin);
    host.send(Command::Login);
    wait_for(|| host.login_status(), "login");
    settle(host);
}

fn metadata_block(song: &[u8]) -> [u8; ENC_METADATA_LEN] {
    let mut out = [0u8; ENC_METADATA_LEN];
    out.copy_from_slice(&song[ENC_FILE_HEADER_LEN..ENC_FILE_HEADER_LEN + ENC_METADATA_LEN]);
    out
}

/// Drive ENC_SHARE; on success, splice the rewritten metadata into a copy of
/// the file the way the host driver rewrites songs on disk.
fn share(host: &HostPort, song: &[u8], username: &str) -> Result<Vec<u8>, ()> {
    host.load_enc_metadata(&metadata_block(song));
    host.set_username(username);
    host.send(Command::ShareSong);
    settle(host);
    if host.share_rejected() {
        return Err(());
    }
    let mut out = song.to_vec();
    out[ENC_FILE_HEADER_LEN..ENC_FILE_HEADER_LEN + ENC_METADATA_LEN]
        .copy_from_slice(&host.enc_metadata());
    Ok(out)
}

#[test]
fn test_share_appends_exactly_one_user() {
    let song = make_song(2 * SONG_CHUNK_LEN + 100);
    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    let shared = share(&host, &song, "carol").expect("owner share should pass");

    // Only the metadata block changed.
    assert_eq!(shared[..ENC_FILE_HEADER_LEN], song[..ENC_FILE_HEADER_LEN]);
    assert_eq!(
        shared[ENC_FILE_HEADER_LEN + ENC_METADATA_LEN..],
        song[ENC_FILE_HEADER_LEN + ENC_METADATA_LEN..]
    );
    assert_ne!(
        shared[ENC_FILE_HEADER_LEN..ENC_FILE_HEADER_LEN + ENC_METADATA_LEN],
        song[ENC_FILE_HEADER_LEN..ENC_FILE_HEADER_LEN + ENC_METADATA_LEN]
    );

    // Decrypt both blocks and compare field by field.
    let cipher = SongCipher::new(secrets().key());
    let before = cipher
        .open_metadata(&EncMetadata::from_bytes(&metadata_block(&song)).unwrap())
        .unwrap();
    let after = cipher
        .open_metadata(&EncMetadata::from_bytes(&metadata_block(&shared)).unwrap())
        .unwrap();

    assert_eq!(after.sha256sum, before.sha256sum);
    assert_eq!(after.owner_id, before.owner_id);
    assert_eq!(after.region_ids, before.region_ids);
    assert_eq!(after.user_ids.len(), before.user_ids.len() + 1);
    assert_eq!(after.user_ids[..before.user_ids.len()], before.user_ids[..]);
    assert_eq!(*after.user_ids.last().unwrap(), 7);

    // Every chunk of the rewritten file still authenticates.
    let wav_size = (2 * SONG_CHUNK_LEN + 100) as u32;
    let base = ENC_FILE_HEADER_LEN + ENC_METADATA_LEN;
    for index in 1..=chunk_count(wav_size) {
        let ct_len = chunk_len(index, wav_size);
        let off = base + (index as usize - 1) * ENC_CHUNK_LEN;
        let chunk =
            EncChunk::from_bytes(&shared[off..off + NONCE_LEN + TAG_LEN + ct_len], ct_len).unwrap();
        assert!(cipher.open_chunk(&chunk, &after.sha256sum).is_ok());
    }

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_share_already_shared_is_rejected_idempotently() {
    let song = make_song(SONG_CHUNK_LEN);
    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    // bob already appears in the song's user list.
    assert!(share(&host, &song, "bob").is_err());

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_share_requires_owner_session() {
    let song = make_song(SONG_CHUNK_LEN);
    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    // No session at all.
    assert!(share(&host, &song, "carol").is_err());

    // A session that is not the owner.
    login(&host, "bob", "5678");
    assert!(share(&host, &song, "carol").is_err());

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_share_with_owner_is_rejected() {
    let song = make_song(SONG_CHUNK_LEN);
    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(share(&host, &song, "alice").is_err());

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_share_tampered_metadata_is_rejected() {
    let mut song = make_song(SONG_CHUNK_LEN);
    song[ENC_FILE_HEADER_LEN + 2] ^= 0x10; // nonce byte of the metadata block

    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    login(&host, "alice", "1234");
    assert!(share(&host, &song, "carol").is_err());

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_query_song_reports_owner_regions_users() {
    let song = make_song(SONG_CHUNK_LEN);
    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    host.load_enc_metadata(&metadata_block(&song));
    host.send(Command::QuerySong);
    settle(&host);

    let q = host.query_snapshot();
    assert_eq!(q.owner, "alice");
    assert_eq!(q.regions, vec!["United States".to_string()]);
    assert_eq!(q.users, vec!["bob".to_string()]);

    host.power_off();
    handle.join().unwrap();
}

#[test]
fn test_query_song_zeroed_on_bad_metadata() {
    let song = make_song(SONG_CHUNK_LEN);
    let mut tampered = song.clone();
    tampered[ENC_FILE_HEADER_LEN + NONCE_LEN + 3] ^= 0x01; // tag byte

    let (sink, _) = CaptureSink::new();
    let (host, handle) = spawn_module(secrets(), Box::new(sink));

    // Populate the query block first so the zeroing is observable.
    host.load_enc_metadata(&metadata_block(&song));
    host.send(Command::QuerySong);
    settle(&host);
    assert!(!host.query_snapshot().owner.is_empty());

    host.load_enc_metadata(&metadata_block(&tampered));
    host.send(Command::QuerySong);
    settle(&host);

    let q = host.query_snapshot();
    assert!(q.owner.is_empty());
    assert!(q.regions.is_empty());
    assert!(q.users.is_empty());

    host.power_off();
    handle.join().unwrap();
}
