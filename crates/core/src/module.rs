//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! The secure module: a single-threaded cooperative command loop with
//! exclusive custody of the device key and the session.
//!
//! One command runs to completion per doorbell ring. The epilogue of every
//! top-level command restores the session identity into the channel,
//! zeroizes the pin field, and returns the state to STOPPED, the terminal
//! state the host serializes against. Unknown or out-of-place commands are
//! dropped by the default dispatch arm.

use std::thread;
use std::time::Duration;

use tonegate_types::{
    channel_pair, Command, DrmState, EncMetadata, HostPort, ModulePort, QueryBlock,
};

use crate::envelope::SongCipher;
use crate::pipeline::{StreamMode, StreamPipeline};
use crate::policy::authorize_share;
use crate::secrets::DeviceSecrets;
use crate::session::Session;
use crate::share::reshare_metadata;
use crate::sink::AudioSink;

pub struct SecureModule {
    port: ModulePort,
    secrets: DeviceSecrets,
    cipher: SongCipher,
    session: Option<Session>,
    sink: Box<dyn AudioSink>,
}

impl SecureModule {
    pub fn new(port: ModulePort, secrets: DeviceSecrets, sink: Box<dyn AudioSink>) -> Self {
        let cipher = SongCipher::new(secrets.key());
        SecureModule {
            port,
            secrets,
            cipher,
            session: None,
            sink,
        }
    }

    /// Handle commands until the host powers the module off.
    pub fn run(mut self) {
        self.port.set_state(DrmState::Stopped);
        loop {
            let cmd = self.port.wait_interrupt();
            if self.port.shutdown_requested() {
                return;
            }
            let Some(cmd) = cmd else {
                continue; // unknown byte: protocol violation, ignored
            };

            self.port.set_state(DrmState::Working);
            match cmd {
                Command::Login => self.login(),
                Command::Logout => self.logout(),
                Command::QueryPlayer => self.query_player(),
                Command::QuerySong => self.query_song(),
                Command::ShareSong => self.share_song(),
                Command::PlaySong => self.play_song(),
                Command::DigitalOut => self.digital_out(),
                _ => {} // streaming sub-commands are only valid mid-pipeline
            }

            // Epilogue: the channel reflects the session, never the attempt.
            match &self.session {
                Some(s) => {
                    self.port.publish_username(&s.username);
                    self.port.set_login_status(true);
                }
                None => {
                    self.port.zeroize_username();
                    self.port.set_login_status(false);
                }
            }
            self.port.zeroize_pin();

            // Let the host's poll observe WORKING before the terminal state.
            thread::sleep(Duration::from_micros(500));
            self.port.set_state(DrmState::Stopped);
        }
    }

    fn login(&mut self) {
        if self.session.is_some() {
            // A live session wins; its identity is restored in the epilogue.
            return;
        }
        let (username, pin) = self.port.credentials();
        match Session::authenticate(&self.secrets, &username, &pin) {
            Some(session) => self.session = Some(session),
            None => {
                self.port.zeroize_username();
                self.port.zeroize_pin();
            }
        }
    }

    fn logout(&mut self) {
        self.session = None;
    }

    fn query_player(&mut self) {
        self.port.publish_query(QueryBlock {
            owner: String::new(),
            regions: self.secrets.provisioned_region_names(),
            users: self.secrets.provisioned_usernames(),
        });
    }

    fn query_song(&mut self) {
        let opened = EncMetadata::from_bytes(&self.port.enc_metadata())
            .map_err(|_| ())
            .and_then(|block| self.cipher.open_metadata(&block).map_err(|_| ()));
        match opened {
            Ok(md) => {
                self.port.publish_query(QueryBlock {
                    owner: self.secrets.username_or_placeholder(md.owner_id).to_string(),
                    regions: md
                        .region_ids
                        .iter()
                        .map(|&rid| self.secrets.region_name_or_placeholder(rid).to_string())
                        .collect(),
                    users: md
                        .user_ids
                        .iter()
                        .map(|&uid| self.secrets.username_or_placeholder(uid).to_string())
                        .collect(),
                });
            }
            Err(()) => {
                // Authentication failure: the host gets a zeroed response.
                self.port.zeroize_query();
            }
        }
    }

    fn share_song(&mut self) {
        let target = self.port.username();

        let md = match EncMetadata::from_bytes(&self.port.enc_metadata())
            .map_err(|_| ())
            .and_then(|block| self.cipher.open_metadata(&block).map_err(|_| ()))
        {
            Ok(md) => md,
            Err(()) => {
                self.port.set_share_rejected(true);
                return;
            }
        };

        match authorize_share(self.session.as_ref(), &md, &self.secrets, &target) {
            Ok(target_uid) => match reshare_metadata(&self.cipher, &md, target_uid) {
                Ok((_, sealed)) => {
                    self.port.publish_enc_metadata(&sealed.to_bytes());
                    self.port.set_share_rejected(false);
                }
                Err(_) => self.port.set_share_rejected(true),
            },
            Err(_) => self.port.set_share_rejected(true),
        }
    }

    fn play_song(&mut self) {
        let mut mode = StreamMode::Playback {
            sink: self.sink.as_mut(),
        };
        StreamPipeline {
            port: &mut self.port,
            cipher: &self.cipher,
            secrets: &self.secrets,
            session: self.session.as_ref(),
        }
        .run(&mut mode);
    }

    fn digital_out(&mut self) {
        let mut mode = StreamMode::DigitalOut;
        StreamPipeline {
            port: &mut self.port,
            cipher: &self.cipher,
            secrets: &self.secrets,
            session: self.session.as_ref(),
        }
        .run(&mut mode);
    }
}

/// Boot a secure module on its own thread over a fresh channel. Returns the
/// host port and the thread handle; `HostPort::power_off` ends the loop.
pub fn spawn_module(
    secrets: DeviceSecrets,
    sink: Box<dyn AudioSink>,
) -> (HostPort, thread::JoinHandle<()>) {
    let (host, module_port) = channel_pair();
    let module = SecureModule::new(module_port, secrets, sink);
    let handle = thread::Builder::new()
        .name("secure-module".into())
        .spawn(move || module.run())
        .expect("spawn secure module thread");
    (host, handle)
}
