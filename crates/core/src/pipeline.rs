//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! The streaming decryption pipeline.
//!
//! One run services a whole PLAY_SONG or DIGITAL_OUT command: the
//! header/metadata handshake, then the Decrypt → Copy → Request chunk pump
//! over the double-buffered ring. The module consumes ring slots
//! monotonically within its half; after thirty slots it toggles
//! `buffer_offset`, parks in WAITING_CHUNK and waits for the host to refill
//! the other half.
//!
//! Policy is consulted exactly once per song, immediately before the first
//! decrypted chunk is released. Preview access throttles playback to
//! [`PREVIEW_LEN`] bytes; digital out never gates (source-faithful
//! behavior). Any authentication failure stops the pipeline on the spot:
//! the failed chunk contributes no plaintext to the sink or the out ring.

use std::thread;
use std::time::Duration;

use tonegate_types::{
    chunk_count, chunk_len, Command, DrmState, EncChunk, EncFileHeader, EncMetadata, HeaderInfo,
    ModulePort, PlayState, SongMetadata, DMA_SUB_CHUNK, FIFO_CAP, FIFO_HEADROOM, HALF_SLOTS,
    NONCE_LEN, SONG_MD_LEN, TAG_LEN,
};

use crate::envelope::SongCipher;
use crate::policy::{playback_access, Access};
use crate::secrets::DeviceSecrets;
use crate::session::Session;
use crate::sink::AudioSink;

/// Where decrypted chunks go.
pub enum StreamMode<'a> {
    /// Feed the audio sink, honoring the preview gate.
    Playback { sink: &'a mut dyn AudioSink },
    /// Mirror plaintext into the decrypted ring for the host to persist.
    DigitalOut,
}

/// How a pipeline run ended. Both arms leave `drm_state == Stopped`; the
/// distinction is for the module's log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Every chunk (or the preview allowance) was emitted.
    Finished,
    /// STOP, shutdown, or an authentication failure cut the run short.
    Stopped,
}

enum PumpExit {
    Finished,
    Stopped,
    Restart,
}

pub struct StreamPipeline<'a> {
    pub port: &'a mut ModulePort,
    pub cipher: &'a SongCipher,
    pub secrets: &'a DeviceSecrets,
    pub session: Option<&'a Session>,
}

impl<'a> StreamPipeline<'a> {
    /// Run the full pipeline for one command. RESTART loops back to the
    /// header phase without leaving the command.
    pub fn run(&mut self, mode: &mut StreamMode<'_>) -> StreamEnd {
        loop {
            self.port.set_state(DrmState::WaitingFileHeader);

            let Some(header) = self.header_phase() else {
                return StreamEnd::Stopped;
            };
            let Some(md) = self.metadata_phase(&header) else {
                return StreamEnd::Stopped;
            };

            match self.pump(&header, &md, mode) {
                PumpExit::Finished => return StreamEnd::Finished,
                PumpExit::Stopped => return StreamEnd::Stopped,
                PumpExit::Restart => {
                    // Let the host observe the transition before it starts
                    // re-driving the header.
                    thread::sleep(Duration::from_micros(500));
                    continue;
                }
            }
        }
    }

    /// Wait for READ_HEADER and authenticate the file header envelope.
    fn header_phase(&mut self) -> Option<HeaderInfo> {
        loop {
            let cmd = self.port.wait_interrupt();
            if self.port.shutdown_requested() {
                self.port.set_state(DrmState::Stopped);
                return None;
            }
            match cmd {
                Some(Command::ReadHeader) => {
                    self.port.set_state(DrmState::Working);
                    let block = match EncFileHeader::from_bytes(&self.port.enc_header()) {
                        Ok(b) => b,
                        Err(_) => {
                            self.port.set_state(DrmState::Stopped);
                            return None;
                        }
                    };
                    match self.cipher.open_header(&block) {
                        Ok(info) => {
                            if info.metadata_size as usize != SONG_MD_LEN {
                                self.port.set_state(DrmState::Stopped);
                                return None;
                            }
                            self.port.publish_metadata_size(info.metadata_size);
                            self.port.publish_wav_header(&info.wav_header.0);
                            self.port.set_state(DrmState::WaitingMetadata);
                            return Some(info);
                        }
                        Err(_) => {
                            self.port.set_state(DrmState::Stopped);
                            return None;
                        }
                    }
                }
                Some(Command::Stop) => {
                    self.port.set_state(DrmState::Stopped);
                    return None;
                }
                _ => {} // unexpected command: no-op
            }
        }
    }

    /// Wait for READ_METADATA, authenticate and retain the song metadata,
    /// and publish the chunk geometry.
    fn metadata_phase(&mut self, header: &HeaderInfo) -> Option<SongMetadata> {
        loop {
            let cmd = self.port.wait_interrupt();
            if self.port.shutdown_requested() {
                self.port.set_state(DrmState::Stopped);
                return None;
            }
            match cmd {
                Some(Command::ReadMetadata) => {
                    self.port.set_state(DrmState::Working);
                    let block = match EncMetadata::from_bytes(&self.port.enc_metadata()) {
                        Ok(b) => b,
                        Err(_) => {
                            self.port.set_state(DrmState::Stopped);
                            return None;
                        }
                    };
                    match self.cipher.open_metadata(&block) {
                        Ok(md) => {
                            let wav_size = header.wav_header.data_len();
                            self.port.publish_chunk_info(
                                chunk_count(wav_size),
                                tonegate_types::SONG_CHUNK_LEN as u32,
                                wav_size % tonegate_types::SONG_CHUNK_LEN as u32,
                            );
                            self.port.set_state(DrmState::WaitingChunk);
                            return Some(md);
                        }
                        Err(_) => {
                            self.port.set_state(DrmState::Stopped);
                            return None;
                        }
                    }
                }
                Some(Command::Stop) => {
                    self.port.set_state(DrmState::Stopped);
                    return None;
                }
                _ => {}
            }
        }
    }

    /// The Decrypt → Copy → Request cycle.
    fn pump(
        &mut self,
        header: &HeaderInfo,
        md: &SongMetadata,
        mode: &mut StreamMode<'_>,
    ) -> PumpExit {
        let wav_size = header.wav_header.data_len();
        let total = chunk_count(wav_size);
        if total == 0 {
            self.port.set_state(DrmState::Stopped);
            return PumpExit::Finished;
        }

        let mut play_state = PlayState::Decrypt;
        let mut chunk_index: u32 = 1; // chunks are 1-based on the wire
        let mut cursor: usize = 0; // slot within the current half
        let mut pumping = false;

        let mut access = Access::Preview;
        let mut access_checked = false;
        let mut preview_left = tonegate_types::PREVIEW_LEN;

        let mut sub_copies: u64 = 0;
        let mut first_submit = true;

        // Slot and plaintext of the chunk currently moving through Copy.
        let mut current: Option<(usize, Vec<u8>)> = None;

        loop {
            if !pumping {
                let cmd = self.port.wait_interrupt();
                if self.port.shutdown_requested() {
                    self.port.set_state(DrmState::Stopped);
                    return PumpExit::Stopped;
                }
                match cmd {
                    Some(Command::ReadChunk) => {
                        pumping = true;
                        self.port.set_state(DrmState::ReadingChunk);
                    }
                    Some(Command::WaitForChunk) => {
                        self.port.set_state(DrmState::WaitingChunk);
                    }
                    Some(Command::Pause) => {
                        // Pausing while parked: hold PAUSED, then fall back
                        // to waiting for the host's refill.
                        match self.fast_control(Command::Pause) {
                            Control::Continue => self.port.set_state(DrmState::WaitingChunk),
                            Control::Pump => pumping = true,
                            Control::Stop => return PumpExit::Stopped,
                            Control::Restart => return PumpExit::Restart,
                        }
                    }
                    Some(Command::Stop) => {
                        self.port.set_state(DrmState::Stopped);
                        return PumpExit::Stopped;
                    }
                    Some(Command::Restart) => return PumpExit::Restart,
                    _ => {}
                }
                continue;
            }

            // Fast control is observed between pipeline steps.
            if let Some(cmd) = self.port.poll_interrupt() {
                match self.fast_control(cmd) {
                    Control::Continue | Control::Pump => {}
                    Control::Stop => return PumpExit::Stopped,
                    Control::Restart => return PumpExit::Restart,
                }
            }
            if self.port.shutdown_requested() {
                self.port.set_state(DrmState::Stopped);
                return PumpExit::Stopped;
            }

            match play_state {
                PlayState::Decrypt => {
                    let half = self.port.buffer_offset() as usize;
                    let slot = cursor + HALF_SLOTS * half;
                    let ct_len = chunk_len(chunk_index, wav_size);
                    let raw = self
                        .port
                        .read_ring_slot(slot, NONCE_LEN + TAG_LEN + ct_len);
                    let chunk = match EncChunk::from_bytes(&raw, ct_len) {
                        Ok(c) => c,
                        Err(_) => {
                            self.port.set_state(DrmState::Stopped);
                            return PumpExit::Stopped;
                        }
                    };
                    match self.cipher.open_chunk(&chunk, &md.sha256sum) {
                        Ok(pcm) => {
                            if !access_checked {
                                access = playback_access(self.session, md, self.secrets);
                                access_checked = true;
                            }
                            current = Some((slot, pcm));
                            cursor += 1;
                            play_state = PlayState::Copy;
                        }
                        Err(_) => {
                            self.port.set_state(DrmState::Stopped);
                            return PumpExit::Stopped;
                        }
                    }
                }

                PlayState::Copy => {
                    let Some((slot, pcm)) = current.take() else {
                        play_state = PlayState::Decrypt;
                        continue;
                    };

                    match mode {
                        StreamMode::Playback { sink } => {
                            let mut emitted = 0usize;
                            while emitted < pcm.len() {
                                let mut cp = DMA_SUB_CHUNK.min(pcm.len() - emitted);
                                if access == Access::Preview {
                                    cp = cp.min(preview_left);
                                }
                                let region = if sub_copies % 2 == 0 { DMA_SUB_CHUNK } else { 0 };
                                while sink.busy()
                                    && !first_submit
                                    && sink.fifo_fill() < FIFO_CAP - FIFO_HEADROOM
                                {
                                    std::hint::spin_loop();
                                }
                                first_submit = false;
                                sink.submit(region, &pcm[emitted..emitted + cp]);
                                emitted += cp;
                                sub_copies += 1;
                                if access == Access::Preview {
                                    preview_left -= cp;
                                    if preview_left == 0 {
                                        self.port.set_state(DrmState::Stopped);
                                        return PumpExit::Finished;
                                    }
                                }
                            }
                        }
                        StreamMode::DigitalOut => {
                            self.port.write_out_slot(slot, &pcm);
                        }
                    }

                    if chunk_index == total {
                        self.port.set_state(DrmState::Stopped);
                        return PumpExit::Finished;
                    }
                    chunk_index += 1;

                    if cursor == HALF_SLOTS {
                        play_state = PlayState::Request;
                    } else {
                        play_state = PlayState::Decrypt;
                    }
                }

                PlayState::Request => {
                    cursor = 0;
                    let next = 1 - self.port.buffer_offset();
                    self.port.set_buffer_offset(next);
                    self.port.set_state(DrmState::WaitingChunk);
                    pumping = false;
                    play_state = PlayState::Decrypt;
                }
            }
        }
    }

    fn fast_control(&mut self, cmd: Command) -> Control {
        match cmd {
            Command::Pause => {
                self.port.set_state(DrmState::Paused);
                loop {
                    let next = self.port.wait_interrupt();
                    if self.port.shutdown_requested() {
                        self.port.set_state(DrmState::Stopped);
                        return Control::Stop;
                    }
                    match next {
                        Some(Command::Play) => {
                            self.port.set_state(DrmState::Playing);
                            return Control::Continue;
                        }
                        // A refill request also ends the pause, as any
                        // interrupt does on the device.
                        Some(Command::ReadChunk) => {
                            self.port.set_state(DrmState::ReadingChunk);
                            return Control::Pump;
                        }
                        Some(Command::Stop) => {
                            self.port.set_state(DrmState::Stopped);
                            return Control::Stop;
                        }
                        Some(Command::Restart) => return Control::Restart,
                        _ => {}
                    }
                }
            }
            Command::Stop => {
                self.port.set_state(DrmState::Stopped);
                Control::Stop
            }
            Command::Restart => Control::Restart,
            Command::Play => {
                self.port.set_state(DrmState::Playing);
                Control::Continue
            }
            // READ_CHUNK re-sends and anything else are no-ops mid-pump.
            _ => Control::Continue,
        }
    }
}

enum Control {
    Continue,
    /// A READ_CHUNK ended a pause; the pump should be running.
    Pump,
    Stop,
    Restart,
}
