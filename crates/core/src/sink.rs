//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: tonegate — Audio DRM at the edge.
//

//! Audio output seam for the streaming pipeline.
//!
//! The real device copies decrypted PCM into a double-buffered DMA BRAM and
//! kicks an AXI transfer toward the audio FIFO; those drivers are outside
//! this crate. The pipeline only needs the contract: two sub-chunk regions,
//! a busy flag, and a FIFO fill level to throttle against. The status
//! accessors take `&mut self` because on hardware they are register reads
//! with side effects, and software models advance on observation.

use std::sync::Arc;

use parking_lot::Mutex;

use tonegate_types::{DMA_SUB_CHUNK, FIFO_CAP};

/// Double-buffered audio output. `region` is 0 or [`DMA_SUB_CHUNK`],
/// alternating between consecutive submissions.
pub trait AudioSink: Send {
    /// DMA transfer still in flight.
    fn busy(&mut self) -> bool;

    /// Current FIFO fill level in bytes.
    fn fifo_fill(&mut self) -> usize;

    /// Copy `pcm` into the DMA region at `region` and start playback.
    fn submit(&mut self, region: usize, pcm: &[u8]);
}

/// Capture sink for tests and for hosts without audio hardware: records
/// every submitted byte, never busy.
pub struct CaptureSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (CaptureSink { buf: buf.clone() }, buf)
    }
}

impl AudioSink for CaptureSink {
    fn busy(&mut self) -> bool {
        false
    }

    fn fifo_fill(&mut self) -> usize {
        0
    }

    fn submit(&mut self, _region: usize, pcm: &[u8]) {
        self.buf.lock().extend_from_slice(pcm);
    }
}

/// Software model of the DMA/FIFO pair: the fill level decays a little on
/// every status read, the way the hardware FIFO drains while the pipeline
/// polls it. Gives the pipeline realistic back-pressure without hardware;
/// the CLI player uses it as its default sink.
pub struct ModelDmaSink {
    fill: usize,
    in_flight: bool,
    bytes_played: u64,
}

impl ModelDmaSink {
    pub fn new() -> Self {
        ModelDmaSink {
            fill: 0,
            in_flight: false,
            bytes_played: 0,
        }
    }

    pub fn bytes_played(&self) -> u64 {
        self.bytes_played
    }

    fn step(&mut self) {
        // One observation's worth of playout.
        self.fill = self.fill.saturating_sub(DMA_SUB_CHUNK / 16);
        if self.fill == 0 {
            self.in_flight = false;
        }
    }
}

impl Default for ModelDmaSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for ModelDmaSink {
    fn busy(&mut self) -> bool {
        self.step();
        self.in_flight
    }

    fn fifo_fill(&mut self) -> usize {
        self.step();
        self.fill
    }

    fn submit(&mut self, _region: usize, pcm: &[u8]) {
        self.fill = (self.fill + pcm.len()).min(FIFO_CAP);
        self.in_flight = true;
        self.bytes_played += pcm.len() as u64;
    }
}
