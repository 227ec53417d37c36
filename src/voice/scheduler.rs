//! Gapless playback scheduling.
//!
//! Each received buffer starts exactly where the previous one ended. When the
//! gap since the previous frame reaches the reset threshold (or on the very
//! first frame) the cursor jumps to the output clock's "now", so a silence gap
//! never leaves the cursor lagging behind real time.

use serde::Serialize;

/// Placement of one buffer on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub start: f64,
    pub duration: f64,
    /// The cursor was reset to "now" for this buffer.
    pub reset: bool,
}

/// Cursor state, in seconds of output-clock time.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    reset_threshold: f64,
    cursor: f64,
    last_arrival: f64,
}

impl PlaybackScheduler {
    pub fn new(reset_threshold: f64) -> Self {
        Self { reset_threshold, cursor: 0.0, last_arrival: 0.0 }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn last_arrival(&self) -> f64 {
        self.last_arrival
    }

    /// Place a buffer of `duration` seconds that arrived at `now`.
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledBuffer {
        let gap = now - self.last_arrival;
        let reset = self.cursor == 0.0 || gap >= self.reset_threshold;
        if reset {
            self.cursor = now;
        }
        self.last_arrival = now;

        let start = self.cursor;
        self.cursor += duration;
        ScheduledBuffer { start, duration, reset }
    }

    pub fn reset(&mut self) {
        self.cursor = 0.0;
        self.last_arrival = 0.0;
    }
}

/// Observable state of a voice stream; all zero while stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AudioStreamState {
    pub playback_cursor: f64,
    pub last_frame_arrival: f64,
    pub is_capturing: bool,
    pub is_playing: bool,
    pub level: f32,
}
