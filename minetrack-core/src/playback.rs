//! Index-cursor playback over a device's history.
//!
//! `Live` shows the newest fix. `Paused`/`Playing` pin the displayed position
//! to `history[cursor]` while live fixes keep appending underneath. The
//! history length is passed in on every call; the playback state never owns
//! the history.

use std::time::Duration;

use serde::Serialize;

/// Tick interval at 1x speed.
pub const BASE_TICK: Duration = Duration::from_millis(1000);

/// Playback speed multipliers are clamped into this range.
pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PlaybackState {
    Live,
    Paused { cursor: usize },
    Playing { cursor: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Playback {
    pub state: PlaybackState,
    pub speed: f64,
}

impl Playback {
    pub fn new() -> Self {
        Playback {
            state: PlaybackState::Live,
            speed: 1.0,
        }
    }

    /// Cursor into history, `None` when live.
    pub fn cursor(&self) -> Option<usize> {
        match self.state {
            PlaybackState::Live => None,
            PlaybackState::Paused { cursor } | PlaybackState::Playing { cursor } => Some(cursor),
        }
    }

    /// Cursor in the `-1 = live` convention used by consumers.
    pub fn cursor_index(&self) -> i64 {
        self.cursor().map(|c| c as i64).unwrap_or(-1)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing { .. })
    }

    pub fn is_live(&self) -> bool {
        self.state == PlaybackState::Live
    }

    /// Begin playing. From live, starts at the oldest fix. No-op on an
    /// empty history.
    pub fn start(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let cursor = match self.state {
            PlaybackState::Live => 0,
            PlaybackState::Paused { cursor } | PlaybackState::Playing { cursor } => {
                cursor.min(len - 1)
            }
        };
        self.state = PlaybackState::Playing { cursor };
    }

    /// Pause at the current cursor, or fall back to live with no history.
    pub fn stop(&mut self, len: usize) {
        self.state = match (self.cursor(), len) {
            (_, 0) | (None, _) => PlaybackState::Live,
            (Some(cursor), _) => PlaybackState::Paused {
                cursor: cursor.min(len - 1),
            },
        };
    }

    /// Jump to `index`, clamped into the history. Keeps playing if playing.
    pub fn seek(&mut self, index: i64, len: usize) {
        if len == 0 {
            return;
        }
        let cursor = index.clamp(0, len as i64 - 1) as usize;
        self.state = match self.state {
            PlaybackState::Playing { .. } => PlaybackState::Playing { cursor },
            _ => PlaybackState::Paused { cursor },
        };
    }

    /// Change speed. Ignored unless the multiplier is positive and finite;
    /// otherwise clamped into `MIN_SPEED..=MAX_SPEED`.
    pub fn set_speed(&mut self, multiplier: f64) -> bool {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return false;
        }
        self.speed = multiplier.clamp(MIN_SPEED, MAX_SPEED);
        true
    }

    /// Interval between ticks at the current speed.
    pub fn tick_interval(&self) -> Duration {
        BASE_TICK.div_f64(self.speed.clamp(MIN_SPEED, MAX_SPEED))
    }

    /// Advance one step. Running off the end pauses at the last index.
    /// Returns whether still playing.
    pub fn tick(&mut self, len: usize) -> bool {
        let PlaybackState::Playing { cursor } = self.state else {
            return false;
        };
        if len == 0 {
            self.state = PlaybackState::Live;
            return false;
        }
        let next = cursor + 1;
        if next >= len {
            self.state = PlaybackState::Paused { cursor: len - 1 };
            return false;
        }
        self.state = PlaybackState::Playing { cursor: next };
        true
    }

    pub fn go_live(&mut self) {
        self.state = PlaybackState::Live;
    }

    /// The history head was evicted: keep the cursor on the same record.
    pub fn on_evicted(&mut self) {
        self.state = match self.state {
            PlaybackState::Live => PlaybackState::Live,
            PlaybackState::Paused { cursor } => PlaybackState::Paused {
                cursor: cursor.saturating_sub(1),
            },
            PlaybackState::Playing { cursor } => PlaybackState::Playing {
                cursor: cursor.saturating_sub(1),
            },
        };
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
