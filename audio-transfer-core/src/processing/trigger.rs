use chrono::{DateTime, Utc};

use crate::models::config::TriggerConfig;
use crate::models::error::{Result, TransferError};
use crate::models::state::TriggerPhase;

/// Complete window revolutions between exact recomputations of the sum.
///
/// Incremental subtract/add accumulates rounding error over very long
/// sessions; resyncing every few revolutions bounds it at O(n) extra work
/// per `RESYNC_REVOLUTIONS * n` samples.
pub const RESYNC_REVOLUTIONS: u64 = 64;

/// Snapshot taken at the moment the level crossed the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvent {
    /// Stream frame at the end of the chunk that crossed.
    pub frame: u64,
    pub at: DateTime<Utc>,
    pub level: f64,
}

/// Windowed mean-absolute-level trigger.
///
/// Keeps the last `window_frames` samples of one channel in a circular
/// window and a running `Σ|x|` over exactly those samples. Inserting a
/// sample first removes the magnitude of the one it displaces, so the sum
/// is never recomputed on the hot path.
///
/// State transitions:
/// ```text
/// armed ──(mean > level)──→ triggered ──(post quota met)──→ done
/// ```
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    window: Vec<f64>,
    cursor: usize,
    running_sum: f64,
    threshold: f64,
    channel: usize,
    phase: TriggerPhase,
    post_counter: usize,
    post_target: usize,
    frames_seen: u64,
    revolutions: u64,
    event: Option<TriggerEvent>,
}

impl TriggerDetector {
    pub fn new(config: &TriggerConfig) -> Result<Self> {
        if config.window_frames == 0 {
            return Err(TransferError::invalid_config("trigger window must hold at least one frame"));
        }
        let mut window = Vec::new();
        window.try_reserve_exact(config.window_frames).map_err(|e| {
            TransferError::exhausted(format!(
                "cannot allocate trigger window of {} frames: {}",
                config.window_frames, e
            ))
        })?;
        window.resize(config.window_frames, 0.0);

        Ok(Self {
            window,
            cursor: 0,
            running_sum: 0.0,
            threshold: config.level,
            channel: config.channel,
            phase: TriggerPhase::Armed,
            post_counter: 0,
            post_target: config.post_trigger_frames,
            frames_seen: 0,
            revolutions: 0,
            event: None,
        })
    }

    pub fn phase(&self) -> TriggerPhase {
        self.phase
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn running_sum(&self) -> f64 {
        self.running_sum
    }

    pub fn window(&self) -> &[f64] {
        &self.window
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn post_counter(&self) -> usize {
        self.post_counter
    }

    pub fn post_target(&self) -> usize {
        self.post_target
    }

    pub fn event(&self) -> Option<TriggerEvent> {
        self.event
    }

    pub fn is_triggered(&self) -> bool {
        self.phase != TriggerPhase::Armed
    }

    pub fn mean_level(&self) -> f64 {
        self.running_sum / self.window.len() as f64
    }

    /// Feed one chunk of trigger-channel samples while armed.
    ///
    /// Returns `true` only for the chunk that crosses the threshold. Chunks
    /// longer than the window wrap around it as many times as needed; only
    /// the last `window_frames` samples remain resident.
    pub fn feed(&mut self, samples: &[f64]) -> bool {
        self.frames_seen += samples.len() as u64;
        if self.phase != TriggerPhase::Armed {
            return false;
        }

        let n = self.window.len();
        for &sample in samples {
            let slot = &mut self.window[self.cursor];
            self.running_sum -= slot.abs();
            *slot = sample;
            self.running_sum += sample.abs();

            self.cursor += 1;
            if self.cursor == n {
                self.cursor = 0;
                self.revolutions += 1;
                if self.revolutions % RESYNC_REVOLUTIONS == 0 {
                    self.resync();
                }
            }
        }

        let level = self.mean_level();
        if level > self.threshold {
            self.phase = TriggerPhase::Triggered;
            self.event = Some(TriggerEvent {
                frame: self.frames_seen,
                at: Utc::now(),
                level,
            });
            return true;
        }
        false
    }

    /// Account for `frames` frames committed after the trigger.
    ///
    /// `ring_wrapped` is whether the outer capture ring has wrapped at least
    /// once; `ring_full` is whether an unwrapped ring has just been filled
    /// exactly once. A wrapped ring finishes when the post-trigger quota is
    /// met, an unwrapped one as soon as it is full.
    pub fn advance_post(&mut self, frames: usize, ring_wrapped: bool, ring_full: bool) -> TriggerPhase {
        if self.phase != TriggerPhase::Triggered {
            return self.phase;
        }
        self.post_counter += frames;
        self.check_done(ring_wrapped, ring_full)
    }

    /// Re-evaluate completion without adding frames.
    pub fn check_done(&mut self, ring_wrapped: bool, ring_full: bool) -> TriggerPhase {
        if self.phase == TriggerPhase::Triggered {
            let done = if ring_wrapped {
                self.post_counter >= self.post_target
            } else {
                ring_full
            };
            if done {
                self.phase = TriggerPhase::Done;
            }
        }
        self.phase
    }

    /// Recompute the sum exactly from the window contents.
    fn resync(&mut self) {
        self.running_sum = self.window.iter().map(|s| s.abs()).sum();
    }
}
