//! Interactive key capture.
//!
//! A primary click on a piano note arms a capture; the first key that rises
//! past [`CAPTURE_THRESHOLD`] before the deadline is bound to that note. A
//! secondary click removes the note's binding right away.

use crate::modules::protocol::{
    ChannelMapping, DeviceSnapshot, KeyBinding, KeyCode, NoteNumber, NOTE_NUMBER_MAX,
};
use std::time::{Duration, Instant};

pub const CAPTURE_THRESHOLD: f32 = 0.1;
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Secondary,
    Other(u8),
}

impl From<u8> for MouseButton {
    fn from(button: u8) -> Self {
        match button {
            0 => MouseButton::Primary,
            2 => MouseButton::Secondary,
            other => MouseButton::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSession {
    pub target_note: NoteNumber,
    pub button: MouseButton,
    pub deadline: Instant,
    pub token: CaptureToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing(CaptureSession),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStep {
    /// Waiting for a key; the caller should schedule `expire(token)` at `deadline`.
    Armed {
        token: CaptureToken,
        deadline: Instant,
    },
    /// The gesture produced an edited mapping for the active channel.
    Completed(ChannelMapping),
    Ignored,
}

#[derive(Debug)]
pub struct CaptureMachine {
    state: CaptureState,
    next_token: u64,
    timeout: Duration,
}

impl Default for CaptureMachine {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_TIMEOUT)
    }
}

impl CaptureMachine {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: CaptureState::Idle,
            next_token: 0,
            timeout,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a gesture on `note`. Any session already in progress is dropped.
    /// Notes above 127 are ignored and leave the current session alone.
    pub fn begin(
        &mut self,
        note: NoteNumber,
        button: MouseButton,
        now: Instant,
        mapping: &[KeyBinding],
    ) -> CaptureStep {
        if note > NOTE_NUMBER_MAX {
            log::warn!("ignoring capture for out-of-range note {note}");
            return CaptureStep::Ignored;
        }
        if let CaptureState::Capturing(prev) = self.state {
            log::debug!("capture for note {} replaced", prev.target_note);
        }
        self.state = CaptureState::Idle;

        match button {
            MouseButton::Primary => {
                let token = CaptureToken(self.next_token);
                self.next_token += 1;
                let deadline = now + self.timeout;
                self.state = CaptureState::Capturing(CaptureSession {
                    target_note: note,
                    button,
                    deadline,
                    token,
                });
                log::debug!("capturing key for note {note}");
                CaptureStep::Armed { token, deadline }
            }
            MouseButton::Secondary => {
                log::debug!("unbinding note {note}");
                CaptureStep::Completed(unbind_note(mapping, note))
            }
            MouseButton::Other(b) => {
                log::trace!("ignoring mouse button {b}");
                CaptureStep::Ignored
            }
        }
    }

    /// Feeds a snapshot to the running session. Returns the edited mapping
    /// when a key was captured.
    pub fn on_snapshot(
        &mut self,
        snapshot: &DeviceSnapshot,
        mapping: &[KeyBinding],
        now: Instant,
    ) -> Option<ChannelMapping> {
        let CaptureState::Capturing(session) = self.state else {
            return None;
        };
        if now >= session.deadline {
            log::debug!("capture for note {} timed out", session.target_note);
            self.state = CaptureState::Idle;
            return None;
        }
        if session.button != MouseButton::Primary {
            return None;
        }

        let (key, _) = snapshot
            .iter()
            .find(|(_, state)| state.value > CAPTURE_THRESHOLD)?;
        log::debug!("captured key {key} for note {}", session.target_note);
        self.state = CaptureState::Idle;
        Some(bind_key(mapping, key, session.target_note))
    }

    /// Ends the session owning `token`. Stale tokens are ignored.
    pub fn expire(&mut self, token: CaptureToken) -> bool {
        match self.state {
            CaptureState::Capturing(session) if session.token == token => {
                log::debug!("capture for note {} expired", session.target_note);
                self.state = CaptureState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) -> bool {
        let was_capturing = matches!(self.state, CaptureState::Capturing(_));
        self.state = CaptureState::Idle;
        was_capturing
    }
}

/// Binds `key` to `note`, dropping any earlier binding of either.
pub fn bind_key(mapping: &[KeyBinding], key: KeyCode, note: NoteNumber) -> ChannelMapping {
    let mut out: ChannelMapping = mapping
        .iter()
        .filter(|b| b.note != note && b.key != key)
        .copied()
        .collect();
    out.push(KeyBinding::new(key, note));
    out
}

pub fn unbind_note(mapping: &[KeyBinding], note: NoteNumber) -> ChannelMapping {
    mapping.iter().filter(|b| b.note != note).copied().collect()
}
