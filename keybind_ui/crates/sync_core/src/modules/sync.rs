//! Everything the UI reads, behind one value.
//!
//! `SyncCore` holds no locks and spawns nothing. Every method runs to
//! completion; the caller decides where it lives and who drives the clock.

use crate::modules::active_key::{ActiveKey, ActiveKeyTracker};
use crate::modules::capture::{CaptureMachine, CaptureState, CaptureStep, CaptureToken, MouseButton};
use crate::modules::piano::{piano_keys, PianoView};
use crate::modules::protocol::{AppSettings, Channel, KeyBinding, NoteNumber};
use crate::modules::service_state::{ServiceAction, ServiceState, ServiceStore};
use crate::modules::settings::{SettingsAction, SettingsError, SettingsSink, SettingsStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn mapping_of(settings: &SettingsStore, channel: Channel) -> &[KeyBinding] {
    settings
        .state()
        .and_then(|s| s.mapping(channel))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[derive(Debug)]
pub struct SyncCore {
    service: ServiceStore,
    settings: SettingsStore,
    capture: CaptureMachine,
    tracker: ActiveKeyTracker,
    channel: Channel,
}

impl Default for SyncCore {
    fn default() -> Self {
        Self::new(SettingsStore::detached(), CaptureMachine::default())
    }
}

impl SyncCore {
    pub fn new(settings: SettingsStore, capture: CaptureMachine) -> Self {
        Self {
            service: ServiceStore::new(),
            settings,
            capture,
            tracker: ActiveKeyTracker::default(),
            channel: Channel::default(),
        }
    }

    pub fn with_capture_timeout(timeout: Duration) -> Self {
        Self::new(SettingsStore::detached(), CaptureMachine::new(timeout))
    }

    pub fn set_settings_sink<S>(&mut self, sink: S)
    where
        S: SettingsSink + Send + 'static,
    {
        self.settings.set_sink(sink);
    }

    /// Returns true if anything observable changed.
    pub fn apply_service(&mut self, action: ServiceAction, now: Instant) -> bool {
        let is_snapshot = matches!(action, ServiceAction::MidiUpdate(_));
        if !self.service.dispatch(action) {
            return false;
        }
        if !is_snapshot {
            return true;
        }

        let snapshot = &self.service.state().midi_state;
        self.tracker.update(snapshot);
        let mapping = mapping_of(&self.settings, self.channel);
        if let Some(edited) = self.capture.on_snapshot(snapshot, mapping, now) {
            self.change_mapping(edited);
        }
        true
    }

    pub fn apply_settings(&mut self, action: SettingsAction) -> Result<(), SettingsError> {
        self.settings.dispatch(action)
    }

    /// Starts a click gesture on `note` for the active channel. A secondary
    /// click edits the mapping before returning.
    pub fn begin_capture(&mut self, note: NoteNumber, button: MouseButton, now: Instant) -> CaptureStep {
        let mapping = mapping_of(&self.settings, self.channel);
        let step = self.capture.begin(note, button, now, mapping);
        if let CaptureStep::Completed(edited) = &step {
            self.change_mapping(edited.clone());
        }
        step
    }

    pub fn expire_capture(&mut self, token: CaptureToken) -> bool {
        self.capture.expire(token)
    }

    pub fn cancel_capture(&mut self) -> bool {
        self.capture.cancel()
    }

    pub fn set_channel(&mut self, channel: Channel) {
        self.channel = channel;
    }

    fn change_mapping(&mut self, mapping: Vec<KeyBinding>) {
        let action = SettingsAction::ChangeMapping {
            channel: self.channel,
            mapping,
        };
        // Before INIT there is nothing to edit; the store logs the drop.
        let _ = self.settings.dispatch(action);
    }

    pub fn service_state(&self) -> &Arc<ServiceState> {
        self.service.state()
    }

    pub fn settings(&self) -> Option<&Arc<AppSettings>> {
        self.settings.state()
    }

    pub fn active_key(&self) -> Option<&ActiveKey> {
        self.tracker.active()
    }

    pub fn peak_velocity(&self) -> f32 {
        self.tracker.peak_velocity()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn piano_keys(&self) -> PianoView {
        match self.settings.state() {
            Some(settings) => piano_keys(settings, self.channel, &self.service.state().midi_state),
            None => PianoView::default(),
        }
    }
}
