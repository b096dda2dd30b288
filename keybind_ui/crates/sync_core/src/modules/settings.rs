use crate::modules::protocol::{AppSettings, Channel, ChannelMapping, MIDI_NOTE_MAX};
use std::sync::Arc;
use thiserror::Error;

/// Largest shift in either direction, in semitones.
pub const SHIFT_LIMIT: i32 = MIDI_NOTE_MAX as i32;

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsAction {
    Init(AppSettings),
    ChangeMapping {
        channel: Channel,
        mapping: ChannelMapping,
    },
    NoteShiftChanged(i32),
    ThresholdChanged(f32),
    VelocityScaleChanged(f32),
}

impl SettingsAction {
    pub fn kind(&self) -> &'static str {
        match self {
            SettingsAction::Init(_) => "INIT",
            SettingsAction::ChangeMapping { .. } => "CHANGE_MAPPING",
            SettingsAction::NoteShiftChanged(_) => "NOTE_SHIFT_CHANGED",
            SettingsAction::ThresholdChanged(_) => "THRESHOLD_CHANGED",
            SettingsAction::VelocityScaleChanged(_) => "VELOCITY_SCALE_CHANGED",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettingsError {
    #[error("{0} received before settings were initialized")]
    NotInitialized(&'static str),
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: f32 },
}

/// Applies one action. `Init` is the only action accepted while `state` is unset.
pub fn reduce(state: Option<&AppSettings>, action: SettingsAction) -> Result<AppSettings, SettingsError> {
    match (state, action) {
        (_, SettingsAction::Init(settings)) => Ok(settings),
        (None, action) => Err(SettingsError::NotInitialized(action.kind())),
        (Some(current), SettingsAction::ChangeMapping { channel, mapping }) => {
            let mut next = current.clone();
            next.keymapping.set(channel, mapping);
            Ok(next)
        }
        (Some(current), SettingsAction::NoteShiftChanged(shift)) => {
            let mut next = current.clone();
            next.shift_amount = shift.clamp(-SHIFT_LIMIT, SHIFT_LIMIT) as i8;
            Ok(next)
        }
        (Some(current), SettingsAction::ThresholdChanged(threshold)) => {
            if !threshold.is_finite() {
                return Err(SettingsError::InvalidValue {
                    field: "threshold",
                    value: threshold,
                });
            }
            let mut next = current.clone();
            next.note_config.threshold = threshold.clamp(0.0, 1.0);
            Ok(next)
        }
        (Some(current), SettingsAction::VelocityScaleChanged(scale)) => {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(SettingsError::InvalidValue {
                    field: "velocity_scale",
                    value: scale,
                });
            }
            let mut next = current.clone();
            next.note_config.velocity_scale = scale;
            Ok(next)
        }
    }
}

/// Receives the full settings after every successful reduction.
pub trait SettingsSink {
    fn persist(&mut self, settings: &AppSettings);
}

impl<F> SettingsSink for F
where
    F: FnMut(&AppSettings),
{
    fn persist(&mut self, settings: &AppSettings) {
        self(settings)
    }
}

pub struct SettingsStore {
    state: Option<Arc<AppSettings>>,
    sink: Box<dyn SettingsSink + Send>,
}

impl SettingsStore {
    pub fn new<S>(sink: S) -> Self
    where
        S: SettingsSink + Send + 'static,
    {
        Self {
            state: None,
            sink: Box::new(sink),
        }
    }

    /// A store whose pushes go nowhere.
    pub fn detached() -> Self {
        Self::new(|_: &AppSettings| {})
    }

    pub fn state(&self) -> Option<&Arc<AppSettings>> {
        self.state.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn set_sink<S>(&mut self, sink: S)
    where
        S: SettingsSink + Send + 'static,
    {
        self.sink = Box::new(sink);
    }

    pub fn dispatch(&mut self, action: SettingsAction) -> Result<(), SettingsError> {
        let kind = action.kind();
        let next = match reduce(self.state.as_deref(), action) {
            Ok(next) => next,
            Err(err) => {
                log::warn!("settings action dropped: {err}");
                return Err(err);
            }
        };
        log::debug!("settings updated by {kind}");
        self.sink.persist(&next);
        self.state = Some(Arc::new(next));
        Ok(())
    }
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::protocol::KeyBinding;
    use std::sync::{Arc, Mutex};

    fn recording_store() -> (SettingsStore, Arc<Mutex<Vec<AppSettings>>>) {
        let pushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pushed);
        let store = SettingsStore::new(move |s: &AppSettings| sink.lock().unwrap().push(s.clone()));
        (store, pushed)
    }

    #[test]
    fn actions_before_init_are_ignored() {
        let (mut store, pushed) = recording_store();
        let err = store.dispatch(SettingsAction::NoteShiftChanged(3)).unwrap_err();
        assert_eq!(err, SettingsError::NotInitialized("NOTE_SHIFT_CHANGED"));
        assert!(!store.is_initialized());
        assert!(pushed.lock().unwrap().is_empty());

        store
            .dispatch(SettingsAction::Init(AppSettings::default()))
            .unwrap();
        assert_eq!(store.state().unwrap().shift_amount, 12);
        assert_eq!(pushed.lock().unwrap().len(), 1);
    }

    #[test]
    fn second_init_replaces_everything() {
        let (mut store, pushed) = recording_store();
        let ch0 = Channel::default();
        let ch1 = Channel::new(1).unwrap();
        let ch3 = Channel::new(3).unwrap();

        let mut first = AppSettings {
            keymapping: Default::default(),
            shift_amount: 5,
            note_config: Default::default(),
        };
        first.keymapping.set(ch0, vec![KeyBinding::new(4, 57)]);
        first.keymapping.set(ch3, vec![KeyBinding::new(30, 80)]);

        let mut second = AppSettings {
            keymapping: Default::default(),
            shift_amount: 12,
            note_config: Default::default(),
        };
        second.keymapping.set(ch1, vec![KeyBinding::new(7, 62)]);

        store.dispatch(SettingsAction::Init(first.clone())).unwrap();
        store.dispatch(SettingsAction::Init(second.clone())).unwrap();

        let state = store.state().unwrap();
        assert_eq!(**state, second);
        assert!(state.mapping(ch3).is_none());
        assert!(state.mapping(ch0).is_none());
        assert_eq!(state.shift_amount, 12);
        assert_eq!(*pushed.lock().unwrap(), vec![first, second]);
    }

    #[test]
    fn change_mapping_touches_one_channel() {
        let (mut store, pushed) = recording_store();
        store
            .dispatch(SettingsAction::Init(AppSettings::default()))
            .unwrap();
        let ch3 = Channel::new(3).unwrap();
        store
            .dispatch(SettingsAction::ChangeMapping {
                channel: ch3,
                mapping: vec![KeyBinding::new(30, 80)],
            })
            .unwrap();

        let state = store.state().unwrap();
        assert_eq!(state.mapping(ch3).unwrap(), &vec![KeyBinding::new(30, 80)]);
        assert_eq!(
            state.mapping(Channel::default()),
            AppSettings::default().mapping(Channel::default())
        );
        assert_eq!(pushed.lock().unwrap().last().unwrap(), &**state);
    }

    #[test]
    fn numeric_fields_are_clamped_or_rejected() {
        let base = AppSettings::default();
        let s = reduce(Some(&base), SettingsAction::NoteShiftChanged(500)).unwrap();
        assert_eq!(s.shift_amount, 108);
        let s = reduce(Some(&base), SettingsAction::NoteShiftChanged(-500)).unwrap();
        assert_eq!(s.shift_amount, -108);
        let s = reduce(Some(&base), SettingsAction::ThresholdChanged(1.7)).unwrap();
        assert_eq!(s.note_config.threshold, 1.0);
        let s = reduce(Some(&base), SettingsAction::VelocityScaleChanged(1.5)).unwrap();
        assert_eq!(s.note_config.velocity_scale, 1.5);
        assert_eq!(s.note_config.threshold, base.note_config.threshold);

        assert!(reduce(Some(&base), SettingsAction::ThresholdChanged(f32::NAN)).is_err());
        assert!(reduce(Some(&base), SettingsAction::VelocityScaleChanged(0.0)).is_err());
    }

    #[test]
    fn rejected_value_is_not_pushed() {
        let (mut store, pushed) = recording_store();
        store
            .dispatch(SettingsAction::Init(AppSettings::default()))
            .unwrap();
        assert!(store
            .dispatch(SettingsAction::VelocityScaleChanged(-1.0))
            .is_err());
        assert_eq!(pushed.lock().unwrap().len(), 1);
        assert_eq!(store.state().unwrap().note_config.velocity_scale, 1.0);
    }
}
