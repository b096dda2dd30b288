use crate::modules::protocol::{
    AppSettings, Channel, DeviceSnapshot, KeyCode, NoteNumber, MIDI_NOTE_MAX, MIDI_NOTE_MIN,
};

/// One bound note as drawn on the piano.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct PianoKey {
    pub key: KeyCode,
    pub note: NoteNumber,
    pub value: f32,
    pub velocity: f32,
    pub pressed: bool,
}

#[derive(serde::Serialize, Debug, Clone, PartialEq, Default)]
pub struct PianoView {
    pub keys: Vec<PianoKey>,
    /// Pressed notes inside the displayed range, ascending, no duplicates.
    pub active_notes: Vec<NoteNumber>,
}

/// Joins the channel's bindings with the live snapshot.
///
/// Keys missing from the snapshot show as released with zero value.
pub fn piano_keys(settings: &AppSettings, channel: Channel, snapshot: &DeviceSnapshot) -> PianoView {
    let Some(mapping) = settings.mapping(channel) else {
        return PianoView::default();
    };

    let keys: Vec<PianoKey> = mapping
        .iter()
        .map(|binding| {
            let state = snapshot.get(binding.key);
            let note_state = state.and_then(|s| {
                s.notes
                    .iter()
                    .find(|n| n.channel == channel && n.note == binding.note)
                    .or_else(|| s.notes.iter().find(|n| n.channel == channel))
            });
            PianoKey {
                key: binding.key,
                note: binding.note,
                value: state.map_or(0.0, |s| s.value),
                velocity: note_state.map_or(0.0, |n| n.velocity),
                pressed: note_state.is_some_and(|n| n.pressed),
            }
        })
        .collect();

    let mut active_notes: Vec<NoteNumber> = keys
        .iter()
        .filter(|k| k.pressed && (MIDI_NOTE_MIN..=MIDI_NOTE_MAX).contains(&k.note))
        .map(|k| k.note)
        .collect();
    active_notes.sort_unstable();
    active_notes.dedup();

    PianoView { keys, active_notes }
}
