use crate::modules::protocol::{DeviceSnapshot, KeyCode, KeyState};

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct ActiveKey {
    pub key: KeyCode,
    pub state: KeyState,
}

impl ActiveKey {
    fn decayed(&self) -> Self {
        let mut state = self.state.clone();
        state.value = 0.0;
        for note in &mut state.notes {
            note.velocity = 0.0;
            note.pressed = false;
        }
        Self {
            key: self.key,
            state,
        }
    }

    fn primary_pressed(&self) -> Option<f32> {
        self.state
            .notes
            .first()
            .filter(|n| n.pressed)
            .map(|n| n.velocity)
    }
}

/// Follows the single most active key across snapshots.
#[derive(Debug, Default)]
pub struct ActiveKeyTracker {
    active: Option<ActiveKey>,
    decayed: bool,
    was_pressed: bool,
    peak_velocity: f32,
}

impl ActiveKeyTracker {
    pub fn active(&self) -> Option<&ActiveKey> {
        self.active.as_ref()
    }

    /// Strike velocity of the last press on the active key.
    pub fn peak_velocity(&self) -> f32 {
        self.peak_velocity
    }

    /// Returns true if the active entry or the peak velocity changed.
    pub fn update(&mut self, snapshot: &DeviceSnapshot) -> bool {
        let before = (self.active.clone(), self.peak_velocity);

        let mut candidate: Option<(KeyCode, &KeyState)> = None;
        for (key, state) in snapshot.iter() {
            if candidate.map_or(true, |(_, best)| state.value > best.value) {
                candidate = Some((key, state));
            }
        }

        match (candidate, &self.active) {
            (Some((key, state)), current) if current.is_none() || state.value > 0.0 => {
                if current.as_ref().is_some_and(|a| a.key != key) {
                    self.was_pressed = false;
                }
                self.active = Some(ActiveKey {
                    key,
                    state: state.clone(),
                });
                self.decayed = false;
            }
            (_, Some(current)) if !self.decayed => {
                self.active = Some(current.decayed());
                self.decayed = true;
            }
            _ => {}
        }

        let pressed = self.active.as_ref().and_then(ActiveKey::primary_pressed);
        match pressed {
            Some(velocity) if !self.was_pressed => {
                self.peak_velocity = velocity;
                self.was_pressed = true;
            }
            Some(_) => {}
            None => self.was_pressed = false,
        }

        before != (self.active.clone(), self.peak_velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::protocol::{Channel, NoteState};

    fn key(value: f32, velocity: f32, pressed: bool) -> KeyState {
        KeyState {
            value,
            notes: vec![NoteState {
                note: 60,
                velocity,
                channel: Channel::default(),
                pressed,
            }],
        }
    }

    fn snap(entries: Vec<(KeyCode, KeyState)>) -> DeviceSnapshot {
        entries.into_iter().collect()
    }

    #[test]
    fn highest_value_wins_and_ties_go_to_lowest_code() {
        let mut t = ActiveKeyTracker::default();
        t.update(&snap(vec![
            (4, key(0.3, 0.0, false)),
            (7, key(0.6, 0.0, false)),
            (9, key(0.6, 0.0, false)),
        ]));
        assert_eq!(t.active().unwrap().key, 7);
    }

    #[test]
    fn release_decays_exactly_once() {
        let mut t = ActiveKeyTracker::default();
        assert!(t.update(&snap(vec![(4, key(0.5, 0.4, true))])));
        let released = snap(vec![(4, key(0.0, 0.0, false))]);
        assert!(t.update(&released));
        let active = t.active().unwrap();
        assert_eq!(active.key, 4);
        assert_eq!(active.state.value, 0.0);
        assert!(!t.update(&released));
        assert!(!t.update(&snap(vec![])));
    }

    #[test]
    fn peak_velocity_latches_on_press_edge() {
        let mut t = ActiveKeyTracker::default();
        t.update(&snap(vec![(4, key(0.05, 0.0, false))]));
        assert_eq!(t.peak_velocity(), 0.0);
        t.update(&snap(vec![(4, key(0.4, 0.7, true))]));
        assert_eq!(t.peak_velocity(), 0.7);
        // Still held: later velocities do not overwrite the strike.
        t.update(&snap(vec![(4, key(0.6, 0.2, true))]));
        assert_eq!(t.peak_velocity(), 0.7);
        t.update(&snap(vec![(4, key(0.0, 0.0, false))]));
        assert_eq!(t.peak_velocity(), 0.7);
        t.update(&snap(vec![(4, key(0.5, 0.3, true))]));
        assert_eq!(t.peak_velocity(), 0.3);
    }

    #[test]
    fn switching_keys_resets_press_edge() {
        let mut t = ActiveKeyTracker::default();
        t.update(&snap(vec![(4, key(0.4, 0.5, true))]));
        t.update(&snap(vec![
            (4, key(0.4, 0.5, true)),
            (7, key(0.9, 0.8, true)),
        ]));
        assert_eq!(t.active().unwrap().key, 7);
        assert_eq!(t.peak_velocity(), 0.8);
    }
}
