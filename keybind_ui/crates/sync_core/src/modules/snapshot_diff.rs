use crate::modules::protocol::{DeviceSnapshot, KeyCode};

/// Returns false iff both snapshots are structurally identical: same key
/// set, same values, same note lists in the same order.
pub fn should_propagate(previous: &DeviceSnapshot, incoming: &DeviceSnapshot) -> bool {
    previous != incoming
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct KeyChange {
    pub key: KeyCode,
    pub old_value: Option<f32>,
    pub new_value: Option<f32>,
}

/// Per-key analog value changes, ascending by key code. Keys whose value is
/// unchanged are skipped even if their note states differ.
pub fn changed_keys(previous: &DeviceSnapshot, incoming: &DeviceSnapshot) -> Vec<KeyChange> {
    let mut keys: Vec<KeyCode> = previous
        .iter()
        .chain(incoming.iter())
        .map(|(k, _)| k)
        .collect();
    keys.sort_unstable();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let o = previous.get(key).map(|s| s.value);
            let n = incoming.get(key).map(|s| s.value);
            if o == n {
                return None;
            }
            Some(KeyChange {
                key,
                old_value: o,
                new_value: n,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::protocol::{Channel, KeyState, NoteState};

    fn snap(entries: &[(KeyCode, f32, bool)]) -> DeviceSnapshot {
        entries
            .iter()
            .map(|&(key, value, pressed)| {
                (
                    key,
                    KeyState {
                        value,
                        notes: vec![NoteState {
                            note: 60,
                            velocity: value,
                            channel: Channel::default(),
                            pressed,
                        }],
                    },
                )
            })
            .collect()
    }

    #[test]
    fn identical_snapshots_do_not_propagate() {
        let a = snap(&[(4, 0.5, true), (7, 0.0, false)]);
        let b = a.clone();
        assert!(!should_propagate(&a, &b));
    }

    #[test]
    fn note_level_change_propagates() {
        let a = snap(&[(4, 0.5, false)]);
        let b = snap(&[(4, 0.5, true)]);
        assert!(should_propagate(&a, &b));
        assert!(changed_keys(&a, &b).is_empty());
    }

    #[test]
    fn changed_keys_reports_added_and_removed() {
        let a = snap(&[(4, 0.5, true), (9, 0.2, false)]);
        let b = snap(&[(4, 0.7, true), (22, 0.1, false)]);
        let diff = changed_keys(&a, &b);
        let keys: Vec<KeyCode> = diff.iter().map(|d| d.key).collect();
        assert_eq!(keys, vec![4, 9, 22]);
        assert_eq!(diff[1].new_value, None);
        assert_eq!(diff[2].old_value, None);
    }
}
