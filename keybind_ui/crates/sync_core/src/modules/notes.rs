use crate::modules::protocol::NoteNumber;

const SHARP_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
const FLAT_NAMES: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"];

/// Scientific pitch name, with note 12 as `C0` (so 60 is `C4`).
pub fn note_name(note: NoteNumber, flat: bool) -> String {
    let names = if flat { &FLAT_NAMES } else { &SHARP_NAMES };
    let octave = i32::from(note / 12) - 1;
    format!("{}{}", names[usize::from(note % 12)], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharp_names() {
        assert_eq!(note_name(12, false), "C0");
        assert_eq!(note_name(24, false), "C1");
        assert_eq!(note_name(15, false), "D#0");
        assert_eq!(note_name(89, false), "F6");
        assert_eq!(note_name(60, false), "C4");
    }

    #[test]
    fn flat_names() {
        assert_eq!(note_name(12, true), "C0");
        assert_eq!(note_name(15, true), "Eb0");
        assert_eq!(note_name(89, true), "F6");
        assert_eq!(note_name(1, true), "Db-1");
    }
}
