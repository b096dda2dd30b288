use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// HID usage id of a physical key.
pub type KeyCode = u16;
pub type NoteNumber = u8;

pub const NOTE_NUMBER_MAX: NoteNumber = 127;
/// Lowest note of the displayed piano range (A0).
pub const MIDI_NOTE_MIN: NoteNumber = 21;
/// Highest note of the displayed piano range (C8).
pub const MIDI_NOTE_MAX: NoteNumber = 108;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("midi note out of range: {0} (expected 0..=127)")]
pub struct InvalidNote(pub u8);

pub fn check_note(note: u8) -> Result<NoteNumber, InvalidNote> {
    if note <= NOTE_NUMBER_MAX {
        Ok(note)
    } else {
        Err(InvalidNote(note))
    }
}

fn deserialize_note<'de, D>(deserializer: D) -> Result<NoteNumber, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = u8::deserialize(deserializer)?;
    check_note(raw).map_err(D::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("midi channel out of range: {0} (expected 0..=15)")]
pub struct InvalidChannel(pub u8);

/// A MIDI channel, always within `0..=15`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    pub const MAX: u8 = 15;

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Channel> {
        (0..=Self::MAX).map(Channel)
    }
}

impl TryFrom<u8> for Channel {
    type Error = InvalidChannel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Channel::new(value).ok_or(InvalidChannel(value))
    }
}

impl From<Channel> for u8 {
    fn from(c: Channel) -> Self {
        c.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NoteState {
    #[serde(deserialize_with = "deserialize_note")]
    pub note: NoteNumber,
    pub velocity: f32,
    pub channel: Channel,
    pub pressed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct KeyState {
    pub value: f32,
    pub notes: Vec<NoteState>,
}

/// Complete view of every tracked key, ordered by key code.
///
/// On the wire this is a JSON object keyed by the decimal key code. Keys are
/// parsed from strings explicitly so the snapshot decodes the same way whether
/// it sits at the top level or inside a tagged message.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct DeviceSnapshot(BTreeMap<KeyCode, KeyState>);

impl DeviceSnapshot {
    pub fn new(keys: BTreeMap<KeyCode, KeyState>) -> Self {
        Self(keys)
    }

    pub fn get(&self, key: KeyCode) -> Option<&KeyState> {
        self.0.get(&key)
    }

    /// Iterates keys in ascending key code order.
    pub fn iter(&self) -> impl Iterator<Item = (KeyCode, &KeyState)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<KeyCode, KeyState> {
        self.0
    }
}

impl FromIterator<(KeyCode, KeyState)> for DeviceSnapshot {
    fn from_iter<T: IntoIterator<Item = (KeyCode, KeyState)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for DeviceSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, KeyState>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<KeyCode>()
                    .map(|code| (code, v))
                    .map_err(|_| D::Error::custom(format!("invalid key code: {k:?}")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(DeviceSnapshot)
    }
}

/// One selectable MIDI output port. Wire form: `[index, label, selected]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "(usize, String, bool)", into = "(usize, String, bool)")]
pub struct PortOption {
    pub index: usize,
    pub label: String,
    pub selected: bool,
}

impl From<(usize, String, bool)> for PortOption {
    fn from((index, label, selected): (usize, String, bool)) -> Self {
        Self {
            index,
            label,
            selected,
        }
    }
}

impl From<PortOption> for (usize, String, bool) {
    fn from(p: PortOption) -> Self {
        (p.index, p.label, p.selected)
    }
}

pub type PortOptions = Vec<PortOption>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown device kind: {0}")]
pub struct InvalidDeviceKind(pub u8);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeviceKind {
    Keyboard,
    Keypad,
    Other,
}

impl TryFrom<u8> for DeviceKind {
    type Error = InvalidDeviceKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DeviceKind::Keyboard),
            2 => Ok(DeviceKind::Keypad),
            3 => Ok(DeviceKind::Other),
            other => Err(InvalidDeviceKind(other)),
        }
    }
}

impl From<DeviceKind> for u8 {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Keyboard => 1,
            DeviceKind::Keypad => 2,
            DeviceKind::Other => 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer_name: String,
    pub device_name: String,
    pub device_id: u64,
    pub device_type: DeviceKind,
}

pub type DeviceList = Vec<DeviceInfo>;

/// Wire form: `[key, note]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "(KeyCode, NoteNumber)", into = "(KeyCode, NoteNumber)")]
pub struct KeyBinding {
    pub key: KeyCode,
    pub note: NoteNumber,
}

impl KeyBinding {
    pub fn new(key: KeyCode, note: NoteNumber) -> Self {
        Self { key, note }
    }
}

impl TryFrom<(KeyCode, NoteNumber)> for KeyBinding {
    type Error = InvalidNote;

    fn try_from((key, note): (KeyCode, NoteNumber)) -> Result<Self, Self::Error> {
        Ok(Self {
            key,
            note: check_note(note)?,
        })
    }
}

impl From<KeyBinding> for (KeyCode, NoteNumber) {
    fn from(b: KeyBinding) -> Self {
        (b.key, b.note)
    }
}

pub type ChannelMapping = Vec<KeyBinding>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub channel: Channel,
    pub bindings: ChannelMapping,
}

/// Per-channel bindings. Serialized as an explicit list of
/// `{ channel, bindings }` entries rather than an object keyed by channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(from = "Vec<ChannelEntry>", into = "Vec<ChannelEntry>")]
pub struct Keymapping(BTreeMap<Channel, ChannelMapping>);

impl Keymapping {
    pub fn get(&self, channel: Channel) -> Option<&ChannelMapping> {
        self.0.get(&channel)
    }

    pub fn set(&mut self, channel: Channel, mapping: ChannelMapping) {
        self.0.insert(channel, mapping);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ChannelMapping)> {
        self.0.iter().map(|(c, m)| (*c, m))
    }
}

impl FromIterator<(Channel, ChannelMapping)> for Keymapping {
    fn from_iter<T: IntoIterator<Item = (Channel, ChannelMapping)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<ChannelEntry>> for Keymapping {
    fn from(entries: Vec<ChannelEntry>) -> Self {
        entries
            .into_iter()
            .map(|e| (e.channel, e.bindings))
            .collect()
    }
}

impl From<Keymapping> for Vec<ChannelEntry> {
    fn from(m: Keymapping) -> Self {
        m.0.into_iter()
            .map(|(channel, bindings)| ChannelEntry { channel, bindings })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NoteConfig {
    pub threshold: f32,
    pub velocity_scale: f32,
}

impl Default for NoteConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            velocity_scale: 1.0,
        }
    }
}

fn default_shift_amount() -> i8 {
    12
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub keymapping: Keymapping,
    #[serde(default = "default_shift_amount")]
    pub shift_amount: i8,
    #[serde(default)]
    pub note_config: NoteConfig,
}

impl AppSettings {
    pub fn mapping(&self, channel: Channel) -> Option<&ChannelMapping> {
        self.keymapping.get(channel)
    }

    /// Inverts `channel -> [(key, note)]` into `key -> [(channel, note)]`.
    pub fn bindings_by_key(&self) -> BTreeMap<KeyCode, Vec<(Channel, NoteNumber)>> {
        let mut out: BTreeMap<KeyCode, Vec<(Channel, NoteNumber)>> = BTreeMap::new();
        for (channel, bindings) in self.keymapping.iter() {
            for b in bindings {
                out.entry(b.key).or_default().push((channel, b.note));
            }
        }
        out
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        // HID usage ids for A W S D R F T G H U.
        const KEYS: [KeyCode; 10] = [0x04, 0x1A, 0x16, 0x07, 0x15, 0x09, 0x17, 0x0A, 0x0B, 0x18];
        let bindings = KEYS
            .iter()
            .zip(57u8..)
            .map(|(&key, note)| KeyBinding { key, note })
            .collect();
        Self {
            keymapping: [(Channel::default(), bindings)].into_iter().collect(),
            shift_amount: default_shift_amount(),
            note_config: NoteConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCommand,
    InvalidPort,
    NotReady,
    Busy,
    InternalError,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Reply {
    PortOptions { options: PortOptions },
    Config { settings: AppSettings },
    Devices { devices: DeviceList },
    Ack,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ServerMessage {
    InitComplete,
    MidiSnapshot { snapshot: DeviceSnapshot },
    PortOptionsChanged { options: PortOptions },
    DevicesChanged { devices: DeviceList },
    NoDevices,
    ConfigLoaded { settings: AppSettings },
    Reply { request_id: u64, reply: Reply },
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        msg: String,
        code: ErrorCode,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ClientCommand {
    GetPortOptions { request_id: u64 },
    SelectPort { request_id: u64, index: usize },
    GetConfig { request_id: u64 },
    UpdateConfig { request_id: u64, settings: AppSettings },
    GetConnectedDevices { request_id: u64 },
}

impl ClientCommand {
    pub fn request_id(&self) -> u64 {
        match self {
            ClientCommand::GetPortOptions { request_id } => *request_id,
            ClientCommand::SelectPort { request_id, .. } => *request_id,
            ClientCommand::GetConfig { request_id } => *request_id,
            ClientCommand::UpdateConfig { request_id, .. } => *request_id,
            ClientCommand::GetConnectedDevices { request_id } => *request_id,
        }
    }
}
