use crate::protocol::{DeviceInfo, DeviceKind, DeviceList, KeyCode, PortOption, PortOptions};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("port option out of range: {0}")]
    InvalidPort(usize),
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// Source of analog key data and MIDI output ports.
pub trait DeviceApi {
    fn connected_devices(&self) -> DeviceList;
    fn port_options(&self) -> PortOptions;
    fn select_port(&self, index: usize) -> Result<(), DeviceError>;
    /// Depression per key in `0.0..=1.0`. Keys at rest may be omitted.
    fn analog_values(&self) -> BTreeMap<KeyCode, f32>;
}

struct ScriptedState {
    values: BTreeMap<KeyCode, f32>,
    devices: DeviceList,
    ports: Vec<String>,
    selected: usize,
}

/// In-memory device whose key values are set by the caller.
pub struct ScriptedDevice {
    state: Mutex<ScriptedState>,
}

impl Default for ScriptedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptedState {
                values: BTreeMap::new(),
                devices: vec![Self::mock_keyboard()],
                ports: vec!["Loopback MIDI".to_string(), "Virtual Synth".to_string()],
                selected: 0,
            }),
        }
    }

    pub fn mock_keyboard() -> DeviceInfo {
        DeviceInfo {
            vendor_id: 0x31e3,
            product_id: 0x1100,
            manufacturer_name: "Mock Analog".to_string(),
            device_name: "Mock Analog Keyboard".to_string(),
            device_id: 1,
            device_type: DeviceKind::Keyboard,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_value(&self, key: KeyCode, value: f32) {
        let value = value.clamp(0.0, 1.0);
        let mut state = self.lock();
        if value > 0.0 {
            state.values.insert(key, value);
        } else {
            state.values.remove(&key);
        }
    }

    pub fn release_all(&self) {
        self.lock().values.clear();
    }

    pub fn set_devices(&self, devices: DeviceList) {
        self.lock().devices = devices;
    }
}

impl DeviceApi for ScriptedDevice {
    fn connected_devices(&self) -> DeviceList {
        self.lock().devices.clone()
    }

    fn port_options(&self) -> PortOptions {
        let state = self.lock();
        state
            .ports
            .iter()
            .enumerate()
            .map(|(index, label)| PortOption {
                index,
                label: label.clone(),
                selected: index == state.selected,
            })
            .collect()
    }

    fn select_port(&self, index: usize) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if index >= state.ports.len() {
            return Err(DeviceError::InvalidPort(index));
        }
        state.selected = index;
        Ok(())
    }

    fn analog_values(&self) -> BTreeMap<KeyCode, f32> {
        self.lock().values.clone()
    }
}
