use crate::modules::protocol::{DeviceList, DeviceSnapshot, PortOptions, ServerMessage};
use crate::modules::snapshot_diff::should_propagate;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceAction {
    MidiUpdate(DeviceSnapshot),
    PortOptions(PortOptions),
    FoundDevices(DeviceList),
    NoDevices,
}

impl ServiceAction {
    /// Hands the message back if it is not a service-state event.
    pub fn from_server_message(msg: ServerMessage) -> Result<Self, ServerMessage> {
        match msg {
            ServerMessage::MidiSnapshot { snapshot } => Ok(ServiceAction::MidiUpdate(snapshot)),
            ServerMessage::PortOptionsChanged { options } => Ok(ServiceAction::PortOptions(options)),
            ServerMessage::DevicesChanged { devices } => Ok(ServiceAction::FoundDevices(devices)),
            ServerMessage::NoDevices => Ok(ServiceAction::NoDevices),
            other => Err(other),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceAction::MidiUpdate(_) => "MIDI_UPDATE",
            ServiceAction::PortOptions(_) => "PORT_OPTIONS",
            ServiceAction::FoundDevices(_) => "FOUND_DEVICES",
            ServiceAction::NoDevices => "NO_DEVICES",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceState {
    pub midi_state: DeviceSnapshot,
    pub port_options: PortOptions,
    pub connected_devices: DeviceList,
}

/// Returns `state` itself (same allocation) when the action changes nothing,
/// so callers can skip work with `Arc::ptr_eq`.
pub fn reduce(state: &Arc<ServiceState>, action: ServiceAction) -> Arc<ServiceState> {
    match action {
        ServiceAction::MidiUpdate(snapshot) => {
            if !should_propagate(&state.midi_state, &snapshot) {
                return Arc::clone(state);
            }
            Arc::new(ServiceState {
                midi_state: snapshot,
                ..ServiceState::clone(state)
            })
        }
        ServiceAction::PortOptions(options) => Arc::new(ServiceState {
            port_options: options,
            ..ServiceState::clone(state)
        }),
        ServiceAction::FoundDevices(devices) => Arc::new(ServiceState {
            connected_devices: devices,
            ..ServiceState::clone(state)
        }),
        ServiceAction::NoDevices => Arc::new(ServiceState {
            connected_devices: Vec::new(),
            ..ServiceState::clone(state)
        }),
    }
}

#[derive(Debug, Default)]
pub struct ServiceStore {
    state: Arc<ServiceState>,
}

impl ServiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Arc<ServiceState> {
        &self.state
    }

    /// Returns true if the state was replaced.
    pub fn dispatch(&mut self, action: ServiceAction) -> bool {
        let kind = action.kind();
        let next = reduce(&self.state, action);
        if Arc::ptr_eq(&next, &self.state) {
            return false;
        }
        log::trace!("service state updated by {kind}");
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::protocol::{DeviceInfo, DeviceKind, KeyState, PortOption};

    fn snapshot(value: f32) -> DeviceSnapshot {
        [(
            4,
            KeyState {
                value,
                notes: vec![],
            },
        )]
        .into_iter()
        .collect()
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            vendor_id: 0x31e3,
            product_id: 0x1100,
            manufacturer_name: "Wooting".to_string(),
            device_name: "Wooting One".to_string(),
            device_id: 42,
            device_type: DeviceKind::Keyboard,
        }
    }

    #[test]
    fn repeated_snapshot_is_a_no_op_by_reference() {
        let s0 = Arc::new(ServiceState::default());
        let s1 = reduce(&s0, ServiceAction::MidiUpdate(snapshot(0.4)));
        assert!(!Arc::ptr_eq(&s0, &s1));
        let s2 = reduce(&s1, ServiceAction::MidiUpdate(snapshot(0.4)));
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[test]
    fn store_reports_only_real_transitions() {
        let mut store = ServiceStore::new();
        assert!(store.dispatch(ServiceAction::MidiUpdate(snapshot(0.4))));
        assert!(!store.dispatch(ServiceAction::MidiUpdate(snapshot(0.4))));
        assert!(store.dispatch(ServiceAction::MidiUpdate(snapshot(0.5))));
    }

    #[test]
    fn devices_and_ports_replace_wholesale() {
        let mut store = ServiceStore::new();
        store.dispatch(ServiceAction::FoundDevices(vec![device(), device()]));
        assert_eq!(store.state().connected_devices.len(), 2);
        store.dispatch(ServiceAction::FoundDevices(vec![device()]));
        assert_eq!(store.state().connected_devices.len(), 1);
        store.dispatch(ServiceAction::NoDevices);
        assert!(store.state().connected_devices.is_empty());

        let ports = vec![PortOption {
            index: 0,
            label: "Loopback".to_string(),
            selected: true,
        }];
        store.dispatch(ServiceAction::PortOptions(ports.clone()));
        assert_eq!(store.state().port_options, ports);
    }

    #[test]
    fn non_service_messages_are_handed_back() {
        let back = ServiceAction::from_server_message(ServerMessage::InitComplete);
        assert_eq!(back, Err(ServerMessage::InitComplete));
        let ok = ServiceAction::from_server_message(ServerMessage::NoDevices);
        assert_eq!(ok, Ok(ServiceAction::NoDevices));
    }
}
