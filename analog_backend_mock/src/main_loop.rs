use crate::device_api::{DeviceApi, DeviceError};
use crate::protocol::{
    AppSettings, Channel, ClientCommand, DeviceList, DeviceSnapshot, ErrorCode, InboundMsg,
    KeyCode, KeyState, NoteConfig, NoteNumber, NoteState, OutboundMsg, Reply, ServerMessage,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::BTreeMap;

/// Per-tick decay applied to a held note's velocity.
const VELOCITY_DECAY: f32 = 0.9;

struct NoteTrack {
    channel: Channel,
    note: NoteNumber,
    velocity: f32,
    pressed: bool,
}

impl NoteTrack {
    fn new(channel: Channel, note: NoteNumber) -> Self {
        Self {
            channel,
            note,
            velocity: 0.0,
            pressed: false,
        }
    }

    fn update(&mut self, previous: f32, value: f32, cfg: &NoteConfig) {
        let rise = (value - previous).max(0.0) * 2.0 * cfg.velocity_scale;
        self.velocity = rise.max(self.velocity * VELOCITY_DECAY).min(1.0);
        self.pressed = value > cfg.threshold;
    }
}

#[derive(Default)]
struct KeyTrack {
    value: f32,
    notes: Vec<NoteTrack>,
}

pub struct MainLoop {
    inbound_rx: Receiver<InboundMsg>,
    outbound_tx: Sender<OutboundMsg>,
    settings: AppSettings,
    keys: BTreeMap<KeyCode, KeyTrack>,
    client_connected: bool,
    last_devices: Option<DeviceList>,
}

impl MainLoop {
    pub fn new(inbound_rx: Receiver<InboundMsg>, outbound_tx: Sender<OutboundMsg>) -> Self {
        Self::with_settings(inbound_rx, outbound_tx, AppSettings::default())
    }

    pub fn with_settings(
        inbound_rx: Receiver<InboundMsg>,
        outbound_tx: Sender<OutboundMsg>,
        settings: AppSettings,
    ) -> Self {
        let mut main_loop = Self {
            inbound_rx,
            outbound_tx,
            settings: AppSettings::default(),
            keys: BTreeMap::new(),
            client_connected: false,
            last_devices: None,
        };
        main_loop.apply_settings(settings);
        main_loop
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn tick(&mut self, api: &dyn DeviceApi) {
        loop {
            match self.inbound_rx.try_recv() {
                Ok(InboundMsg::ClientConnected { socket_addr }) => {
                    tracing::debug!(%socket_addr, "greeting client");
                    self.client_connected = true;
                    self.greet(api);
                }
                Ok(InboundMsg::ClientDisconnected) => self.client_connected = false,
                Ok(InboundMsg::Command { cmd }) => self.handle_command(api, cmd),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        self.poll_keys(api);
        self.watch_devices(api);

        if self.client_connected {
            let snapshot = self.snapshot();
            self.send(ServerMessage::MidiSnapshot { snapshot });
        }
    }

    fn greet(&mut self, api: &dyn DeviceApi) {
        self.send(ServerMessage::InitComplete);
        self.send(ServerMessage::PortOptionsChanged {
            options: api.port_options(),
        });
        let devices = api.connected_devices();
        self.send(devices_message(devices.clone()));
        self.last_devices = Some(devices);
    }

    fn handle_command(&mut self, api: &dyn DeviceApi, cmd: ClientCommand) {
        let request_id = cmd.request_id();
        let reply = match cmd {
            ClientCommand::GetPortOptions { .. } => Reply::PortOptions {
                options: api.port_options(),
            },
            ClientCommand::SelectPort { index, .. } => match api.select_port(index) {
                Ok(()) => Reply::PortOptions {
                    options: api.port_options(),
                },
                Err(err) => {
                    let code = match err {
                        DeviceError::InvalidPort(_) => ErrorCode::InvalidPort,
                        DeviceError::Unavailable(_) => ErrorCode::InternalError,
                    };
                    self.send(ServerMessage::Error {
                        request_id: Some(request_id),
                        msg: err.to_string(),
                        code,
                    });
                    return;
                }
            },
            ClientCommand::GetConfig { .. } => Reply::Config {
                settings: self.settings.clone(),
            },
            ClientCommand::UpdateConfig { settings, .. } => {
                self.apply_settings(settings);
                Reply::Ack
            }
            ClientCommand::GetConnectedDevices { .. } => Reply::Devices {
                devices: api.connected_devices(),
            },
        };
        self.send(ServerMessage::Reply { request_id, reply });
    }

    /// Rebinds notes from the new mapping. Held notes restart from rest.
    fn apply_settings(&mut self, settings: AppSettings) {
        let by_key = settings.bindings_by_key();
        for track in self.keys.values_mut() {
            track.notes.clear();
        }
        for (key, bindings) in by_key {
            let track = self.keys.entry(key).or_default();
            track.notes = bindings
                .into_iter()
                .map(|(channel, note)| NoteTrack::new(channel, note))
                .collect();
        }
        self.keys
            .retain(|_, track| !track.notes.is_empty() || track.value > 0.0);
        tracing::debug!(keys = self.keys.len(), "mapping applied");
        self.settings = settings;
    }

    fn poll_keys(&mut self, api: &dyn DeviceApi) {
        let values = api.analog_values();
        for &key in values.keys() {
            self.keys.entry(key).or_default();
        }
        let cfg = self.settings.note_config;
        for (key, track) in self.keys.iter_mut() {
            let value = values.get(key).copied().unwrap_or(0.0);
            for note in &mut track.notes {
                note.update(track.value, value, &cfg);
            }
            track.value = value;
        }
        self.keys
            .retain(|_, track| !track.notes.is_empty() || track.value > 0.0);
    }

    fn watch_devices(&mut self, api: &dyn DeviceApi) {
        let devices = api.connected_devices();
        if self.last_devices.as_ref() == Some(&devices) {
            return;
        }
        let first_poll = self.last_devices.is_none();
        self.last_devices = Some(devices.clone());
        if first_poll || !self.client_connected {
            return;
        }
        tracing::info!(count = devices.len(), "device list changed");
        self.send(devices_message(devices));
    }

    fn snapshot(&self) -> DeviceSnapshot {
        self.keys
            .iter()
            .map(|(&key, track)| {
                (
                    key,
                    KeyState {
                        value: track.value,
                        notes: track
                            .notes
                            .iter()
                            .map(|n| NoteState {
                                note: n.note,
                                velocity: n.velocity,
                                channel: n.channel,
                                pressed: n.pressed,
                            })
                            .collect(),
                    },
                )
            })
            .collect()
    }

    fn send(&mut self, msg: ServerMessage) {
        // Best-effort: a full queue drops the message.
        let _ = self.outbound_tx.try_send(OutboundMsg::Send { msg });
    }
}

fn devices_message(devices: DeviceList) -> ServerMessage {
    if devices.is_empty() {
        ServerMessage::NoDevices
    } else {
        ServerMessage::DevicesChanged { devices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_api::ScriptedDevice;
    use crossbeam_channel::bounded;
    use keybind_protocol::KeyBinding;

    fn harness() -> (MainLoop, Sender<InboundMsg>, Receiver<OutboundMsg>) {
        let (in_tx, in_rx) = bounded(64);
        let (out_tx, out_rx) = bounded(256);
        (MainLoop::new(in_rx, out_tx), in_tx, out_rx)
    }

    fn drain(rx: &Receiver<OutboundMsg>) -> Vec<ServerMessage> {
        rx.try_iter()
            .map(|OutboundMsg::Send { msg }| msg)
            .collect()
    }

    fn connect(in_tx: &Sender<InboundMsg>) {
        in_tx
            .send(InboundMsg::ClientConnected {
                socket_addr: "127.0.0.1:50000".parse().unwrap(),
            })
            .unwrap();
    }

    #[test]
    fn greeting_precedes_snapshots() {
        let (mut ml, in_tx, out_rx) = harness();
        let dev = ScriptedDevice::new();
        ml.tick(&dev);
        assert!(drain(&out_rx).is_empty());

        connect(&in_tx);
        ml.tick(&dev);
        let msgs = drain(&out_rx);
        assert_eq!(msgs[0], ServerMessage::InitComplete);
        assert!(matches!(msgs[1], ServerMessage::PortOptionsChanged { .. }));
        assert!(matches!(msgs[2], ServerMessage::DevicesChanged { .. }));
        assert!(matches!(msgs[3], ServerMessage::MidiSnapshot { .. }));
    }

    #[test]
    fn velocity_follows_rise_then_decays() {
        let (mut ml, _in_tx, _out_rx) = harness();
        let dev = ScriptedDevice::new();
        // 0x04 is bound to note 57 on channel 0 by default.
        dev.set_value(0x04, 0.3);
        ml.tick(&dev);
        let snap = ml.snapshot();
        let note = &snap.get(0x04).unwrap().notes[0];
        assert!((note.velocity - 0.6).abs() < 1e-6);
        assert!(note.pressed);

        ml.tick(&dev);
        let note = ml.snapshot().get(0x04).unwrap().notes[0].clone();
        assert!((note.velocity - 0.54).abs() < 1e-6);

        dev.set_value(0x04, 0.05);
        ml.tick(&dev);
        assert!(!ml.snapshot().get(0x04).unwrap().notes[0].pressed);
    }

    #[test]
    fn rpc_replies_carry_request_ids() {
        let (mut ml, in_tx, out_rx) = harness();
        let dev = ScriptedDevice::new();
        let mut settings = AppSettings::default();
        settings
            .keymapping
            .set(Channel::default(), vec![KeyBinding::new(64, 67)]);

        for cmd in [
            ClientCommand::UpdateConfig {
                request_id: 1,
                settings: settings.clone(),
            },
            ClientCommand::GetConfig { request_id: 2 },
            ClientCommand::SelectPort {
                request_id: 3,
                index: 9,
            },
        ] {
            in_tx.send(InboundMsg::Command { cmd }).unwrap();
        }
        ml.tick(&dev);

        let msgs = drain(&out_rx);
        assert_eq!(
            msgs[0],
            ServerMessage::Reply {
                request_id: 1,
                reply: Reply::Ack
            }
        );
        assert_eq!(
            msgs[1],
            ServerMessage::Reply {
                request_id: 2,
                reply: Reply::Config { settings }
            }
        );
        assert!(matches!(
            msgs[2],
            ServerMessage::Error {
                request_id: Some(3),
                code: ErrorCode::InvalidPort,
                ..
            }
        ));
        assert!(ml.snapshot().get(64).is_some());
        assert!(ml.snapshot().get(0x04).is_none());
    }

    #[test]
    fn device_changes_are_announced() {
        let (mut ml, in_tx, out_rx) = harness();
        let dev = ScriptedDevice::new();
        connect(&in_tx);
        ml.tick(&dev);
        drain(&out_rx);

        dev.set_devices(vec![]);
        ml.tick(&dev);
        let msgs = drain(&out_rx);
        assert_eq!(msgs[0], ServerMessage::NoDevices);

        ml.tick(&dev);
        assert!(!drain(&out_rx).contains(&ServerMessage::NoDevices));
    }
}
