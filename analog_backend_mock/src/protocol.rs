use std::net::SocketAddr;

pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;

pub enum InboundMsg {
    ClientConnected { socket_addr: SocketAddr },
    ClientDisconnected,
    Command { cmd: ClientCommand },
}

pub enum OutboundMsg {
    Send { msg: ServerMessage },
}

pub use keybind_protocol::{
    AppSettings, Channel, ClientCommand, DeviceInfo, DeviceKind, DeviceList, DeviceSnapshot,
    ErrorCode, KeyCode, KeyState, NoteConfig, NoteNumber, NoteState, PortOption,
    PortOptions, Reply, ServerMessage,
};
