mod device_api;
mod harness;
mod main_loop;
mod net;
mod protocol;

pub use device_api::{DeviceApi, DeviceError, ScriptedDevice};
pub use harness::BackgroundBackend;
pub use main_loop::MainLoop;
pub use net::{NetworkThread, DEFAULT_ADDR};
pub use protocol::{InboundMsg, OutboundMsg, INBOUND_CAP, OUTBOUND_CAP};
