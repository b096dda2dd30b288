mod modules;

pub use modules::{
    active_key, bridge, capture, notes, piano, protocol, service_state, settings, snapshot_diff,
    sync,
};
