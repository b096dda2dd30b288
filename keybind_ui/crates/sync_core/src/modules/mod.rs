pub mod active_key;
pub mod bridge;
pub mod capture;
pub mod notes;
pub mod piano;
pub mod protocol;
pub mod service_state;
pub mod settings;
pub mod snapshot_diff;
pub mod sync;
