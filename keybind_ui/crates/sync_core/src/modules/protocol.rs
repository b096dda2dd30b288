pub use keybind_protocol::*;
