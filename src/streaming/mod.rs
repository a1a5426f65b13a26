//! UDP command and sample streaming

pub mod listener;
pub mod protocol;
pub mod registry;
pub mod streamer;

pub use listener::{CommandListener, ListenerHandle, ListenerState, ReceiveCloser};
pub use protocol::Command;
pub use registry::RecipientRegistry;
pub use streamer::Streamer;
