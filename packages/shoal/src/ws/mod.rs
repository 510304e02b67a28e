//! Live connection plumbing: registry, wire protocol, per-connection
//! sessions, and the room/direct routing on top of them.

pub mod broadcast;
pub mod direct;
pub mod protocol;
pub mod registry;
pub mod session;

pub use broadcast::RoomRouter;
pub use direct::DirectRouter;
pub use registry::{ChannelKey, ConnectionHandle, ConnectionRegistry};
pub use session::{SessionChannel, SessionContext, run_session};
