//! WebSocket transport: sessions, dispatch, background tasks and topics.

pub mod channel;
pub mod handler;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod supervisor;
