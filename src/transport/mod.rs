//! The `transport` module is the network edge of the service.
//!
//! - `websocket`: authenticates clients, admits their channels into the
//!   broker, handles subscribe/unsubscribe/heartbeat frames, forwards contact
//!   presence and cleans up on close.
//! - `events`: ingests `MessageCreated` events from the message service and
//!   hands them to the broker for fan-out.

pub mod events;
pub mod message;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use websocket::{ServerState, start_websocket_server};
