//! The `channel` module defines the server-side handle for one live client
//! connection.
//!
//! A [`Channel`] is what the connection registry stores: a unique id and the
//! sending half of the connection's bounded outbound queue. Holding a
//! `Channel` never keeps the socket open; the transport layer owns the
//! connection and closes it.

pub mod handle;
pub use handle::{Channel, ChannelId, DeliveryError};
