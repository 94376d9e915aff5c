//! The broker owns connection state, chat subscriptions and message fan-out.

pub mod dispatcher;
pub mod engine;
pub mod message;
pub mod registry;
pub mod subscriptions;
pub mod topic;

pub use dispatcher::BroadcastReport;
pub use engine::Broker;

#[cfg(test)]
mod tests;
