//! The `utils` module provides shared building blocks used across `chatsub`:
//! the crate-wide error type and logging initialization.

pub mod error;
pub mod logging;
