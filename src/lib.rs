//! Song Library - per-user song library service
//!
//! This library provides the add/remove/toggle membership logic for a user's
//! song library, the storage backends it runs on and the HTTP layer in front of it.

pub mod entry;
pub mod error;
pub mod membership;
pub mod server;
pub mod store;
