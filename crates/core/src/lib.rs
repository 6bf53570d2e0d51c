//! Shared types for the taskpulse progress client.
//!
//! The [`wire`] module holds the JSON envelope exchanged with the job
//! processor. Typed views over `progress_update` and `queue_update`
//! payloads live in [`progress`].

pub mod error;
pub mod progress;
pub mod types;
pub mod wire;
