//! Translation between the inbound Chat Completions shape and the upstream
//! inference API.
//!
//! The core of the relay: converts requests, responses, and streaming events
//! between the two shapes. All translation functions are pure (no I/O); the
//! streaming state machines hold per-request state only.

pub mod chat_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod upstream_types;
