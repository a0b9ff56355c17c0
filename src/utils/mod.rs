//! Utilities module
//!
//! Contains error handling, SSE decoding and logging helpers

pub mod error;
pub mod logging;
pub mod sse;
