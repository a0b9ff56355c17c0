//! Data models module
//!
//! Defines request and response data structures for the Chat Completions and
//! Responses APIs, plus records shared across services

use serde::{Deserialize, Serialize};

pub mod openai;
pub mod responses;

/// One credential attempt made while serving a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationLogEntry {
    /// Credential identifier, never the secret
    pub key: String,
    /// Outcome status: `success`, `rate_limited`, an upstream HTTP status, or `error`
    pub status: String,
    /// Error message, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RotationLogEntry {
    pub fn success(key: &str) -> Self {
        Self { key: key.to_string(), status: "success".to_string(), error: None }
    }

    pub fn failure(key: &str, status: impl Into<String>, error: impl Into<String>) -> Self {
        Self { key: key.to_string(), status: status.into(), error: Some(error.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
