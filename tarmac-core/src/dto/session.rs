//! Runner session DTOs

use serde::{Deserialize, Serialize};

/// Request to establish a runner session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSession {
    pub runner_id: String,
    /// Whether the runner is platform-managed
    pub internal: bool,
}
