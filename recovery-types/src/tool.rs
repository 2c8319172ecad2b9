// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

/// How an external tool terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Exited(i32),
    Signaled(i32),
}

impl ToolStatus {
    /// Normal exit with status zero
    pub fn success(&self) -> bool {
        matches!(self, ToolStatus::Exited(0))
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolStatus::Exited(code) => write!(f, "exit status {code}"),
            ToolStatus::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}
