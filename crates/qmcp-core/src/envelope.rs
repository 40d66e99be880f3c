// SPDX-License-Identifier: MIT OR Apache-2.0
//! Success/failure envelopes returned by every tool action.
//!
//! No operation throws across the `QuiltOps` interface; everything funnels
//! into one of these two shapes.

use qmcp_error::{FailureEnvelope, QmcpError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform result of a tool action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    /// The action succeeded; `result` carries the named result shape.
    Success {
        /// Tool-specific payload.
        result: Value,
    },
    /// The action failed; the envelope is stable and machine-readable.
    Error {
        /// The failure envelope.
        error: FailureEnvelope,
    },
}

impl ToolResult {
    /// Wrap a serializable payload as success.
    pub fn success(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::Success { result: value },
            Err(e) => Self::Error {
                error: QmcpError::internal(format!("result serialization failed: {e}")).into(),
            },
        }
    }

    /// Wrap an error as a failure envelope.
    pub fn failure(err: QmcpError) -> Self {
        Self::Error { error: err.into() }
    }

    /// Returns `true` for the success variant.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<Result<Value, QmcpError>> for ToolResult {
    fn from(res: Result<Value, QmcpError>) -> Self {
        match res {
            Ok(value) => Self::Success { result: value },
            Err(err) => Self::failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qmcp_error::ErrorKind;
    use serde_json::json;

    #[test]
    fn success_envelope_shape() {
        let res = ToolResult::success(json!({"count": 2}));
        let v = serde_json::to_value(&res).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["result"]["count"], 2);
    }

    #[test]
    fn failure_envelope_shape() {
        let res = ToolResult::failure(
            QmcpError::new(ErrorKind::NotFound, "no such package").with_fix_hint("check the name"),
        );
        let v = serde_json::to_value(&res).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"]["kind"], "NOT_FOUND");
        assert_eq!(v["error"]["retriable"], false);
        assert_eq!(v["error"]["fix_hint"], "check the name");
    }

    #[test]
    fn from_result_maps_both_arms() {
        let ok: ToolResult = Ok(json!(1)).into();
        assert!(ok.is_success());
        let err: ToolResult = Err(QmcpError::internal("boom")).into();
        assert!(!err.is_success());
    }

    #[test]
    fn roundtrip() {
        let res = ToolResult::success(json!(["a", "b"]));
        let json = serde_json::to_string(&res).unwrap();
        let back: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(res, back);
    }
}
