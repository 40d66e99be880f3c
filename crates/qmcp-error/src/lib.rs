//! Unified error taxonomy with stable error kinds for the Quilt MCP broker.
//!
//! Every broker error carries an [`ErrorKind`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and the
//! user-facing remediation fields (`fix_hint`, `alternatives`) that tool
//! responses surface verbatim.  Use the builder returned by
//! [`QmcpError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable, stable error kind.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is exposed
/// verbatim in failure envelopes and is guaranteed not to change across patch
/// releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// JWT malformed, expired, or signed with the wrong key.
    AuthInvalid,
    /// Strict mode with no usable credentials.
    AuthNoCredentials,
    /// AWS or the catalog refused the action.
    PermissionDenied,
    /// Package, object, database, or table is absent.
    NotFound,
    /// Startup configuration was rejected.
    ConfigInvalid,
    /// MCP protocol version header missing or unsupported.
    ProtocolMismatch,
    /// Unknown RPC method or tool action.
    MethodNotFound,
    /// Arguments violate the tool's parameter schema.
    ValidationFailed,
    /// Deadline exceeded.
    Timeout,
    /// Backend 5xx or network failure.
    UpstreamUnavailable,
    /// Concurrent write conflict, e.g. a tag race.
    Conflict,
    /// Resource delete blocked by a live reference.
    InUse,
    /// Unexpected programming error.
    Internal,
}

impl ErrorKind {
    /// Stable `&'static str` representation of the kind
    /// (e.g. `"AUTH_INVALID"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "AUTH_INVALID",
            Self::AuthNoCredentials => "AUTH_NO_CREDENTIALS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ProtocolMismatch => "PROTOCOL_MISMATCH",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Conflict => "CONFLICT",
            Self::InUse => "IN_USE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Returns `true` if a caller may retry the failed operation as-is.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::UpstreamUnavailable | Self::Conflict
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// QmcpError
// ---------------------------------------------------------------------------

/// Unified broker error.
///
/// Carries a stable [`ErrorKind`], a one-sentence message, an optional source
/// error for cause-chaining, an optional remediation hint, alternative tool
/// names, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use qmcp_error::{ErrorKind, QmcpError};
///
/// let err = QmcpError::new(ErrorKind::Timeout, "Athena query exceeded the deadline")
///     .with_fix_hint("raise --service-timeout or narrow the query")
///     .with_alternative("athena_query_status")
///     .with_context("execution_id", "abc-123");
/// ```
pub struct QmcpError {
    /// Machine-readable error kind.
    pub kind: ErrorKind,
    /// One-sentence, user-facing description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Concrete remediation, when one exists.
    pub fix_hint: Option<String>,
    /// Tool names better suited to the caller's intent.
    pub alternatives: Vec<String>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl QmcpError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            fix_hint: None,
            alternatives: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a concrete remediation hint.
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Name a tool better suited to the caller's intent.  May be called
    /// more than once.
    pub fn with_alternative(mut self, tool: impl Into<String>) -> Self {
        self.alternatives.push(tool.into());
        self
    }

    /// Shorthand for `self.kind.is_retriable()`.
    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    // -- Convenience constructors for the common kinds ----------------------

    /// An `AUTH_INVALID` error with the standard login hint.
    pub fn auth_invalid(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthInvalid, reason)
            .with_fix_hint("run `login` to refresh the token")
    }

    /// A `VALIDATION_FAILED` error naming the offending field.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    /// A `NOT_FOUND` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// An `INTERNAL` error.  Reserved for defects, not expected failures.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Debug for QmcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("QmcpError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if let Some(ref hint) = self.fix_hint {
            d.field("fix_hint", hint);
        }
        if !self.alternatives.is_empty() {
            d.field("alternatives", &self.alternatives);
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for QmcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for QmcpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Failure envelope
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`QmcpError`] — the wire-level failure
/// envelope returned by every tool action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEnvelope {
    /// Error kind.
    pub kind: ErrorKind,
    /// One-sentence, user-facing message.
    pub message: String,
    /// Whether a retry of the same call may succeed.
    pub retriable: bool,
    /// String rendering of the cause chain, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cause: Vec<String>,
    /// Concrete remediation, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Tool names better suited to the caller's intent.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub alternatives: Vec<String>,
    /// Structured diagnostic context.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&QmcpError> for FailureEnvelope {
    fn from(err: &QmcpError) -> Self {
        let mut cause = Vec::new();
        let mut next = err.source.as_deref().map(|s| s as &dyn std::error::Error);
        while let Some(e) = next {
            cause.push(e.to_string());
            next = e.source();
        }
        Self {
            kind: err.kind,
            message: err.message.clone(),
            retriable: err.is_retriable(),
            cause,
            fix_hint: err.fix_hint.clone(),
            alternatives: err.alternatives.clone(),
            context: err.context.clone(),
        }
    }
}

impl From<QmcpError> for FailureEnvelope {
    fn from(err: QmcpError) -> Self {
        (&err).into()
    }
}

impl From<FailureEnvelope> for QmcpError {
    fn from(dto: FailureEnvelope) -> Self {
        Self {
            kind: dto.kind,
            message: dto.message,
            source: None,
            fix_hint: dto.fix_hint,
            alternatives: dto.alternatives,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    /// All error kinds for exhaustive iteration in tests.
    const ALL_KINDS: &[ErrorKind] = &[
        ErrorKind::AuthInvalid,
        ErrorKind::AuthNoCredentials,
        ErrorKind::PermissionDenied,
        ErrorKind::NotFound,
        ErrorKind::ConfigInvalid,
        ErrorKind::ProtocolMismatch,
        ErrorKind::MethodNotFound,
        ErrorKind::ValidationFailed,
        ErrorKind::Timeout,
        ErrorKind::UpstreamUnavailable,
        ErrorKind::Conflict,
        ErrorKind::InUse,
        ErrorKind::Internal,
    ];

    // -- Construction & Display -----------------------------------------

    #[test]
    fn basic_construction() {
        let err = QmcpError::new(ErrorKind::Internal, "boom");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.fix_hint.is_none());
        assert!(err.alternatives.is_empty());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = QmcpError::new(ErrorKind::NotFound, "no such package");
        assert_eq!(err.to_string(), "[NOT_FOUND] no such package");
    }

    #[test]
    fn display_with_context() {
        let err = QmcpError::new(ErrorKind::Timeout, "timed out").with_context("timeout_ms", 5000);
        let s = err.to_string();
        assert!(s.starts_with("[TIMEOUT] timed out"));
        assert!(s.contains("timeout_ms"));
        assert!(s.contains("5000"));
    }

    #[test]
    fn debug_with_source_and_hint() {
        let src = io::Error::new(io::ErrorKind::NotFound, "key missing");
        let err = QmcpError::not_found("object absent")
            .with_source(src)
            .with_fix_hint("check the key spelling");
        let dbg = format!("{err:?}");
        assert!(dbg.contains("key missing"));
        assert!(dbg.contains("fix_hint"));
    }

    // -- Retriability ----------------------------------------------------

    #[test]
    fn retriable_kinds() {
        assert!(ErrorKind::Timeout.is_retriable());
        assert!(ErrorKind::UpstreamUnavailable.is_retriable());
        assert!(ErrorKind::Conflict.is_retriable());
    }

    #[test]
    fn non_retriable_kinds() {
        for kind in [
            ErrorKind::AuthInvalid,
            ErrorKind::AuthNoCredentials,
            ErrorKind::PermissionDenied,
            ErrorKind::NotFound,
            ErrorKind::ConfigInvalid,
            ErrorKind::ProtocolMismatch,
            ErrorKind::MethodNotFound,
            ErrorKind::ValidationFailed,
            ErrorKind::InUse,
            ErrorKind::Internal,
        ] {
            assert!(!kind.is_retriable(), "{kind:?} must not be retriable");
        }
    }

    // -- Builder pattern -------------------------------------------------

    #[test]
    fn builder_chaining_all() {
        let src = io::Error::other("underlying");
        let err = QmcpError::new(ErrorKind::UpstreamUnavailable, "catalog 502")
            .with_context("status", 502)
            .with_fix_hint("retry in a moment")
            .with_alternative("search")
            .with_source(src);
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(err.context["status"], serde_json::json!(502));
        assert_eq!(err.fix_hint.as_deref(), Some("retry in a moment"));
        assert_eq!(err.alternatives, vec!["search".to_string()]);
        assert!(err.source.is_some());
    }

    #[test]
    fn auth_invalid_carries_login_hint() {
        let err = QmcpError::auth_invalid("token expired");
        assert_eq!(err.kind, ErrorKind::AuthInvalid);
        assert!(err.fix_hint.as_deref().unwrap().contains("login"));
    }

    #[test]
    fn multiple_alternatives_accumulate() {
        let err = QmcpError::new(ErrorKind::Timeout, "listing timed out")
            .with_alternative("search")
            .with_alternative("bucket_objects_list");
        assert_eq!(err.alternatives.len(), 2);
    }

    // -- Envelope --------------------------------------------------------

    #[test]
    fn envelope_roundtrip_without_source() {
        let err = QmcpError::validation("limit must be positive").with_context("field", "limit");
        let dto: FailureEnvelope = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: FailureEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        assert!(back.cause.is_empty());
        assert!(!back.retriable);
    }

    #[test]
    fn envelope_flattens_cause_chain() {
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let err = QmcpError::new(ErrorKind::UpstreamUnavailable, "catalog unreachable")
            .with_source(inner);
        let dto: FailureEnvelope = (&err).into();
        assert_eq!(dto.cause, vec!["pipe broke".to_string()]);
        assert!(dto.retriable);
    }

    #[test]
    fn envelope_omits_empty_fields() {
        let err = QmcpError::not_found("gone");
        let json = serde_json::to_value(FailureEnvelope::from(&err)).unwrap();
        assert!(json.get("cause").is_none());
        assert!(json.get("fix_hint").is_none());
        assert!(json.get("alternatives").is_none());
        assert!(json.get("context").is_none());
    }

    #[test]
    fn envelope_to_error_drops_opaque_source() {
        let dto = FailureEnvelope {
            kind: ErrorKind::Conflict,
            message: "tag race".into(),
            retriable: true,
            cause: vec!["inner".into()],
            fix_hint: None,
            alternatives: vec![],
            context: BTreeMap::new(),
        };
        let err: QmcpError = dto.into();
        assert_eq!(err.kind, ErrorKind::Conflict);
        // Source is lost in envelope → error conversion (opaque type).
        assert!(err.source.is_none());
    }

    // -- Error chain (source) preservation -------------------------------

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = QmcpError::new(ErrorKind::NotFound, "missing").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }

    // -- Unique string representations -----------------------------------

    #[test]
    fn all_kinds_have_unique_as_str() {
        let mut seen = HashSet::new();
        for kind in ALL_KINDS {
            let s = kind.as_str();
            assert!(seen.insert(s), "duplicate as_str value: {s}");
        }
        assert_eq!(seen.len(), ALL_KINDS.len());
    }

    #[test]
    fn kind_count_is_stable() {
        // Ensure we don't silently drop a variant from ALL_KINDS.
        assert_eq!(ALL_KINDS.len(), 13);
    }

    #[test]
    fn all_kinds_serialize_to_as_str() {
        for kind in ALL_KINDS {
            let json = serde_json::to_string(kind).unwrap();
            let expected = format!(r#""{}""#, kind.as_str());
            assert_eq!(json, expected, "mismatch for {kind:?}");
        }
    }
}
