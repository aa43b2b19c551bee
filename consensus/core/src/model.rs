//! Run Data Model
//!
//! Plain data types that flow through the pipeline: the document being
//! edited, the identity of each backend model, per-model results and the
//! run record that ties them together.
//!
//! Everything here is serializable because the run record is persisted
//! verbatim by the store. Durations use serde's `{secs, nanos}` encoding and
//! timestamps use RFC 3339 with nanoseconds, so a record read back from disk
//! compares equal to the one that was written.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Document
// ============================================================================

/// An opaque block of text submitted to a run
///
/// Cloning is cheap: the text is shared, so every concurrent call of a
/// fan-out sees the same immutable buffer.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Arc<str>);

impl Document {
    /// Wrap text as a document
    pub fn new(text: impl Into<String>) -> Self {
        Self(Arc::from(text.into()))
    }

    /// The raw text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the document holds nothing but whitespace
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the document is zero bytes long
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document").field("len", &self.len()).finish()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Document {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Document {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

// ============================================================================
// Model Identity
// ============================================================================

/// Names one backend model, written `provider/model[:variant]`
///
/// Examples: `openai/gpt-4.1`, `anthropic/claude-3.7-sonnet:thinking`,
/// `ollama/llama3.2`. The provider segment is the model's vendor, not the
/// transport used to reach it; that mapping lives in the client registry.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelIdentity(String);

impl ModelIdentity {
    /// Parse and validate an identity
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdentity`] if the string is not `provider/model`
    /// with an optional non-empty `:variant` suffix.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidIdentity> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.len() != raw.len() || trimmed.is_empty() {
            return Err(InvalidIdentity(raw));
        }

        let Some((provider, rest)) = trimmed.split_once('/') else {
            return Err(InvalidIdentity(raw));
        };
        let (model, variant) = match rest.split_once(':') {
            Some((model, variant)) => (model, Some(variant)),
            None => (rest, None),
        };

        let bad_segment = |s: &str| s.is_empty() || s.chars().any(char::is_whitespace);
        if bad_segment(provider) || bad_segment(model) || variant.is_some_and(bad_segment) {
            return Err(InvalidIdentity(raw));
        }

        Ok(Self(raw))
    }

    /// Wrap a compiled-in identity without validation
    pub(crate) fn builtin(raw: &'static str) -> Self {
        debug_assert!(Self::parse(raw).is_ok(), "bad builtin identity {raw}");
        Self(raw.to_string())
    }

    /// The full identity string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Vendor segment (before the first `/`)
    #[must_use]
    pub fn provider(&self) -> &str {
        self.0.split_once('/').map_or("", |(p, _)| p)
    }

    /// Model segment, without provider or variant
    #[must_use]
    pub fn model(&self) -> &str {
        let rest = self.0.split_once('/').map_or("", |(_, r)| r);
        rest.split_once(':').map_or(rest, |(m, _)| m)
    }

    /// Optional variant (e.g. `thinking`)
    #[must_use]
    pub fn variant(&self) -> Option<&str> {
        let rest = self.0.split_once('/').map_or("", |(_, r)| r);
        rest.split_once(':').map(|(_, v)| v)
    }
}

impl fmt::Debug for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelIdentity({})", self.0)
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModelIdentity {
    type Err = InvalidIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModelIdentity {
    type Error = InvalidIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ModelIdentity> for String {
    fn from(id: ModelIdentity) -> Self {
        id.0
    }
}

/// A string that is not a valid `provider/model[:variant]` identity
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid model identity {0:?}: expected provider/model[:variant]")]
pub struct InvalidIdentity(pub String);

// ============================================================================
// Errors as Data
// ============================================================================

/// Kind of failure recorded against a model call or the consolidation step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Authentication or client configuration failure
    Auth,
    /// Network or transport failure
    Transport,
    /// The backend reported an error (quota, invalid request, HTTP status)
    Backend,
    /// The call did not settle within its time bound
    Timeout,
    /// The backend answered with an empty or unparseable body
    MalformedResponse,
    /// Consolidation had no successful outputs to work with
    NoInputs,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Transport => "transport",
            Self::Backend => "backend",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed_response",
            Self::NoInputs => "no_inputs",
        };
        f.write_str(s)
    }
}

/// A recorded failure: its kind plus the message that explained it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// What went wrong
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl Failure {
    /// Create a failure record
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The failure recorded when consolidation is skipped
    #[must_use]
    pub fn no_inputs() -> Self {
        Self::new(
            ErrorKind::NoInputs,
            "no model produced an output to consolidate",
        )
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ============================================================================
// Model Result
// ============================================================================

/// Outcome of one model call: output or failure, never both
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    /// The model answered
    Output {
        /// Raw text returned by the backend
        text: Document,
    },
    /// The call failed
    Failed(Failure),
}

/// Result of dispatching the document to one model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResult {
    /// Which model produced this
    pub model: ModelIdentity,
    /// Time from issuing the call to settling it
    pub latency: Duration,
    /// Output or failure
    pub outcome: Outcome,
}

impl ModelResult {
    /// A successful result
    #[must_use]
    pub fn success(model: ModelIdentity, text: Document, latency: Duration) -> Self {
        Self {
            model,
            latency,
            outcome: Outcome::Output { text },
        }
    }

    /// A failed result
    #[must_use]
    pub fn failure(model: ModelIdentity, failure: Failure, latency: Duration) -> Self {
        Self {
            model,
            latency,
            outcome: Outcome::Failed(failure),
        }
    }

    /// The output, if the call succeeded
    #[must_use]
    pub fn output(&self) -> Option<&Document> {
        match &self.outcome {
            Outcome::Output { text } => Some(text),
            Outcome::Failed(_) => None,
        }
    }

    /// The failure, if the call failed
    #[must_use]
    pub fn error(&self) -> Option<&Failure> {
        match &self.outcome {
            Outcome::Output { .. } => None,
            Outcome::Failed(failure) => Some(failure),
        }
    }

    /// True if the call produced an output
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.output().is_some()
    }
}

// ============================================================================
// Run Record
// ============================================================================

/// Unique identifier of a run
///
/// Formatted `YYYYMMDDTHHMMSSZ-xxxxxxxx` so that lexical order follows
/// creation order at second granularity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh identifier for a run created at `created_at`
    #[must_use]
    pub fn generate(created_at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}",
            created_at.format("%Y%m%dT%H%M%SZ"),
            &suffix[..8]
        ))
    }

    /// The identifier as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier is safe to use as a file name
    #[must_use]
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Everything one pipeline execution produced
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique identifier
    pub id: RunId,
    /// When the run started
    pub created_at: DateTime<Utc>,
    /// Caller label (e.g. the memo section being edited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// The submitted document
    pub input: Document,
    /// One result per dispatched model, in dispatch order
    pub results: Vec<ModelResult>,
    /// Model used for consolidation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidation_model: Option<ModelIdentity>,
    /// The merged document, if consolidation succeeded
    pub consolidated: Option<Document>,
    /// Why consolidation did not produce a document
    pub consolidation_error: Option<Failure>,
    /// How long the consolidation call took, if one was made
    pub consolidation_latency: Option<Duration>,
}

impl RunRecord {
    /// Results that carry an output
    pub fn successes(&self) -> impl Iterator<Item = &ModelResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    /// Number of successful results
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    /// Listing summary for this record
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            label: self.label.clone(),
            model_count: self.results.len(),
            success_count: self.success_count(),
            consolidated: self.consolidated.is_some(),
        }
    }
}

/// Lightweight description of a stored run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub id: RunId,
    /// When the run started
    pub created_at: DateTime<Utc>,
    /// Caller label
    #[serde(default)]
    pub label: Option<String>,
    /// Models dispatched
    pub model_count: usize,
    /// Models that produced output
    pub success_count: usize,
    /// Whether a consolidated document exists
    pub consolidated: bool,
}
