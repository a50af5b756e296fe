//! Redaction engine: detect network identifiers and swap in surrogates.
//!
//! One [`RedactionEngine`] is built per request. It shares the compiled
//! [`PatternSet`] read-only and owns everything else, so concurrent requests
//! never touch each other's buffers. The engine never writes to the mapping
//! store; persisting the entries is the admission layer's job.

pub mod patterns;
pub mod surrogate;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use patterns::{Address, AddressKind, MacStyle, MatchCandidate, PatternSet};
pub use surrogate::{DeterministicKey, Salt, SaltPolicy, SecretValue, SurrogateSource};

/// Errors produced while building or running an engine.
#[derive(Debug, thiserror::Error)]
pub enum RedactError {
    /// Deterministic mode was requested but no secret is configured.
    #[error("deterministic mode requires a configured secret")]
    MissingSecret,

    /// The secret could not key the PRF.
    #[error("invalid deterministic key: {0}")]
    InvalidKey(String),

    /// The caller abandoned the scan.
    #[error("redaction cancelled")]
    Cancelled,

    /// A detector failed to compile.
    #[error("pattern compilation failed: {0}")]
    Pattern(#[from] regex::Error),
}

/// Surrogate discipline requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactMode {
    /// Independent CSPRNG draw per occurrence.
    #[default]
    Random,
    /// Keyed derivation, stable for one salt.
    Deterministic,
}

impl RedactMode {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Deterministic => "deterministic",
        }
    }
}

impl fmt::Display for RedactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One original ↔ surrogate correspondence.
///
/// `Debug` hides the original so entries can sit in error chains safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Literal as it appeared in the input.
    pub original: String,
    /// Literal substituted into the output.
    pub surrogate: String,
    /// Kind of identifier.
    pub kind: AddressKind,
}

impl fmt::Debug for MappingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingEntry")
            .field("original", &"__REDACTED__")
            .field("surrogate", &self.surrogate)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Output of one redaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redaction {
    /// Text with every detected literal replaced.
    pub text: String,
    /// Entries in ascending offset order of the original text.
    pub entries: Vec<MappingEntry>,
}

/// Cooperative cancellation flag checked once per candidate.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// A flag that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the scan to stop at the next candidate boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fail with [`RedactError::Cancelled`] once triggered.
    ///
    /// # Errors
    ///
    /// Returns [`RedactError::Cancelled`] after [`cancel`](Self::cancel).
    pub fn check(&self) -> Result<(), RedactError> {
        if self.is_cancelled() {
            return Err(RedactError::Cancelled);
        }
        Ok(())
    }
}

/// Per-request redaction engine.
#[derive(Debug, Clone)]
pub struct RedactionEngine {
    patterns: Arc<PatternSet>,
    source: SurrogateSource,
}

impl RedactionEngine {
    /// Engine drawing independent random surrogates.
    pub fn random(patterns: Arc<PatternSet>) -> Self {
        Self {
            patterns,
            source: SurrogateSource::Random,
        }
    }

    /// Engine deriving surrogates from `key` and `salt`.
    pub fn deterministic(patterns: Arc<PatternSet>, key: Arc<DeterministicKey>, salt: Salt) -> Self {
        Self {
            patterns,
            source: SurrogateSource::Keyed { key, salt },
        }
    }

    /// Engine for `mode`. The salt is only used in deterministic mode.
    ///
    /// # Errors
    ///
    /// Returns [`RedactError::MissingSecret`] when deterministic mode is
    /// requested without a key.
    pub fn for_mode(
        patterns: Arc<PatternSet>,
        mode: RedactMode,
        key: Option<Arc<DeterministicKey>>,
        salt: Salt,
    ) -> Result<Self, RedactError> {
        match mode {
            RedactMode::Random => Ok(Self::random(patterns)),
            RedactMode::Deterministic => {
                let key = key.ok_or(RedactError::MissingSecret)?;
                Ok(Self::deterministic(patterns, key, salt))
            }
        }
    }

    /// Mode this engine was built for.
    pub fn mode(&self) -> RedactMode {
        match self.source {
            SurrogateSource::Random => RedactMode::Random,
            SurrogateSource::Keyed { .. } => RedactMode::Deterministic,
        }
    }

    /// Redact `text` to completion.
    ///
    /// # Errors
    ///
    /// Never cancelled, so errors only surface from the detectors.
    pub fn redact(&self, text: &str) -> Result<Redaction, RedactError> {
        self.redact_until(text, &Cancellation::new())
    }

    /// Redact `text`, stopping at the next candidate once `cancel` fires.
    ///
    /// Output is built by a single left-to-right copy-and-substitute pass over
    /// the original text, so every span refers to original offsets.
    ///
    /// # Errors
    ///
    /// Returns [`RedactError::Cancelled`] if `cancel` fires mid-scan. No
    /// partial output is returned in that case.
    pub fn redact_until(&self, text: &str, cancel: &Cancellation) -> Result<Redaction, RedactError> {
        let candidates = self.patterns.find_candidates(text, cancel)?;

        let mut output = String::with_capacity(text.len());
        let mut entries = Vec::with_capacity(candidates.len());
        let mut cursor = 0;

        for candidate in &candidates {
            cancel.check()?;
            let original = candidate.literal(text);
            let surrogate = self.source.surrogate_for(&candidate.address);

            output.push_str(text.get(cursor..candidate.span.start).unwrap_or_default());
            output.push_str(&surrogate);
            cursor = candidate.span.end;

            entries.push(MappingEntry {
                original: original.to_owned(),
                surrogate,
                kind: candidate.kind(),
            });
        }
        output.push_str(text.get(cursor..).unwrap_or_default());

        Ok(Redaction {
            text: output,
            entries,
        })
    }
}
