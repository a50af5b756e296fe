//! Request admission: size guard, rate limit, bounded redaction, persistence.
//!
//! [`Gateway::process`] walks one request through
//! `Received → SizeChecked → RateChecked → Processing → Persisted → Completed`
//! and turns every failure along the way into a typed [`Outcome`]. Nothing is
//! persisted or returned unless the whole pipeline succeeds.

pub mod rate_limit;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::redaction::{
    Cancellation, DeterministicKey, PatternSet, RedactError, RedactMode, Redaction,
    RedactionEngine, Salt, SaltPolicy,
};
use crate::store::{MappingHandle, MappingRecord, MappingStore};

pub use rate_limit::{RateDecision, RateLimiter};

/// Pipeline stage a request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Bytes accepted from the transport.
    Received,
    /// Payload is within the size limit.
    SizeChecked,
    /// Caller is within its rate window.
    RateChecked,
    /// Redaction engine running.
    Processing,
    /// Mapping record written.
    Persisted,
    /// Result handed back.
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Received => "received",
            Self::SizeChecked => "size_checked",
            Self::RateChecked => "rate_checked",
            Self::Processing => "processing",
            Self::Persisted => "persisted",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Flat error taxonomy used for logging and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input over the byte limit.
    PayloadTooLarge,
    /// Caller over its rate window.
    RateLimited,
    /// Invalid UTF-8 or empty input.
    MalformedInput,
    /// Requested mode is not configured.
    ModeUnavailable,
    /// Engine exceeded the request timeout.
    Timeout,
    /// Engine failed for another reason.
    EngineFailure,
    /// Mapping could not be persisted.
    StoreUnavailable,
}

impl ErrorKind {
    /// Stable snake_case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimited => "rate_limited",
            Self::MalformedInput => "malformed_input",
            Self::ModeUnavailable => "mode_unavailable",
            Self::Timeout => "timeout",
            Self::EngineFailure => "engine_failure",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request refused before any redaction work was kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Input exceeds the configured byte limit.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Received size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Caller exhausted its window. Not counted against it.
    #[error("rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimited {
        /// Time until a slot frees up.
        retry_after: Duration,
    },

    /// Input is not valid UTF-8 or is empty.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Requested mode has no configured secret.
    #[error("{0} mode is not available")]
    ModeUnavailable(RedactMode),
}

impl Rejection {
    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::MalformedInput(_) => ErrorKind::MalformedInput,
            Self::ModeUnavailable(_) => ErrorKind::ModeUnavailable,
        }
    }

    /// Last stage the request passed before being refused.
    pub fn stage(&self) -> Stage {
        match self {
            Self::PayloadTooLarge { .. } => Stage::Received,
            Self::RateLimited { .. } => Stage::SizeChecked,
            Self::MalformedInput(_) | Self::ModeUnavailable(_) => Stage::RateChecked,
        }
    }
}

/// Request admitted but not completed. Nothing was returned or kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    /// Engine did not finish in time.
    #[error("redaction timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Configured timeout.
        after: Duration,
    },

    /// Engine failed.
    #[error("redaction failed: {0}")]
    Engine(String),

    /// Store refused the mapping record.
    #[error("mapping store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Failure {
    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Engine(_) => ErrorKind::EngineFailure,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// Stage the request failed in.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Timeout { .. } | Self::Engine(_) => Stage::Processing,
            Self::StoreUnavailable(_) => Stage::Persisted,
        }
    }
}

/// Successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Text with every identifier replaced.
    pub redacted_text: String,
    /// Handle the mapping record was stored under.
    pub handle: MappingHandle,
    /// Number of entries in the record.
    pub entry_count: usize,
}

/// Terminal state of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Redacted and persisted.
    Completed(Completion),
    /// Refused before processing.
    Rejected(Rejection),
    /// Failed during processing or persistence.
    Failed(Failure),
}

impl Outcome {
    /// Final stage reached.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Completed(_) => Stage::Completed,
            Self::Rejected(r) => r.stage(),
            Self::Failed(f) => f.stage(),
        }
    }

    /// Taxonomy kind, if the request did not complete.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Completed(_) => None,
            Self::Rejected(r) => Some(r.kind()),
            Self::Failed(f) => Some(f.kind()),
        }
    }
}

/// Per-request limits applied by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Largest accepted input in bytes.
    pub max_payload_bytes: usize,
    /// Upper bound on engine run time.
    pub request_timeout: Duration,
    /// Lifetime of persisted mapping records.
    pub mapping_ttl: Duration,
    /// Salt source for deterministic mode.
    pub salt_policy: SaltPolicy,
}

impl AdmissionPolicy {
    /// Policy from validated configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_payload_bytes: config.limits.max_payload_bytes,
            request_timeout: Duration::from_secs(config.limits.request_timeout_secs),
            mapping_ttl: Duration::from_secs(config.mapping.ttl_secs),
            salt_policy: config.deterministic.salt,
        }
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Admission layer shared by every request.
///
/// The store and limiter are injected; the gateway itself holds no mutable
/// state.
pub struct Gateway {
    patterns: Arc<PatternSet>,
    store: Arc<dyn MappingStore>,
    limiter: Arc<RateLimiter>,
    key: Option<Arc<DeterministicKey>>,
    policy: AdmissionPolicy,
}

impl Gateway {
    /// Compile the detectors and assemble the gateway.
    ///
    /// `key` is `None` when deterministic mode is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`RedactError::Pattern`] if a detector fails to compile.
    pub fn new(
        store: Arc<dyn MappingStore>,
        limiter: Arc<RateLimiter>,
        key: Option<Arc<DeterministicKey>>,
        policy: AdmissionPolicy,
    ) -> Result<Self, RedactError> {
        Ok(Self {
            patterns: Arc::new(PatternSet::new()?),
            store,
            limiter,
            key,
            policy,
        })
    }

    /// Shared mapping store.
    pub fn store(&self) -> &Arc<dyn MappingStore> {
        &self.store
    }

    /// Shared rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Active policy.
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Whether deterministic mode can be served.
    pub fn deterministic_available(&self) -> bool {
        self.key.is_some()
    }

    /// Run one request through the pipeline.
    ///
    /// Logs identity, mode, kind and timing only; never the text.
    #[instrument(skip(self, body, mode), fields(mode = %mode, size = body.len()))]
    pub async fn process(&self, body: &[u8], mode: RedactMode, identity: &str) -> Outcome {
        let started = Instant::now();
        let outcome = self.run(body, mode, identity).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &outcome {
            Outcome::Completed(done) => info!(
                entry_count = done.entry_count,
                elapsed_ms,
                backend = self.store.backend(),
                "redaction completed"
            ),
            Outcome::Rejected(reason) => warn!(
                kind = %reason.kind(),
                stage = %reason.stage(),
                elapsed_ms,
                "request rejected"
            ),
            Outcome::Failed(reason) => error!(
                kind = %reason.kind(),
                stage = %reason.stage(),
                elapsed_ms,
                error = %reason,
                "request failed"
            ),
        }
        outcome
    }

    async fn run(&self, body: &[u8], mode: RedactMode, identity: &str) -> Outcome {
        let limit = self.policy.max_payload_bytes;
        if body.len() > limit {
            return Outcome::Rejected(Rejection::PayloadTooLarge {
                size: body.len(),
                limit,
            });
        }

        if let RateDecision::Limited { retry_after } = self.limiter.check(identity, Instant::now()) {
            return Outcome::Rejected(Rejection::RateLimited { retry_after });
        }

        let text = match std::str::from_utf8(body) {
            Ok("") => {
                return Outcome::Rejected(Rejection::MalformedInput("empty text".to_owned()));
            }
            Ok(text) => text.to_owned(),
            Err(e) => {
                return Outcome::Rejected(Rejection::MalformedInput(format!(
                    "invalid utf-8 at byte {}",
                    e.valid_up_to()
                )));
            }
        };

        let salt = match mode {
            RedactMode::Deterministic => self.policy.salt_policy.salt(),
            RedactMode::Random => Salt::stable(),
        };
        let engine = match RedactionEngine::for_mode(
            Arc::clone(&self.patterns),
            mode,
            self.key.clone(),
            salt,
        ) {
            Ok(engine) => engine,
            Err(_) => return Outcome::Rejected(Rejection::ModeUnavailable(mode)),
        };

        let redaction = match self.redact_bounded(engine, text).await {
            Ok(redaction) => redaction,
            Err(failure) => return Outcome::Failed(failure),
        };

        let record = MappingRecord::new(redaction.entries, self.policy.mapping_ttl);
        let entry_count = record.entries.len();
        match self.store.put(record).await {
            Ok(handle) => Outcome::Completed(Completion {
                redacted_text: redaction.text,
                handle,
                entry_count,
            }),
            Err(e) => Outcome::Failed(Failure::StoreUnavailable(e.to_string())),
        }
    }

    /// Run the engine on the blocking pool under the request timeout.
    ///
    /// On expiry the scan is cancelled at its next candidate and its result,
    /// if any, is dropped.
    async fn redact_bounded(
        &self,
        engine: RedactionEngine,
        text: String,
    ) -> Result<Redaction, Failure> {
        let after = self.policy.request_timeout;
        let cancel = Cancellation::new();
        let worker_cancel = cancel.clone();
        let task = tokio::task::spawn_blocking(move || engine.redact_until(&text, &worker_cancel));

        match tokio::time::timeout(after, task).await {
            Ok(Ok(Ok(redaction))) => Ok(redaction),
            Ok(Ok(Err(RedactError::Cancelled))) => Err(Failure::Timeout { after }),
            Ok(Ok(Err(e))) => Err(Failure::Engine(e.to_string())),
            Ok(Err(join)) => Err(Failure::Engine(join.to_string())),
            Err(_) => {
                cancel.cancel();
                Err(Failure::Timeout { after })
            }
        }
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("backend", &self.store.backend())
            .field("deterministic", &self.key.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
