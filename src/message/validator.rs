//! Admission gate for inbound and outbound messages.
//!
//! Validation runs in two phases:
//! - A structural check on the raw JSON object (field presence and type).
//!   Garbage is rejected here before any cryptography runs.
//! - The full delegation chain check in [`DelegationManager::verify`].
//!
//! Batch validation runs the phases independently per message with a bound
//! on in-flight signature verifications.

use crate::clock::Clock;
use crate::constants::{
    DEFAULT_MAX_CONCURRENT_VERIFICATIONS, MAX_CLOCK_SKEW_MS, STALE_MESSAGE_AGE_MS,
};
use crate::delegation::DelegationManager;
use crate::message::types::OpchanMessage;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Fields that must be present as strings.
const REQUIRED_STRING_FIELDS: [&str; 5] = ["id", "type", "author", "signature", "browserPubKey"];

/// Field that must be present as a number.
const REQUIRED_NUMBER_FIELD: &str = "timestamp";

/// Diagnostic report from [`MessageValidator::validate_structure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureReport {
    /// No required field is missing or mistyped.
    pub is_valid: bool,
    /// Required fields that are absent.
    pub missing_fields: Vec<String>,
    /// Required fields present with the wrong type.
    pub invalid_fields: Vec<String>,
    /// Non-fatal observations (stale or future timestamps).
    pub warnings: Vec<String>,
}

/// Validator limits.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorLimits {
    /// Maximum concurrent signature verifications in a batch.
    pub max_concurrent_verifications: usize,
    /// Age after which a timestamp draws a staleness warning.
    pub stale_message_age_ms: u64,
    /// How far in the future a timestamp may be before it draws a warning.
    pub max_clock_skew_ms: u64,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            max_concurrent_verifications: DEFAULT_MAX_CONCURRENT_VERIFICATIONS,
            stale_message_age_ms: STALE_MESSAGE_AGE_MS,
            max_clock_skew_ms: MAX_CLOCK_SKEW_MS,
        }
    }
}

/// Structural and cryptographic message validation.
///
/// Cheap to clone; clones share the same delegation manager.
#[derive(Debug, Clone)]
pub struct MessageValidator {
    delegation: Arc<DelegationManager>,
    clock: Arc<dyn Clock>,
    limits: ValidatorLimits,
}

impl MessageValidator {
    /// Creates a validator with default limits.
    pub fn new(delegation: Arc<DelegationManager>, clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(delegation, clock, ValidatorLimits::default())
    }

    /// Creates a validator with explicit limits.
    ///
    /// A concurrency limit of zero is raised to one.
    pub fn with_limits(
        delegation: Arc<DelegationManager>,
        clock: Arc<dyn Clock>,
        mut limits: ValidatorLimits,
    ) -> Self {
        limits.max_concurrent_verifications = limits.max_concurrent_verifications.max(1);
        Self {
            delegation,
            clock,
            limits,
        }
    }

    /// Returns the delegation manager used for the cryptographic phase.
    pub fn delegation(&self) -> &Arc<DelegationManager> {
        &self.delegation
    }

    /// Structural phase: checks presence and type of the required fields.
    ///
    /// `delegationProof` is checked for presence as an object; its contents
    /// are left to parsing and verification.
    pub fn has_required_fields(raw: &Value) -> bool {
        let Some(object) = raw.as_object() else {
            return false;
        };
        REQUIRED_STRING_FIELDS
            .iter()
            .all(|field| object.get(*field).is_some_and(Value::is_string))
            && object
                .get(REQUIRED_NUMBER_FIELD)
                .is_some_and(Value::is_number)
            && object.get("delegationProof").is_some_and(Value::is_object)
    }

    /// Runs the structural phase alone.
    pub fn quick_validate(&self, raw: &Value) -> bool {
        Self::has_required_fields(raw)
    }

    /// Runs both phases on a raw JSON object.
    pub fn is_valid_message(&self, raw: &Value) -> bool {
        if !Self::has_required_fields(raw) {
            debug!(
                id = raw.get("id").and_then(serde_json::Value::as_str).unwrap_or("<none>"),
                kind = raw.get("type").and_then(serde_json::Value::as_str).unwrap_or("<none>"),
                has_signature = raw.get("signature").is_some(),
                "Rejected message: missing or mistyped fields"
            );
            return false;
        }

        match OpchanMessage::from_value(raw.clone()) {
            Ok(message) => self.is_valid(&message),
            Err(e) => {
                debug!(
                    id = raw.get("id").and_then(serde_json::Value::as_str).unwrap_or("<none>"),
                    "Rejected message: {}", e
                );
                false
            }
        }
    }

    /// Runs the cryptographic phase on an already typed message.
    pub fn is_valid(&self, message: &OpchanMessage) -> bool {
        let valid = self.delegation.verify(message);
        if !valid {
            warn!(
                id = message.id(),
                kind = %message.kind(),
                author = message.author(),
                "Rejected message: signature or delegation does not verify"
            );
        }
        valid
    }

    /// Produces a diagnostic report without running any cryptography.
    pub fn validate_structure(&self, raw: &Value) -> StructureReport {
        let mut report = StructureReport::default();
        let Some(object) = raw.as_object() else {
            report.invalid_fields.push("<root>".to_string());
            return report;
        };

        let mut check = |field: &str, type_ok: fn(&Value) -> bool| match object.get(field) {
            None => report.missing_fields.push(field.to_string()),
            Some(value) if !type_ok(value) => report.invalid_fields.push(field.to_string()),
            Some(_) => {}
        };
        for field in REQUIRED_STRING_FIELDS {
            check(field, Value::is_string);
        }
        check(REQUIRED_NUMBER_FIELD, Value::is_number);
        check("delegationProof", Value::is_object);

        if let Some(timestamp) = object.get(REQUIRED_NUMBER_FIELD).and_then(Value::as_u64) {
            let now = self.clock.now_millis();
            if now.saturating_sub(timestamp) > self.limits.stale_message_age_ms {
                report.warnings.push(format!(
                    "Timestamp {} is more than {}ms old",
                    timestamp, self.limits.stale_message_age_ms
                ));
            }
            if timestamp.saturating_sub(now) > self.limits.max_clock_skew_ms {
                report.warnings.push(format!(
                    "Timestamp {} is more than {}ms in the future",
                    timestamp, self.limits.max_clock_skew_ms
                ));
            }
        }

        report.is_valid = report.missing_fields.is_empty() && report.invalid_fields.is_empty();
        report
    }

    /// Validates raw messages concurrently, returning one verdict per input in order.
    pub async fn batch_validate(&self, raws: Vec<Value>) -> Vec<bool> {
        self.run_bounded(raws, |validator, raw| validator.is_valid_message(raw))
            .await
            .into_iter()
            .map(|checked| checked.is_some_and(|(_, valid)| valid))
            .collect()
    }

    /// Validates typed messages concurrently, returning only the valid ones in input order.
    pub async fn validate_messages(&self, messages: Vec<OpchanMessage>) -> Vec<OpchanMessage> {
        self.run_bounded(messages, |validator, message| validator.is_valid(message))
            .await
            .into_iter()
            .flatten()
            .filter_map(|(message, valid)| valid.then_some(message))
            .collect()
    }

    /// Runs `check` on each item on the blocking pool, at most
    /// `max_concurrent_verifications` at a time.
    ///
    /// Returns one slot per input, in input order, holding the item and its
    /// verdict. A check that panics loses its item and leaves the slot `None`.
    async fn run_bounded<T, F>(&self, items: Vec<T>, check: F) -> Vec<Option<(T, bool)>>
    where
        T: Send + 'static,
        F: Fn(&MessageValidator, &T) -> bool + Send + Sync + Copy + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limits.max_concurrent_verifications));
        let mut slots: Vec<Option<(T, bool)>> = items.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let validator = self.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let valid = check(&validator, &item);
                (index, item, valid)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, item, valid)) => slots[index] = Some((item, valid)),
                Err(e) => warn!("Validation task failed: {}", e),
            }
        }
        slots
    }
}
