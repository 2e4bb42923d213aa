//! Assembly of access decisions from verification outcomes
//!
//! A decision is only ever assembled for a verified credential, so its
//! effect is always [`Effect::Allow`]. Failure to authorize is signalled by
//! not producing a decision at all.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::{
    claims::ClaimSet,
    error::VerificationFailed,
    strategy::{Context, VerificationOutcome},
};

/// The key that time conditions are evaluated against
pub const CONDITION_KEY: &str = "aws:CurrentTime";

/// The resource scope granted by every decision
pub const WILDCARD_RESOURCE: &str = "*";

/// Whether a decision allows or denies access
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Effect {
    /// Access is allowed
    Allow,
    /// Access is denied
    Deny,
}

impl Effect {
    /// The name of the effect, as rendered in a policy document
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A date comparison applied to the current time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ConditionOperator {
    /// The current time must be after the condition instant
    DateGreaterThan,
    /// The current time must be before the condition instant
    DateLessThan,
}

impl ConditionOperator {
    /// The name of the operator, as rendered in a policy document
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DateGreaterThan => "DateGreaterThan",
            Self::DateLessThan => "DateLessThan",
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bound condition on an access decision
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Condition {
    operator: ConditionOperator,
    key: &'static str,
    #[serde(rename = "value", serialize_with = "serialize_instant")]
    instant: DateTime<Utc>,
}

impl Condition {
    /// The current time must be after `instant`
    pub fn not_before(instant: DateTime<Utc>) -> Self {
        Self {
            operator: ConditionOperator::DateGreaterThan,
            key: CONDITION_KEY,
            instant,
        }
    }

    /// The current time must be before `instant`
    pub fn not_after(instant: DateTime<Utc>) -> Self {
        Self {
            operator: ConditionOperator::DateLessThan,
            key: CONDITION_KEY,
            instant,
        }
    }

    /// The comparison operator
    pub fn operator(&self) -> ConditionOperator {
        self.operator
    }

    /// The key compared against
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// The instant compared against
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// The instant, formatted as `YYYY-MM-DDTHH:MM:SSZ`
    pub fn value(&self) -> String {
        format_instant(&self.instant)
    }
}

fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn serialize_instant<S: Serializer>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_instant(instant))
}

/// An access decision for a single request
///
/// Built fresh for each request and never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[must_use]
pub struct AccessDecision {
    principal_id: String,
    effect: Effect,
    resource: &'static str,
    conditions: Vec<Condition>,
    context: Context,
}

impl AccessDecision {
    /// The identified principal
    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    /// The effect of the decision
    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// The resource scope the decision applies to
    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// The time-bound conditions, not-before first
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Supplementary claims for downstream consumers
    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// Produces access decisions from verification outcomes
#[derive(Clone, Copy, Debug, Default)]
pub struct DecisionAssembler;

impl DecisionAssembler {
    /// Constructs a decision assembler
    pub const fn new() -> Self {
        Self
    }

    /// Assembles the access decision for a verification outcome
    ///
    /// The decision window is derived from the credential's claims. The
    /// earliest valid time is `nbf` when present, otherwise `iat`. The latest
    /// valid time is `exp`. A bound with no claim to derive it from is
    /// omitted.
    ///
    /// # Errors
    ///
    /// If the outcome is a rejection, returns the reason verification failed.
    pub fn assemble(
        &self,
        outcome: VerificationOutcome,
        claims: &ClaimSet,
    ) -> Result<AccessDecision, VerificationFailed> {
        let (principal_id, context) = match outcome {
            VerificationOutcome::Verified { principal, context } => (principal, context),
            VerificationOutcome::Rejected(failed) => return Err(failed),
        };

        let conditions: Vec<_> = claims
            .not_before()
            .or_else(|| claims.issued_at())
            .map(Condition::not_before)
            .into_iter()
            .chain(claims.expires_at().map(Condition::not_after))
            .collect();

        tracing::debug!(
            principal = %principal_id,
            conditions = conditions.len(),
            "access decision assembled"
        );

        Ok(AccessDecision {
            principal_id,
            effect: Effect::Allow,
            resource: WILDCARD_RESOURCE,
            conditions,
            context,
        })
    }
}
