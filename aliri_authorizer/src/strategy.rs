//! The verification strategy capability
//!
//! A [`VerificationStrategy`] is created fresh for every request by a
//! [`StrategyFactory`][crate::StrategyFactory], already bound to exactly one
//! trust record and one token. Because the binding happens at construction,
//! a strategy can never be reconfigured or reused for a second token.

use std::{collections::BTreeMap, fmt, future::Future, pin::Pin};

use serde_json::Value;

use crate::{
    claims::{ClaimName, ClaimSet},
    error::{self, PrincipalClaimMissing, VerificationFailed},
    trust::TrustRecord,
};

/// An owned, boxed future, as returned by a [`VerificationStrategy`]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Supplementary claims surfaced to downstream consumers of a decision
pub type Context = BTreeMap<String, Value>;

/// Provider-specific verification of a single bound credential
pub trait VerificationStrategy: fmt::Debug + Send + Sync {
    /// Performs full verification of the bound credential
    ///
    /// This includes verifying the signature against the issuer's key
    /// material, checking that the audience matches the trust record, and
    /// checking that the token is neither expired nor used before its
    /// not-before time.
    ///
    /// Failure is a normal outcome and is returned as
    /// [`Verification::Rejected`]. Any retries (for example, when fetching
    /// keys) are internal to the strategy; the caller never retries.
    fn verify(&self) -> BoxFuture<'_, Verification>;
}

/// The result of running a [`VerificationStrategy`]
#[derive(Debug)]
pub enum Verification {
    /// The credential was verified
    Verified(VerifiedToken),

    /// The credential was not accepted
    Rejected(VerificationFailed),
}

impl Verification {
    /// Whether verification succeeded
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

impl From<Result<VerifiedToken, VerificationFailed>> for Verification {
    #[inline]
    fn from(result: Result<VerifiedToken, VerificationFailed>) -> Self {
        match result {
            Ok(token) => Self::Verified(token),
            Err(err) => Self::Rejected(err),
        }
    }
}

/// The verified claims of a token, along with how to read its principal
///
/// Strategies should only construct this type once a token has passed
/// every check.
#[derive(Clone, Debug)]
pub struct VerifiedToken {
    claims: ClaimSet,
    principal_claim: ClaimName,
    context_claims: Vec<ClaimName>,
}

impl VerifiedToken {
    /// Binds verified claims to the trust record that verified them
    pub fn new(claims: ClaimSet, record: &TrustRecord) -> Self {
        Self {
            claims,
            principal_claim: record.principal_claim().to_owned(),
            context_claims: record.context_claims().map(ToOwned::to_owned).collect(),
        }
    }

    /// The verified claims
    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// The principal identifier, read from the configured principal claim
    ///
    /// # Errors
    ///
    /// Returns [`PrincipalClaimMissing`] if the claim is absent from the
    /// verified claims or is not a string.
    pub fn principal(&self) -> Result<&str, PrincipalClaimMissing> {
        self.claims
            .get(&self.principal_claim)
            .and_then(Value::as_str)
            .ok_or_else(|| error::principal_claim_missing(&self.principal_claim))
    }

    /// The supplementary claims to surface with the decision
    ///
    /// Each configured context claim that is present in the verified claims
    /// and holds a string, number, or boolean is included. Others are skipped.
    pub fn context(&self) -> Context {
        self.context_claims
            .iter()
            .filter_map(|name| {
                self.claims
                    .get(name)
                    .filter(|v| is_scalar(v))
                    .map(|v| (name.as_str().to_owned(), v.clone()))
            })
            .collect()
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// The verification outcome consumed by the [`DecisionAssembler`][crate::DecisionAssembler]
///
/// Produced exactly once per request from a [`Verification`].
#[derive(Debug)]
pub enum VerificationOutcome {
    /// Verification succeeded and a principal was identified
    Verified {
        /// The principal identifier
        principal: String,
        /// Supplementary claims for downstream consumers
        context: Context,
    },

    /// Verification failed
    Rejected(VerificationFailed),
}

impl VerificationOutcome {
    /// Resolves the principal and context of a verification
    ///
    /// # Errors
    ///
    /// Returns [`PrincipalClaimMissing`] if verification succeeded but the
    /// verified claims do not carry the configured principal claim.
    pub fn resolve(verification: Verification) -> Result<Self, PrincipalClaimMissing> {
        match verification {
            Verification::Verified(token) => Ok(Self::Verified {
                principal: token.principal()?.to_owned(),
                context: token.context(),
            }),
            Verification::Rejected(err) => Ok(Self::Rejected(err)),
        }
    }

    /// Whether verification succeeded
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    /// The principal identifier, if verified
    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::Verified { principal, .. } => Some(principal),
            Self::Rejected(_) => None,
        }
    }

    /// The supplementary claims, if verified
    pub fn context(&self) -> Option<&Context> {
        match self {
            Self::Verified { context, .. } => Some(context),
            Self::Rejected(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;

    fn token(claims: Value, record: &TrustRecord) -> Result<VerifiedToken> {
        Ok(VerifiedToken::new(serde_json::from_value(claims)?, record))
    }

    fn record() -> TrustRecord {
        TrustRecord::new("Okta", "https://idp.example", "api://default", "uid")
            .with_context_claim("email")
            .with_context_claim("groups")
            .with_context_claim("email_verified")
            .with_context_claim("absent")
    }

    #[test]
    fn principal_is_read_from_configured_claim() -> Result<()> {
        let token = token(json!({ "sub": "subject", "uid": "user-id" }), &record())?;

        assert_eq!(token.principal()?, "user-id");

        Ok(())
    }

    #[test]
    fn missing_principal_claim_is_an_error() -> Result<()> {
        let token = token(json!({ "sub": "subject" }), &record())?;

        let err = token.principal().unwrap_err();
        assert_eq!(err.claim().as_str(), "uid");

        Ok(())
    }

    #[test]
    fn non_string_principal_claim_is_an_error() -> Result<()> {
        let token = token(json!({ "uid": 1234 }), &record())?;

        assert!(token.principal().is_err());

        Ok(())
    }

    #[test]
    fn context_includes_only_configured_scalar_claims() -> Result<()> {
        let token = token(
            json!({
                "uid": "user-id",
                "email": "user@example.com",
                "email_verified": true,
                "groups": ["admins"],
                "scp": "openid",
            }),
            &record(),
        )?;

        let context = token.context();

        let expected: Context = [
            ("email".to_owned(), json!("user@example.com")),
            ("email_verified".to_owned(), json!(true)),
        ]
        .into_iter()
        .collect();
        assert_eq!(context, expected);

        Ok(())
    }

    #[test]
    fn outcome_of_verified_token_carries_principal() -> Result<()> {
        let token = token(json!({ "uid": "user-id", "email": "e@example.com" }), &record())?;

        let outcome = VerificationOutcome::resolve(Verification::Verified(token))?;

        assert!(outcome.is_verified());
        assert_eq!(outcome.principal(), Some("user-id"));
        assert_eq!(outcome.context().map(|c| c.len()), Some(1));

        Ok(())
    }

    #[test]
    fn outcome_of_rejection_does_not_consult_principal() -> Result<()> {
        let outcome = VerificationOutcome::resolve(Verification::Rejected(
            VerificationFailed::UnknownKeyId,
        ))?;

        assert!(!outcome.is_verified());
        assert_eq!(outcome.principal(), None);
        assert!(outcome.context().is_none());

        Ok(())
    }

    #[test]
    fn outcome_of_token_without_principal_is_an_error() -> Result<()> {
        let token = token(json!({ "sub": "subject" }), &record())?;

        let result = VerificationOutcome::resolve(Verification::Verified(token));

        assert!(result.is_err());

        Ok(())
    }
}
