//! Rejections and configuration errors
//!
//! Every failure to authorize a single request is a [`Rejection`]. These are
//! expected outcomes which a transport adapter renders as a uniform
//! "unauthorized" response. A [`ConfigurationError`] is different: it means
//! that no trust registry could be built, and no request can be served until
//! the configuration is corrected.

use std::error::Error as StdError;

use aliri::jwt;
use thiserror::Error;

use crate::{claims::ClaimName, trust::ProviderKind};

/// The bearer credential could not be extracted or decoded
#[derive(Debug, Error)]
pub enum MalformedCredential {
    /// The credential did not start with the `Bearer: ` scheme prefix
    #[error("credential is missing the expected bearer scheme prefix")]
    MissingScheme,

    /// The token envelope, header, or signature segment could not be decoded
    #[error("credential is not a well-formed JWT")]
    Jwt(#[from] aliri::error::JwtVerifyError),

    /// The payload segment is not a base64url-encoded JSON claim set
    #[error("malformed JWT payload")]
    Payload(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The payload does not name an issuer
    #[error("required iss claim missing")]
    MissingIssuer,
}

pub(crate) fn malformed_payload(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedCredential {
    MalformedCredential::Payload(source.into())
}

/// The credential's issuer has no configured trust relationship
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("issuer '{issuer}' is not trusted")]
pub struct NotTrusted {
    issuer: jwt::Issuer,
}

impl NotTrusted {
    /// The issuer that failed to match
    pub fn issuer(&self) -> &jwt::IssuerRef {
        &self.issuer
    }
}

pub(crate) fn not_trusted(issuer: &jwt::IssuerRef) -> NotTrusted {
    NotTrusted {
        issuer: issuer.to_owned(),
    }
}

/// The trust record names a provider kind with no registered strategy
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("no verification strategy registered for provider '{kind}'")]
pub struct UnknownProvider {
    kind: ProviderKind,
}

impl UnknownProvider {
    /// The provider kind that failed to resolve
    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }
}

pub(crate) fn unknown_provider(kind: &crate::trust::ProviderKindRef) -> UnknownProvider {
    UnknownProvider {
        kind: kind.to_owned(),
    }
}

/// The verified claim set does not carry the configured principal claim
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("required {claim} claim missing from verified token")]
pub struct PrincipalClaimMissing {
    claim: ClaimName,
}

impl PrincipalClaimMissing {
    /// The name of the missing claim
    pub fn claim(&self) -> &ClaimName {
        &self.claim
    }
}

pub(crate) fn principal_claim_missing(claim: &crate::claims::ClaimNameRef) -> PrincipalClaimMissing {
    PrincipalClaimMissing {
        claim: claim.to_owned(),
    }
}

/// The verification strategy did not accept the credential
///
/// This is a normal outcome of verification, carried inside
/// [`Verification::Rejected`][crate::Verification::Rejected], and is never
/// raised as a fault by a strategy.
#[derive(Debug, Error)]
pub enum VerificationFailed {
    /// No key in the issuer's key set matches the token header
    #[error("no matching key found to validate JWT")]
    UnknownKeyId,

    /// The issuer's signing keys could not be obtained
    #[error("signing keys unavailable")]
    KeysUnavailable(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// The JWT was rejected (signature, algorithm, issuer, audience, or timing)
    #[error("invalid JWT")]
    JwtVerifyError(#[from] aliri::error::JwtVerifyError),
}

pub(crate) fn keys_unavailable(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> VerificationFailed {
    VerificationFailed::KeysUnavailable(source.into())
}

/// A request-scoped reason for refusing to authorize a request
///
/// Every variant is rendered identically at the transport boundary.
#[derive(Debug, Error)]
pub enum Rejection {
    /// The credential could not be extracted or decoded
    #[error(transparent)]
    MalformedCredential(#[from] MalformedCredential),

    /// The issuer is not in the trust registry
    #[error(transparent)]
    NotTrusted(#[from] NotTrusted),

    /// The trust record's provider kind is not registered
    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),

    /// The credential failed verification
    #[error("credential failed verification")]
    VerificationFailed(#[from] VerificationFailed),

    /// The verified credential has no usable principal claim
    #[error(transparent)]
    PrincipalClaimMissing(#[from] PrincipalClaimMissing),
}

impl Rejection {
    /// Whether the rejection occurred while extracting the credential
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedCredential(_))
    }

    /// Whether the rejection is due to an untrusted issuer
    #[must_use]
    pub fn is_not_trusted(&self) -> bool {
        matches!(self, Self::NotTrusted(_))
    }

    /// Whether the rejection is due to an unregistered provider kind
    #[must_use]
    pub fn is_unknown_provider(&self) -> bool {
        matches!(self, Self::UnknownProvider(_))
    }

    /// Whether the rejection is due to failed verification
    #[must_use]
    pub fn is_verification_failed(&self) -> bool {
        matches!(self, Self::VerificationFailed(_))
    }

    /// Whether the rejection is due to a missing principal claim
    #[must_use]
    pub fn is_principal_claim_missing(&self) -> bool {
        matches!(self, Self::PrincipalClaimMissing(_))
    }
}

/// The trust configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configuration source was not present
    #[error("trust configuration variable `{0}` is not set")]
    Missing(&'static str),

    /// The configuration could not be parsed as a list of trust records
    #[error("trust configuration could not be parsed")]
    Malformed(#[from] serde_json::Error),

    /// A provider's supporting resources could not be initialized
    #[error("verification provider could not be initialized")]
    Provider(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

pub(crate) fn provider_init(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> ConfigurationError {
    ConfigurationError::Provider(source.into())
}
