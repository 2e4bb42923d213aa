//! Trust relationships between this service and JWT issuers

use std::collections::HashMap;

use aliri::jwt;
use aliri_braid::braid;
use serde::{Deserialize, Serialize};

use crate::{
    claims::{ClaimName, ClaimNameRef},
    error::{self, ConfigurationError, NotTrusted},
};

/// Identifies the kind of identity provider that verifies a credential
///
/// Provider kinds are matched exactly, including case, against the
/// registrations in a [`ProviderRegistry`][crate::ProviderRegistry].
#[braid(serde, ref_doc = "A borrowed reference to a [`ProviderKind`]")]
pub struct ProviderKind;

/// A configured trust relationship with a single issuer
///
/// Serialized as
///
/// ```json
/// {
///     "provider": "Okta",
///     "issuer": "https://idp.example/oauth2/default",
///     "audience": "api://default",
///     "principalIdField": "sub",
///     "contextClaims": ["email"]
/// }
/// ```
///
/// `contextClaims` is optional.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    provider: ProviderKind,
    issuer: jwt::Issuer,
    audience: jwt::Audience,
    #[serde(rename = "principalIdField")]
    principal_claim: ClaimName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    context_claims: Vec<ClaimName>,
}

impl TrustRecord {
    /// Constructs a trust record
    pub fn new(
        provider: impl Into<ProviderKind>,
        issuer: impl Into<jwt::Issuer>,
        audience: impl Into<jwt::Audience>,
        principal_claim: impl Into<ClaimName>,
    ) -> Self {
        Self {
            provider: provider.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            principal_claim: principal_claim.into(),
            context_claims: Vec::new(),
        }
    }

    /// Adds a claim to surface as decision context once verified
    pub fn with_context_claim(mut self, claim: impl Into<ClaimName>) -> Self {
        self.context_claims.push(claim.into());
        self
    }

    /// The kind of provider that verifies tokens from this issuer
    pub fn provider(&self) -> &ProviderKindRef {
        &self.provider
    }

    /// The trusted issuer
    pub fn issuer(&self) -> &jwt::IssuerRef {
        &self.issuer
    }

    /// The audience that tokens must be issued for
    pub fn audience(&self) -> &jwt::AudienceRef {
        &self.audience
    }

    /// The claim whose value identifies the principal
    pub fn principal_claim(&self) -> &ClaimNameRef {
        &self.principal_claim
    }

    /// Claims to surface to downstream consumers as decision context
    pub fn context_claims(&self) -> impl Iterator<Item = &ClaimNameRef> {
        self.context_claims.iter().map(AsRef::as_ref)
    }
}

/// An immutable mapping from issuer to trust record
///
/// Lookups are exact, case-sensitive matches on the issuer string: no
/// normalization, trailing-slash tolerance, or wildcards are applied.
#[derive(Clone, Debug, Default)]
pub struct TrustRegistry {
    records: HashMap<jwt::Issuer, TrustRecord>,
}

impl TrustRegistry {
    /// Builds a registry from an ordered sequence of trust records
    ///
    /// If more than one record names the same issuer, the **last** one wins
    /// and earlier ones are silently discarded. This is a compatibility
    /// policy, not a validation step; collisions are logged at `warn`.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TrustRecord>,
    {
        let mut map = HashMap::new();
        for record in records {
            let issuer = record.issuer.clone();
            if let Some(replaced) = map.insert(issuer, record) {
                tracing::warn!(
                    issuer = %replaced.issuer,
                    provider = %replaced.provider,
                    "multiple trust records for issuer; last one wins"
                );
            }
        }

        tracing::info!(records = map.len(), "trust registry built");

        Self { records: map }
    }

    /// Builds a registry from a JSON array of trust records
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a JSON array of trust records.
    pub fn from_json(config: &str) -> Result<Self, ConfigurationError> {
        let records: Vec<TrustRecord> = serde_json::from_str(config)?;
        Ok(Self::from_records(records))
    }

    /// Finds the trust record for an issuer
    ///
    /// # Errors
    ///
    /// Returns [`NotTrusted`] if no record names this issuer.
    pub fn lookup(&self, issuer: &jwt::IssuerRef) -> Result<&TrustRecord, NotTrusted> {
        self.records
            .get(issuer)
            .ok_or_else(|| error::not_trusted(issuer))
    }

    /// Iterates through all trust records, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &TrustRecord> {
        self.records.values()
    }

    /// The number of trusted issuers
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no issuers are trusted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
