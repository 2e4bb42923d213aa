//! The reference verification strategy for OpenID Connect issuers
//!
//! Both the `Okta` and the `Oidc` provider kinds are served by
//! [`OidcProvider`]. They differ only in their [`ValidationSettings`].
//!
//! A token is accepted only if all of the following hold:
//!
//! * its algorithm is one of the approved algorithms
//! * a key in the issuer's key set matches its `kid` and algorithm
//! * its signature verifies against that key
//! * `iss` equals the trust record issuer
//! * `aud` contains the trust record audience
//! * `exp` is present and has not passed, allowing for leeway
//! * `nbf`, if present, has been reached, allowing for leeway

use std::{sync::Arc, time::Duration};

use aliri::{
    error::ClaimsRejected,
    jwa,
    jwt::{self, CoreClaims, CoreHeaders, HasAlgorithm},
    Jwt,
};
use aliri_clock::{Clock, System};

use crate::{
    claims::ClaimSet,
    credential::RawCredential,
    error::{self, ConfigurationError, VerificationFailed},
    provider::StrategyFactory,
    strategy::{BoxFuture, Verification, VerificationStrategy, VerifiedToken},
    trust::TrustRecord,
};

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub mod discovery;
mod keys;

pub use keys::{IssuerKeys, KeyStore, MIN_REFRESH_INTERVAL};

/// Tunables for verifying tokens from an OIDC issuer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationSettings {
    algorithms: Vec<jwa::Algorithm>,
    leeway: Duration,
}

impl ValidationSettings {
    /// Settings approving the given algorithms, with no leeway
    ///
    /// If no algorithms are approved, no token will verify.
    pub fn new<I>(algorithms: I) -> Self
    where
        I: IntoIterator<Item = jwa::Algorithm>,
    {
        Self {
            algorithms: algorithms.into_iter().collect(),
            leeway: Duration::ZERO,
        }
    }

    /// The settings used for Okta issuers
    ///
    /// Approves `RS256`, with a leeway of 120 seconds.
    pub fn okta() -> Self {
        Self::new([jwa::Algorithm::RS256]).with_leeway(Duration::from_secs(120))
    }

    /// The settings used for generic OIDC issuers
    ///
    /// Approves `RS256`, `RS384`, and `RS512`, with a leeway of 60 seconds.
    pub fn generic() -> Self {
        Self::new([
            jwa::Algorithm::RS256,
            jwa::Algorithm::RS384,
            jwa::Algorithm::RS512,
        ])
        .with_leeway(Duration::from_secs(60))
    }

    /// Allows a grace period on either side of the `nbf` and `exp` claims
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self { leeway, ..self }
    }

    /// The approved algorithms
    pub fn algorithms(&self) -> &[jwa::Algorithm] {
        &self.algorithms
    }

    /// The allowed clock skew
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    fn approves(&self, alg: jwa::Algorithm) -> bool {
        self.algorithms.contains(&alg)
    }

    // `nbf` is optional here, so it is checked by `NotBefore` rather than
    // by the core validator, which would require it.
    fn validator(&self, record: &TrustRecord) -> jwt::CoreValidator {
        jwt::CoreValidator::default()
            .extend_approved_algorithms(self.algorithms.iter().copied())
            .with_leeway(self.leeway)
            .check_expiration()
            .ignore_not_before()
            .require_issuer(record.issuer().to_owned())
            .add_allowed_audience(record.audience().to_owned())
    }
}

/// Rejects tokens whose `nbf` claim, when present, is still in the future
#[derive(Clone, Debug)]
struct NotBefore<C> {
    leeway: Duration,
    clock: C,
}

impl<C, H> jwt::ClaimsValidator<ClaimSet, H> for NotBefore<C>
where
    C: Clock,
{
    fn validate(&self, _header: &H, claims: &ClaimSet) -> Result<(), ClaimsRejected> {
        let now = self.clock.now();
        match claims.nbf() {
            Some(nbf) if nbf.0 > now.0.saturating_add(self.leeway.as_secs()) => {
                Err(ClaimsRejected::TokenNotYetValid)
            }
            _ => Ok(()),
        }
    }
}

/// A [`StrategyFactory`] for OpenID Connect issuers
///
/// All strategies created by one provider share its [`KeyStore`].
#[derive(Clone, Debug)]
pub struct OidcProvider {
    keys: KeyStore,
    settings: Arc<ValidationSettings>,
}

impl OidcProvider {
    /// Constructs a provider from a key store and validation settings
    pub fn new(keys: KeyStore, settings: ValidationSettings) -> Self {
        Self {
            keys,
            settings: Arc::new(settings),
        }
    }

    /// A provider for Okta issuers, discovering their keys on demand
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn okta() -> Result<Self, ConfigurationError> {
        Ok(Self::new(discovering_keys()?, ValidationSettings::okta()))
    }

    /// A provider for generic OIDC issuers, discovering their keys on demand
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn generic() -> Result<Self, ConfigurationError> {
        Ok(Self::new(discovering_keys()?, ValidationSettings::generic()))
    }

    /// The key store shared by this provider's strategies
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// The validation settings applied by this provider's strategies
    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }
}

#[cfg(feature = "reqwest")]
fn discovering_keys() -> Result<KeyStore, ConfigurationError> {
    KeyStore::remote().map_err(error::provider_init)
}

#[cfg(not(feature = "reqwest"))]
fn discovering_keys() -> Result<KeyStore, ConfigurationError> {
    Ok(KeyStore::new())
}

impl StrategyFactory for OidcProvider {
    fn configure(
        &self,
        record: &TrustRecord,
        credential: &RawCredential,
    ) -> Box<dyn VerificationStrategy> {
        Box::new(OidcStrategy {
            keys: self.keys.clone(),
            settings: Arc::clone(&self.settings),
            record: record.clone(),
            token: credential.token().to_owned(),
        })
    }
}

/// Verifies one token against one OIDC trust record
#[derive(Debug)]
pub struct OidcStrategy {
    keys: KeyStore,
    settings: Arc<ValidationSettings>,
    record: TrustRecord,
    token: Jwt,
}

impl OidcStrategy {
    /// The trust record this strategy is bound to
    pub fn record(&self) -> &TrustRecord {
        &self.record
    }

    async fn verify_token(&self) -> Result<VerifiedToken, VerificationFailed> {
        let decomposed: jwt::Decomposed = self.token.decompose()?;

        let alg = decomposed.alg();
        if !self.settings.approves(alg) {
            tracing::debug!(%alg, "token algorithm not approved");
            return Err(aliri::error::JwtVerifyError::from(ClaimsRejected::InvalidAlgorithm).into());
        }

        let kid = decomposed.kid();
        let keys = self.keys.resolve(self.record.issuer(), kid, alg).await?;
        let key = keys
            .get(kid, alg)
            .ok_or(VerificationFailed::UnknownKeyId)?;

        let not_before = NotBefore {
            leeway: self.settings.leeway,
            clock: System,
        };
        let validated: jwt::Validated<ClaimSet> = decomposed.verify_with_custom(
            key,
            &self.settings.validator(&self.record),
            not_before,
        )?;

        let (_, claims) = validated.extract();
        Ok(VerifiedToken::new(claims, &self.record))
    }
}

impl VerificationStrategy for OidcStrategy {
    fn verify(&self) -> BoxFuture<'_, Verification> {
        Box::pin(async move {
            let result = self.verify_token().await;
            match &result {
                Ok(_) => tracing::debug!(issuer = %self.record.issuer(), "token verified"),
                Err(err) => {
                    let error: &dyn std::error::Error = err;
                    tracing::debug!(error, issuer = %self.record.issuer(), "token failed verification");
                }
            }
            Verification::from(result)
        })
    }
}
