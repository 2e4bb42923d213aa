use std::fmt;

use once_cell::sync::OnceCell;

use crate::{
    credential,
    decision::{AccessDecision, DecisionAssembler},
    error::{ConfigurationError, Rejection},
    provider::ProviderRegistry,
    strategy::VerificationOutcome,
    trust::TrustRegistry,
};

/// The environment variable holding the trust configuration
pub const CONFIG_ENV_VAR: &str = "OIDC_CONFIG";

/// The authorization decision pipeline
///
/// Holds the trust and provider registries, which are read-only once built
/// and safe to share between concurrent requests.
#[derive(Clone, Debug)]
pub struct Authorizer {
    trust: TrustRegistry,
    providers: ProviderRegistry,
    assembler: DecisionAssembler,
}

impl Authorizer {
    /// Constructs an authorizer from its registries
    ///
    /// Trust records naming a provider kind that is not registered are
    /// kept, but every request they match will be rejected.
    pub fn new(trust: TrustRegistry, providers: ProviderRegistry) -> Self {
        for record in trust.iter() {
            if !providers.contains(record.provider()) {
                tracing::warn!(
                    issuer = %record.issuer(),
                    provider = %record.provider(),
                    "no verification strategy registered for provider; requests from this issuer will be rejected"
                );
            }
        }

        Self {
            trust,
            providers,
            assembler: DecisionAssembler::new(),
        }
    }

    /// Constructs an authorizer with the standard providers from a JSON
    /// array of trust records
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be parsed, or if a
    /// standard provider cannot be initialized.
    pub fn from_config_str(config: &str) -> Result<Self, ConfigurationError> {
        let trust = TrustRegistry::from_json(config)?;
        let providers = ProviderRegistry::standard()?;
        Ok(Self::new(trust, providers))
    }

    /// Constructs an authorizer with the standard providers from the trust
    /// configuration held in [`CONFIG_ENV_VAR`]
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not set or holds an invalid
    /// configuration.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let config = std::env::var(CONFIG_ENV_VAR)
            .map_err(|_| ConfigurationError::Missing(CONFIG_ENV_VAR))?;
        Self::from_config_str(&config)
    }

    /// The trust registry
    pub fn trust(&self) -> &TrustRegistry {
        &self.trust
    }

    /// The provider registry
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Decides whether to authorize a request bearing the given credential
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] if the request must not be authorized.
    #[tracing::instrument(skip_all)]
    pub async fn authorize(&self, raw_credential: &str) -> Result<AccessDecision, Rejection> {
        let result = self.decide(raw_credential).await;
        if let Err(err) = &result {
            let error: &dyn std::error::Error = err;
            tracing::debug!(error, "request rejected");
        }
        result
    }

    async fn decide(&self, raw_credential: &str) -> Result<AccessDecision, Rejection> {
        let credential = credential::extract(raw_credential)?;
        let issuer = credential.untrusted_issuer();
        tracing::debug!(%issuer, "credential extracted");

        let record = self.trust.lookup(issuer)?;
        tracing::debug!(provider = %record.provider(), "issuer trusted");

        let factory = self.providers.resolve(record.provider())?;
        let strategy = factory.configure(record, &credential);
        tracing::debug!("verification strategy configured");

        let outcome = VerificationOutcome::resolve(strategy.verify().await)?;

        Ok(self
            .assembler
            .assemble(outcome, credential.untrusted_claims())?)
    }
}

/// An [`Authorizer`] built on first use and shared for the life of the
/// process
///
/// Initialization happens at most once, even if the first requests arrive
/// concurrently. If initialization fails, the error is returned and the next
/// call tries again; no request is served from a partially built authorizer.
///
/// ```no_run
/// use aliri_authorizer::{Authorizer, LazyAuthorizer};
///
/// static AUTHORIZER: LazyAuthorizer = LazyAuthorizer::new(Authorizer::from_env);
///
/// # async fn handle(credential: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let decision = AUTHORIZER.get()?.authorize(credential).await?;
/// # let _ = decision;
/// # Ok(())
/// # }
/// ```
pub struct LazyAuthorizer {
    cell: OnceCell<Authorizer>,
    init: fn() -> Result<Authorizer, ConfigurationError>,
}

impl LazyAuthorizer {
    /// Creates a holder that builds its authorizer with `init`
    pub const fn new(init: fn() -> Result<Authorizer, ConfigurationError>) -> Self {
        Self {
            cell: OnceCell::new(),
            init,
        }
    }

    /// The authorizer, building it if this is the first use
    ///
    /// # Errors
    ///
    /// Returns an error if the authorizer has not yet been built and
    /// cannot be built now.
    pub fn get(&self) -> Result<&Authorizer, ConfigurationError> {
        self.cell.get_or_try_init(|| {
            let result = (self.init)();
            match &result {
                Ok(authorizer) => tracing::info!(
                    issuers = authorizer.trust().len(),
                    "authorizer initialized"
                ),
                Err(err) => {
                    let error: &dyn std::error::Error = err;
                    tracing::error!(error, "authorizer initialization failed");
                }
            }
            result
        })
    }

    /// Whether the authorizer has been built
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for LazyAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LazyAuthorizer")
            .field("authorizer", &self.cell.get())
            .finish_non_exhaustive()
    }
}
