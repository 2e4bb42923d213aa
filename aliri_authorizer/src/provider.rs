//! Dispatch from provider kinds to verification strategies
//!
//! The set of provider kinds that can be named in trust configuration is
//! closed: only kinds registered in code can be resolved. There is no
//! mechanism for instantiating an arbitrary type by name.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    credential::RawCredential,
    error::{self, ConfigurationError, UnknownProvider},
    oidc::OidcProvider,
    strategy::VerificationStrategy,
    trust::{ProviderKind, ProviderKindRef, TrustRecord},
};

/// Creates verification strategies for one kind of identity provider
///
/// A factory may hold state shared by the strategies it creates, such as a
/// key cache, but each call to [`configure()`][StrategyFactory::configure]
/// must produce a new strategy bound to exactly the given record and token.
pub trait StrategyFactory: fmt::Debug + Send + Sync {
    /// Creates a strategy bound to a single trust record and credential
    fn configure(
        &self,
        record: &TrustRecord,
        credential: &RawCredential,
    ) -> Box<dyn VerificationStrategy>;
}

impl<T> StrategyFactory for Arc<T>
where
    T: StrategyFactory + ?Sized,
{
    #[inline]
    fn configure(
        &self,
        record: &TrustRecord,
        credential: &RawCredential,
    ) -> Box<dyn VerificationStrategy> {
        T::configure(self, record, credential)
    }
}

type Constructor = fn() -> Result<Arc<dyn StrategyFactory>, ConfigurationError>;

/// The provider kinds available out of the box
const STANDARD_PROVIDERS: &[(&str, Constructor)] = &[("Okta", okta), ("Oidc", oidc)];

fn okta() -> Result<Arc<dyn StrategyFactory>, ConfigurationError> {
    Ok(Arc::new(OidcProvider::okta()?))
}

fn oidc() -> Result<Arc<dyn StrategyFactory>, ConfigurationError> {
    Ok(Arc::new(OidcProvider::generic()?))
}

/// A closed mapping from provider kind to strategy factory
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, Arc<dyn StrategyFactory>>,
}

impl ProviderRegistry {
    /// An empty registry, which resolves no provider kinds
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the standard provider kinds: `Okta` and `Oidc`
    ///
    /// # Errors
    ///
    /// Returns an error if a standard provider cannot be initialized.
    pub fn standard() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for &(kind, construct) in STANDARD_PROVIDERS {
            registry.register(ProviderKind::from_static(kind), construct()?);
        }
        Ok(registry)
    }

    /// Registers a factory for a provider kind, replacing any existing one
    pub fn register(
        &mut self,
        kind: impl Into<ProviderKind>,
        factory: impl StrategyFactory + 'static,
    ) -> &mut Self {
        let kind = kind.into();
        tracing::debug!(provider = %kind, "registered verification provider");
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    /// Registers a factory for a provider kind
    pub fn with_provider(
        mut self,
        kind: impl Into<ProviderKind>,
        factory: impl StrategyFactory + 'static,
    ) -> Self {
        self.register(kind, factory);
        self
    }

    /// Resolves the factory for a provider kind
    ///
    /// # Errors
    ///
    /// Returns [`UnknownProvider`] if the kind is not registered.
    pub fn resolve(&self, kind: &ProviderKindRef) -> Result<&dyn StrategyFactory, UnknownProvider> {
        self.factories
            .get(kind)
            .map(|f| &**f)
            .ok_or_else(|| error::unknown_provider(kind))
    }

    /// Whether a factory is registered for a provider kind
    #[must_use]
    pub fn contains(&self, kind: &ProviderKindRef) -> bool {
        self.factories.contains_key(kind)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        error::VerificationFailed,
        strategy::{BoxFuture, Verification},
    };

    #[derive(Debug)]
    struct NeverVerifies;

    impl VerificationStrategy for NeverVerifies {
        fn verify(&self) -> BoxFuture<'_, Verification> {
            Box::pin(async { Verification::Rejected(VerificationFailed::UnknownKeyId) })
        }
    }

    #[derive(Debug, Default)]
    struct CountingFactory {
        configured: AtomicUsize,
    }

    impl StrategyFactory for CountingFactory {
        fn configure(&self, _: &TrustRecord, _: &RawCredential) -> Box<dyn VerificationStrategy> {
            self.configured.fetch_add(1, Ordering::SeqCst);
            Box::new(NeverVerifies)
        }
    }

    #[test]
    fn standard_registry_knows_okta_and_oidc() -> Result<(), ConfigurationError> {
        let registry = ProviderRegistry::standard()?;

        assert!(registry.contains(ProviderKindRef::from_str("Okta")));
        assert!(registry.contains(ProviderKindRef::from_str("Oidc")));

        Ok(())
    }

    #[test]
    fn unregistered_kind_is_unknown() -> Result<(), ConfigurationError> {
        let registry = ProviderRegistry::standard()?;

        for kind in ["okta", "OKTA", "authorizers.Okta", "Google", ""] {
            let err = registry.resolve(ProviderKindRef::from_str(kind)).unwrap_err();
            assert_eq!(err.kind().as_str(), kind);
        }

        Ok(())
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = ProviderRegistry::new();

        assert!(registry.resolve(ProviderKindRef::from_str("Okta")).is_err());
    }

    #[test]
    fn each_configure_creates_a_fresh_strategy() -> color_eyre::Result<()> {
        let factory = Arc::new(CountingFactory::default());
        let registry = ProviderRegistry::new().with_provider("Counting", factory.clone());

        let record = TrustRecord::new("Counting", crate::test::ISSUER, "aud", "sub");
        let credential = crate::test::credential(&serde_json::json!({ "iss": crate::test::ISSUER }))?;

        let resolved = registry.resolve(record.provider())?;
        let _first = resolved.configure(&record, &credential);
        let _second = resolved.configure(&record, &credential);

        assert_eq!(factory.configured.load(Ordering::SeqCst), 2);

        Ok(())
    }
}
