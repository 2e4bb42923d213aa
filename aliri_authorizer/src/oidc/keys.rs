use std::{collections::HashMap, sync::Arc, time::Duration};

use aliri::{jwa, jwk, jwt, Jwk, Jwks};
use aliri_clock::{Clock, System, UnixTime};
use arc_swap::ArcSwap;
#[cfg(feature = "reqwest")]
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};

use crate::error::{self, VerificationFailed};

/// The minimum time between two attempts to refresh an issuer's key set
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// The key set held for a single issuer
#[derive(Clone, Debug)]
pub struct IssuerKeys {
    jwks: Jwks,
    checked_at: UnixTime,
    pinned: bool,
    #[cfg(feature = "reqwest")]
    jwks_uri: Option<String>,
    #[cfg(feature = "reqwest")]
    etag: Option<HeaderValue>,
    #[cfg(feature = "reqwest")]
    last_modified: Option<HeaderValue>,
}

impl IssuerKeys {
    fn new(jwks: Jwks, checked_at: UnixTime) -> Self {
        Self {
            jwks,
            checked_at,
            pinned: false,
            #[cfg(feature = "reqwest")]
            jwks_uri: None,
            #[cfg(feature = "reqwest")]
            etag: None,
            #[cfg(feature = "reqwest")]
            last_modified: None,
        }
    }

    fn pinned(jwks: Jwks) -> Self {
        Self {
            pinned: true,
            ..Self::new(jwks, System.now())
        }
    }

    #[cfg(feature = "reqwest")]
    fn checked(&self, now: UnixTime) -> Self {
        Self {
            checked_at: now,
            ..self.clone()
        }
    }

    /// The key set
    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    /// Selects the best key for the key ID, if given, and algorithm
    pub fn get(&self, kid: Option<&jwk::KeyIdRef>, alg: jwa::Algorithm) -> Option<&Jwk> {
        self.jwks.get_key_by_opt(kid, alg)
    }

    /// When the key set was last fetched or checked for changes
    pub fn checked_at(&self) -> UnixTime {
        self.checked_at
    }

    /// Whether the key set was supplied up front and is never refreshed
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    fn is_refresh_due(&self, now: UnixTime) -> bool {
        !self.pinned && now.0 >= self.checked_at.0.saturating_add(MIN_REFRESH_INTERVAL.as_secs())
    }
}

#[derive(Debug)]
struct Inner {
    issuers: ArcSwap<HashMap<jwt::Issuer, Arc<IssuerKeys>>>,
    #[cfg(feature = "reqwest")]
    client: Option<Client>,
}

/// A cache of signing keys, keyed by issuer
///
/// Key sets may be pinned up front with [`with_jwks()`][KeyStore::with_jwks].
/// A remote key store additionally discovers the key set of any other issuer
/// on first use, and refreshes an issuer's key set when a token names a key
/// that the cached set does not hold. Refreshes for an issuer are attempted
/// at most once every [`MIN_REFRESH_INTERVAL`]. Pinned key sets are never
/// refreshed.
///
/// Clones share the same cache.
#[derive(Clone, Debug)]
#[must_use]
pub struct KeyStore {
    inner: Arc<Inner>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore {
    /// A key store holding only key sets that are explicitly added
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                issuers: ArcSwap::from_pointee(HashMap::new()),
                #[cfg(feature = "reqwest")]
                client: None,
            }),
        }
    }

    /// A key store that discovers and fetches key sets from issuers
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn remote() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("aliri_authorizer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(client))
    }

    /// A key store that discovers and fetches key sets using `client`
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn with_client(client: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                issuers: ArcSwap::from_pointee(HashMap::new()),
                client: Some(client),
            }),
        }
    }

    /// Pins the key set for an issuer
    pub fn with_jwks(self, issuer: impl Into<jwt::Issuer>, jwks: Jwks) -> Self {
        self.set_jwks(issuer, jwks);
        self
    }

    /// Pins the key set for an issuer, replacing any cached key set
    pub fn set_jwks(&self, issuer: impl Into<jwt::Issuer>, jwks: Jwks) {
        self.store(issuer.into(), Arc::new(IssuerKeys::pinned(jwks)));
    }

    /// The cached key set for an issuer
    pub fn get(&self, issuer: &jwt::IssuerRef) -> Option<Arc<IssuerKeys>> {
        self.inner.issuers.load().get(issuer).cloned()
    }

    fn store(&self, issuer: jwt::Issuer, keys: Arc<IssuerKeys>) {
        self.inner.issuers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(issuer.clone(), Arc::clone(&keys));
            next
        });
    }

    /// Stores `keys` only if the cached entry is still `expected`
    ///
    /// A concurrent refresh may have stored a newer key set in the meantime,
    /// which must not be replaced.
    #[cfg(feature = "reqwest")]
    fn store_if_unchanged(
        &self,
        issuer: &jwt::IssuerRef,
        expected: Option<&Arc<IssuerKeys>>,
        keys: Arc<IssuerKeys>,
    ) {
        self.inner.issuers.rcu(|current| {
            let unchanged = match (current.get(issuer), expected) {
                (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
                (None, None) => true,
                _ => false,
            };

            if unchanged {
                let mut next = HashMap::clone(current);
                next.insert(issuer.to_owned(), Arc::clone(&keys));
                Arc::new(next)
            } else {
                tracing::debug!(%issuer, "key set changed during refresh; keeping newer keys");
                Arc::clone(current)
            }
        });
    }

    /// Resolves the key set holding a key that matches a token header
    ///
    /// # Errors
    ///
    /// Returns [`VerificationFailed::UnknownKeyId`] if no key matches, even
    /// after any refresh, or [`VerificationFailed::KeysUnavailable`] if the
    /// issuer's key set could not be obtained at all.
    pub async fn resolve(
        &self,
        issuer: &jwt::IssuerRef,
        kid: Option<&jwk::KeyIdRef>,
        alg: jwa::Algorithm,
    ) -> Result<Arc<IssuerKeys>, VerificationFailed> {
        let now = System.now();

        let keys = match self.get(issuer) {
            Some(keys) if keys.get(kid, alg).is_some() || !keys.is_refresh_due(now) => keys,
            cached => self.refresh(issuer, cached, now).await?,
        };

        if keys.get(kid, alg).is_some() {
            Ok(keys)
        } else if keys.jwks().keys().is_empty() {
            Err(error::keys_unavailable("no signing keys available for issuer"))
        } else {
            if let Some(kid) = kid {
                tracing::debug!(%issuer, %kid, %alg, "unable to find matching key");
            } else {
                tracing::debug!(%issuer, %alg, "unable to find matching key");
            }
            Err(VerificationFailed::UnknownKeyId)
        }
    }

    #[cfg(not(feature = "reqwest"))]
    async fn refresh(
        &self,
        _issuer: &jwt::IssuerRef,
        cached: Option<Arc<IssuerKeys>>,
        _now: UnixTime,
    ) -> Result<Arc<IssuerKeys>, VerificationFailed> {
        cached.ok_or_else(|| error::keys_unavailable("no keys configured for issuer"))
    }

    #[cfg(feature = "reqwest")]
    #[tracing::instrument(skip(self, cached, now))]
    async fn refresh(
        &self,
        issuer: &jwt::IssuerRef,
        cached: Option<Arc<IssuerKeys>>,
        now: UnixTime,
    ) -> Result<Arc<IssuerKeys>, VerificationFailed> {
        let client = match &self.inner.client {
            Some(client) => client,
            None => {
                return cached
                    .ok_or_else(|| error::keys_unavailable("no keys configured for issuer"))
            }
        };

        match fetch(client, issuer, cached.as_deref(), now).await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                self.store(issuer.to_owned(), Arc::clone(&keys));
                Ok(keys)
            }
            Err(err) => {
                let error: &dyn std::error::Error = &*err;
                tracing::warn!(error, "JWKS refresh failed");

                // Record the attempt so that the refresh interval also
                // applies to failures.
                let attempted = cached
                    .as_deref()
                    .map(|c| c.checked(now))
                    .unwrap_or_else(|| IssuerKeys::new(Jwks::default(), now));
                self.store_if_unchanged(issuer, cached.as_ref(), Arc::new(attempted));

                Err(error::keys_unavailable(err))
            }
        }
    }
}

#[cfg(feature = "reqwest")]
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[cfg(feature = "reqwest")]
async fn fetch(
    client: &Client,
    issuer: &jwt::IssuerRef,
    cached: Option<&IssuerKeys>,
    now: UnixTime,
) -> Result<IssuerKeys, BoxError> {
    let jwks_uri = match cached.and_then(|c| c.jwks_uri.clone()) {
        Some(uri) => uri,
        None => super::discovery::fetch_configuration(client, issuer)
            .await?
            .jwks_uri()
            .to_owned(),
    };

    tracing::debug!(jwks.url = %jwks_uri, "refreshing JWKS");
    let mut request = client.get(&jwks_uri);

    if let Some(cached) = cached.filter(|c| c.jwks_uri.as_deref() == Some(jwks_uri.as_str())) {
        if let Some(etag) = &cached.etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        } else if let Some(last_modified) = &cached.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }
    }

    let response = request.send().await?;

    if response.status() == StatusCode::NOT_MODIFIED {
        if let Some(cached) = cached {
            tracing::debug!("JWKS not modified");
            return Ok(cached.checked(now));
        }
    }

    if let Err(err) = response.error_for_status_ref() {
        tracing::warn!(
            http.status_code = response.status().as_u16(),
            "unexpected response status fetching JWKS",
        );
        return Err(err.into());
    }

    let etag = response.headers().get(header::ETAG).map(ToOwned::to_owned);
    let last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .map(ToOwned::to_owned);
    let jwks = response.json::<Jwks>().await?;

    tracing::info!(jwks.url = %jwks_uri, keys = jwks.keys().len(), "JWKS refreshed");

    Ok(IssuerKeys {
        jwks_uri: Some(jwks_uri),
        etag,
        last_modified,
        ..IssuerKeys::new(jwks, now)
    })
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::test;

    fn issuer() -> &'static jwt::IssuerRef {
        jwt::IssuerRef::from_str(test::ISSUER)
    }

    fn kid() -> Option<&'static jwk::KeyIdRef> {
        Some(jwk::KeyIdRef::from_str(test::KEY_ID))
    }

    #[tokio::test]
    async fn pinned_keys_resolve() -> Result<()> {
        let store = KeyStore::new().with_jwks(issuer().to_owned(), test::jwks());

        let keys = store.resolve(issuer(), kid(), jwa::Algorithm::HS256).await?;

        assert!(keys.is_pinned());
        assert!(keys.get(kid(), jwa::Algorithm::HS256).is_some());

        Ok(())
    }

    #[tokio::test]
    async fn key_without_kid_resolves_by_algorithm() -> Result<()> {
        let store = KeyStore::new().with_jwks(issuer().to_owned(), test::jwks());

        let keys = store.resolve(issuer(), None, jwa::Algorithm::HS256).await?;

        assert!(keys.get(None, jwa::Algorithm::HS256).is_some());

        Ok(())
    }

    #[tokio::test]
    async fn unknown_kid_is_reported() {
        let store = KeyStore::new().with_jwks(issuer().to_owned(), test::jwks());

        let err = store
            .resolve(
                issuer(),
                Some(jwk::KeyIdRef::from_str("another key")),
                jwa::Algorithm::HS256,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationFailed::UnknownKeyId));
    }

    #[tokio::test]
    async fn unknown_issuer_has_no_keys() {
        let store = KeyStore::new().with_jwks(issuer().to_owned(), test::jwks());

        let err = store
            .resolve(
                jwt::IssuerRef::from_str("https://elsewhere.example"),
                kid(),
                jwa::Algorithm::HS256,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationFailed::KeysUnavailable(_)));
    }

    #[cfg(feature = "reqwest")]
    #[tokio::test]
    async fn pinned_keys_are_never_refreshed() -> Result<()> {
        let store = KeyStore::remote()?.with_jwks(issuer().to_owned(), test::jwks());

        let err = store
            .resolve(
                issuer(),
                Some(jwk::KeyIdRef::from_str("another key")),
                jwa::Algorithm::HS256,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VerificationFailed::UnknownKeyId));

        Ok(())
    }

    #[test]
    fn refresh_is_rate_limited() {
        let fetched = IssuerKeys::new(test::jwks(), UnixTime(1_700_000_000));

        assert!(!fetched.is_refresh_due(UnixTime(1_700_000_000)));
        assert!(!fetched.is_refresh_due(UnixTime(1_700_000_029)));
        assert!(fetched.is_refresh_due(UnixTime(1_700_000_030)));
    }

    #[test]
    fn pinned_keys_are_never_due() {
        let pinned = IssuerKeys::pinned(test::jwks());

        assert!(!pinned.is_refresh_due(UnixTime(u64::MAX)));
    }

    #[test]
    fn clones_share_the_cache() {
        let store = KeyStore::new();
        let clone = store.clone();

        clone.set_jwks(issuer().to_owned(), test::jwks());

        assert!(store.get(issuer()).is_some());
    }

    #[cfg(feature = "reqwest")]
    mod remote {
        use std::time::Duration;

        use color_eyre::Result;
        use serde_json::json;

        use super::*;
        use crate::test::issuer::{Reply, TestIssuer, DISCOVERY, KEYS};

        fn standard(base: &str, request: &test::issuer::Request, _: usize) -> Reply {
            match request.path.as_str() {
                DISCOVERY => Reply::discovery(base),
                KEYS => Reply::json(&test::jwks()),
                _ => Reply::status(404),
            }
        }

        fn a_minute_ago() -> UnixTime {
            UnixTime(System.now().0 - 60)
        }

        /// Seeds the store with a key set last checked a minute ago
        fn seed_stale(store: &KeyStore, idp: &TestIssuer, keys: IssuerKeys) {
            let keys = IssuerKeys {
                jwks_uri: Some(idp.url(KEYS)),
                ..keys
            };
            store.store(idp.issuer().to_owned(), Arc::new(keys));
        }

        fn rotated_jwks() -> Jwks {
            let mut jwks = Jwks::default();
            jwks.add_key(test::key().with_key_id(jwk::KeyId::from_static("rotated away")));
            jwks
        }

        #[tokio::test]
        async fn first_use_discovers_and_fetches_keys() -> Result<()> {
            let idp = TestIssuer::start(standard).await?;
            let store = idp.key_store()?;

            let keys = store.resolve(idp.issuer(), kid(), jwa::Algorithm::HS256).await?;

            assert!(!keys.is_pinned());
            assert!(keys.get(kid(), jwa::Algorithm::HS256).is_some());
            assert_eq!(idp.count(DISCOVERY), 1);
            assert_eq!(idp.count(KEYS), 1);

            store.resolve(idp.issuer(), kid(), jwa::Algorithm::HS256).await?;

            assert_eq!(idp.count(DISCOVERY), 1);
            assert_eq!(idp.count(KEYS), 1);

            Ok(())
        }

        #[tokio::test]
        async fn missing_kid_refreshes_once_per_interval() -> Result<()> {
            let idp = TestIssuer::start(standard).await?;
            let store = idp.key_store()?;
            seed_stale(&store, &idp, IssuerKeys::new(rotated_jwks(), a_minute_ago()));

            let keys = store.resolve(idp.issuer(), kid(), jwa::Algorithm::HS256).await?;

            assert!(keys.get(kid(), jwa::Algorithm::HS256).is_some());
            assert_eq!(idp.count(DISCOVERY), 0);
            assert_eq!(idp.count(KEYS), 1);

            let err = store
                .resolve(
                    idp.issuer(),
                    Some(jwk::KeyIdRef::from_str("another key")),
                    jwa::Algorithm::HS256,
                )
                .await
                .unwrap_err();

            assert!(matches!(err, VerificationFailed::UnknownKeyId));
            assert_eq!(idp.count(KEYS), 1);

            Ok(())
        }

        #[tokio::test]
        async fn failed_fetch_is_not_retried_within_interval() -> Result<()> {
            let idp = TestIssuer::start(|base, request, _| match request.path.as_str() {
                DISCOVERY => Reply::discovery(base),
                _ => Reply::status(500),
            })
            .await?;
            let store = idp.key_store()?;

            for _ in 0..2 {
                let err = store
                    .resolve(idp.issuer(), kid(), jwa::Algorithm::HS256)
                    .await
                    .unwrap_err();
                assert!(matches!(err, VerificationFailed::KeysUnavailable(_)));
            }

            assert_eq!(idp.count(DISCOVERY), 1);
            assert_eq!(idp.count(KEYS), 1);

            Ok(())
        }

        #[tokio::test]
        async fn not_modified_keeps_cached_keys() -> Result<()> {
            let idp = TestIssuer::start(|base, request, _| match request.path.as_str() {
                DISCOVERY => Reply::discovery(base),
                KEYS if request.header("if-none-match") == Some("\"v1\"") => Reply::status(304),
                _ => Reply::json(&Jwks::default()),
            })
            .await?;
            let store = idp.key_store()?;
            let stale = a_minute_ago();
            seed_stale(
                &store,
                &idp,
                IssuerKeys {
                    etag: Some(HeaderValue::from_static("\"v1\"")),
                    ..IssuerKeys::new(test::jwks(), stale)
                },
            );

            let err = store
                .resolve(
                    idp.issuer(),
                    Some(jwk::KeyIdRef::from_str("another key")),
                    jwa::Algorithm::HS256,
                )
                .await
                .unwrap_err();

            assert!(matches!(err, VerificationFailed::UnknownKeyId));

            let requests = idp.requests(KEYS);
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].header("if-none-match"), Some("\"v1\""));

            let cached = store.get(idp.issuer()).unwrap();
            assert!(cached.get(kid(), jwa::Algorithm::HS256).is_some());
            assert!(cached.checked_at().0 > stale.0);

            Ok(())
        }

        #[tokio::test]
        async fn mismatched_discovery_issuer_leaves_keys_unavailable() -> Result<()> {
            let idp = TestIssuer::start(|base, request, _| match request.path.as_str() {
                DISCOVERY => Reply::json(&json!({
                    "issuer": "https://elsewhere.example",
                    "jwks_uri": format!("{}{}", base, KEYS),
                })),
                _ => Reply::json(&test::jwks()),
            })
            .await?;
            let store = idp.key_store()?;

            let err = store
                .resolve(idp.issuer(), kid(), jwa::Algorithm::HS256)
                .await
                .unwrap_err();

            assert!(matches!(err, VerificationFailed::KeysUnavailable(_)));
            assert_eq!(idp.count(KEYS), 0);

            Ok(())
        }

        #[tokio::test]
        async fn failed_refresh_keeps_keys_from_concurrent_success() -> Result<()> {
            let idp = TestIssuer::start(|base, request, seen| match request.path.as_str() {
                DISCOVERY => Reply::discovery(base),
                KEYS if seen == 1 => Reply::json(&test::jwks()),
                _ => Reply::status(500).after(Duration::from_millis(300)),
            })
            .await?;
            let store = idp.key_store()?;

            let (first, second) = tokio::join!(
                store.resolve(idp.issuer(), kid(), jwa::Algorithm::HS256),
                store.resolve(idp.issuer(), kid(), jwa::Algorithm::HS256),
            );

            assert_ne!(first.is_ok(), second.is_ok());
            assert_eq!(idp.count(KEYS), 2);

            let keys = store.resolve(idp.issuer(), kid(), jwa::Algorithm::HS256).await?;

            assert!(keys.get(kid(), jwa::Algorithm::HS256).is_some());
            assert_eq!(idp.count(KEYS), 2);

            Ok(())
        }
    }
}
