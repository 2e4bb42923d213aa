//! OpenID Connect discovery

use aliri::jwt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const WELL_KNOWN_CONFIGURATION: &str = "/.well-known/openid-configuration";

/// The subset of an OpenID provider's configuration used to find its keys
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct OidcConfiguration {
    issuer: jwt::Issuer,
    jwks_uri: String,
}

impl OidcConfiguration {
    /// The issuer the configuration describes
    pub fn issuer(&self) -> &jwt::IssuerRef {
        &self.issuer
    }

    /// Where the issuer publishes its key set
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }
}

/// An OpenID provider configuration could not be discovered
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The configuration document could not be fetched or parsed
    #[error("unable to fetch OpenID configuration")]
    Http(#[from] reqwest::Error),

    /// The configuration document describes a different issuer
    #[error("OpenID configuration names issuer '{found}', expected '{expected}'")]
    IssuerMismatch {
        /// The issuer that was queried
        expected: jwt::Issuer,
        /// The issuer named in the configuration document
        found: jwt::Issuer,
    },
}

/// The location of an issuer's OpenID configuration document
pub fn configuration_url(issuer: &jwt::IssuerRef) -> String {
    let mut url = issuer.as_str().trim_end_matches('/').to_owned();
    url.push_str(WELL_KNOWN_CONFIGURATION);
    url
}

/// Fetches an issuer's OpenID configuration document
///
/// # Errors
///
/// Returns an error if the document cannot be fetched, or if the issuer it
/// names is not exactly the issuer that was queried.
#[tracing::instrument(skip(client))]
pub async fn fetch_configuration(
    client: &Client,
    issuer: &jwt::IssuerRef,
) -> Result<OidcConfiguration, DiscoveryError> {
    let url = configuration_url(issuer);
    tracing::debug!(oidc.url = %url, "discovering OpenID configuration");

    let response = client.get(&url).send().await?;
    response.error_for_status_ref()?;

    let configuration = response.json::<OidcConfiguration>().await?;
    check_issuer(issuer, configuration)
}

fn check_issuer(
    expected: &jwt::IssuerRef,
    configuration: OidcConfiguration,
) -> Result<OidcConfiguration, DiscoveryError> {
    if configuration.issuer() == expected {
        Ok(configuration)
    } else {
        tracing::warn!(
            %expected,
            found = %configuration.issuer(),
            "OpenID configuration issuer mismatch",
        );
        Err(DiscoveryError::IssuerMismatch {
            expected: expected.to_owned(),
            found: configuration.issuer,
        })
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn configuration_url_is_under_issuer() {
        let issuer = jwt::IssuerRef::from_str("https://idp.example/oauth2/default");

        assert_eq!(
            configuration_url(issuer),
            "https://idp.example/oauth2/default/.well-known/openid-configuration"
        );
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let issuer = jwt::IssuerRef::from_str("https://login.example.org/");

        assert_eq!(
            configuration_url(issuer),
            "https://login.example.org/.well-known/openid-configuration"
        );
    }

    #[test]
    fn configuration_document_is_parsed() -> Result<()> {
        let configuration: OidcConfiguration = serde_json::from_str(
            r#"{
                "issuer": "https://idp.example/oauth2/default",
                "authorization_endpoint": "https://idp.example/oauth2/default/v1/authorize",
                "jwks_uri": "https://idp.example/oauth2/default/v1/keys",
                "id_token_signing_alg_values_supported": ["RS256"]
            }"#,
        )?;

        assert_eq!(
            configuration.jwks_uri(),
            "https://idp.example/oauth2/default/v1/keys"
        );

        Ok(())
    }

    #[test]
    fn mismatched_issuer_is_refused() -> Result<()> {
        let configuration: OidcConfiguration = serde_json::from_str(
            r#"{ "issuer": "https://evil.example", "jwks_uri": "https://evil.example/keys" }"#,
        )?;

        let err = check_issuer(
            jwt::IssuerRef::from_str("https://idp.example/oauth2/default"),
            configuration,
        )
        .unwrap_err();

        assert!(matches!(err, DiscoveryError::IssuerMismatch { .. }));

        Ok(())
    }

    #[test]
    fn matching_issuer_is_accepted() -> Result<()> {
        let configuration: OidcConfiguration = serde_json::from_str(
            r#"{ "issuer": "https://idp.example", "jwks_uri": "https://idp.example/keys" }"#,
        )?;

        let checked = check_issuer(jwt::IssuerRef::from_str("https://idp.example"), configuration)?;

        assert_eq!(checked.issuer().as_str(), "https://idp.example");

        Ok(())
    }
}
