//! Extraction of the bearer credential from its raw header value

use aliri::{jwt, Jwt, JwtRef};
use aliri_base64::Base64Url;

use crate::{
    claims::ClaimSet,
    error::{self, MalformedCredential},
};

/// The scheme prefix expected at the start of the raw credential
///
/// Note that this is _not_ the standard `Bearer ` scheme: the colon is
/// required, and callers depend on this exact form.
pub const SCHEME_PREFIX: &str = "Bearer: ";

/// A bearer JWT and its _unverified_ claims
///
/// **WARNING:** *The claims held here have not been validated and must not
/// be trusted.* They are decoded only to learn which issuer to match
/// against the trust registry. Authorization decisions may only be made on
/// claims returned from a [`VerificationStrategy`][crate::VerificationStrategy].
#[derive(Clone, Debug)]
pub struct RawCredential {
    token: Jwt,
    issuer: jwt::Issuer,
    claims: ClaimSet,
}

impl RawCredential {
    /// The token, with the scheme prefix removed
    pub fn token(&self) -> &JwtRef {
        &self.token
    }

    /// The untrusted claims decoded from the token payload
    pub fn untrusted_claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// The untrusted issuer of the token
    pub fn untrusted_issuer(&self) -> &jwt::IssuerRef {
        &self.issuer
    }
}

/// Extracts the bearer JWT and its unverified claims from a raw credential
///
/// The value must begin with exactly [`SCHEME_PREFIX`]. The remainder must
/// be a JWT with three base64url segments, whose header is a JSON object
/// naming a supported algorithm and whose payload is a JSON claim set
/// naming an issuer. The signature segment is decoded but not checked.
///
/// # Errors
///
/// Returns [`MalformedCredential`] if any of these conditions do not hold.
pub fn extract(raw: &str) -> Result<RawCredential, MalformedCredential> {
    let token = raw
        .strip_prefix(SCHEME_PREFIX)
        .ok_or(MalformedCredential::MissingScheme)?;
    tracing::trace!("credential has bearer scheme prefix");

    let token = Jwt::new(token.to_owned());

    let claims = {
        let decomposed: jwt::Decomposed = token.decompose()?;
        let p_raw = Base64Url::from_encoded(decomposed.untrusted_payload())
            .map_err(error::malformed_payload)?;
        serde_json::from_slice::<ClaimSet>(p_raw.as_slice()).map_err(error::malformed_payload)?
    };
    tracing::trace!("credential decoded as JWT");

    let issuer = claims
        .issuer()
        .ok_or(MalformedCredential::MissingIssuer)?
        .to_owned();

    Ok(RawCredential {
        token,
        issuer,
        claims,
    })
}
