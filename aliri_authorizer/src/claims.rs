//! The decoded claim set of a bearer JWT

use std::convert::TryFrom;

use aliri::jwt::{self, CoreClaims};
use aliri_braid::braid;
use aliri_clock::UnixTime;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The name of a claim within a JWT payload
#[braid(serde, ref_doc = "A borrowed reference to a [`ClaimName`]")]
pub struct ClaimName;

const ISSUER: &str = "iss";
const SUBJECT: &str = "sub";
const AUDIENCE: &str = "aud";
const NOT_BEFORE: &str = "nbf";
const ISSUED_AT: &str = "iat";
const EXPIRES: &str = "exp";

/// The complete set of claims carried in a JWT payload
///
/// The registered claims (`iss`, `sub`, `aud`, `nbf`, `iat`, `exp`) are
/// parsed eagerly, so a claim set with a mistyped registered claim cannot
/// be constructed. Every claim, registered or not, remains available by
/// name through [`get()`][ClaimSet::get].
///
/// A claim whose value is JSON `null` is treated as absent.
///
/// Whether these claims can be trusted depends entirely on where the claim
/// set came from. A claim set decoded by [`credential::extract`][crate::credential::extract]
/// is unverified; one held by a [`VerifiedToken`][crate::VerifiedToken] has
/// been verified by a strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ClaimSet {
    aud: jwt::Audiences,
    iss: Option<jwt::Issuer>,
    sub: Option<jwt::Subject>,
    nbf: Option<DateTime<Utc>>,
    iat: Option<DateTime<Utc>>,
    exp: Option<DateTime<Utc>>,
    raw: Map<String, Value>,
}

impl ClaimSet {
    /// Constructs a claim set from a JSON object
    ///
    /// # Errors
    ///
    /// Returns an error if any registered claim has an unexpected type, or
    /// if a time claim is negative or not representable as an instant.
    pub fn from_map(raw: Map<String, Value>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aud: registered(&raw, AUDIENCE)?.unwrap_or_default(),
            iss: registered(&raw, ISSUER)?,
            sub: registered(&raw, SUBJECT)?,
            nbf: instant(&raw, NOT_BEFORE)?,
            iat: instant(&raw, ISSUED_AT)?,
            exp: instant(&raw, EXPIRES)?,
            raw,
        })
    }

    /// The `iss` claim
    pub fn issuer(&self) -> Option<&jwt::IssuerRef> {
        self.iss.as_deref()
    }

    /// The `nbf` claim
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.nbf
    }

    /// The `iat` claim
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat
    }

    /// The `exp` claim
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp
    }

    /// Looks up any claim by name
    ///
    /// Claims with a `null` value are reported as absent.
    pub fn get(&self, name: &ClaimNameRef) -> Option<&Value> {
        self.raw.get(name.as_str()).filter(|v| !v.is_null())
    }

    /// Whether a claim with the given name is present
    pub fn contains(&self, name: &ClaimNameRef) -> bool {
        self.get(name).is_some()
    }

    /// Iterates through all non-null claims
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.raw
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.as_str(), v))
    }
}

fn registered<T>(raw: &Map<String, Value>, name: &str) -> Result<Option<T>, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    match raw.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => T::deserialize(value).map(Some),
    }
}

// Time claims are NumericDate values, which may carry a fractional part.
// Fractions are truncated to whole seconds.
fn instant(raw: &Map<String, Value>, name: &str) -> Result<Option<DateTime<Utc>>, serde_json::Error> {
    use serde::de::Error;

    let secs = match raw.get(name) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(_) => None,
    };

    secs.filter(|&s| s >= 0)
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .map(Some)
        .ok_or_else(|| {
            serde_json::Error::custom(format_args!("invalid {} claim: expected a NumericDate", name))
        })
}

fn unix_time(instant: Option<DateTime<Utc>>) -> Option<UnixTime> {
    instant
        .and_then(|i| u64::try_from(i.timestamp()).ok())
        .map(UnixTime)
}

impl TryFrom<Map<String, Value>> for ClaimSet {
    type Error = serde_json::Error;

    #[inline]
    fn try_from(raw: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_map(raw)
    }
}

impl From<ClaimSet> for Map<String, Value> {
    #[inline]
    fn from(claims: ClaimSet) -> Self {
        claims.raw
    }
}

impl CoreClaims for ClaimSet {
    fn nbf(&self) -> Option<UnixTime> {
        unix_time(self.nbf)
    }

    fn exp(&self) -> Option<UnixTime> {
        unix_time(self.exp)
    }

    fn aud(&self) -> &jwt::Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&jwt::IssuerRef> {
        self.iss.as_deref()
    }

    fn sub(&self) -> Option<&jwt::SubjectRef> {
        self.sub.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;

    fn claims(value: Value) -> Result<ClaimSet> {
        Ok(serde_json::from_value(value)?)
    }

    #[test]
    fn parses_registered_claims() -> Result<()> {
        let claims = claims(json!({
            "iss": "https://idp.example/oauth2/default",
            "sub": "00u1abcd",
            "aud": ["api://default", "other"],
            "nbf": 1_699_990_000,
            "iat": 1_699_990_100,
            "exp": 1_700_000_000,
            "scp": ["openid"],
        }))?;

        assert_eq!(
            claims.issuer(),
            Some(jwt::IssuerRef::from_str("https://idp.example/oauth2/default"))
        );
        assert_eq!(claims.sub().map(|s| s.as_str()), Some("00u1abcd"));
        assert_eq!(claims.aud().iter().count(), 2);
        assert_eq!(claims.not_before().map(|t| t.timestamp()), Some(1_699_990_000));
        assert_eq!(claims.issued_at().map(|t| t.timestamp()), Some(1_699_990_100));
        assert_eq!(claims.exp(), Some(UnixTime(1_700_000_000)));
        assert!(claims.contains(ClaimNameRef::from_str("scp")));

        Ok(())
    }

    #[test]
    fn single_audience_string_is_accepted() -> Result<()> {
        let claims = claims(json!({ "aud": "api://default" }))?;

        let audiences: Vec<_> = claims.aud().iter().map(|a| a.as_str()).collect();
        assert_eq!(audiences, ["api://default"]);

        Ok(())
    }

    #[test]
    fn fractional_time_claims_are_truncated() -> Result<()> {
        let claims = claims(json!({ "exp": 1_700_000_000.75 }))?;

        assert_eq!(claims.exp(), Some(UnixTime(1_700_000_000)));

        Ok(())
    }

    #[test]
    fn null_claims_are_absent() -> Result<()> {
        let claims = claims(json!({ "nbf": null, "email": null }))?;

        assert_eq!(claims.not_before(), None);
        assert!(!claims.contains(ClaimNameRef::from_str("nbf")));
        assert!(!claims.contains(ClaimNameRef::from_str("email")));
        assert_eq!(claims.iter().count(), 0);

        Ok(())
    }

    #[test]
    fn mistyped_time_claim_is_rejected() {
        assert!(claims(json!({ "exp": "tomorrow" })).is_err());
        assert!(claims(json!({ "nbf": -5 })).is_err());
    }

    #[test]
    fn mistyped_issuer_is_rejected() {
        assert!(claims(json!({ "iss": 42 })).is_err());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(serde_json::from_value::<ClaimSet>(json!(["iss"])).is_err());
    }
}
