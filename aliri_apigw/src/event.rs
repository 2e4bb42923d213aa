//! Inbound authorizer events
//!
//! Only the fields needed to locate the bearer credential are modeled;
//! unknown fields are ignored.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// A `TOKEN` authorizer event, as sent by REST APIs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAuthorizerEvent {
    /// The event type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// The value of the configured token source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,

    /// The identity source, sent by some integrations in place of the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_source: Option<String>,

    /// The ARN of the method being invoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_arn: Option<String>,
}

impl TokenAuthorizerEvent {
    /// The bearer credential presented with the request
    ///
    /// This is the authorization token if present, otherwise the identity
    /// source, otherwise empty.
    pub fn credential(&self) -> &str {
        self.authorization_token
            .as_deref()
            .or(self.identity_source.as_deref())
            .unwrap_or_default()
    }
}

/// A `REQUEST` authorizer event in the 2.0 payload format, as sent by HTTP APIs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthorizerEventV2 {
    /// The payload format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// The event type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// The ARN of the route being invoked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_arn: Option<String>,

    /// The values of each configured identity source, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_source: Option<Vec<String>>,
}

impl RequestAuthorizerEventV2 {
    /// The bearer credential presented with the request
    ///
    /// This is the concatenation of every identity source value, in order.
    /// With no identity sources, the credential is empty.
    pub fn credential(&self) -> Cow<'_, str> {
        match self.identity_source.as_deref() {
            None | Some([]) => Cow::Borrowed(""),
            Some([single]) => Cow::Borrowed(single),
            Some(sources) => Cow::Owned(sources.concat()),
        }
    }
}
