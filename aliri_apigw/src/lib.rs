//! API Gateway Lambda authorizer adapter
//!
//! Renders [`aliri_authorizer`] decisions as the IAM policy responses that
//! API Gateway expects from a Lambda authorizer. Both the `TOKEN` event of
//! REST APIs and the 2.0 `REQUEST` event of HTTP APIs are supported.
//!
//! The process-wide authorizer is built on first use from the trust
//! configuration in the `OIDC_CONFIG` environment variable. Any rejection is
//! reported as a bare `Unauthorized` failure, which API Gateway turns into
//! a `401` response.
//!
//! ```no_run
//! use aliri_apigw::{authorize_token_event, TokenAuthorizerEvent};
//!
//! # async fn run(event: TokenAuthorizerEvent) -> Result<(), aliri_apigw::HandlerError> {
//! let response = authorize_token_event(&event).await?;
//! println!("{}", serde_json::to_string(&response).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! The default features let the authorizer discover and fetch signing keys
//! from each issuer. Issuers are almost always served over `https`, but TLS
//! support in `reqwest` is not enabled automatically. Enable `default-tls`
//! or `rustls-tls` unless something else in your dependency graph already
//! does; without one, every key fetch fails and every request is rejected.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use aliri_authorizer::{Authorizer, LazyAuthorizer};

pub mod event;
pub mod handler;
pub mod policy;

#[doc(inline)]
pub use event::{RequestAuthorizerEventV2, TokenAuthorizerEvent};
#[doc(inline)]
pub use handler::{handle_request_event_v2, handle_token_event, HandlerError};
#[doc(inline)]
pub use policy::{IamPolicyResponse, PolicyDocument, Statement};

static AUTHORIZER: LazyAuthorizer = LazyAuthorizer::new(Authorizer::from_env);

/// Authorizes a `TOKEN` event with the process-wide authorizer
///
/// # Errors
///
/// Returns [`HandlerError::Configuration`] if the authorizer cannot be
/// built, or [`HandlerError::Unauthorized`] if the request is rejected.
pub async fn authorize_token_event(
    event: &TokenAuthorizerEvent,
) -> Result<IamPolicyResponse, HandlerError> {
    handle_token_event(AUTHORIZER.get()?, event).await
}

/// Authorizes a 2.0 format `REQUEST` event with the process-wide authorizer
///
/// # Errors
///
/// Returns [`HandlerError::Configuration`] if the authorizer cannot be
/// built, or [`HandlerError::Unauthorized`] if the request is rejected.
pub async fn authorize_request_event_v2(
    event: &RequestAuthorizerEventV2,
) -> Result<IamPolicyResponse, HandlerError> {
    handle_request_event_v2(AUTHORIZER.get()?, event).await
}
