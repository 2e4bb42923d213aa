//! Event handlers
//!
//! Every rejection surfaces to the gateway as the same `Unauthorized`
//! failure, so a caller cannot learn which check it failed. The underlying
//! reason is still available to the process through the error source.

use aliri_authorizer::{Authorizer, ConfigurationError, Rejection};
use thiserror::Error;

use crate::{
    event::{RequestAuthorizerEventV2, TokenAuthorizerEvent},
    policy::IamPolicyResponse,
};

/// A request could not be authorized
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request was rejected
    #[error("Unauthorized")]
    Unauthorized(#[from] Rejection),

    /// The authorizer could not be built
    #[error("authorizer is not configured")]
    Configuration(#[from] ConfigurationError),
}

impl HandlerError {
    /// Whether the request itself was rejected, rather than the authorizer
    /// failing to start
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// The reason the request was rejected, if it was
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Unauthorized(rejection) => Some(rejection),
            Self::Configuration(_) => None,
        }
    }
}

/// Authorizes a `TOKEN` authorizer event
///
/// # Errors
///
/// Returns [`HandlerError::Unauthorized`] if the request is rejected.
#[tracing::instrument(skip_all, fields(method_arn = event.method_arn.as_deref()))]
pub async fn handle_token_event(
    authorizer: &Authorizer,
    event: &TokenAuthorizerEvent,
) -> Result<IamPolicyResponse, HandlerError> {
    let decision = authorizer.authorize(event.credential()).await?;
    Ok(IamPolicyResponse::from(decision))
}

/// Authorizes a 2.0 format `REQUEST` authorizer event
///
/// # Errors
///
/// Returns [`HandlerError::Unauthorized`] if the request is rejected.
#[tracing::instrument(skip_all, fields(route_arn = event.route_arn.as_deref()))]
pub async fn handle_request_event_v2(
    authorizer: &Authorizer,
    event: &RequestAuthorizerEventV2,
) -> Result<IamPolicyResponse, HandlerError> {
    let decision = authorizer.authorize(&event.credential()).await?;
    Ok(IamPolicyResponse::from(decision))
}
