//! Request-time authorization decisions for bearer JWTs
//!
//! Given the bearer credential presented on an inbound request, this crate
//! decides whether the request is permitted, who the caller is, and over
//! what window of time that access holds. The decision is emitted as an
//! [`AccessDecision`] which a gateway adapter renders into its own policy
//! document format.
//!
//! The pipeline runs in five stages, each of which can short-circuit
//! into a [`Rejection`]:
//!
//! 1. [`credential::extract`] strips the `Bearer: ` scheme prefix and decodes
//!    the _untrusted_ claims, only to learn the issuer.
//! 2. The [`TrustRegistry`] matches that issuer to a configured [`TrustRecord`].
//! 3. The [`ProviderRegistry`] resolves the record's provider kind to a
//!    [`StrategyFactory`] from a closed, compile-time table.
//! 4. A fresh [`VerificationStrategy`] bound to that record and token
//!    performs full cryptographic verification.
//! 5. The [`DecisionAssembler`] derives the time-bound conditions and
//!    produces the decision.
//!
//! # Example
//!
//! ```no_run
//! use aliri_authorizer::Authorizer;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let authorizer = Authorizer::from_config_str(r#"[
//!     {
//!         "provider": "Okta",
//!         "issuer": "https://idp.example/oauth2/default",
//!         "audience": "api://default",
//!         "principalIdField": "sub"
//!     }
//! ]"#)?;
//!
//! let decision = authorizer.authorize("Bearer: eyJhbGciOiJSUzI1NiJ9...").await?;
//! println!("{} may call {}", decision.principal_id(), decision.resource());
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! The `reqwest` feature (on by default) allows the OIDC strategy to
//! discover and fetch signing keys from the issuer. As with `aliri_oauth2`,
//! TLS support in `reqwest` is not enabled automatically; enable
//! `default-tls` or `rustls-tls` if nothing else in your dependency graph
//! already does.

#![cfg_attr(docsrs, feature(doc_cfg))]
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

mod authorizer;
pub mod claims;
pub mod credential;
pub mod decision;
pub mod error;
pub mod oidc;
pub mod provider;
pub mod strategy;
pub mod trust;


pub use authorizer::{Authorizer, LazyAuthorizer, CONFIG_ENV_VAR};
#[doc(inline)]
pub use claims::{ClaimName, ClaimNameRef, ClaimSet};
#[doc(inline)]
pub use credential::RawCredential;
#[doc(inline)]
pub use decision::{AccessDecision, Condition, ConditionOperator, DecisionAssembler, Effect};
#[doc(inline)]
pub use error::{ConfigurationError, Rejection};
#[doc(inline)]
pub use provider::{ProviderRegistry, StrategyFactory};
#[doc(inline)]
pub use strategy::{Context, Verification, VerificationOutcome, VerificationStrategy, VerifiedToken};
#[doc(inline)]
pub use trust::{ProviderKind, ProviderKindRef, TrustRecord, TrustRegistry};
