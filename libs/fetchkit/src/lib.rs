#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Schema-validated HTTP client engine
//!
//! This crate wraps a pluggable "perform network call" primitive with:
//! - Linear extension chains with closest-definition-wins configuration
//! - Schema validation of params, body and response via an injected
//!   validator capability
//! - Composable request/response/error interceptor pipelines with
//!   per-call snapshot semantics
//! - A dual failure surface: `send()` fails with the terminal error,
//!   `settle()` never fails and returns a two-slot outcome
//! - A default hyper/rustls transport adapter
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fetchkit::{Client, TypedSchema};
//! use fetchkit::transport::{HyperTransport, TransportConfig};
//!
//! let api = Client::builder()
//!     .name("users-api")
//!     .url("https://api.example.com/users")
//!     .transport(Arc::new(HyperTransport::new()?))
//!     .response_schema_with(|s| s.of::<Vec<User>>())
//!     .build()?;
//!
//! // Instances extend without copying: the search client inherits the
//! // transport and url, and narrows the params.
//! let search = api
//!     .extend()
//!     .params_schema(Arc::new(TypedSchema::<SearchQuery>::new()))
//!     .build()?;
//!
//! let users: Vec<User> = search
//!     .call()
//!     .params(&SearchQuery { name: "alice".into() })
//!     .send_as()
//!     .await?;
//! ```

mod call;
mod client;
mod config;
mod error;
mod interceptor;
mod request;
mod response;
mod schema;
pub mod transport;

pub use call::CallBuilder;
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, Override, ResolvedConfig};
pub use error::{BoxError, Error, Field, SchemaError};
pub use interceptor::{CallContext, ErrorContext, InterceptorOptions, Stage};
pub use request::Request;
pub use response::{Response, UnwrapFn};
pub use schema::{
    AnySchema, FnSchema, Schema, SchemaCatalog, SchemaFactory, SchemaSource, TypedSchema,
    schema_fn,
};
pub use transport::Transport;
