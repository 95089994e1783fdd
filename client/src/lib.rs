//! # LMS API Client
//!
//! HTTP client for the school LMS REST API with silent token refresh.
//!
//! ## Example
//!
//! ```no_run
//! use lms_client::{ApiClient, ClientConfig, Credentials, resources};
//! use lms_core::{MemorySessionStore, Navigator};
//! use std::sync::Arc;
//!
//! struct Router;
//!
//! impl Navigator for Router {
//!     fn current_path(&self) -> String {
//!         "/dashboard".to_string()
//!     }
//!     fn redirect(&self, path: &str) {
//!         println!("-> {path}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::new(
//!         ClientConfig::from_env(),
//!         Arc::new(MemorySessionStore::new()),
//!         Arc::new(Router),
//!     )?;
//!
//!     client
//!         .login(&Credentials::new("guru@sekolah.id", "rahasia"))
//!         .await?;
//!
//!     let classes: resources::Page<lms_client::models::ClassRecord> = client
//!         .list(resources::CLASSES, &resources::ListParams::new().page(1))
//!         .await?;
//!     println!("{} classes", classes.data.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - Bearer token on every request, read from an injected session store
//! - One refresh-and-resend per request after a 401, shared across concurrent
//!   requests
//! - Session teardown and a single sign-in redirect when recovery fails
//! - Normalized errors with retry classification and field-level messages
//! - Rate-limit cooldown that blocks login submission

pub mod client;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod refresh;
pub mod request;
pub mod resources;

// Re-export main types for convenience
pub use client::{ApiClient, Credentials, REQUEST_ID_HEADER};
pub use config::{ClientConfig, Mode};
pub use cooldown::Cooldown;
pub use error::{ClientError, ErrorKind, Result};
pub use lifecycle::{RequestLifecycle, RequestState};
pub use request::{ApiRequest, ApiResponse, FormPart, RequestBody};
pub use resources::{ListParams, Page, Resource};
