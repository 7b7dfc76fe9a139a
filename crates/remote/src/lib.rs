#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # licsync-remote
//!
//! HTTP client for the remote people/licenses API.
//!
//! ## Features
//!
//! - One concurrency ceiling shared by lookups, capacity queries and updates
//! - Fixed-interval retry with random jitter on rate limiting, 5xx and
//!   transport failures; exhausted retries surface as `Fatal`
//! - Retry counter and in-flight gauge for run statistics
//!
//! ## Example
//!
//! ```ignore
//! use licsync_core::{Identity, RemoteService};
//! use licsync_remote::{RemoteClient, RemoteConfig};
//!
//! let client = RemoteClient::new(RemoteConfig::default().token("..."))?;
//! let user = client.lookup_user(&Identity::new("alice@example.com")).await?;
//! println!("{} holds {:?}", user.label(), user.entitlements);
//! println!("retries so far: {}", client.retries());
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod retry;

pub use client::RemoteClient;
pub use config::RemoteConfig;
pub use error::{Error, Result};
pub use retry::{Failure, RetryPolicy};
