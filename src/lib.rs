//! Client-side resilience layer for the DevOverflow answer-drafting flow.
//!
//! The crate wraps calls to an external text-completion service with retries,
//! circuit breaking, error classification and structured error logging, and
//! decides when the rich editor should give way to a plain-text fallback.
//!
//! # Key concepts
//!
//! - **[`Resilience`](runtime::Resilience)**: the composition root. It owns the
//!   shared [`ErrorLogStore`](error_log::ErrorLogStore) and
//!   [`CircuitBreakerRegistry`](circuit_breaker::CircuitBreakerRegistry) and
//!   hands them to every component.
//! - **[`classify`](classify::classify)**: maps any failure to an
//!   [`ErrorKind`](classify::ErrorKind) and its static policy through an
//!   ordered rule table.
//! - **[`RetryExecutor`](retry::RetryExecutor)**: bounded retries with
//!   exponential backoff and jitter; `breaker_then_retry` gates a whole retry
//!   run behind one breaker check.
//! - **[`TrackedFetch`](fetch::TrackedFetch)** and
//!   **[`ApiClient`](api_client::ApiClient)**: HTTP calls that never fail
//!   outward, folding every error into a result shape (feature `http`).
//! - **[`EditorFallback`](editor_fallback::EditorFallback)**: the
//!   rich-editor/plain-text decision.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use devflow_resilience::api::ClientConfig;
//! use devflow_resilience::runtime::Resilience;
//!
//! # #[cfg(feature = "http")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resilience = Resilience::builder()
//!     .config(ClientConfig::default().with_env_overrides()?)
//!     .build()?;
//!
//! let reply = resilience
//!     .client()
//!     .generate_answer("How do I pin a future in Rust?")
//!     .await?;
//! println!("{:?}", reply.reply);
//! println!("{:?}", resilience.error_log().stats());
//! # Ok(())
//! # }
//! ```

pub mod api;
#[cfg(feature = "http")]
pub mod api_client;
pub mod circuit_breaker;
pub mod classify;
pub mod editor_fallback;
pub mod error;
pub mod error_log;
#[cfg(feature = "http")]
pub mod fetch;
pub mod retry;
pub mod retry_status;
pub mod runtime;
pub mod traits;
