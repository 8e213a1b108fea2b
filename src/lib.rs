//! `request-flow` paces long runs of HTTP requests against rate-limited APIs
//! and renders them as a compact live terminal status line.
//!
//! The crate is built around three pieces:
//! - [`AdaptiveRequestController`] retries transport failures with backoff and
//!   tunes a post-request delay from `429 Retry-After` feedback.
//! - [`RequestFlowHooks`] receives every event of a request sequence.
//! - [`SequenceRenderer`] draws those events as one fixed-width status line.
//!
//! [`ExportClient`] wires the controller to `reqwest` for paginated exports.

mod client;
mod error;
mod options;

pub mod controller;
pub mod format;
pub mod hooks;
pub mod progress;
pub mod queue;
pub mod renderer;
pub mod sgr;
#[cfg(feature = "tracing")]
pub mod tracing_hooks;

pub use client::{ExportClient, Page, CURSOR_PARAM};
pub use controller::{AdaptiveRequestController, Completion};
pub use error::FlowError;
pub use hooks::{DelayChange, NoopHooks, RequestFlowHooks};
pub use options::FlowOptions;
pub use renderer::SequenceRenderer;
#[cfg(feature = "tracing")]
pub use tracing_hooks::TracingHooks;

pub type Result<T> = std::result::Result<T, FlowError>;
