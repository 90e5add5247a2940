#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like HDMIA
#![allow(clippy::upper_case_acronyms)]

//! # kms-display: a display model for kernel modesetting
//!
//! This crate keeps a local model of the modesetting objects of a drm device and commits
//! changes of that model to the driver. It is meant for test tools and small compositors that
//! want to drive outputs directly, without a full graphics stack on top.
//!
//! ## Structure of the crate
//!
//! - [`device`] abstracts the driver behind the [`KmsDevice`](device::KmsDevice) trait and
//!   implements it for real drm nodes.
//! - [`display`] builds the [`Display`](display::Display): one [`Pipe`](pipe::Pipe) per crtc
//!   with its [`Plane`](plane::Plane)s and one [`Output`](output::Output) per connector.
//! - [`probe`] works out which encoder, pipes and mode a connector can use.
//! - [`props`] resolves driver properties by name.
//! - [`commit`] pushes pending changes to the driver, through legacy calls or a single
//!   atomic request.
//!
//! ## Staging and committing
//!
//! Every setter on pipes, planes and outputs only records the new value and marks it dirty.
//! [`Display::commit`](display::Display::commit) validates the whole pending state first and
//! only then talks to the driver. Atomic commits are all-or-nothing: if the driver rejects a
//! request the local state stays pending and the commit can be retried.
//!
//! ### Logging
//!
//! kms-display makes extensive use of [`tracing`] for its internal logging. Every display
//! owns a `kms_display` span that all of its log output is recorded in.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```
//!
//! ### Environment
//!
//! [`Display::new`](display::Display::new) honours `KMS_DISPLAY_USE_LEGACY` to skip atomic
//! modesetting and `KMS_DISPLAY_NO_UNIVERSAL_PLANES` to skip universal planes.

pub mod commit;
pub mod device;
pub mod display;
pub mod error;
pub mod mode;
pub mod output;
pub mod pipe;
pub mod plane;
pub mod probe;
pub mod props;

pub mod reexports;

pub use error::Error;

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kms_display=trace"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
