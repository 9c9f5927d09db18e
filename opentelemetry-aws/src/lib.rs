//! This crate provides unofficial integration with AWS services.
//!
//! # Components
//!
//! ### AWS X-Ray Propagator
//! Propagates tracing information in the `x-amzn-trace-id` header so traces
//! continue across AWS service boundaries.
//!
//! ```
//! use opentelemetry::global;
//! use opentelemetry_aws::trace::XrayPropagator;
//!
//! global::set_text_map_propagator(XrayPropagator::default());
//! ```
//!
//! ### AWS X-Ray Remote Sampler
//! A sampler that polls sampling rules and reservoir quotas from AWS X-Ray
//! and applies them per span, available behind the `xray_remote_sampler`
//! feature flag. See [`trace::sampler`] for details and an example.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "trace")]
#[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
pub mod trace;

#[cfg(feature = "trace")]
pub use trace::XrayPropagator;
