//! Tracing integrations for AWS: the X-Ray propagator and the X-Ray
//! remote sampler.

mod xray_propagator;

pub use xray_propagator::XrayPropagator;

#[cfg(feature = "xray_remote_sampler")]
#[cfg_attr(docsrs, doc(cfg(feature = "xray_remote_sampler")))]
pub mod sampler;

#[cfg(feature = "xray_remote_sampler")]
pub use sampler::{
    Clock, SystemClock, XrayRemoteSampler, XrayRemoteSamplerBuilder, XraySamplerError,
};
