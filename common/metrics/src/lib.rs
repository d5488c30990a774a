//! RED (rate, errors, duration) metrics on an explicit Prometheus registry.
//!
//! A [`MetricsRegistry`] is created by the caller and handed to whatever needs
//! it; nothing here installs a global recorder. Each listener type gets one
//! [`MetricSet`], and each handled request or RPC gets one [`CallRecorder`].

mod error;
mod http;
mod recorder;
mod red;
mod registry;

pub use error::MetricsError;
pub use http::{metrics_router, track_red};
pub use recorder::CallRecorder;
pub use red::{is_valid_namespace, DurationKind, MetricSet, ERROR_LABEL};
pub use registry::{MetricsRegistry, DEFAULT_BUCKETS, DURATION_SUFFIX};
