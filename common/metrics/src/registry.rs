use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use metrics::{Counter, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::MetricsError;

/// Suffix shared by every histogram-kind duration metric; buckets are attached by suffix.
pub const DURATION_SUFFIX: &str = "_request_duration_seconds";

/// Default duration buckets, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Handle to a metrics registry. Cloning is cheap and every clone sees the same
/// instruments, so one registry can be shared by all listeners of a process
/// (or one per test).
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    names: Mutex<HashSet<String>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS).expect("default buckets are not empty")
    }

    pub fn with_buckets(buckets: &[f64]) -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix(DURATION_SUFFIX.to_string()), buckets)?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            inner: Arc::new(RegistryInner {
                recorder,
                handle,
                names: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names().contains(name)
    }

    /// Claims every name or none of them.
    pub(crate) fn claim(&self, names: &[&str]) -> Result<(), MetricsError> {
        let mut registered = self.names();
        if let Some(taken) = names.iter().find(|name| registered.contains(**name)) {
            return Err(MetricsError::AlreadyRegistered(taken.to_string()));
        }
        for name in names {
            registered.insert(name.to_string());
        }
        Ok(())
    }

    pub(crate) fn describe_counter(&self, name: &str, description: &'static str) {
        self.inner.recorder.describe_counter(
            KeyName::from(name.to_string()),
            None,
            SharedString::from(description),
        );
    }

    pub(crate) fn describe_histogram(&self, name: &str, description: &'static str) {
        self.inner.recorder.describe_histogram(
            KeyName::from(name.to_string()),
            None,
            SharedString::from(description),
        );
    }

    pub(crate) fn counter(&self, name: &str, labels: Vec<Label>) -> Counter {
        let key = Key::from_parts(name.to_string(), labels);
        self.inner.recorder.register_counter(&key, &METADATA)
    }

    pub(crate) fn histogram(&self, name: &str, labels: Vec<Label>) -> Histogram {
        let key = Key::from_parts(name.to_string(), labels);
        self.inner.recorder.register_histogram(&key, &METADATA)
    }

    fn names(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
