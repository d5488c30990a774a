use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use metrics::Label;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::{registry::DURATION_SUFFIX, CallRecorder, MetricsError, MetricsRegistry};

static METRIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid regex"));
static LABEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid regex"));

/// Label key of the error counter.
pub const ERROR_LABEL: &str = "error";

/// Which instrument backs the duration metric. Only one is ever populated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DurationKind {
    #[default]
    Histogram,
    Summary,
}

/// The three RED instruments of one listener type, all under `{namespace}_{request_type}`.
#[derive(Clone)]
pub struct MetricSet {
    inner: Arc<MetricSetInner>,
}

struct MetricSetInner {
    registry: MetricsRegistry,
    kind: DurationKind,
    request_labels: Vec<String>,
    duration_labels: Vec<String>,
    requests_name: String,
    errors_name: String,
    duration_name: String,
    registered: AtomicBool,
}

pub fn is_valid_namespace(namespace: &str) -> bool {
    METRIC_NAME.is_match(namespace)
}

fn validate_labels(labels: &[&str]) -> Result<Vec<String>, MetricsError> {
    labels
        .iter()
        .map(|label| {
            if LABEL_NAME.is_match(label) && !label.starts_with("__") && *label != ERROR_LABEL {
                Ok(label.to_string())
            } else {
                Err(MetricsError::InvalidLabel(label.to_string()))
            }
        })
        .collect()
}

impl MetricSet {
    /// Validates the names and labels. Nothing is attached to the registry until
    /// [`register`](MetricSet::register) is called.
    pub fn new(
        registry: &MetricsRegistry,
        namespace: &str,
        request_type: &str,
        kind: DurationKind,
        request_labels: &[&str],
        duration_labels: &[&str],
    ) -> Result<Self, MetricsError> {
        if !is_valid_namespace(namespace) {
            return Err(MetricsError::InvalidNamespace(namespace.to_string()));
        }
        if !METRIC_NAME.is_match(request_type) {
            return Err(MetricsError::InvalidRequestType(request_type.to_string()));
        }
        if duration_labels.is_empty() {
            return Err(MetricsError::MissingLabels);
        }
        let request_labels = validate_labels(request_labels)?;
        let duration_labels = validate_labels(duration_labels)?;

        let prefix = format!("{namespace}_{request_type}");
        let duration_name = match kind {
            DurationKind::Histogram => format!("{prefix}{DURATION_SUFFIX}"),
            DurationKind::Summary => format!("{prefix}_request_latency_seconds"),
        };

        Ok(Self {
            inner: Arc::new(MetricSetInner {
                registry: registry.clone(),
                kind,
                request_labels,
                duration_labels,
                requests_name: format!("{prefix}_requests_total"),
                errors_name: format!("{prefix}_errors_total"),
                duration_name,
                registered: AtomicBool::new(false),
            }),
        })
    }

    /// Validates and registers in one go, the way both server variants build their set.
    pub fn new_registered(
        registry: &MetricsRegistry,
        namespace: &str,
        request_type: &str,
        kind: DurationKind,
        request_labels: &[&str],
        duration_labels: &[&str],
    ) -> Result<Self, MetricsError> {
        let set = Self::new(
            registry,
            namespace,
            request_type,
            kind,
            request_labels,
            duration_labels,
        )?;
        set.register()?;
        Ok(set)
    }

    /// Attaches the three instruments to the registry. There is no way back.
    pub fn register(&self) -> Result<(), MetricsError> {
        let inner = &self.inner;
        inner.registry.claim(&[
            inner.requests_name.as_str(),
            inner.errors_name.as_str(),
            inner.duration_name.as_str(),
        ])?;

        inner
            .registry
            .describe_counter(&inner.requests_name, "How many requests were handled");
        inner
            .registry
            .describe_counter(&inner.errors_name, "How many requests failed, by error code");
        inner
            .registry
            .describe_histogram(&inner.duration_name, "How long requests took, in seconds");

        inner.registered.store(true, Ordering::Release);
        debug!(
            requests = %inner.requests_name,
            errors = %inner.errors_name,
            duration = %inner.duration_name,
            "registered RED metrics"
        );
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> DurationKind {
        self.inner.kind
    }

    pub fn requests_name(&self) -> &str {
        &self.inner.requests_name
    }

    pub fn errors_name(&self) -> &str {
        &self.inner.errors_name
    }

    pub fn duration_name(&self) -> &str {
        &self.inner.duration_name
    }

    /// Counts the request right away and returns the recorder that observes the
    /// duration (and the error, if any) when it is dropped.
    pub fn start_call(&self, request_values: &[&str], duration_values: &[&str]) -> CallRecorder {
        self.inc_requests(request_values);
        CallRecorder::new(
            self.clone(),
            duration_values.iter().map(|v| v.to_string()).collect(),
            Instant::now(),
        )
    }

    pub fn inc_requests(&self, values: &[&str]) {
        if !self.is_registered() {
            return;
        }
        let labels = zip_labels(&self.inner.request_labels, values);
        self.inner
            .registry
            .counter(&self.inner.requests_name, labels)
            .increment(1);
    }

    pub fn inc_errors(&self, code: &str) {
        if !self.is_registered() {
            return;
        }
        let labels = vec![Label::new(ERROR_LABEL, code.to_string())];
        self.inner
            .registry
            .counter(&self.inner.errors_name, labels)
            .increment(1);
    }

    pub fn observe_duration(&self, values: &[String], seconds: f64) {
        if !self.is_registered() {
            return;
        }
        let labels = zip_labels(&self.inner.duration_labels, values);
        self.inner
            .registry
            .histogram(&self.inner.duration_name, labels)
            .record(seconds);
    }
}

// Missing values are recorded as empty strings so the label set stays fixed.
fn zip_labels<V: AsRef<str>>(keys: &[String], values: &[V]) -> Vec<Label> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            let value: &str = values.get(i).map_or("", |v| v.as_ref());
            Label::new(key.clone(), value.to_string())
        })
        .collect()
}
