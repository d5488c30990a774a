use std::time::Instant;

use crate::MetricSet;

// A guard covering one call: the request was counted when it was created, and the
// duration plus the error (if any) are recorded when it is dropped, whichever way
// the call ended.
pub struct CallRecorder {
    metrics: MetricSet,
    duration_values: Vec<String>,
    start: Instant,
    outcome: Option<Outcome>,
}

struct Outcome {
    code: String,
    failed: bool,
}

impl CallRecorder {
    pub(crate) fn new(metrics: MetricSet, duration_values: Vec<String>, start: Instant) -> Self {
        Self {
            metrics,
            duration_values,
            start,
            outcome: None,
        }
    }

    /// Records how the call ended. The first outcome sticks; later ones are ignored
    /// and reported back as `false`.
    pub fn set_outcome(&mut self, code: impl Into<String>, failed: bool) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(Outcome {
            code: code.into(),
            failed,
        });
        true
    }

    pub fn set_error_code(&mut self, code: impl Into<String>) -> bool {
        self.set_outcome(code, true)
    }

    pub fn outcome_code(&self) -> Option<&str> {
        self.outcome.as_ref().map(|o| o.code.as_str())
    }

    pub fn has_outcome(&self) -> bool {
        self.outcome.is_some()
    }

    // Consumes the guard so "record now" reads as a statement at the call site.
    pub fn fin(self) {}
}

impl Drop for CallRecorder {
    fn drop(&mut self) {
        self.metrics
            .observe_duration(&self.duration_values, self.start.elapsed().as_secs_f64());
        if let Some(Outcome { code, failed: true }) = &self.outcome {
            self.metrics.inc_errors(code);
        }
    }
}
