use crate::{Name, RawName, Svc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::time::Duration;

/// The well-known name the metrics component is registered under.
///
/// A default in-memory sink is provided at priority 10000; register your own
/// rule (or use [`Builder::with_metrics_sink`](crate::Builder::with_metrics_sink))
/// at a smaller priority to override it.
#[must_use]
pub fn metrics_name() -> Name<MetricsHandle> {
    Name::of("METRICS")
}

/// Receives the build and customization timers recorded by a factory.
///
/// Two families of keys are emitted: `<BUILD> <simple-name>` around each
/// engine invocation and `<CUSTOMIZE> <name> <WITH> <customizer>` around
/// each customization.
pub trait MetricsSink: Send + Sync {
    /// Records one timed event under the given key.
    fn record_timer(&self, key: &str, elapsed: Duration);
}

/// The metrics component handed to factories: a cheap clonable handle over
/// the configured [`MetricsSink`].
#[derive(Clone)]
pub struct MetricsHandle {
    sink: Svc<dyn MetricsSink>,
}

impl MetricsHandle {
    /// Wraps a sink into a handle.
    #[must_use]
    pub fn new(sink: Svc<dyn MetricsSink>) -> Self {
        MetricsHandle { sink }
    }

    /// Records one timed event under the given key.
    pub fn record_timer(&self, key: &str, elapsed: Duration) {
        self.sink.record_timer(key, elapsed);
    }
}

impl Default for MetricsHandle {
    fn default() -> Self {
        MetricsHandle::new(Svc::new(InMemoryMetrics::default()))
    }
}

impl Debug for MetricsHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("MetricsHandle")
    }
}

/// Aggregated timings for one key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// How many events were recorded.
    pub count: u64,
    /// Sum of all recorded durations.
    pub total: Duration,
    /// Largest recorded duration.
    pub max: Duration,
}

/// The default [`MetricsSink`]: per-key timer statistics kept in memory.
#[derive(Default)]
pub struct InMemoryMetrics {
    timers: Mutex<HashMap<String, TimerStats>>,
}

impl InMemoryMetrics {
    /// A copy of every timer recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, TimerStats> {
        self.timers.lock().clone()
    }

    /// The statistics recorded under one key, if any.
    #[must_use]
    pub fn timer(&self, key: &str) -> Option<TimerStats> {
        self.timers.lock().get(key).cloned()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_timer(&self, key: &str, elapsed: Duration) {
        let mut timers = self.timers.lock();
        let stats = timers.entry(key.to_owned()).or_default();
        stats.count += 1;
        stats.total += elapsed;
        stats.max = stats.max.max(elapsed);
    }
}

impl Display for InMemoryMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let timers = self.timers.lock();
        write!(f, "InMemoryMetrics{{{} timers}}", timers.len())
    }
}

pub(crate) fn build_key(name: &RawName) -> String {
    format!("<BUILD> {}", name.simple_name())
}

pub(crate) fn customize_key(name: &RawName, customizer: &str) -> String {
    format!("<CUSTOMIZE> {} <WITH> {}", name.simple_name(), customizer)
}
