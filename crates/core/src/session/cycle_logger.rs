use std::collections::HashMap;
use std::time::Instant;

/// Cross-cutting logger for detection-loop events.
///
/// Decouples the loop from output mechanisms (log crate, UI counters) so
/// callers can observe cycles without changing the orchestration code.
pub trait CycleLogger: Send {
    /// Report that `cycle` finished with `faces` detections.
    fn progress(&mut self, cycle: u64, faces: usize);

    /// Record how long a named stage took for one cycle.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. face count, live crops).
    fn metric(&mut self, name: &str, value: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-session summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullCycleLogger;

impl CycleLogger for NullCycleLogger {
    fn progress(&mut self, _cycle: u64, _faces: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// `log`-backed logger that keeps per-stage timings and metrics and
/// produces a summary when the loop exits.
///
/// Progress lines are throttled to every `throttle_cycles` cycles.
pub struct LogCycleLogger {
    throttle_cycles: u64,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
    cycles: u64,
    messages: Vec<String>,
}

impl LogCycleLogger {
    pub fn new(throttle_cycles: usize) -> Self {
        Self {
            throttle_cycles: throttle_cycles.max(1) as u64,
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            cycles: 0,
            messages: Vec::new(),
        }
    }

    /// Returns the formatted summary string, or `None` if no data recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let cycles = self.cycles;
        let mut lines = vec![format!(
            "Session summary ({cycles} cycles, {:.1}s total):",
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = mean(durations);
            let max_ms = durations.iter().copied().fold(0.0_f64, f64::max);
            lines.push(format!(
                "  {stage:8}: avg {avg_ms:6.1}ms  max {max_ms:6.1}ms  total {total_ms:7.0}ms"
            ));
        }

        let mut metric_names: Vec<_> = self.metrics.keys().collect();
        metric_names.sort();
        for name in metric_names {
            lines.push(format!("  {name}: avg {:.1}", mean(&self.metrics[name])));
        }

        if cycles > 0 && elapsed_ms > 0.0 {
            let rate = cycles as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Rate: {rate:.1} cycles/s"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl Default for LogCycleLogger {
    fn default() -> Self {
        Self::new(30)
    }
}

impl CycleLogger for LogCycleLogger {
    fn progress(&mut self, cycle: u64, faces: usize) {
        self.cycles = cycle;
        if cycle == 1 || cycle % self.throttle_cycles == 0 {
            log::info!("Cycle {cycle}: {faces} face(s)");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
