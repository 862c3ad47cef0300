//! Tick timing: per-phase durations and pacing overruns.

use std::collections::HashMap;
use std::time::Duration;

/// Timing of one tick phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseTiming {
    /// Total time spent in this phase (cumulative).
    pub total_duration: Duration,
    /// Number of times this phase was executed.
    pub call_count: u64,
    pub min_duration: Duration,
    pub max_duration: Duration,
}

impl PhaseTiming {
    pub fn record(&mut self, duration: Duration) {
        self.total_duration += duration;
        self.call_count += 1;
        if duration < self.min_duration || self.min_duration == Duration::ZERO {
            self.min_duration = duration;
        }
        if duration > self.max_duration {
            self.max_duration = duration;
        }
    }

    pub fn avg_duration(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            let avg_nanos = self.total_duration.as_nanos() / self.call_count as u128;
            Duration::from_nanos(avg_nanos as u64)
        }
    }
}

/// Timings keyed by phase name, plus the ticks that took longer than the
/// configured interval while running in real time.
#[derive(Debug, Clone, Default)]
pub struct TickTimings {
    timings: HashMap<String, PhaseTiming>,
    overruns: u64,
}

impl TickTimings {
    pub fn record(&mut self, phase: &str, duration: Duration) {
        self.timings
            .entry(phase.to_string())
            .or_default()
            .record(duration);
    }

    pub fn record_overrun(&mut self) {
        self.overruns += 1;
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn get(&self, phase: &str) -> Option<&PhaseTiming> {
        self.timings.get(phase)
    }

    pub fn is_empty(&self) -> bool {
        self.timings.is_empty()
    }

    /// One line per phase, slowest total first.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut entries: Vec<_> = self.timings.iter().collect();
        entries.sort_by(|a, b| b.1.total_duration.cmp(&a.1.total_duration));

        let mut lines: Vec<String> = entries
            .into_iter()
            .map(|(name, timing)| {
                format!(
                    "{:16} | calls: {:6} | total: {:8.2}ms | avg: {:8.2}μs | min: {:8.2}μs | max: {:8.2}μs",
                    name,
                    timing.call_count,
                    timing.total_duration.as_secs_f64() * 1000.0,
                    timing.avg_duration().as_secs_f64() * 1_000_000.0,
                    timing.min_duration.as_secs_f64() * 1_000_000.0,
                    timing.max_duration.as_secs_f64() * 1_000_000.0,
                )
            })
            .collect();
        if self.overruns > 0 {
            lines.push(format!("ticks over interval: {}", self.overruns));
        }
        lines
    }
}

/// Times `$body` and records it under `$phase` when timings are given.
#[macro_export]
macro_rules! time_phase {
    ($phase:expr, $timings:expr, $body:block) => {{
        let start = std::time::Instant::now();
        let result = $body;
        let duration = start.elapsed();
        if let Some(timings) = $timings {
            timings.record($phase, duration);
        }
        result
    }};
}
