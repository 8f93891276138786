//! Phase timing for build output.

use std::time::{Duration, Instant};

/// Measures one build phase and reports it when finished.
pub struct Timer {
    phase: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(phase: &'static str) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Print `[<time>] <phase>` and return the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!(phase = self.phase, ms = elapsed.as_millis() as u64, "phase finished");
        println!("  [{}] {}", format_duration(elapsed), self.phase);
        elapsed
    }
}

/// `850ms`, `12.3s` or `2.5m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", d.as_millis())
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
