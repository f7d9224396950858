//! Phase timing.

use std::time::Instant;
use tracing::info;

/// Measures how long a build phase takes.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Log the elapsed time for this phase.
    pub fn finish(self) {
        info!("[{}] {}", format_elapsed(self.start.elapsed().as_secs_f64()), self.name);
    }
}

fn format_elapsed(secs: f64) -> String {
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(4.31), "4.3s");
        assert_eq!(format_elapsed(90.0), "1.5m");
    }
}
