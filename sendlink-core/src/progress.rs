//! Progress reporting: `{ now, max }` with `0 <= now <= max`, never decreasing.

/// Snapshot handed to progress observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub now: u64,
    pub max: u64,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.now == self.max
    }

    /// Percentage in `[0, 100]`. An empty transfer counts as complete.
    pub fn percent(&self) -> f64 {
        if self.max == 0 {
            return 100.0;
        }
        self.now as f64 / self.max as f64 * 100.0
    }
}

/// Accumulates transferred bytes against a known total.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    now: u64,
    max: u64,
}

impl ProgressTracker {
    pub fn new(max: u64) -> Self {
        Self { now: 0, max }
    }

    /// Add `bytes` and return the new snapshot. Saturates at `max`.
    pub fn advance(&mut self, bytes: u64) -> Progress {
        self.now = self.now.saturating_add(bytes).min(self.max);
        self.current()
    }

    pub fn current(&self) -> Progress {
        Progress {
            now: self.now,
            max: self.max,
        }
    }
}

/// Human-readable size. `si` uses powers of 1000 (kB, MB), otherwise 1024 (KiB, MiB).
pub fn format_size(bytes: u64, si: bool) -> String {
    let (step, units): (f64, [&str; 6]) = if si {
        (1000.0, ["B", "kB", "MB", "GB", "TB", "PB"])
    } else {
        (1024.0, ["B", "KiB", "MiB", "GiB", "TiB", "PiB"])
    };
    if (bytes as f64) < step {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= step && unit < units.len() - 1 {
        value /= step;
        unit += 1;
    }
    format!("{value:.1} {}", units[unit])
}
