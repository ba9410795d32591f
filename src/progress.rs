//! Rate-limited status reporting for long runs.

use std::time::{Duration, Instant};

use tracing::info;

/// Render a duration in seconds as `1d 2h 3m 4s`, dropping leading
/// zero units. Negative means unknown.
pub fn format_time(mut t: i64) -> String {
    if t < 0 {
        return "n/a".to_string();
    }
    let d = t / 86400;
    t %= 86400;
    let h = t / 3600;
    t %= 3600;
    let m = t / 60;
    t %= 60;
    let mut out = String::new();
    if d > 0 {
        out.push_str(&format!("{d}d"));
    }
    if h > 0 {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("{m}m"));
    }
    if t > 0 || out.is_empty() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&format!("{t}s"));
    }
    out
}

/// Human-readable byte count in binary units.
pub fn format_bytes(n: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Emits one status line per interval; the caller feeds it after every
/// work unit and forces a line at pass boundaries.
pub struct Progress {
    started: Instant,
    last: Option<Instant>,
    interval: Duration,
}

impl Progress {
    pub fn new(interval: Duration) -> Progress {
        Progress {
            started: Instant::now(),
            last: None,
            interval,
        }
    }

    pub fn elapsed_secs(&self) -> i64 {
        self.started.elapsed().as_secs() as i64
    }

    pub fn report(
        &mut self,
        phase: &str,
        pos: i64,
        recsize: i64,
        errsize: i64,
        errors: u32,
        force: bool,
    ) {
        let due = match self.last {
            None => true,
            Some(last) => last.elapsed() >= self.interval,
        };
        if !force && !due {
            return;
        }
        self.last = Some(Instant::now());
        info!(
            "{phase}: pos={pos:#x} rescued={} errsize={} errors={errors} elapsed={}",
            format_bytes(recsize),
            format_bytes(errsize),
            format_time(self.elapsed_secs()),
        );
    }
}
