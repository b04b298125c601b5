use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cumulative wall time per named section, collected when the `profiling`
/// feature is enabled.
#[derive(Default)]
pub struct Profiler {
    pub timings: HashMap<&'static str, (Duration, u64)>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &'static str, elapsed: Duration) {
        let entry = self.timings.entry(name).or_default();
        entry.0 += elapsed;
        entry.1 += 1;
    }

    /// Sections sorted by total time, longest first.
    pub fn report_sorted(&self) -> Vec<(&'static str, Duration, u64)> {
        let mut v: Vec<_> = self.timings.iter().map(|(n, (d, c))| (*n, *d, *c)).collect();
        v.sort_by(|a, b| b.1.cmp(&a.1));
        v
    }

    pub fn log_and_clear(&mut self) {
        for (name, total, calls) in self.report_sorted() {
            let per_call = total / calls.max(1) as u32;
            log::info!("{name:<16} total={total:?} calls={calls} per_call={per_call:?}");
        }
        self.timings.clear();
    }
}

#[cfg_attr(not(feature = "profiling"), allow(dead_code))]
pub struct ProfilerGuard {
    name: &'static str,
    start: Instant,
}

/// Start a profiling section; the global profiler is updated when the guard drops.
pub fn start(name: &'static str) -> ProfilerGuard {
    ProfilerGuard {
        name,
        start: Instant::now(),
    }
}

#[cfg(feature = "profiling")]
impl Drop for ProfilerGuard {
    fn drop(&mut self) {
        crate::PROFILER.lock().record(self.name, self.start.elapsed());
    }
}

/// Profile the enclosing scope when the `profiling` feature is enabled.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        #[cfg(feature = "profiling")]
        let _guard = $crate::profiler::start($name);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_sorts_by_total_time() {
        let mut p = Profiler::new();
        p.record("short", Duration::from_millis(1));
        p.record("long", Duration::from_millis(5));
        p.record("short", Duration::from_millis(1));
        let report = p.report_sorted();
        assert_eq!(report[0].0, "long");
        assert_eq!(report[1], ("short", Duration::from_millis(2), 2));
        p.log_and_clear();
        assert!(p.timings.is_empty());
    }
}
