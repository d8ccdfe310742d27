//! Per-task timing records.
//!
//! Every compute task goes through the same phases: its buffers are
//! assembled once, it is resolved against concrete shapes, and it may be
//! replayed on the host or checked against a reference. A [`TimingGuard`]
//! times one phase of one task and emits a record under the
//! `dwconv::telemetry` target when dropped, e.g.
//! `task 3 assemble: weight reorder (80 bytes) took 12.40µs`.

use std::{
    borrow::Cow,
    fmt,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used by every timing record.
pub const TELEMETRY_TARGET: &str = "dwconv::telemetry";

static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(false);
static TELEMETRY_LEVEL: AtomicUsize = AtomicUsize::new(LevelFilter::Off as usize);

/// Stage of a task's life a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Building the descriptor: shader template, weight upload.
    Assemble,
    /// Computing output shape, uniforms and dispatch size.
    Resolve,
    /// Host replay of the kernel.
    Simulate,
    /// Reference convolution used to check a simulation.
    Reference,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Assemble => "assemble",
            Phase::Resolve => "resolve",
            Phase::Simulate => "simulate",
            Phase::Reference => "reference",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Times one phase of one task; logs on drop when active.
pub struct TimingGuard {
    task_id: u32,
    phase: Phase,
    detail: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    /// Returns `true` when the guard will emit a record on drop.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Replace the detail text, e.g. once a size is known.
    pub fn set_detail(&mut self, detail: impl Into<Cow<'static, str>>) {
        self.detail = detail.into();
    }

    /// Stop the guard without logging and return the elapsed time.
    pub fn finish(mut self) -> Duration {
        self.active = false;
        self.start.elapsed()
    }

    fn record(&self, elapsed: Duration) -> String {
        if self.detail.is_empty() {
            format!("task {} {} took {elapsed:.2?}", self.task_id, self.phase)
        } else {
            format!(
                "task {} {}: {} took {elapsed:.2?}",
                self.task_id, self.phase, self.detail
            )
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            let record = self.record(self.start.elapsed());
            log!(target: TELEMETRY_TARGET, self.level, "{record}");
        }
    }
}

/// Start timing `phase` of task `task_id`.
pub fn timing_guard(
    task_id: u32,
    phase: Phase,
    detail: impl Into<Cow<'static, str>>,
    level: Level,
) -> TimingGuard {
    TimingGuard {
        task_id,
        phase,
        detail: detail.into(),
        level,
        start: Instant::now(),
        active: telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level),
    }
}

/// Update the global telemetry switch and level threshold.
pub fn configure(enabled: bool, level: LevelFilter) {
    TELEMETRY_ENABLED.store(enabled, Ordering::Relaxed);
    TELEMETRY_LEVEL.store(level as usize, Ordering::Relaxed);
}

fn threshold() -> LevelFilter {
    LevelFilter::iter()
        .nth(TELEMETRY_LEVEL.load(Ordering::Relaxed))
        .unwrap_or(LevelFilter::Off)
}

/// Returns `true` when telemetry is on and `level` is within the threshold.
pub fn telemetry_allows(level: Level) -> bool {
    TELEMETRY_ENABLED.load(Ordering::Relaxed) && level <= threshold()
}
