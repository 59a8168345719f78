// Engine Tuning Constants

use std::time::Duration;

/// Maximum number of jobs that may hold an active slot at once
pub const MAX_ACTIVE_JOBS: usize = 5;

/// A processing job counts against the active ceiling only while its
/// last activity falls inside this window. Stale slots free themselves.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

/// Terminal jobs are evicted once idle longer than this (30 minutes)
pub const TERMINAL_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Any job idle longer than this is evicted regardless of state (2 hours)
pub const STALE_JOB_CUTOFF: Duration = Duration::from_secs(2 * 60 * 60);

/// Grace period before a cancelled job leaves the registry
pub const CANCEL_REMOVAL_GRACE: Duration = Duration::from_secs(30);

/// Period of the daemon's background janitor sweep
pub const JANITOR_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence of the progress stream's registry checks (500ms)
pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A keep-alive is emitted after this long without a progress change
pub const WATCH_KEEPALIVE_AFTER: Duration = Duration::from_secs(15);

/// Hard cap on a single progress stream (5 minutes)
pub const WATCH_MAX_DURATION: Duration = Duration::from_secs(300);

/// Engine tuning knobs, defaulting to the constants above.
/// Tests shrink these to keep runtimes short.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_active_jobs: usize,
    pub activity_window: Duration,
    pub terminal_retention: Duration,
    pub stale_job_cutoff: Duration,
    pub cancel_removal_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: MAX_ACTIVE_JOBS,
            activity_window: ACTIVITY_WINDOW,
            terminal_retention: TERMINAL_RETENTION,
            stale_job_cutoff: STALE_JOB_CUTOFF,
            cancel_removal_grace: CANCEL_REMOVAL_GRACE,
        }
    }
}

/// Progress stream tuning knobs
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    pub keepalive_after: Duration,
    pub max_duration: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: WATCH_POLL_INTERVAL,
            keepalive_after: WATCH_KEEPALIVE_AFTER,
            max_duration: WATCH_MAX_DURATION,
        }
    }
}
