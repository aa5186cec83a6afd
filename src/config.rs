//! Tunable constants for the kernel core, grouped by subsystem in one
//! module rather than split across per-subsystem headers.

/// Maximum number of task slots the task table holds.
pub const TASKS_MAX: usize = 32;

/// Capacity of the bounded apoptosis work queue.
pub const WORK_QUEUE_SIZE: usize = 32;

/// Timer interrupt frequency. Chosen so the tick counter doubles as a
/// millisecond clock.
pub const TIMER_HZ: u32 = 1000;

// --- Fault sensor (emergency fast-path) ---

/// Width of the rolling burst-detection window, in ticks (milliseconds).
pub const BURST_WINDOW_MS: u64 = 10;

/// Faults within one `BURST_WINDOW_MS` window that trigger immediate
/// quarantine. Implies roughly 200k faults/sec sustained.
pub const BURST_THRESHOLD: u32 = 2000;

// --- Homeostatic profiler ---

/// How often the profiler samples per-task fault counters, in ticks.
pub const PROFILER_INTERVAL_MS: u64 = 250;

/// Sustained fault rate (faults/sec) past which a task is considered
/// pathological by the profiler.
pub const CRITICAL_THRESHOLD_FAULTS_PER_SEC: u64 = 15_000;

// --- Adaptive controller ---

/// Fixed-point base. All adaptive math is expressed as integer fractions
/// of this scale; there is no FPU-save discipline in interrupt context so
/// floating point is never introduced here.
pub const ADAPTIVE_SCALE: i64 = 1024;

/// P(explore) numerator over `ADAPTIVE_SCALE` (~0.10).
pub const ADAPTIVE_EPSILON: i64 = 102;

/// Learning rate numerator over `ADAPTIVE_SCALE` (~0.10).
pub const ADAPTIVE_ETA: i64 = 102;

/// Short-window EMA coefficient numerator over `ADAPTIVE_SCALE` (~0.293).
pub const ADAPTIVE_ALPHA_SHORT: i64 = 300;

/// Long-window EMA coefficient numerator over `ADAPTIVE_SCALE` (~0.049).
pub const ADAPTIVE_ALPHA_LONG: i64 = 50;

/// `ema_short - ema_long` trigger threshold, pre-scale (multiplied by
/// `ADAPTIVE_SCALE` before comparison against the scaled EMA difference).
pub const ADAPTIVE_DETECT_THRESHOLD: i64 = 1500;

/// Consecutive profiler periods an anomaly must persist before an action
/// is applied.
pub const ADAPTIVE_DETECT_K: u32 = 2;

/// How often the adaptive controller re-evaluates its targets, in ticks.
pub const ADAPTIVE_INTERVAL_MS: u64 = 150;

/// Duration a chosen mitigation action stays applied before its reward is
/// evaluated, in ticks.
pub const ADAPTIVE_EPOCH_MS: u64 = 1000;

/// Per-interval Q-value decay numerator over `ADAPTIVE_SCALE`.
pub const ADAPTIVE_Q_DECAY: i64 = 5;

/// Number of distinct throttling actions (Light/Medium/Heavy).
pub const ADAPTIVE_ACTIONS: usize = 3;

/// Maximum number of tasks the adaptive controller can track concurrently.
pub const ADAPTIVE_MAX_TARGETS: usize = TASKS_MAX;
