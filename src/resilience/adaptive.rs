//! Adaptive controller: short/long EMA anomaly detector driving an
//! epsilon-greedy Q-learning throttle.
//!
//! All per-target fields are atomics rather than fields behind a table
//! lock: `report_fault` runs from the page-fault hot path with interrupts
//! disabled, and taking a spinlock there that the controller task might
//! already hold would deadlock the core the instant the controller itself
//! faults while holding it. Lock-free atomic claim-and-update avoids that
//! class of bug entirely, at the cost of each field being independently
//! racy with respect to the others — acceptable here because only the
//! controller task ever reads more than one field in the same decision.

use crate::config::*;
use crate::scheduler::ticks;
use crate::task::table::TABLE;
use crate::task::{TaskId, TaskPriority, TaskStatus};
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};

struct TargetState {
    /// 0 = free slot. Task ids are assigned starting at 1, so 0 is a safe
    /// sentinel.
    task_id: AtomicI64,
    fault_count_period: AtomicU32,
    ema_short: AtomicI64,
    ema_long: AtomicI64,
    initialized: AtomicBool,
    detect_count: AtomicU32,
    q0: AtomicI64,
    q1: AtomicI64,
    q2: AtomicI64,
    /// 0 = None, else 1..=ACTIONS.
    current_action: AtomicU8,
    action_until_ms: AtomicU64,
    last_fault_rate: AtomicI64,
}

impl TargetState {
    const fn new() -> Self {
        TargetState {
            task_id: AtomicI64::new(0),
            fault_count_period: AtomicU32::new(0),
            ema_short: AtomicI64::new(0),
            ema_long: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
            detect_count: AtomicU32::new(0),
            q0: AtomicI64::new(0),
            q1: AtomicI64::new(0),
            q2: AtomicI64::new(0),
            current_action: AtomicU8::new(0),
            action_until_ms: AtomicU64::new(0),
            last_fault_rate: AtomicI64::new(0),
        }
    }

    fn q(&self, action_index: usize) -> &AtomicI64 {
        match action_index {
            0 => &self.q0,
            1 => &self.q1,
            _ => &self.q2,
        }
    }

    fn reset(&self, id: i64) {
        self.fault_count_period.store(0, Ordering::Relaxed);
        self.ema_short.store(0, Ordering::Relaxed);
        self.ema_long.store(0, Ordering::Relaxed);
        self.initialized.store(false, Ordering::Relaxed);
        self.detect_count.store(0, Ordering::Relaxed);
        self.q0.store(0, Ordering::Relaxed);
        self.q1.store(0, Ordering::Relaxed);
        self.q2.store(0, Ordering::Relaxed);
        self.current_action.store(0, Ordering::Relaxed);
        self.action_until_ms.store(0, Ordering::Relaxed);
        self.last_fault_rate.store(0, Ordering::Relaxed);
        self.task_id.store(id, Ordering::Release);
    }
}

static TARGETS: [TargetState; ADAPTIVE_MAX_TARGETS] =
    [const { TargetState::new() }; ADAPTIVE_MAX_TARGETS];

fn find(id: TaskId) -> Option<&'static TargetState> {
    TARGETS
        .iter()
        .find(|t| t.task_id.load(Ordering::Acquire) == id.0 as i64)
}

/// Find this task's slot, claiming a free one on first report. Returns
/// `None` when the table is full — the caller (the sensor) silently drops
/// the report.
fn find_or_create(id: TaskId) -> Option<&'static TargetState> {
    if let Some(t) = find(id) {
        return Some(t);
    }
    for slot in TARGETS.iter() {
        if slot
            .task_id
            .compare_exchange(0, id.0 as i64, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            slot.reset(id.0 as i64);
            return Some(slot);
        }
    }
    None
}

/// Increment the task's `fault_count_period`. Called from interrupt
/// context.
pub fn report_fault(id: TaskId) {
    if let Some(t) = find_or_create(id) {
        t.fault_count_period.fetch_add(1, Ordering::Relaxed);
    }
}

/// Free a target slot when its task has been reclaimed, so the slot can be
/// reused. Adaptive per-task state exists only while the task is
/// reachable; a reused slot gets a fresh, zeroed state.
pub fn release(id: TaskId) {
    if let Some(t) = find(id) {
        t.task_id.store(0, Ordering::Release);
    }
}

fn random_u64() -> u64 {
    use x86_64::instructions::random::RdRand;
    if let Some(rdrand) = RdRand::new() {
        if let Some(v) = rdrand.get_u64() {
            return v;
        }
    }
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Fixed-point EMA recurrence, pulled out as a pure function so it's
/// testable without a `TargetState`.
fn ema_step(alpha: i64, rate_fp: i64, prev: i64) -> i64 {
    (alpha * rate_fp + (ADAPTIVE_SCALE - alpha) * prev) / ADAPTIVE_SCALE
}

/// Q-value update, pulled out as a pure function.
fn q_update(q_old: i64, reward_fp: i64) -> i64 {
    ((ADAPTIVE_SCALE - ADAPTIVE_ETA) * q_old + ADAPTIVE_ETA * reward_fp) / ADAPTIVE_SCALE
}

fn argmax(q: [i64; ADAPTIVE_ACTIONS]) -> usize {
    let mut best = 0;
    for i in 1..ADAPTIVE_ACTIONS {
        if q[i] > q[best] {
            best = i;
        }
    }
    best
}

fn priority_for_action(action: u8) -> TaskPriority {
    match action {
        1 => TaskPriority::Low,
        2 => TaskPriority::Lower,
        _ => TaskPriority::Idle,
    }
}

static LAST_RUN: AtomicU64 = AtomicU64::new(0);

/// Runs forever as a kernel task, driving a per-interval update for every
/// tracked Running task.
pub fn controller_entry() {
    loop {
        let now = ticks();
        if now.saturating_sub(LAST_RUN.load(Ordering::Relaxed)) < ADAPTIVE_INTERVAL_MS {
            core::hint::spin_loop();
            continue;
        }
        LAST_RUN.store(now, Ordering::Relaxed);

        for target in TARGETS.iter() {
            let raw_id = target.task_id.load(Ordering::Acquire);
            if raw_id == 0 {
                continue;
            }
            let id = TaskId(raw_id as u64);

            let is_running = x86_64::instructions::interrupts::without_interrupts(|| {
                TABLE
                    .lock()
                    .get(id)
                    .map(|t| t.status() == TaskStatus::Running)
                    .unwrap_or(false)
            });
            if !is_running {
                continue;
            }

            update_target(target, id, now);
        }
    }
}

fn update_target(target: &TargetState, id: TaskId, now: u64) {
    // 1. Rate.
    let count = target.fault_count_period.swap(0, Ordering::AcqRel);
    let rate = (count as i64) * 1000 / ADAPTIVE_INTERVAL_MS as i64;
    let rate_fp = rate * ADAPTIVE_SCALE;

    // 2. Reward phase.
    let current_action = target.current_action.load(Ordering::Relaxed);
    if current_action != 0 && now >= target.action_until_ms.load(Ordering::Relaxed) {
        let last_rate = target.last_fault_rate.load(Ordering::Relaxed);
        let reward_fp = last_rate - rate_fp;
        let a = (current_action - 1) as usize;
        let q_atom = target.q(a);
        let q_old = q_atom.load(Ordering::Relaxed);
        q_atom.store(q_update(q_old, reward_fp), Ordering::Relaxed);

        x86_64::instructions::interrupts::without_interrupts(|| {
            if let Some(task) = TABLE.lock().get(id) {
                task.set_priority(TaskPriority::Normal);
                // Un-throttling has to drop the stale skip_counter too, or
                // a task switched back to Normal (skip_ticks = 0) keeps
                // being skipped until the old Idle/Lower/Low counter
                // drains on its own, and skip_counter > priority briefly.
                task.set_skip_counter(0);
            }
        });
        target.current_action.store(0, Ordering::Relaxed);
    }

    // 3. EMA update.
    if !target.initialized.load(Ordering::Relaxed) {
        target.ema_short.store(rate_fp, Ordering::Relaxed);
        target.ema_long.store(rate_fp, Ordering::Relaxed);
        target.initialized.store(true, Ordering::Relaxed);
    } else {
        let ema_short = target.ema_short.load(Ordering::Relaxed);
        let ema_long = target.ema_long.load(Ordering::Relaxed);
        target.ema_short.store(
            ema_step(ADAPTIVE_ALPHA_SHORT, rate_fp, ema_short),
            Ordering::Relaxed,
        );
        target.ema_long.store(
            ema_step(ADAPTIVE_ALPHA_LONG, rate_fp, ema_long),
            Ordering::Relaxed,
        );
    }

    // 4. Anomaly detection — only while no action is currently applied.
    if target.current_action.load(Ordering::Relaxed) == 0 {
        let diff = target.ema_short.load(Ordering::Relaxed) - target.ema_long.load(Ordering::Relaxed);
        if diff > ADAPTIVE_DETECT_THRESHOLD * ADAPTIVE_SCALE {
            target.detect_count.fetch_add(1, Ordering::Relaxed);
        } else {
            target.detect_count.store(0, Ordering::Relaxed);
        }

        if target.detect_count.load(Ordering::Relaxed) >= ADAPTIVE_DETECT_K {
            target.detect_count.store(0, Ordering::Relaxed);

            let roll = random_u64() % ADAPTIVE_SCALE as u64;
            let action = if roll < ADAPTIVE_EPSILON as u64 {
                (random_u64() % ADAPTIVE_ACTIONS as u64) as u8 + 1
            } else {
                let q = [
                    target.q0.load(Ordering::Relaxed),
                    target.q1.load(Ordering::Relaxed),
                    target.q2.load(Ordering::Relaxed),
                ];
                argmax(q) as u8 + 1
            };

            target.current_action.store(action, Ordering::Relaxed);
            target
                .action_until_ms
                .store(now + ADAPTIVE_EPOCH_MS, Ordering::Relaxed);
            target.last_fault_rate.store(rate_fp, Ordering::Relaxed);

            x86_64::instructions::interrupts::without_interrupts(|| {
                if let Some(task) = TABLE.lock().get(id) {
                    task.set_priority(priority_for_action(action));
                }
            });
        }
    }

    // 5. Q-decay.
    for j in 0..ADAPTIVE_ACTIONS {
        let q_atom = target.q(j);
        let q_old = q_atom.load(Ordering::Relaxed);
        q_atom.store(
            q_old * (ADAPTIVE_SCALE - ADAPTIVE_Q_DECAY) / ADAPTIVE_SCALE,
            Ordering::Relaxed,
        );
    }

    // 6. fault_count_period was already reset by the swap in step 1.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q_update_converges_monotonically_toward_a_repeated_reward() {
        // Given identical reward_fp applied repeatedly to an action with
        // initial Q=0, Q_n -> reward_fp as n -> infinity, monotonically.
        let reward_fp = 5000i64;
        let mut q = 0i64;
        let mut prev_gap = i64::MAX;
        for _ in 0..500 {
            let next = q_update(q, reward_fp);
            let gap = (reward_fp - next).abs();
            assert!(gap <= prev_gap, "gap to target must shrink monotonically");
            prev_gap = gap;
            q = next;
        }
        assert!((reward_fp - q).abs() < 10, "Q should converge near the reward");
    }

    #[test]
    fn q_update_with_zero_reward_decays_toward_zero() {
        let mut q = 1000i64;
        for _ in 0..200 {
            q = q_update(q, 0);
        }
        assert!(q.abs() < 5);
    }

    #[test]
    fn ema_step_on_first_sample_behavior_matches_initialization_rule() {
        // Not exercised directly (initialization is a separate branch in
        // update_target), but a constant input should leave a converged EMA
        // unchanged — the fixed point of the recurrence is the input itself.
        let rate_fp = 7000i64;
        let mut ema = rate_fp;
        for _ in 0..10 {
            ema = ema_step(ADAPTIVE_ALPHA_SHORT, rate_fp, ema);
        }
        assert_eq!(ema, rate_fp);
    }

    #[test]
    fn short_ema_tracks_a_step_change_faster_than_long_ema() {
        let mut short = 0i64;
        let mut long = 0i64;
        // Step from 0 to a high rate and watch which average moves faster.
        for _ in 0..5 {
            short = ema_step(ADAPTIVE_ALPHA_SHORT, 10_000, short);
            long = ema_step(ADAPTIVE_ALPHA_LONG, 10_000, long);
        }
        assert!(short > long, "short EMA (alpha=300) must react faster than long (alpha=50)");
    }

    #[test]
    fn argmax_breaks_ties_at_the_lowest_index() {
        assert_eq!(argmax([500, 500, 500]), 0);
        assert_eq!(argmax([100, 900, 900]), 1);
        assert_eq!(argmax([1, 2, 3]), 2);
    }

    #[test]
    fn q_decay_shrinks_a_positive_value_each_interval() {
        let mut q = 1000i64;
        let decayed = q * (ADAPTIVE_SCALE - ADAPTIVE_Q_DECAY) / ADAPTIVE_SCALE;
        assert!(decayed < q);
        q = decayed;
        assert!(q > 0, "decay is gradual, not a reset to zero in one step");
    }
}
