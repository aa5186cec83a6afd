//! Task records: identity, lifecycle state, and the per-task fields the
//! resilience subsystem reads and mutates.
//!
//! The task is the unit a *preemptive* scheduler and an interrupt-context
//! fault sensor both touch, so every field another actor can mutate across
//! a context boundary is an atomic — not a borrowed `&mut`, which a second
//! actor could never safely hand out (see DESIGN.md's cross-actor mutation
//! note).

pub mod table;

use crate::scheduler::context::CpuState;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Stable task identifier, assigned at creation and never reused while the
/// task is reachable from the table or the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    Kernel,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    NotRunning = 0,
    Running = 1,
    Sleeping = 2,
    Zombie = 3,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::NotRunning,
            1 => TaskStatus::Running,
            2 => TaskStatus::Sleeping,
            _ => TaskStatus::Zombie,
        }
    }
}

/// Throttle priority. The integer is the number of scheduler scans the task
/// must be skipped after it runs — not a semantic ranking, only a ratio the
/// adaptive controller's throttle intensity depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskPriority {
    Normal = 0,
    Low = 55,
    Lower = 89,
    Idle = 144,
}

impl TaskPriority {
    pub fn skip_ticks(self) -> u32 {
        self as u8 as u32
    }

    fn from_u8(v: u8) -> Self {
        match v {
            55 => TaskPriority::Low,
            89 => TaskPriority::Lower,
            144 => TaskPriority::Idle,
            _ => TaskPriority::Normal,
        }
    }
}

/// Per-task fast-path burst state: the rolling fault-burst window the
/// page-fault sensor maintains for quarantine decisions.
pub struct SentientState {
    pub last_exception_tick_ms: AtomicU64,
    pub exception_burst_count: AtomicU32,
}

impl SentientState {
    pub const fn new() -> Self {
        SentientState {
            last_exception_tick_ms: AtomicU64::new(0),
            exception_burst_count: AtomicU32::new(0),
        }
    }
}

/// A single task record. Owned exclusively by the task table; the sensor,
/// scheduler, profiler, and adaptive controller all reach it through a
/// shared reference and mutate only the atomic fields below. `saved_context`
/// and the stack pointers are the exception: they are written only at
/// creation or by the scheduler's save/bootstrap step, which always runs
/// with interrupts disabled.
pub struct Task {
    pub id: TaskId,
    pub name: &'static str,
    pub entry: u64,
    pub mode: TaskMode,

    pub kernel_stack: *mut u8,
    pub kernel_stack_size: usize,
    pub user_stack: Option<*mut u8>,
    pub user_stack_size: usize,

    /// Valid iff the task has been dispatched at least once; `rip == 0`
    /// otherwise, the bootstrap path's signal that this task has never run.
    pub saved_context: CpuState,

    status: AtomicU8,
    priority: AtomicU8,
    skip_counter: AtomicU32,

    pub sentient_state: SentientState,

    /// Non-negative; today only the fault sensor's safety interlock reads
    /// it, to avoid terminating a task while it holds a kernel lock.
    pub kernel_locks_held: AtomicI32,

    /// Incremented by the sensor, exchanged-with-zero by the profiler.
    pub profiler_fault_count: AtomicU32,

    wakeup_tick: AtomicU64,
}

// Safety: the raw stack pointers are fixed after creation and never
// aliased mutably outside the owning `TaskTable`, which is always accessed
// through its lock.
unsafe impl Send for Task {}

impl Task {
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, s: TaskStatus) {
        self.status.store(s as u8, Ordering::Release);
    }

    pub fn priority(&self) -> TaskPriority {
        TaskPriority::from_u8(self.priority.load(Ordering::Acquire))
    }

    pub fn set_priority(&self, p: TaskPriority) {
        self.priority.store(p as u8, Ordering::Release);
    }

    pub fn skip_counter(&self) -> u32 {
        self.skip_counter.load(Ordering::Acquire)
    }

    pub fn set_skip_counter(&self, v: u32) {
        self.skip_counter.store(v, Ordering::Release);
    }

    /// Decrement the skip counter by one, floor at zero. Returns the value
    /// after decrement.
    pub fn decrement_skip_counter(&self) -> u32 {
        loop {
            let cur = self.skip_counter.load(Ordering::Acquire);
            if cur == 0 {
                return 0;
            }
            if self
                .skip_counter
                .compare_exchange(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return cur - 1;
            }
        }
    }

    pub fn wakeup_tick(&self) -> u64 {
        self.wakeup_tick.load(Ordering::Acquire)
    }

    pub fn set_wakeup_tick(&self, t: u64) {
        self.wakeup_tick.store(t, Ordering::Release);
    }

    /// Top of the kernel stack, for bootstrap and TSS programming.
    pub fn kernel_stack_top(&self) -> u64 {
        self.kernel_stack as u64 + self.kernel_stack_size as u64
    }

    /// Top of the user stack, if this is a user-mode task.
    pub fn user_stack_top(&self) -> Option<u64> {
        self.user_stack
            .map(|p| p as u64 + self.user_stack_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A task with no backing stack memory — fine for these tests, which
    /// never dereference `kernel_stack`/`user_stack`, only compare/decrement
    /// the atomic bookkeeping fields.
    fn fake_task(id: u64) -> Task {
        Task {
            id: TaskId(id),
            name: "test",
            entry: 0,
            mode: TaskMode::User,
            kernel_stack: core::ptr::null_mut(),
            kernel_stack_size: 0,
            user_stack: None,
            user_stack_size: 0,
            saved_context: CpuState::empty(),
            status: AtomicU8::new(TaskStatus::NotRunning as u8),
            priority: AtomicU8::new(TaskPriority::Normal as u8),
            skip_counter: AtomicU32::new(0),
            sentient_state: SentientState::new(),
            kernel_locks_held: AtomicI32::new(0),
            profiler_fault_count: AtomicU32::new(0),
            wakeup_tick: AtomicU64::new(0),
        }
    }

    #[test]
    fn priority_skip_ticks_preserve_fibonacci_ratios() {
        // Tuning constants, not a semantic ranking; only their ratios matter.
        assert_eq!(TaskPriority::Normal.skip_ticks(), 0);
        assert_eq!(TaskPriority::Low.skip_ticks(), 55);
        assert_eq!(TaskPriority::Lower.skip_ticks(), 89);
        assert_eq!(TaskPriority::Idle.skip_ticks(), 144);
        assert!(TaskPriority::Low.skip_ticks() < TaskPriority::Lower.skip_ticks());
        assert!(TaskPriority::Lower.skip_ticks() < TaskPriority::Idle.skip_ticks());
    }

    #[test]
    fn decrement_skip_counter_floors_at_zero() {
        let t = fake_task(1);
        t.set_skip_counter(2);
        assert_eq!(t.decrement_skip_counter(), 1);
        assert_eq!(t.decrement_skip_counter(), 0);
        assert_eq!(t.decrement_skip_counter(), 0, "must not wrap below zero");
    }

    #[test]
    fn skip_counter_never_exceeds_priority_after_a_dispatch() {
        // The scheduler's Select step always does `set_skip_counter(priority)`
        // right after choosing a candidate, so skip_counter never exceeds it.
        for p in [
            TaskPriority::Normal,
            TaskPriority::Low,
            TaskPriority::Lower,
            TaskPriority::Idle,
        ] {
            let t = fake_task(1);
            t.set_priority(p);
            t.set_skip_counter(t.priority().skip_ticks());
            assert!(t.skip_counter() <= t.priority().skip_ticks());
            // Decrementing can only ever move it further below the bound.
            for _ in 0..200 {
                t.decrement_skip_counter();
                assert!(t.skip_counter() <= t.priority().skip_ticks());
            }
        }
    }

    #[test]
    fn never_dispatched_task_has_zero_rip() {
        let t = fake_task(1);
        assert_eq!(t.saved_context.rip, 0, "never-dispatched task has no saved rip");
    }

    #[test]
    fn status_round_trips_through_the_atomic_encoding() {
        let t = fake_task(1);
        for s in [
            TaskStatus::NotRunning,
            TaskStatus::Running,
            TaskStatus::Sleeping,
            TaskStatus::Zombie,
        ] {
            t.set_status(s);
            assert_eq!(t.status(), s);
        }
    }
}
