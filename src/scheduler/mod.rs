//! Round-robin scheduler with priority skipping, plus the timer-tick glue
//! that drives it.
//!
//! Every switch is timer-driven: the timer ISR always calls `schedule`,
//! which scans the fixed task table in place (never a queue pop/push) and
//! tracks per-task skip counters for throttling. The table is a
//! lock-protected global singleton (`task::table::TABLE`) so the scan and
//! the TSS RSP0 update happen under one critical section per tick.

pub mod context;

use crate::config::TASKS_MAX;
use crate::interrupts::{gdt, idt};
use crate::task::table::TABLE;
use crate::task::{TaskMode, TaskStatus};
use context::CpuState;
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonic millisecond tick counter, incremented once per timer
/// interrupt.
pub static TICKS: AtomicU64 = AtomicU64::new(0);

/// Most recently dispatched user-mode task id, for the profiler's
/// culprit-of-last-resort lookup. `-1` means none yet.
pub static LAST_USER_TASK: AtomicI64 = AtomicI64::new(-1);

/// Single-slot eviction-acknowledgment register. Written by the
/// scheduler's save step when the outgoing task is Zombie; cleared only by
/// the apoptosis worker after it observes the match. `-1` is the unset
/// sentinel.
pub static EVICTION_ACK: AtomicI64 = AtomicI64::new(-1);

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// The timer interrupt's Rust half, called from `context::timer_entry_stub`
/// with a pointer to the pre-interrupt register image. Acks the PIC,
/// advances the tick counter, and defers the actual scheduling decision to
/// `schedule`.
#[no_mangle]
pub extern "C" fn timer_tick(frame: *mut CpuState) -> *mut CpuState {
    unsafe {
        idt::PICS
            .lock()
            .notify_end_of_interrupt(idt::InterruptIndex::Timer as u8);
    }
    TICKS.fetch_add(1, Ordering::Relaxed);
    schedule(frame)
}

/// Save the outgoing task's context, pick the next runnable task honoring
/// skip counters, bootstrap it on first dispatch, and program the TSS RSP0
/// for the next privilege transition. Returns a pointer to the chosen
/// task's saved context for the caller's `iretq`.
pub fn schedule(prev_frame: *mut CpuState) -> *mut CpuState {
    let mut table = TABLE.lock();
    let now = ticks();

    // --- Save ---
    if let Some(cur_idx) = table.current {
        if let Some(cur) = table.slot_mut_at(cur_idx) {
            cur.saved_context = unsafe { *prev_frame };
            if cur.mode == TaskMode::User {
                LAST_USER_TASK.store(cur.id.0 as i64, Ordering::Relaxed);
            }
            if cur.status() == TaskStatus::Zombie {
                EVICTION_ACK.store(cur.id.0 as i64, Ordering::Release);
            }
        }
    }

    // --- Select ---
    let start = table.current.map(|c| (c + 1) % TASKS_MAX).unwrap_or(0);
    let mut chosen: Option<usize> = None;
    for offset in 0..TASKS_MAX {
        let idx = (start + offset) % TASKS_MAX;
        let runnable = match table.slot_mut_at(idx) {
            Some(t) => t,
            None => continue,
        };

        if runnable.status() == TaskStatus::Sleeping && now >= runnable.wakeup_tick() {
            runnable.set_status(TaskStatus::Running);
        }
        if runnable.status() != TaskStatus::Running {
            continue;
        }
        if runnable.skip_counter() > 0 {
            runnable.decrement_skip_counter();
            continue;
        }

        runnable.set_skip_counter(runnable.priority().skip_ticks());
        chosen = Some(idx);
        break;
    }

    let chosen = match chosen {
        Some(idx) => idx,
        // No candidate in a full scan (or an empty table): keep running
        // the previous task unchanged.
        None => return prev_frame,
    };
    table.current = Some(chosen);

    // --- Bootstrap ---
    let next_ptr: *mut CpuState = {
        let next = table.slot_mut_at(chosen).expect("chosen slot vanished");
        if next.saved_context.rip == 0 {
            let (entry_sp, cs, ss) = match next.mode {
                TaskMode::Kernel => (
                    next.kernel_stack_top(),
                    gdt::GDT.1.kernel_code.0 as u64,
                    gdt::GDT.1.kernel_data.0 as u64,
                ),
                TaskMode::User => (
                    next.user_stack_top().expect("user task missing user stack"),
                    gdt::user_code_selector().0 as u64,
                    gdt::user_data_selector().0 as u64,
                ),
            };
            next.saved_context = CpuState::bootstrap(next.entry, entry_sp, cs, ss);
        }

        // --- TSS ---
        gdt::set_tss_rsp0(next.kernel_stack_top());

        &mut next.saved_context as *mut CpuState
    };

    next_ptr
}
