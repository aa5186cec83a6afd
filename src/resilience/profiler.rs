//! Homeostatic profiler: periodic per-task rate threshold, terminating
//! pathological user tasks the fast path never triggers on.

use crate::config::{CRITICAL_THRESHOLD_FAULTS_PER_SEC, PROFILER_INTERVAL_MS};
use crate::scheduler::ticks;
use crate::task::table::TABLE;
use crate::task::{TaskMode, TaskStatus};
use core::sync::atomic::{AtomicU64, Ordering};

static LAST_RUN: AtomicU64 = AtomicU64::new(0);

/// Runs forever as a kernel task.
pub fn profiler_entry() {
    loop {
        let now = ticks();
        if now.saturating_sub(LAST_RUN.load(Ordering::Relaxed)) < PROFILER_INTERVAL_MS {
            core::hint::spin_loop();
            continue;
        }
        LAST_RUN.store(now, Ordering::Relaxed);

        // Locking the task table from task context (rather than interrupt
        // context) has to mask interrupts around the critical section,
        // otherwise a timer tick landing mid-iteration would try to
        // re-enter the same spinlock on this core.
        x86_64::instructions::interrupts::without_interrupts(|| {
            let table = TABLE.lock();
            for task in table.get_all() {
                if task.mode != TaskMode::User || task.status() != TaskStatus::Running {
                    continue;
                }
                // The atomic exchange-with-zero is the synchronization
                // point that prevents double-counting against the
                // sensor's increments.
                let count = task.profiler_fault_count.swap(0, Ordering::AcqRel);
                if count == 0 {
                    continue;
                }
                let rate = (count as u64) * 1000 / PROFILER_INTERVAL_MS;
                if rate > CRITICAL_THRESHOLD_FAULTS_PER_SEC {
                    task.set_status(TaskStatus::Zombie);
                    crate::log_warn!(
                        "profiler: task {} sustained {} faults/s, quarantined",
                        task.id.0,
                        rate
                    );
                    if super::APOPTOSIS_QUEUE
                        .lock()
                        .enqueue(task.id.0 as i64)
                        .is_err()
                    {
                        crate::log_warn!(
                            "apoptosis queue full, task {} zombie but not enqueued",
                            task.id.0
                        );
                    }
                }
            }
        });
    }
}
