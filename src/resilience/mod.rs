//! The three-tier adaptive resilience supervisor: fault sensor (hot path),
//! apoptosis worker, homeostatic profiler, and adaptive controller.
//! Quarantines and throttles a misbehaving task instead of letting its
//! page faults run unchecked.
//!
//! Gated behind the `sentient` feature (default on), a compile-time switch
//! for disabling the whole subsystem.

pub mod adaptive;
pub mod apoptosis;
pub mod profiler;
pub mod sensor;

use crate::config::WORK_QUEUE_SIZE;
use crate::workqueue::WorkQueue;
use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    /// The apoptosis pipeline's queue: the fault sensor and the profiler
    /// both enqueue task ids here; the apoptosis worker is the sole
    /// consumer.
    pub static ref APOPTOSIS_QUEUE: Mutex<WorkQueue<WORK_QUEUE_SIZE>> =
        Mutex::new(WorkQueue::new());
}

/// Start the three resilience kernel tasks. Called once from boot, after
/// the scheduler and task table are initialized.
pub fn spawn_tasks() {
    use crate::task::table::{create_task_from_entry, start_task};
    use crate::task::TaskMode;

    if let Ok(id) = create_task_from_entry(
        apoptosis::apoptosis_worker_entry,
        "apoptosis",
        TaskMode::Kernel,
    ) {
        start_task(id);
    }
    if let Ok(id) =
        create_task_from_entry(profiler::profiler_entry, "profiler", TaskMode::Kernel)
    {
        start_task(id);
    }
    if let Ok(id) = create_task_from_entry(
        adaptive::controller_entry,
        "adaptive",
        TaskMode::Kernel,
    ) {
        start_task(id);
    }
}
