//! Apoptosis worker: deferred cleanup gated on the eviction handshake.
//!
//! There is no blocking primitive in this kernel's timer-only scheduling
//! model, so both the dequeue wait and the handshake wait are plain spin
//! loops that simply lose their timeslice to preemption between
//! iterations.

use crate::scheduler::EVICTION_ACK;
use core::sync::atomic::Ordering;

/// Runs forever as a kernel task. Never returns; `fn()`-typed entry points
/// are expected to loop, the same as the profiler and adaptive controller.
pub fn apoptosis_worker_entry() {
    loop {
        let id = loop {
            if let Some(id) = super::APOPTOSIS_QUEUE.lock().dequeue() {
                break id;
            }
            core::hint::spin_loop();
        };

        // Wait for eviction handshake: the scheduler writes the outgoing
        // task's id into EVICTION_ACK only after its context has been
        // fully saved, giving a happens-before edge between save and
        // reclaim.
        loop {
            if EVICTION_ACK.load(Ordering::Acquire) == id {
                EVICTION_ACK.store(-1, Ordering::Release);
                break;
            }
            core::hint::spin_loop();
        }

        // Cleanup is a logical step here: the slab/bump arena has no
        // compaction or freeing path back to the OS, so we leave the
        // stacks and task record allocated rather than double-manage
        // ownership the allocator was never designed to give back. The
        // invariant that matters — never reclaim before the handshake —
        // holds either way.
        crate::resilience::adaptive::release(crate::task::TaskId(id as u64));
        crate::log_info!("apoptosis: task {} reclaimed", id);
    }
}
