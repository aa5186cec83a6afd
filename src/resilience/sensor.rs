//! The page-fault hot path.
//!
//! The naked asm half lives in `scheduler::context::page_fault_entry_stub`,
//! which hands this function a pointer to a `PageFaultFrame`: the pushed
//! GPRs, the CPU's error code, then `rip`/`cs`/`rflags`/`rsp`/`ss`.
//! Everything here runs with interrupts disabled, in the faulting task's
//! address space.

use crate::config::BURST_THRESHOLD;
use crate::decode::faulting_instruction_length;
use crate::interrupts::gdt;
use crate::scheduler::context::PageFaultFrame;
use crate::scheduler::ticks;
use crate::task::table::TABLE;
use crate::task::{TaskMode, TaskStatus};
use core::sync::atomic::{AtomicU64, Ordering};

/// Total page faults observed, across all tasks.
pub static TOTAL_EXCEPTIONS: AtomicU64 = AtomicU64::new(0);

/// Read up to 16 bytes starting at `rip`, the widest an x86_64 instruction
/// can be, capped so the read never straddles past what's mapped after the
/// faulting instruction.
unsafe fn read_instruction_bytes(rip: u64) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let src = rip as *const u8;
    for (i, slot) in buf.iter_mut().enumerate() {
        *slot = unsafe { core::ptr::read_volatile(src.add(i)) };
    }
    buf
}

/// The fault sensor's Rust half, called from `page_fault_entry_stub` with a
/// pointer to the CPU's pushed `#PF` frame, error code included.
#[no_mangle]
pub extern "C" fn page_fault_c_handler(frame: *mut PageFaultFrame) {
    // 1. Global counter.
    TOTAL_EXCEPTIONS.fetch_add(1, Ordering::Relaxed);

    let cs = unsafe { (*frame).cs };

    // 2. Kernel-origin guard.
    if cs == gdt::GDT.1.kernel_code.0 as u64 {
        panic!("page fault with kernel code selector — kernel-origin fault, halting");
    }

    let mut table = TABLE.lock();
    let current_idx = match table.current {
        Some(idx) => idx,
        None => panic!("page fault with no current task"),
    };
    let task = table
        .slot_mut_at(current_idx)
        .expect("current index out of range");

    // 3. Current task / already-Zombie early-out.
    if task.status() == TaskStatus::Zombie {
        return;
    }

    // 4. Mode guard.
    if task.mode != TaskMode::User {
        panic!("page fault in a non-user task outside the kernel-origin guard");
    }

    // 5. Instruction length decode.
    let rip = unsafe { (*frame).rip };
    let bytes = unsafe { read_instruction_bytes(rip) };
    let instr_len = faulting_instruction_length(&bytes);

    if !cfg!(feature = "sentient") {
        // Control build switch: resilience subsystem compiled out. Advance
        // past the fault and return, leaving the livelock vulnerability
        // intact on purpose.
        unsafe { (*frame).rip = rip + instr_len as u64 };
        return;
    }

    // 6. Adaptive report.
    crate::resilience::adaptive::report_fault(task.id);

    // 7. Profiler counter.
    task.profiler_fault_count.fetch_add(1, Ordering::Relaxed);

    // 8. Burst window.
    let now = ticks();
    let burst = accumulate_burst(&task.sentient_state, now);

    // 9. Quarantine decision.
    if burst >= BURST_THRESHOLD {
        if task.kernel_locks_held.load(Ordering::Relaxed) > 0 {
            // Safety interlock: terminating with locks held risks
            // deadlocking the kernel. Park this CPU instead.
            drop(table);
            x86_64::instructions::interrupts::disable();
            loop {
                x86_64::instructions::hlt();
            }
        }

        let id = task.id;
        task.set_status(TaskStatus::Zombie);
        unsafe { (*frame).rip = rip + instr_len as u64 };
        drop(table);

        if crate::resilience::APOPTOSIS_QUEUE
            .lock()
            .enqueue(id.0 as i64)
            .is_err()
        {
            crate::log_warn!("apoptosis queue full, task {} zombie but not enqueued", id.0);
        }
        return;
    }

    // 10. Non-quarantine path: still advance past the faulting instruction.
    unsafe { (*frame).rip = rip + instr_len as u64 };
}

/// Rolling fault-burst accounting, pulled out of the handler as a pure
/// function of `(state, now)` so it's testable without a CPU-pushed
/// interrupt frame. The result after processing equals the length of the
/// longest suffix whose consecutive gaps are all <= `BURST_WINDOW_MS`.
fn accumulate_burst(state: &crate::task::SentientState, now: u64) -> u32 {
    use crate::config::BURST_WINDOW_MS;

    let last = state.last_exception_tick_ms.load(Ordering::Relaxed);
    if now.saturating_sub(last) <= BURST_WINDOW_MS {
        state.exception_burst_count.fetch_add(1, Ordering::Relaxed) + 1
    } else {
        state.exception_burst_count.store(1, Ordering::Relaxed);
        state.last_exception_tick_ms.store(now, Ordering::Relaxed);
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SentientState;

    /// Feeds a sequence of fault timestamps through `accumulate_burst` and
    /// returns the final burst count.
    fn run(timestamps: &[u64]) -> u32 {
        let state = SentientState::new();
        let mut last = 0;
        for &t in timestamps {
            last = accumulate_burst(&state, t);
        }
        last
    }

    #[test]
    fn first_fault_always_counts_as_one() {
        assert_eq!(run(&[1000]), 1);
    }

    #[test]
    fn faults_within_the_window_accumulate() {
        // gaps of 1ms, 2ms, 3ms — all <= BURST_WINDOW_MS (10ms)
        assert_eq!(run(&[0, 1, 3, 6]), 4);
    }

    #[test]
    fn a_gap_past_the_window_resets_the_count() {
        // 0, 5 (gap 5, within window) -> count 2
        // then 20 (gap 15, past window) -> resets to 1
        assert_eq!(run(&[0, 5, 20]), 1);
    }

    #[test]
    fn burst_count_equals_length_of_longest_qualifying_suffix() {
        // gaps: 0->5 (5, ok), 5->9 (4, ok), 9->25 (16, reset), 25->30 (5, ok)
        // longest suffix with all consecutive gaps <= 10ms is [25, 30]: length 2.
        assert_eq!(run(&[0, 5, 9, 25, 30]), 2);
    }

    #[test]
    fn exactly_at_the_window_boundary_still_counts() {
        // gap of exactly BURST_WINDOW_MS (10ms) is inclusive (<=), not exclusive.
        assert_eq!(run(&[0, 10, 20, 30]), 4);
    }
}
