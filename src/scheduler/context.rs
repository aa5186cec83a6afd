//! Saved CPU register image and the naked interrupt-entry stub that builds
//! and consumes it.
//!
//! The cooperative kernel this is grown from saved only the callee-saved
//! registers and switched via a `ret` into the next task's resume point
//! (`switch_context`/`restore_context` below, in their original form). A
//! timer-driven preemptive scheduler can interrupt a task anywhere, so the
//! full register file has to be saved, not just the callee-saved half —
//! the same shape the syscall entry stub already pushes around `dispatch`.
//! `CpuState` is laid out to match exactly what lands on the kernel stack
//! after that push sequence, stacked under the interrupt frame the CPU
//! itself pushes, so a raw stack pointer doubles as a `*mut CpuState`.

use core::arch::naked_asm;

/// Full CPU register image captured at a preemption point. Field order
/// matches the push order of `timer_entry_stub` below (last-pushed /
/// lowest address first), with the five words the CPU pushes automatically
/// on any interrupt (`rip`, `cs`, `rflags`, `rsp`, `ss`) sitting directly
/// above them. Only valid for vectors that push no error code; `#PF` does,
/// so its stub builds a `PageFaultFrame` instead (see below).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CpuState {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Register image captured at a `#PF` entry. The CPU pushes an error code
/// ahead of the normal `rip`/`cs`/`rflags`/`rsp`/`ss` interrupt frame for
/// this vector only (the timer vector has no error code), so this layout
/// is `CpuState`'s fifteen GPRs followed by `error_code` and then the same
/// five-word tail, not a `CpuState` itself — treating the raw stack
/// pointer as `*mut CpuState` here would read the error code as `rip` and
/// the real `rip` as `cs`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PageFaultFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl CpuState {
    /// All-zero state. `rip == 0` doubles as the task table's "never
    /// dispatched" sentinel.
    pub const fn empty() -> Self {
        CpuState {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    /// Build the initial register image for a never-yet-run task: all GPRs
    /// zero, RIP at `entry`, RSP at the top of its stack, and segment/flags
    /// set for the requested privilege level. IF is always set so a task
    /// dispatched into for the first time doesn't boot with interrupts
    /// masked.
    pub fn bootstrap(entry: u64, stack_top: u64, cs: u64, ss: u64) -> Self {
        let mut s = CpuState::empty();
        s.rip = entry;
        s.rsp = stack_top;
        s.cs = cs;
        s.ss = ss;
        s.rflags = 0x202; // IF set, reserved bit 1 set
        s
    }
}

/// The timer interrupt entry point, wired into the IDT in place of the
/// `x86-interrupt`-ABI handler the cooperative scheduler used: a preemptive
/// switch has to happen *inside* the asm, because only the stub can splice
/// a different stack pointer in before `iretq`.
///
/// Pushes every GPR (the stack now reads as a `CpuState`), calls
/// `scheduler::timer_tick` with that pointer, then loads `rsp` from
/// whatever pointer it returned — the saved context of whichever task
/// should run next, possibly this same one unchanged — and pops back out.
#[unsafe(naked)]
pub extern "C" fn timer_entry_stub() {
    unsafe {
        naked_asm!(
            "push rax",
            "push rbx",
            "push rcx",
            "push rdx",
            "push rsi",
            "push rdi",
            "push rbp",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov rdi, rsp",
            "call {timer_tick}",
            "mov rsp, rax",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop r11",
            "pop r10",
            "pop r9",
            "pop r8",
            "pop rbp",
            "pop rdi",
            "pop rsi",
            "pop rdx",
            "pop rcx",
            "pop rbx",
            "pop rax",
            "iretq",
            timer_tick = sym crate::scheduler::timer_tick,
        );
    }
}

/// The page-fault entry point. Unlike the timer, this never switches
/// stacks on its own: it always resumes the faulting task (after the
/// handler has possibly stepped RIP past the faulting instruction) or
/// never returns at all (quarantine panics/terminates the task through a
/// path that doesn't come back here). The CPU pushes an error code ahead
/// of the normal interrupt frame for `#PF`, landing it between the pushed
/// GPRs and `rip` — `rsp` right after the GPR pushes is a `*mut
/// PageFaultFrame`, not a `*mut CpuState`, and the handler reads the error
/// code straight out of that struct rather than through a second register.
#[unsafe(naked)]
pub extern "C" fn page_fault_entry_stub() {
    unsafe {
        naked_asm!(
            "push rax",
            "push rbx",
            "push rcx",
            "push rdx",
            "push rsi",
            "push rdi",
            "push rbp",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov rdi, rsp",
            "call {page_fault}",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop r11",
            "pop r10",
            "pop r9",
            "pop r8",
            "pop rbp",
            "pop rdi",
            "pop rsi",
            "pop rdx",
            "pop rcx",
            "pop rbx",
            "pop rax",
            // discard the error code the CPU pushed
            "add rsp, 8",
            "iretq",
            page_fault = sym crate::resilience::sensor::page_fault_c_handler,
        );
    }
}
