//! The slab/bump memory substrate: a bump arena plus fixed-size slab
//! caches carved out of it.

pub mod arena;
pub mod slab;

use crate::config::TASKS_MAX;
use crate::error::KernelResult;
use arena::Arena;
use lazy_static::lazy_static;
use slab::SlabCache;

/// Stack size handed to every task, kernel or user.
pub const STACK_SIZE: usize = 4096 * 4;

/// The process-wide allocator singleton: one bump arena, plus the stack
/// slab cache carved out of it. Task records themselves live inline in the
/// task table's fixed `[Option<Task>; TASKS_MAX]` array rather than in a
/// slab (the table is the single static allocation that replaces it), so
/// only the stack cache is needed here. Initialized once at boot (`init`);
/// never torn down.
pub struct KernelAlloc {
    pub arena: Arena,
    pub stack_cache: spin::Once<SlabCache>,
}

impl KernelAlloc {
    const fn new() -> Self {
        KernelAlloc {
            arena: Arena::new(),
            stack_cache: spin::Once::new(),
        }
    }

    /// Carve the stack slab cache out of the arena. Must run exactly once,
    /// before the first task is created.
    pub fn init(&self) {
        // Two stacks (kernel + user) per task slot, at worst.
        self.stack_cache.call_once(|| {
            SlabCache::new(&self.arena, STACK_SIZE, TASKS_MAX * 2).expect("stack cache init")
        });
    }

    pub fn alloc_stack(&self) -> KernelResult<*mut u8> {
        self.stack_cache.get().expect("allocator not initialized").alloc()
    }

    /// Dispatch a free to the stack cache if it owns `addr`; a no-op
    /// otherwise.
    pub fn free(&self, addr: *mut u8) {
        if let Some(c) = self.stack_cache.get() {
            c.free(addr);
        }
    }
}

lazy_static! {
    pub static ref ALLOCATOR: KernelAlloc = KernelAlloc::new();
}

/// Boot-time initialization: carve the slab caches out of the arena.
pub fn init() {
    ALLOCATOR.init();
    crate::log_info!("Memory substrate initialized: arena+slab allocator ready.");
}
