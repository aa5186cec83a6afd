//! Fixed-capacity task table.
//!
//! A `[Option<Task>; TASKS_MAX]` indexed by slot id: the scheduler scans
//! slots in place rather than popping/pushing a queue, and task-table
//! mutation stays allocation-free so it is safe to touch from interrupt
//! context.

use crate::config::TASKS_MAX;
use crate::error::{KernelError, KernelResult};
use crate::memory::ALLOCATOR;
use crate::scheduler::context::CpuState;
use crate::task::{SentientState, Task, TaskId, TaskMode, TaskStatus};
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use lazy_static::lazy_static;
use spin::Mutex;

pub struct TaskTable {
    slots: [Option<Task>; TASKS_MAX],
    next_id: u64,
    /// Index the scheduler last dispatched from; `Select` resumes scanning
    /// one past this slot.
    pub current: Option<usize>,
}

impl TaskTable {
    fn new() -> Self {
        TaskTable {
            slots: [const { None }; TASKS_MAX],
            next_id: 1,
            current: None,
        }
    }

    /// Allocate a slot, allocate its owned stacks, and install the task
    /// record with `status = NotRunning`, `priority = Normal`.
    pub fn create_from_entry(
        &mut self,
        entry: u64,
        name: &'static str,
        mode: TaskMode,
    ) -> KernelResult<TaskId> {
        let slot_index = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::TableFull)?;

        let kernel_stack = ALLOCATOR.alloc_stack()?;
        let kernel_stack_size = crate::memory::STACK_SIZE;

        let (user_stack, user_stack_size) = match mode {
            TaskMode::User => {
                let s = ALLOCATOR.alloc_stack()?;
                (Some(s), crate::memory::STACK_SIZE)
            }
            TaskMode::Kernel => (None, 0),
        };

        let id = TaskId(self.next_id);
        self.next_id += 1;

        let task = Task {
            id,
            name,
            entry,
            mode,
            kernel_stack,
            kernel_stack_size,
            user_stack,
            user_stack_size,
            saved_context: CpuState::empty(),
            status: AtomicU8::new(TaskStatus::NotRunning as u8),
            priority: AtomicU8::new(crate::task::TaskPriority::Normal as u8),
            skip_counter: AtomicU32::new(0),
            sentient_state: SentientState::new(),
            kernel_locks_held: AtomicI32::new(0),
            profiler_fault_count: AtomicU32::new(0),
            wakeup_tick: AtomicU64::new(0),
        };

        self.slots[slot_index] = Some(task);
        Ok(id)
    }

    /// status -> Running.
    pub fn start(&mut self, id: TaskId) {
        if let Some(task) = self.get(id) {
            task.set_status(TaskStatus::Running);
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .find(|t| t.id == id)
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Task> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn slot_at(&self, index: usize) -> Option<&Task> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn slot_mut_at(&mut self, index: usize) -> Option<&mut Task> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn task_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn active_task_count(&self) -> usize {
        self.get_all()
            .filter(|t| t.status() == TaskStatus::Running)
            .count()
    }
}

lazy_static! {
    pub static ref TABLE: Mutex<TaskTable> = Mutex::new(TaskTable::new());
}

/// Create a task and return its id.
pub fn create_task_from_entry(
    entry: fn(),
    name: &'static str,
    mode: TaskMode,
) -> KernelResult<TaskId> {
    TABLE
        .lock()
        .create_from_entry(entry as usize as u64, name, mode)
}

pub fn start_task(id: TaskId) {
    TABLE.lock().start(id);
}

pub fn total_exceptions() -> u64 {
    crate::resilience::sensor::TOTAL_EXCEPTIONS.load(Ordering::Relaxed)
}

pub fn task_count() -> usize {
    TABLE.lock().task_count()
}

pub fn active_task_count() -> usize {
    TABLE.lock().active_task_count()
}
