//! Process control blocks and the process table.

pub mod table;

use alloc::string::String;

pub use table::ProcessTable;

/// Process ID. Equal to the table slot index plus one; zero is "no
/// process" (the kernel bootstrap context before the scheduler starts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub const KERNEL: ProcessId = ProcessId(0);
    /// The idle thread, created first and never destroyed.
    pub const IDLE: ProcessId = ProcessId(1);

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn slot(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0 as usize - 1)
        }
    }

    pub const fn from_slot(slot: usize) -> ProcessId {
        ProcessId(slot as u32 + 1)
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state. A free table slot is simply `None`; every live PCB is in
/// one of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Runnable, waiting for the scheduler.
    Ready,
    /// Currently executing. At most one PCB is Running.
    Running,
    /// Waiting for an explicit unblock.
    Blocked,
    /// Exited or killed; resources reclaimed by the reaper.
    Terminated,
}

/// Process control block.
pub struct Pcb {
    pub pid: ProcessId,
    pub state: ProcessState,
    pub priority: u8,
    /// Remaining timer ticks in the current quantum.
    pub quantum: u32,
    /// Saved stack pointer while suspended.
    pub saved_esp: usize,
    /// Resume target: the entry function for a never-run process, the
    /// context-switch resume label afterwards.
    pub saved_eip: usize,
    /// Owned stack base, 0 for the registered bootstrap context.
    pub stack_base: usize,
    pub stack_size: usize,
    pub name: String,
    pub parent: ProcessId,
    pub exit_code: i32,
    /// Timer ticks charged to this process.
    pub ticks: u64,
}

impl Pcb {
    pub fn owns_stack(&self) -> bool {
        self.stack_base != 0
    }
}
