use alloc::{boxed::Box, vec::Vec};
use arrayvec::{ArrayString, ArrayVec};
use core::fmt;
use log::info;

use crate::{
    constants::processes::{IDLE_PID, MAX_PROCESSES, NAME_LEN, STACK_SIZE},
    processes::registers::InitialFrame,
};

/// Where a process starts executing on its first dispatch. Never returns.
pub type ProcessEntry = extern "C" fn() -> !;

/// Stable handle of a process; its slot in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u16);

impl Pid {
    pub const IDLE: Pid = Pid(IDLE_PID);

    pub const fn new(pid: u16) -> Self {
        Pid(pid)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// There is no terminal state; processes never exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    /// Not reachable under the current dispatch policies.
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    TableFull,
    OutOfMemory,
    NameTooLong,
    IdleAlreadyRegistered,
    IdleMissing,
    AlreadyInitialized,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "Process table is full"),
            ProcessError::OutOfMemory => write!(f, "Out of memory for a process"),
            ProcessError::NameTooLong => write!(f, "Process name exceeds {} bytes", NAME_LEN),
            ProcessError::IdleAlreadyRegistered => write!(f, "Idle process already exists"),
            ProcessError::IdleMissing => write!(f, "Idle process must be created first"),
            ProcessError::AlreadyInitialized => write!(f, "Scheduler is already initialized"),
        }
    }
}

/// Process control block.
pub struct Pcb {
    pid: Pid,
    name: ArrayString<NAME_LEN>,
    priority: i32,
    state: ProcessState,
    entry: ProcessEntry,
    stack: Box<[u8]>,
    /// Saved stack pointer; the context switch reads and writes it in place.
    stack_pointer: usize,
}

impl Pcb {
    /// Creates a READY process whose stack is seeded to start at `entry`.
    pub fn new(pid: Pid, name: &str, priority: i32, entry: ProcessEntry) -> Result<Self, ProcessError> {
        let name = ArrayString::from(name).map_err(|_| ProcessError::NameTooLong)?;

        let mut stack = Vec::new();
        stack
            .try_reserve_exact(STACK_SIZE)
            .map_err(|_| ProcessError::OutOfMemory)?;
        stack.resize(STACK_SIZE, 0u8);
        let mut stack = stack.into_boxed_slice();

        let stack_pointer = InitialFrame::new(entry).install(&mut stack);

        Ok(Pcb {
            pid,
            name,
            priority,
            state: ProcessState::Ready,
            entry,
            stack,
            stack_pointer,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn entry(&self) -> ProcessEntry {
        self.entry
    }

    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    /// First address past the process stack.
    pub fn stack_top(&self) -> usize {
        self.stack.as_ptr() as usize + self.stack.len()
    }

    pub(crate) fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub(crate) fn stack_slot(&mut self) -> *mut usize {
        &mut self.stack_pointer
    }
}

impl fmt::Debug for Pcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pcb")
            .field("pid", &self.pid)
            .field("name", &self.name.as_str())
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("stack_pointer", &format_args!("{:#x}", self.stack_pointer))
            .finish()
    }
}

/// Arena of PCBs addressed by pid. Released pids are reused.
pub struct ProcessTable {
    slots: ArrayVec<Option<Box<Pcb>>, MAX_PROCESSES>,
    free: ArrayVec<Pid, MAX_PROCESSES>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub const fn new() -> Self {
        ProcessTable {
            slots: ArrayVec::new_const(),
            free: ArrayVec::new_const(),
        }
    }

    /// Pid the next insert will use.
    pub fn next_pid(&self) -> Option<Pid> {
        match self.free.last() {
            Some(&pid) => Some(pid),
            None if !self.slots.is_full() => Some(Pid(self.slots.len() as u16)),
            None => None,
        }
    }

    /// Builds a PCB for the next pid and stores it. Nothing is consumed if
    /// `build` fails.
    pub fn insert<F>(&mut self, build: F) -> Result<Pid, ProcessError>
    where
        F: FnOnce(Pid) -> Result<Pcb, ProcessError>,
    {
        let pid = self.next_pid().ok_or(ProcessError::TableFull)?;
        let pcb = try_box(build(pid)?)?;

        if self.free.last() == Some(&pid) {
            self.free.pop();
            self.slots[pid.index()] = Some(pcb);
        } else {
            self.slots.push(Some(pcb));
        }
        Ok(pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slots.get(pid.index())?.as_deref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots.get_mut(pid.index())?.as_deref_mut()
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Box<Pcb>> {
        let pcb = self.slots.get_mut(pid.index())?.take()?;
        self.free.push(pid);
        Some(pcb)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().flatten().map(|pcb| &**pcb)
    }

    pub fn count_in(&self, state: ProcessState) -> usize {
        self.iter().filter(|pcb| pcb.state == state).count()
    }
}

/// Moves `pcb` to the heap, reporting exhaustion instead of aborting.
fn try_box(pcb: Pcb) -> Result<Box<Pcb>, ProcessError> {
    let mut slot = Vec::new();
    slot.try_reserve_exact(1).map_err(|_| ProcessError::OutOfMemory)?;
    slot.push(pcb);
    // A one-element slice has the layout of its element.
    let raw = Box::into_raw(slot.into_boxed_slice()) as *mut Pcb;
    Ok(unsafe { Box::from_raw(raw) })
}

pub fn print_process_table(table: &ProcessTable) {
    info!("Process Table Contents:");
    if table.is_empty() {
        info!("No processes found");
        return;
    }

    for pcb in table.iter() {
        info!(
            "PID {}: {} State: {:?}, Priority: {}, SP: {:#x}",
            pcb.pid, pcb.name, pcb.state, pcb.priority, pcb.stack_pointer
        );
    }
}
