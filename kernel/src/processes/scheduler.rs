//! Cooperative scheduler
//!
//! A running process keeps the CPU until it calls `dispatch`. Dispatch picks
//! the next process under the lock, then releases the lock and performs the
//! switch with interrupts disabled.

use arrayvec::ArrayVec;
use log::{debug, trace};
use spin::Mutex;

use crate::{
    constants::processes::{IDLE_PRIORITY, MAX_PROCESSES},
    interrupts,
    processes::{
        context::ContextSwitch,
        process::{Pcb, Pid, ProcessEntry, ProcessError, ProcessState, ProcessTable},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Strict two-way toggle between the idle process and the first worker.
    /// Other processes stay READY and are never picked.
    Alternate,
    /// Lowest priority value first, round-robin among equal priorities.
    /// The idle process holds the minimum value but only runs when nothing
    /// else is READY. Nothing prevents a busy high-priority process from
    /// starving others.
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    pid: Pid,
}

/// READY processes in ascending priority order, FIFO among equals.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: ArrayVec<ReadyEntry, MAX_PROCESSES>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        ReadyQueue {
            entries: ArrayVec::new_const(),
        }
    }

    /// Queues `pid` behind every entry of equal or lower priority value.
    pub fn push(&mut self, pid: Pid, priority: i32) -> Result<(), ProcessError> {
        let at = self
            .entries
            .iter()
            .position(|entry| entry.priority > priority)
            .unwrap_or(self.entries.len());
        self.entries
            .try_insert(at, ReadyEntry { priority, pid })
            .map_err(|_| ProcessError::TableFull)
    }

    pub fn pop(&mut self) -> Option<Pid> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0).pid)
    }

    /// Pops the first entry other than `skip`, falling back to `skip` itself.
    pub fn pop_skipping(&mut self, skip: Pid) -> Option<Pid> {
        match self.entries.iter().position(|entry| entry.pid != skip) {
            Some(at) => Some(self.entries.remove(at).pid),
            None => self.pop(),
        }
    }

    pub fn remove(&mut self, pid: Pid) -> bool {
        match self.entries.iter().position(|entry| entry.pid == pid) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.iter().any(|entry| entry.pid == pid)
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.entries.iter().map(|entry| entry.pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A switch decided under the scheduler lock and carried out after it is
/// released. The slots live inside boxed PCBs, so they stay put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: Option<Pid>,
    pub to: Pid,
    save: *mut usize,
    load: *const usize,
}

pub struct Scheduler {
    table: ProcessTable,
    ready: ReadyQueue,
    policy: DispatchPolicy,
    current: Option<Pid>,
    /// `[idle, first worker]` for the alternate policy.
    slots: [Option<Pid>; 2],
    toggle: usize,
    /// Where `start` parks the boot stack pointer. Never resumed.
    boot_stack_pointer: usize,
}

impl Scheduler {
    pub const fn new(policy: DispatchPolicy) -> Self {
        Scheduler {
            table: ProcessTable::new(),
            ready: ReadyQueue::new(),
            policy,
            current: None,
            slots: [None, None],
            toggle: 0,
            boot_stack_pointer: 0,
        }
    }

    /// Creates the idle process. It must be the first process so it gets
    /// pid 0, and it runs at the minimum priority.
    pub fn spawn_idle(&mut self, entry: ProcessEntry) -> Result<Pid, ProcessError> {
        if self.slots[0].is_some() || self.table.next_pid() != Some(Pid::IDLE) {
            return Err(ProcessError::IdleAlreadyRegistered);
        }
        let pid = self.admit("idle", IDLE_PRIORITY, entry)?;
        self.slots[0] = Some(pid);
        Ok(pid)
    }

    /// Creates a READY process and queues it by priority.
    pub fn spawn(&mut self, name: &str, priority: i32, entry: ProcessEntry) -> Result<Pid, ProcessError> {
        if self.slots[0].is_none() {
            return Err(ProcessError::IdleMissing);
        }
        let pid = self.admit(name, priority, entry)?;
        if self.slots[1].is_none() {
            self.slots[1] = Some(pid);
        }
        Ok(pid)
    }

    /// The ready queue is only touched with interrupts disabled.
    fn admit(&mut self, name: &str, priority: i32, entry: ProcessEntry) -> Result<Pid, ProcessError> {
        let pid = interrupts::without_interrupts(|| -> Result<Pid, ProcessError> {
            let pid = self
                .table
                .insert(|pid| Pcb::new(pid, name, priority, entry))?;
            if let Err(err) = self.ready.push(pid, priority) {
                self.table.remove(pid);
                return Err(err);
            }
            Ok(pid)
        })?;
        debug!("Created process {} ({}) at priority {}", pid, name, priority);
        Ok(pid)
    }

    /// Leaves the boot context for the idle process. From here on exactly one
    /// process is RUNNING. `None` once already started.
    pub fn start(&mut self) -> Result<Option<Switch>, ProcessError> {
        let idle = self.slots[0].ok_or(ProcessError::IdleMissing)?;
        if self.current.is_some() {
            return Ok(None);
        }

        self.ready.remove(idle);
        let pcb = self.table.get_mut(idle).ok_or(ProcessError::IdleMissing)?;
        pcb.set_state(ProcessState::Running);
        let load = pcb.stack_slot() as *const usize;
        self.current = Some(idle);

        Ok(Some(Switch {
            from: None,
            to: idle,
            save: &mut self.boot_stack_pointer,
            load,
        }))
    }

    /// Picks the next process and updates states, or `None` to keep running
    /// the current one.
    pub fn plan_switch(&mut self) -> Option<Switch> {
        let current = self.current?;
        let next = match self.policy {
            DispatchPolicy::Alternate => {
                let next = self.slots[(self.toggle + 1) & 1]?;
                if next == current {
                    return None;
                }
                self.toggle = self.toggle.wrapping_add(1);
                self.ready.remove(next);
                self.requeue(current)?;
                next
            }
            DispatchPolicy::Priority => {
                self.requeue(current)?;
                // idle, then the current process, come back when nothing else qualifies
                let idle = self.slots[0]?;
                let next = self.ready.pop_skipping(idle)?;
                if next == current {
                    return None;
                }
                next
            }
        };

        let save = {
            let outgoing = self.table.get_mut(current)?;
            outgoing.set_state(ProcessState::Ready);
            outgoing.stack_slot()
        };
        let load = {
            let incoming = self.table.get_mut(next)?;
            incoming.set_state(ProcessState::Running);
            incoming.stack_slot() as *const usize
        };
        self.current = Some(next);
        trace!("Dispatch {} -> {}", current, next);

        Some(Switch {
            from: Some(current),
            to: next,
            save,
            load,
        })
    }

    fn requeue(&mut self, pid: Pid) -> Option<()> {
        let priority = self.table.get(pid)?.priority();
        self.ready.push(pid, priority).ok()
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn ready(&self) -> &ReadyQueue {
        &self.ready
    }
}

/// The kernel scheduler, set up once by `processes::init`.
pub static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

fn perform(plan: Option<Switch>, switcher: &mut impl ContextSwitch, were_enabled: bool) -> Option<Pid> {
    if let Some(switch) = plan {
        // Both slots belong to boxed PCBs or the scheduler, which outlive the switch.
        unsafe { switcher.switch(switch.save, switch.load) };
    }
    interrupts::restore(were_enabled);
    plan.map(|switch| switch.to)
}

/// Yields the CPU. Returns the process switched to, if any.
///
/// The scheduler lock is dropped before the switch, since the incoming
/// process takes it again on its own next dispatch.
pub fn dispatch_on(scheduler: &Mutex<Option<Scheduler>>, switcher: &mut impl ContextSwitch) -> Option<Pid> {
    let were_enabled = interrupts::disable();
    let plan = scheduler.lock().as_mut().and_then(Scheduler::plan_switch);
    perform(plan, switcher, were_enabled)
}

/// Enters the idle process. On hardware this never comes back.
pub fn start_on(
    scheduler: &Mutex<Option<Scheduler>>,
    switcher: &mut impl ContextSwitch,
) -> Result<Option<Pid>, ProcessError> {
    let were_enabled = interrupts::disable();
    let plan = match scheduler.lock().as_mut() {
        Some(scheduler) => scheduler.start(),
        None => Err(ProcessError::IdleMissing),
    };
    match plan {
        Ok(plan) => Ok(perform(plan, switcher, were_enabled)),
        Err(err) => {
            interrupts::restore(were_enabled);
            Err(err)
        }
    }
}
