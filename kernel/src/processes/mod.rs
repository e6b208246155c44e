pub mod context;
pub mod process;
pub mod registers;
pub mod scheduler;

use log::info;
use spin::Mutex;

use crate::{
    constants::processes::{DEFAULT_POLICY, WORKER_PRIORITY},
    interrupts,
};
use context::StackSwitch;
use process::{Pid, ProcessEntry, ProcessError};
use scheduler::{dispatch_on, start_on, Scheduler, SCHEDULER};

/// Sets up the kernel scheduler with the idle process (pid 0) and one worker
/// (pid 1). Must run after the heap is up, since PCBs and stacks live there.
pub fn init(worker: ProcessEntry) -> Result<(), ProcessError> {
    init_on(&SCHEDULER, worker)
}

pub fn init_on(slot: &Mutex<Option<Scheduler>>, worker: ProcessEntry) -> Result<(), ProcessError> {
    let mut slot = slot.lock();
    if slot.is_some() {
        return Err(ProcessError::AlreadyInitialized);
    }

    let mut scheduler = Scheduler::new(DEFAULT_POLICY);
    scheduler.spawn_idle(idle_process)?;
    scheduler.spawn("worker", WORKER_PRIORITY, worker)?;
    info!(
        "Scheduler ready: {} processes, {:?} policy",
        scheduler.table().len(),
        scheduler.policy()
    );
    *slot = Some(scheduler);
    Ok(())
}

/// Gives up the CPU to the next process.
pub fn dispatch() -> Option<Pid> {
    dispatch_on(&SCHEDULER, &mut StackSwitch)
}

/// Abandons the boot context and enters the idle process.
pub fn start() -> ! {
    if let Err(err) = start_on(&SCHEDULER, &mut StackSwitch) {
        panic!("Failed to start scheduler: {}", err);
    }
    // Only a hosted build gets here.
    interrupts::halt_forever()
}

/// Always eligible, and yields straight back.
pub extern "C" fn idle_process() -> ! {
    loop {
        dispatch();
        core::hint::spin_loop();
    }
}

pub fn print_process_table() {
    if let Some(scheduler) = SCHEDULER.lock().as_ref() {
        process::print_process_table(scheduler.table());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::processes::IDLE_PRIORITY,
        processes::{process::tests::parked, process::ProcessState},
    };

    #[test]
    fn test_init_builds_idle_and_worker() {
        let slot = Mutex::new(None);
        init_on(&slot, parked).expect("init");

        let guard = slot.lock();
        let scheduler = guard.as_ref().expect("scheduler");
        let idle = scheduler.table().get(Pid::IDLE).expect("idle");
        assert_eq!(idle.name(), "idle");
        assert_eq!(idle.priority(), IDLE_PRIORITY);
        assert_eq!(idle.entry() as usize, idle_process as usize);

        let worker = scheduler.table().get(Pid::new(1)).expect("worker");
        assert_eq!(worker.priority(), WORKER_PRIORITY);
        assert_eq!(worker.state(), ProcessState::Ready);
        assert_eq!(scheduler.policy(), DEFAULT_POLICY);
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let slot = Mutex::new(None);
        init_on(&slot, parked).expect("init");
        assert_eq!(init_on(&slot, parked), Err(ProcessError::AlreadyInitialized));
        assert_eq!(slot.lock().as_ref().map(|s| s.table().len()), Some(2));
    }
}
