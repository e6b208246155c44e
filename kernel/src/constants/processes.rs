use crate::processes::scheduler::DispatchPolicy;

/// Capacity of the process arena and of the ready queue.
pub const MAX_PROCESSES: usize = 16;
pub const STACK_SIZE: usize = 4096;
pub const NAME_LEN: usize = 32;

pub const IDLE_PID: u16 = 0;
/// Idle holds the minimum priority, so it heads the ready queue. The priority
/// policy still passes over it while any other process is READY.
pub const IDLE_PRIORITY: i32 = i32::MIN;
pub const WORKER_PRIORITY: i32 = 0;

pub const DEFAULT_POLICY: DispatchPolicy = DispatchPolicy::Alternate;
