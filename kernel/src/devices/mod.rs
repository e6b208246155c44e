//! Device initialization. The serial console is the only device the kernel
//! drives; everything else is left to the firmware defaults.

pub mod serial;

/// Brings up COM1 so the first log line does not pay for port setup.
pub fn init() {
    lazy_static::initialize(&serial::SERIAL1);
}
