#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod kernel {
    extern crate alloc;

    use alloc::vec::Vec;
    use cadence::{debug_println, init, interrupts, memory, processes, serial_println};

    #[no_mangle]
    extern "C" fn kmain() -> ! {
        init::init(memory::kernel_layout(), worker);

        serial_println!("Entering idle process");
        processes::start()
    }

    const ROUNDS_KEPT: usize = 1024;

    /// Keeps a record of its rounds on the heap and yields after every one.
    extern "C" fn worker() -> ! {
        let mut rounds: Vec<u32> = Vec::new();
        let mut round: u32 = 0;
        loop {
            round = round.wrapping_add(1);
            if rounds.len() == ROUNDS_KEPT {
                rounds.clear();
                if let Some(stats) = memory::heap::KERNEL_HEAP.stats() {
                    serial_println!("worker: round {}, heap {:?}", round, stats);
                }
            }
            rounds.push(round);
            debug_println!("worker: round {}", round);
            processes::dispatch();
        }
    }

    #[panic_handler]
    fn rust_panic(info: &core::panic::PanicInfo) -> ! {
        serial_println!("Kernel panic: {}", info);
        interrupts::halt_forever()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    println!(
        "cadence is a bare-metal kernel; build it for a 32-bit x86 target with target_os = \"none\" to boot it"
    );
}
