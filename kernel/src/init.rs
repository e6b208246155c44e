//! Boot sequence. The order is fixed: console and logger, interrupts,
//! paging, heap, then processes, which need the heap for PCBs and stacks.

use log::info;

use crate::{
    devices, interrupts, logging,
    memory::{self, paging::KernelLayout},
    processes::{self, process::ProcessEntry},
};

/// Runs every initialization step once. Interrupts are enabled on return.
pub fn init(layout: KernelLayout, worker: ProcessEntry) {
    devices::init();
    logging::init().expect("Logger initialization failed");
    info!("Booting kernel image {:?} ({} pages)", layout.phys_base, layout.image_pages());

    interrupts::init();
    memory::init(layout).unwrap_or_else(|err| panic!("Failed to initialize memory: {}", err));
    info!(
        "Active directory: {:?}",
        memory::with_vmm(|vmm| vmm.directory_frame().start_address())
    );

    processes::init(worker).unwrap_or_else(|err| panic!("Failed to create processes: {}", err));
    processes::print_process_table();

    interrupts::enable();
}
