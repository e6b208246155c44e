//! I/O port definitions.

/// Base I/O port address for the first serial port (COM1).
pub const SERIAL_PORT: u16 = 0x3F8;

/// Data (mask) ports of the master and slave 8259 PICs.
pub const PIC1_DATA: u16 = 0x21;
pub const PIC2_DATA: u16 = 0xA1;
