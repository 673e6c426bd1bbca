//! Memory and I/O bus interface.

/// Memory and I/O port access.
///
/// The CPU executes against this trait; the machine hands it a short-lived
/// view over the memory fabric and peripherals for each instruction. There
/// is no wait-state plumbing; instruction T-counts are the documented
/// non-contended totals.
pub trait Bus {
    /// Read a byte from the given address.
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to the given address. ROM writes are silently ignored.
    fn write(&mut self, addr: u16, value: u8);

    /// Read a byte from the given 16-bit I/O port.
    fn io_read(&mut self, port: u16) -> u8;

    /// Write a byte to the given 16-bit I/O port.
    fn io_write(&mut self, port: u16, value: u8);
}
