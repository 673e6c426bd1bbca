//! The machine state contract for snapshot loaders.
//!
//! Snapshot file parsing (SNA/Z80/AY) lives outside the core; whatever
//! parses one hands the machine a [`MachineState`]. Application is
//! all-or-nothing: validation happens before anything is touched, so a
//! malformed snapshot can never leave the machine half-initialised.

use zilog_z80::Registers;

use crate::error::SpectrumError;

/// Everything a snapshot restores.
#[derive(Debug, Clone)]
pub struct MachineState {
    /// Full Z80 register file including IFF1/IFF2, interrupt mode and
    /// halt state.
    pub regs: Registers,
    /// Border colour (0-7).
    pub border: u8,
    /// 128K page-select register (ignored on unbanked models).
    pub page_reg: u8,
    /// Full RAM image; the length must match the model.
    pub ram: Vec<u8>,
}

impl MachineState {
    /// Validate structural invariants: interrupt mode and RAM size.
    pub(crate) fn validate(&self, ram_size: usize) -> Result<(), SpectrumError> {
        if self.regs.im > 2 {
            return Err(SpectrumError::Malformed(format!(
                "interrupt mode {} does not exist",
                self.regs.im
            )));
        }
        if self.ram.len() != ram_size {
            return Err(SpectrumError::Malformed(format!(
                "RAM image is {} bytes, model needs {ram_size}",
                self.ram.len()
            )));
        }
        Ok(())
    }
}
