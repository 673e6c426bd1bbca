//! Z80 CPU state machine: instruction stepping, prefixes, interrupts.

mod execute;

use emu_core::{Bus, Clock};

use crate::registers::Registers;

/// Index register selected by a DD or FD prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    Ix,
    Iy,
}

/// The Z80 CPU.
///
/// [`Z80::step`] executes exactly one instruction per call and advances the
/// owned clock by that instruction's documented T-state total. Interrupts
/// are accepted only at instruction boundaries, and never in the boundary
/// immediately after EI, DI or a DD/FD prefix byte.
pub struct Z80 {
    pub regs: Registers,
    clock: Clock,
    /// Pending maskable interrupt.
    int_pending: bool,
    /// Pending non-maskable interrupt.
    nmi_pending: bool,
    /// Blocks INT and NMI for one instruction (after EI/DI/DD/FD).
    int_lock: bool,
    /// Active DD/FD prefix. Implies `int_lock` until the modified
    /// instruction completes.
    modifier: Option<Index>,
    /// Byte a peripheral drives onto the data bus during interrupt
    /// acknowledge; idle bus reads 0xFF. Used by mode 2.
    data_bus: u8,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            clock: Clock::ZERO,
            int_pending: false,
            nmi_pending: false,
            int_lock: false,
            modifier: None,
            data_bus: 0xFF,
        }
    }

    /// Reset the CPU. The clock is left running.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.int_pending = false;
        self.nmi_pending = false;
        self.int_lock = false;
        self.modifier = None;
    }

    /// Current T-state clock.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Overwrite the T-state clock (snapshot restore, tests).
    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    /// Request a maskable interrupt.
    pub fn interrupt(&mut self) {
        self.int_pending = true;
    }

    /// Request a non-maskable interrupt.
    pub fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Set the interrupt-acknowledge data bus byte (mode 2 vector low byte).
    pub fn set_data_bus(&mut self, value: u8) {
        self.data_bus = value;
    }

    /// True while a DD/FD prefix is waiting for its instruction.
    #[must_use]
    pub fn mid_prefix(&self) -> bool {
        self.modifier.is_some()
    }

    /// Execute one instruction.
    ///
    /// A pending NMI or accepted interrupt redirects PC first; the first
    /// instruction of the service routine then executes in the same call.
    pub fn step(&mut self, bus: &mut impl Bus) {
        self.check_nmi(bus);
        self.check_int(bus);

        self.int_lock = false;

        if self.regs.halted {
            self.clock.advance(4);
            self.incr_r(1);
            return;
        }

        let op = self.fetch(bus);
        match op {
            0xDD => {
                // Prefix alone: a 4 T NOP that arms the modifier and
                // suppresses interrupt acceptance for one boundary.
                self.clock.advance(4);
                self.int_lock = true;
                self.modifier = Some(Index::Ix);
            }
            0xFD => {
                self.clock.advance(4);
                self.int_lock = true;
                self.modifier = Some(Index::Iy);
            }
            0xED => {
                self.incr_r(1);
                let ed = self.fetch(bus);
                self.execute_ed(ed, bus);
            }
            0xCB => {
                if let Some(index) = self.modifier {
                    // DDCB/FDCB: the displacement byte comes BEFORE the
                    // opcode byte. This ordering is load-bearing.
                    let d = self.fetch(bus) as i8;
                    let cb = self.fetch(bus);
                    self.execute_index_cb(index, d, cb, bus);
                } else {
                    self.incr_r(1);
                    let cb = self.fetch(bus);
                    self.execute_cb(cb, bus);
                }
            }
            _ => match self.modifier {
                Some(index) => self.execute_indexed(index, op, bus),
                None => self.execute_main(op, bus),
            },
        }

        self.incr_r(1);

        // A prefix byte keeps the modifier armed for the next call;
        // anything else consumes it.
        if op != 0xDD && op != 0xFD {
            self.modifier = None;
        }
    }

    fn check_nmi(&mut self, bus: &mut impl Bus) {
        if !self.nmi_pending || self.int_lock {
            return;
        }

        self.nmi_pending = false;
        if self.regs.halted {
            // Resume at the instruction after HALT.
            self.regs.pc = self.regs.pc.wrapping_add(1);
            self.regs.halted = false;
        }
        // IFF2 keeps the pre-NMI interrupt enable for RETN.
        self.regs.iff1 = false;

        let pc = self.regs.pc;
        self.push16(bus, pc);
        self.regs.pc = 0x0066;

        self.incr_r(2);
        self.clock.advance(11);
    }

    fn check_int(&mut self, bus: &mut impl Bus) {
        if !self.int_pending || self.int_lock {
            return;
        }

        // The line is level-sampled once per boundary: pending state is
        // consumed whether or not the interrupt is taken.
        self.int_pending = false;

        if !self.regs.iff1 {
            return;
        }

        if self.regs.halted {
            // Resume at the instruction after HALT.
            self.regs.pc = self.regs.pc.wrapping_add(1);
            self.regs.halted = false;
        }
        self.regs.iff1 = false;
        self.regs.iff2 = false;

        let pc = self.regs.pc;
        match self.regs.im {
            // Mode 0 should execute the opcode found on the data bus;
            // with an idle bus (0xFF = RST 38) that collapses to mode 1,
            // which is what we implement.
            0 | 1 => {
                self.incr_r(2);
                self.push16(bus, pc);
                self.regs.pc = 0x0038;
                self.clock.advance(13);
            }
            _ => {
                self.incr_r(2);
                self.push16(bus, pc);
                let vector = (u16::from(self.regs.i) << 8) | u16::from(self.data_bus);
                self.regs.pc = self.read16(bus, vector);
                self.clock.advance(19);
            }
        }
    }

    // =====================================================================
    // Memory access helpers
    // =====================================================================

    pub(crate) fn fetch(&mut self, bus: &mut impl Bus) -> u8 {
        let byte = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        byte
    }

    pub(crate) fn fetch16(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.fetch(bus);
        let hi = self.fetch(bus);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    pub(crate) fn read16(&mut self, bus: &mut impl Bus, addr: u16) -> u16 {
        let lo = bus.read(addr);
        let hi = bus.read(addr.wrapping_add(1));
        u16::from(lo) | (u16::from(hi) << 8)
    }

    pub(crate) fn write16(&mut self, bus: &mut impl Bus, addr: u16, value: u16) {
        bus.write(addr, value as u8);
        bus.write(addr.wrapping_add(1), (value >> 8) as u8);
    }

    pub(crate) fn push16(&mut self, bus: &mut impl Bus, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        let sp = self.regs.sp;
        self.write16(bus, sp, value);
    }

    pub(crate) fn pop16(&mut self, bus: &mut impl Bus) -> u16 {
        let value = self.read16(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        value
    }

    /// Advance the refresh register, preserving the sticky bit 7.
    pub(crate) fn incr_r(&mut self, amount: u8) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(amount) & 0x7F);
    }

    pub(crate) fn advance(&mut self, t: u32) {
        self.clock.advance(t);
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}
