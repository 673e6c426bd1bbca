//! I/O fabric: 16-bit port decode over the machine's peripherals.
//!
//! The bus is a short-lived view the machine assembles around each CPU
//! step; the fabric itself holds no state beyond what its parts own.
//! Decode order (first match wins): the ULA port (any address with a zero
//! low bit 0xFE pattern), the AY register ports, the 128K pager, then the
//! idle bus.

use emu_core::{Bus, Clock};
use sinclair_ula::Ula;

use crate::iorec::IoRec;
use crate::keyboard::KeyboardState;
use crate::memory::SpectrumMemory;

/// AY register port 0xFFFD (select on write, read back on read).
const AY_REG_PORT: u16 = 0xFFFD;
/// AY data write port 0xBFFD.
const AY_DATA_PORT: u16 = 0xBFFD;
/// 128K page-select port.
const PAGESEL_PORT: u16 = 0x7FFD;

/// The AY-3-8912 as seen from the bus. The chip itself lives outside the
/// core; only its register interface and its contribution to the mixed
/// audio sample cross the boundary.
pub trait AyPort {
    /// Port 0xFFFD write: select a register.
    fn reg_select(&mut self, value: u8);
    /// Port 0xBFFD write: write the selected register.
    fn reg_write(&mut self, value: u8);
    /// Port 0xFFFD read: read the selected register.
    fn reg_read(&mut self) -> u8;
    /// One mixed audio sample from the chip.
    fn sample(&mut self) -> i16 {
        0
    }
}

/// Per-instruction bus view over the machine's parts.
pub struct SpectrumBus<'a> {
    pub memory: &'a mut SpectrumMemory,
    pub ula: &'a mut Ula,
    pub keyboard: &'a KeyboardState,
    pub ay: Option<&'a mut dyn AyPort>,
    pub iorec: Option<&'a mut IoRec>,
    /// CPU clock at the start of the instruction, for the I/O journal.
    pub clock: Clock,
}

impl Bus for SpectrumBus<'_> {
    fn read(&mut self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.memory.write(addr, value);
    }

    fn io_read(&mut self, port: u16) -> u8 {
        if port & 0xFF == 0xFE {
            // Keyboard rows in bits 0-4, constant bits 5/7, EAR in bit 6.
            let keys = self.keyboard.read((port >> 8) as u8);
            let ear = if self.ula.ear { 0x40 } else { 0x00 };
            keys | 0xA0 | ear
        } else if port == AY_REG_PORT {
            match &mut self.ay {
                Some(ay) => ay.reg_read(),
                None => 0xFF,
            }
        } else {
            // No device attached: idle bus.
            0xFF
        }
    }

    fn io_write(&mut self, port: u16, value: u8) {
        if let Some(rec) = &mut self.iorec {
            rec.record(self.clock.get(), port, value);
        }

        if port & 0xFF == 0xFE {
            self.ula.border = value & 0x07;
            self.ula.spk = value & 0x10 != 0;
            self.ula.mic = value & 0x08 != 0;
        } else if port == AY_REG_PORT {
            if let Some(ay) = &mut self.ay {
                ay.reg_select(value);
            }
        } else if port == AY_DATA_PORT {
            if let Some(ay) = &mut self.ay {
                ay.reg_write(value);
            }
        } else if port == PAGESEL_PORT {
            // The fabric ignores this on non-banked models and after the
            // 48K lock has latched.
            self.memory.page_select(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Model;

    struct TestAy {
        selected: u8,
        regs: [u8; 16],
    }

    impl AyPort for TestAy {
        fn reg_select(&mut self, value: u8) {
            self.selected = value & 0x0F;
        }
        fn reg_write(&mut self, value: u8) {
            self.regs[usize::from(self.selected)] = value;
        }
        fn reg_read(&mut self) -> u8 {
            self.regs[usize::from(self.selected)]
        }
    }

    struct Parts {
        memory: SpectrumMemory,
        ula: Ula,
        keyboard: KeyboardState,
        ay: TestAy,
        iorec: IoRec,
    }

    impl Parts {
        fn new(model: Model) -> Self {
            Self {
                memory: SpectrumMemory::new(model),
                ula: Ula::new(Clock::ZERO),
                keyboard: KeyboardState::new(),
                ay: TestAy { selected: 0, regs: [0; 16] },
                iorec: IoRec::new(),
            }
        }

        fn bus(&mut self) -> SpectrumBus<'_> {
            SpectrumBus {
                memory: &mut self.memory,
                ula: &mut self.ula,
                keyboard: &self.keyboard,
                ay: Some(&mut self.ay),
                iorec: Some(&mut self.iorec),
                clock: Clock::ZERO,
            }
        }
    }

    #[test]
    fn ula_write_sets_border_speaker_mic() {
        let mut parts = Parts::new(Model::Spectrum48K);
        parts.bus().io_write(0x00FE, 0b0001_1010);

        assert_eq!(parts.ula.border, 2);
        assert!(parts.ula.spk);
        assert!(parts.ula.mic);
    }

    #[test]
    fn ula_read_composes_keys_and_ear() {
        let mut parts = Parts::new(Model::Spectrum48K);
        parts.keyboard.set_key(0, 0, true);

        let v = parts.bus().io_read(0xFEFE);
        assert_eq!(v & 0x1F, 0x1E, "pressed key reads low");
        assert_eq!(v & 0xA0, 0xA0, "constant bits");
        assert_eq!(v & 0x40, 0, "EAR low");

        parts.ula.ear = true;
        assert_eq!(parts.bus().io_read(0xFEFE) & 0x40, 0x40);
    }

    #[test]
    fn ay_ports_are_forwarded() {
        let mut parts = Parts::new(Model::Spectrum128K);
        parts.bus().io_write(0xFFFD, 0x07);
        parts.bus().io_write(0xBFFD, 0x3E);
        assert_eq!(parts.ay.regs[7], 0x3E);
        assert_eq!(parts.bus().io_read(0xFFFD), 0x3E);
    }

    #[test]
    fn pager_port_reaches_the_fabric() {
        let mut parts = Parts::new(Model::Spectrum128K);
        parts.memory.load_rom_bank(0, &vec![0x11; 0x4000]).expect("rom0");
        parts.memory.load_rom_bank(1, &vec![0x22; 0x4000]).expect("rom1");

        parts.bus().io_write(0x7FFD, 0x10);
        assert_eq!(parts.memory.page_reg(), 0x10);
        // Slot 0 now shows ROM 1.
        assert_eq!(parts.memory.read(0x0000), 0x22);
    }

    #[test]
    fn pager_port_is_dead_on_48k() {
        let mut parts = Parts::new(Model::Spectrum48K);
        parts.bus().io_write(0x7FFD, 0x07);
        assert_eq!(parts.memory.page_reg(), 0);
    }

    #[test]
    fn unattached_port_reads_idle_bus() {
        let mut parts = Parts::new(Model::Spectrum48K);
        assert_eq!(parts.bus().io_read(0x00FF), 0xFF);
        assert_eq!(parts.bus().io_read(0x1234 | 1), 0xFF);
    }

    #[test]
    fn every_write_is_journaled() {
        let mut parts = Parts::new(Model::Spectrum48K);
        parts.bus().io_write(0x00FE, 0x05);
        parts.bus().io_write(0xABCD, 0x42); // no device, still recorded

        // Two records: vlc delta + port LE + value.
        assert_eq!(
            parts.iorec.data(),
            &[0x00, 0xFE, 0x00, 0x05, 0x00, 0xCD, 0xAB, 0x42]
        );
    }
}
