//! Memory fabric: RAM/ROM banks behind a four-slot 16 KiB window.
//!
//! Slot 0 always maps ROM; the other three map RAM. On the 48K the RAM
//! slots are fixed; on 128K-class machines port 0x7FFD repoints slot 3,
//! selects the ROM in slot 0 and the screen bank, and bit 5 latches the
//! 48K lock until the next reset. The ZX81 variant uses 8 KiB granularity
//! and only the lower half of the address space.

use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::error::SpectrumError;

/// Memory models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Spectrum48K,
    Spectrum128K,
    Plus2,
    Plus2A,
    Plus3,
    Zx81,
}

impl Model {
    /// RAM size in bytes.
    #[must_use]
    pub const fn ram_size(self) -> usize {
        match self {
            Self::Spectrum48K => 48 * 1024,
            Self::Spectrum128K | Self::Plus2 | Self::Plus2A | Self::Plus3 => 128 * 1024,
            Self::Zx81 => 24 * 1024,
        }
    }

    /// ROM size in bytes.
    #[must_use]
    pub const fn rom_size(self) -> usize {
        match self {
            Self::Spectrum48K | Self::Zx81 => 16 * 1024,
            Self::Spectrum128K | Self::Plus2 => 32 * 1024,
            Self::Plus2A | Self::Plus3 => 64 * 1024,
        }
    }

    /// Whether port 0x7FFD bank switching exists.
    #[must_use]
    pub const fn has_banksw(self) -> bool {
        matches!(self, Self::Spectrum128K | Self::Plus2 | Self::Plus2A | Self::Plus3)
    }

    /// ROM bank size (the ZX81 pages 8 KiB).
    const fn bank_size(self) -> usize {
        match self {
            Self::Zx81 => 0x2000,
            _ => 0x4000,
        }
    }

    /// ROM image files for this model, relative to the ROM directory.
    #[must_use]
    pub const fn rom_files(self) -> &'static [&'static str] {
        match self {
            Self::Spectrum48K => &["roms/zx48.rom"],
            Self::Spectrum128K => &["roms/zx128_0.rom", "roms/zx128_1.rom"],
            Self::Plus2 => &["roms/zxp2_0.rom", "roms/zxp2_1.rom"],
            Self::Plus2A | Self::Plus3 => &["roms/zxp3_0.rom", "roms/zxp3_1.rom"],
            Self::Zx81 => &["roms/zx81.rom"],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    rom: bool,
    base: usize,
}

/// The memory fabric.
pub struct SpectrumMemory {
    model: Model,
    ram: Vec<u8>,
    rom: Vec<u8>,
    slots: [Slot; 4],
    /// Base of the bank the ULA reads the screen from.
    screen_base: usize,
    /// Last byte written to the page-select port.
    page_reg: u8,
    /// Latched 48K lock: page selects are ignored until reset.
    lock48: bool,
}

impl SpectrumMemory {
    /// A fabric for `model` with zero-filled ROM, in the reset bank layout.
    #[must_use]
    pub fn new(model: Model) -> Self {
        let mut memory = Self {
            model,
            ram: vec![0; model.ram_size()],
            rom: vec![0; model.rom_size()],
            slots: [Slot { rom: true, base: 0 }; 4],
            screen_base: 0,
            page_reg: 0,
            lock48: false,
        };
        memory.reset();
        memory
    }

    /// The model this fabric emulates.
    #[must_use]
    pub fn model(&self) -> Model {
        self.model
    }

    /// Restore the reset bank layout and release the 48K lock.
    pub fn reset(&mut self) {
        self.page_reg = 0;
        self.lock48 = false;

        match self.model {
            Model::Spectrum48K | Model::Zx81 => {
                self.slots = [
                    Slot { rom: true, base: 0 },
                    Slot { rom: false, base: 0 },
                    Slot { rom: false, base: 16 * 1024 },
                    Slot { rom: false, base: 16 * 1024 },
                ];
                // The 48K's upper slots are fixed; the ZX81 never addresses
                // past slot 1.
                if self.model == Model::Spectrum48K {
                    self.slots[3] = Slot { rom: false, base: 32 * 1024 };
                }
                self.screen_base = 0;
            }
            Model::Spectrum128K | Model::Plus2 | Model::Plus2A | Model::Plus3 => {
                self.slots = [
                    Slot { rom: true, base: 0 },
                    Slot { rom: false, base: 5 * 0x4000 },
                    Slot { rom: false, base: 2 * 0x4000 },
                    Slot { rom: false, base: 7 * 0x4000 },
                ];
                self.screen_base = 5 * 0x4000;
            }
        }
    }

    /// Read one byte.
    #[must_use]
    pub fn read(&self, addr: u16) -> u8 {
        if self.model == Model::Zx81 {
            if addr <= 0x7FFF {
                let slot = self.slots[usize::from(addr >> 14)];
                let offset = slot.base + usize::from(addr & 0x1FFF);
                if slot.rom { self.rom[offset] } else { self.ram[offset] }
            } else {
                0xFF
            }
        } else {
            let slot = self.slots[usize::from(addr >> 14)];
            let offset = slot.base + usize::from(addr & 0x3FFF);
            if slot.rom { self.rom[offset] } else { self.ram[offset] }
        }
    }

    /// Write one byte. ROM writes are silently dropped; the ZX81 accepts
    /// writes in 0x2000..=0x7FFF only.
    pub fn write(&mut self, addr: u16, value: u8) {
        if self.model == Model::Zx81 {
            if (0x2000..=0x7FFF).contains(&addr) {
                let slot = self.slots[usize::from(addr >> 14)];
                let offset = slot.base + usize::from(addr & 0x1FFF);
                if slot.rom {
                    self.rom[offset] = value;
                } else {
                    self.ram[offset] = value;
                }
            }
        } else if addr >= 0x4000 {
            let slot = self.slots[usize::from(addr >> 14)];
            self.ram[slot.base + usize::from(addr & 0x3FFF)] = value;
        }
    }

    /// Write one byte without ROM protection (snapshot restore).
    pub fn write_force(&mut self, addr: u16, value: u8) {
        let slot = self.slots[usize::from(addr >> 14)];
        let offset = slot.base + usize::from(addr & 0x3FFF);
        if slot.rom {
            self.rom[offset] = value;
        } else {
            self.ram[offset] = value;
        }
    }

    /// Read a 16-bit word, little-endian.
    #[must_use]
    pub fn read16(&self, addr: u16) -> u16 {
        u16::from(self.read(addr)) | (u16::from(self.read(addr.wrapping_add(1))) << 8)
    }

    /// Write a 16-bit word, little-endian.
    pub fn write16(&mut self, addr: u16, value: u16) {
        self.write(addr, value as u8);
        self.write(addr.wrapping_add(1), (value >> 8) as u8);
    }

    /// Service a write to the 128K page-select port.
    ///
    /// Bits 0-2 pick the RAM bank in slot 3, bit 4 the ROM in slot 0 and
    /// bit 3 the screen bank (RAM 5 or RAM 7). Once bit 5 has been seen
    /// the register locks until reset.
    pub fn page_select(&mut self, value: u8) {
        if !self.model.has_banksw() || self.lock48 {
            return;
        }

        self.page_reg = value;
        self.slots[3].base = usize::from(value & 0x07) * 0x4000;
        self.slots[0].base = if value & 0x10 != 0 { 0x4000 } else { 0 };
        self.screen_base = if value & 0x08 != 0 { 7 * 0x4000 } else { 5 * 0x4000 };

        if value & 0x20 != 0 {
            warn!("48K lock latched; page select disabled until reset");
            self.lock48 = true;
        }
    }

    /// Last value written to the page-select port.
    #[must_use]
    pub fn page_reg(&self) -> u8 {
        self.page_reg
    }

    /// Whether the 48K lock has latched.
    #[must_use]
    pub fn locked_48k(&self) -> bool {
        self.lock48
    }

    /// The screen bank the ULA paints from (pixels + attributes).
    #[must_use]
    pub fn screen(&self) -> &[u8] {
        &self.ram[self.screen_base..self.screen_base + 0x1B00]
    }

    /// Copy a ROM image into the given bank.
    pub fn load_rom_bank(&mut self, bank: usize, data: &[u8]) -> Result<(), SpectrumError> {
        let size = self.model.bank_size();
        if data.len() != size {
            return Err(SpectrumError::Malformed(format!(
                "ROM bank must be {size} bytes, got {}",
                data.len()
            )));
        }
        let start = bank * size;
        if start + size > self.rom.len() {
            return Err(SpectrumError::Malformed(format!(
                "ROM bank {bank} out of range for this model"
            )));
        }
        self.rom[start..start + size].copy_from_slice(data);
        Ok(())
    }

    /// Load every ROM file for the model from `base_dir`.
    ///
    /// All files are read before any bank is touched, so a missing or
    /// short file leaves the fabric unchanged.
    pub fn load_roms(&mut self, base_dir: &Path) -> Result<(), SpectrumError> {
        let mut images = Vec::new();
        for name in self.model.rom_files() {
            let path = base_dir.join(name);
            debug!("loading ROM image {}", path.display());
            images.push(fs::read(&path)?);
        }
        for (bank, image) in images.iter().enumerate() {
            self.load_rom_bank(bank, image)?;
        }
        Ok(())
    }

    /// Direct access to a 16 KiB RAM bank (snapshot transfer).
    #[must_use]
    pub fn ram_bank(&self, bank: usize) -> &[u8] {
        &self.ram[bank * 0x4000..(bank + 1) * 0x4000]
    }

    /// Mutable access to a 16 KiB RAM bank (snapshot transfer).
    pub fn ram_bank_mut(&mut self, bank: usize) -> &mut [u8] {
        &mut self.ram[bank * 0x4000..(bank + 1) * 0x4000]
    }

    /// The full RAM image.
    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Replace the full RAM image; the length must match the model.
    pub fn set_ram(&mut self, data: &[u8]) -> Result<(), SpectrumError> {
        if data.len() != self.ram.len() {
            return Err(SpectrumError::Malformed(format!(
                "RAM image must be {} bytes, got {}",
                self.ram.len(),
                data.len()
            )));
        }
        self.ram.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_is_write_protected() {
        let mut mem = SpectrumMemory::new(Model::Spectrum48K);
        let rom: Vec<u8> = (0..0x4000).map(|i| i as u8).collect();
        mem.load_rom_bank(0, &rom).expect("rom");

        mem.write(0x0010, 0xAA);
        assert_eq!(mem.read(0x0010), 0x10);
    }

    #[test]
    fn fixed_48k_layout() {
        let mut mem = SpectrumMemory::new(Model::Spectrum48K);
        mem.write(0x4000, 1);
        mem.write(0x8000, 2);
        mem.write(0xC000, 3);
        assert_eq!(mem.ram()[0], 1);
        assert_eq!(mem.ram()[16 * 1024], 2);
        assert_eq!(mem.ram()[32 * 1024], 3);

        // Page selects do nothing on 48K.
        mem.page_select(0x07);
        assert_eq!(mem.read(0xC000), 3);
    }

    #[test]
    fn page_select_switches_ram_rom_and_screen() {
        let mut mem = SpectrumMemory::new(Model::Spectrum128K);
        let rom0 = vec![0x11; 0x4000];
        let rom1 = vec![0x22; 0x4000];
        mem.load_rom_bank(0, &rom0).expect("rom0");
        mem.load_rom_bank(1, &rom1).expect("rom1");

        // Reset layout: slot 3 = bank 7.
        mem.write(0xC000, 0x77);
        assert_eq!(mem.ram_bank(7)[0], 0x77);

        // Select RAM bank 1, ROM 1, shadow screen.
        mem.page_select(0x19);
        mem.write(0xC000, 0x99);
        assert_eq!(mem.ram_bank(1)[0], 0x99);
        assert_eq!(mem.read(0x0000), 0x22);
        // Screen bank follows bit 3.
        mem.ram_bank_mut(7)[0] = 0x42;
        assert_eq!(mem.screen()[0], 0x42);
    }

    #[test]
    fn bank_contents_visible_through_window() {
        let mut mem = SpectrumMemory::new(Model::Spectrum128K);
        for bank in 0..8u8 {
            mem.ram_bank_mut(usize::from(bank)).fill(bank);
        }
        for bank in 0..8u8 {
            mem.page_select(bank);
            for k in [0u16, 0x1234, 0x3FFF] {
                assert_eq!(mem.read(0xC000 + k), bank);
            }
        }
    }

    #[test]
    fn lock48_latches_until_reset() {
        let mut mem = SpectrumMemory::new(Model::Spectrum128K);
        mem.page_select(0x21); // bank 1 + lock
        assert!(mem.locked_48k());
        assert_eq!(mem.page_reg(), 0x21);

        // Further selects are ignored.
        mem.page_select(0x03);
        assert_eq!(mem.page_reg(), 0x21);
        mem.write(0xC000, 0xAB);
        assert_eq!(mem.ram_bank(1)[0], 0xAB);

        mem.reset();
        assert!(!mem.locked_48k());
        mem.page_select(0x03);
        assert_eq!(mem.page_reg(), 0x03);
    }

    #[test]
    fn zx81_address_space() {
        let mut mem = SpectrumMemory::new(Model::Zx81);
        // Above 0x7FFF reads idle bus.
        assert_eq!(mem.read(0x8000), 0xFF);
        assert_eq!(mem.read(0xFFFF), 0xFF);

        // Below 0x2000 is protected.
        mem.write(0x0100, 0x55);
        assert_eq!(mem.read(0x0100), 0x00);

        // 8 KiB granularity: 0x4000 and 0x6000 are separate pages in the
        // same slot... the mask folds them onto the same byte.
        mem.write(0x4000, 0x12);
        assert_eq!(mem.read(0x6000), 0x12);
    }

    #[test]
    fn missing_rom_file_leaves_state_untouched() {
        let mut mem = SpectrumMemory::new(Model::Spectrum48K);
        let rom: Vec<u8> = vec![0x5A; 0x4000];
        mem.load_rom_bank(0, &rom).expect("rom");

        let err = mem.load_roms(Path::new("/nonexistent-rom-dir"));
        assert!(matches!(err, Err(SpectrumError::Io(_))));
        assert_eq!(mem.read(0x0000), 0x5A);
    }

    #[test]
    fn wrong_rom_size_is_malformed() {
        let mut mem = SpectrumMemory::new(Model::Spectrum48K);
        let err = mem.load_rom_bank(0, &[0u8; 100]);
        assert!(matches!(err, Err(SpectrumError::Malformed(_))));
    }
}
