//! Top-level Spectrum machine and its cooperative schedule.
//!
//! One T-state clock, owned by the CPU, drives everything. Per
//! instruction: the video catches up to the CPU clock (raising the 50 Hz
//! interrupt at field boundaries), a mixed audio sample fires every
//! [`ZX_SOUND_TICKS_SMP`] T, a tape sample every [`ZX_TAPE_TICKS_SMP`] T
//! (latched into the ULA's EAR bit), the quick tape traps get a look at
//! PC, and then the CPU executes one instruction.

use std::fs;
use std::path::Path;

use emu_core::Clock;
use log::{debug, info};
use sinclair_ula::{ULA_FIELD_TICKS, Ula};
use spectrum_tape::{Level, Tape, TapeDeck};
use zilog_z80::Z80;

use crate::bus::{AyPort, SpectrumBus};
use crate::error::SpectrumError;
use crate::iorec::IoRec;
use crate::keyboard::KeyboardState;
use crate::memory::{Model, SpectrumMemory};
use crate::quick::{self, TAPE_LDBYTES_TRAP, TAPE_SABYTES_TRAP};
use crate::state::MachineState;

/// CPU clock rate.
pub const Z80_CLOCK_HZ: u32 = 3_500_000;

/// T-states per audio sample (≈28 kHz).
pub const ZX_SOUND_TICKS_SMP: u32 = 125;

/// T-states per tape sample (≈44.1 kHz).
pub const ZX_TAPE_TICKS_SMP: u32 = 79;

/// Speaker contribution to a mixed sample.
const SPEAKER_AMP: i16 = 0x2000;
/// Tape EAR contribution to a mixed sample.
const TAPE_AMP: i16 = 0x0100;

/// The machine.
pub struct Spectrum {
    cpu: Z80,
    memory: SpectrumMemory,
    ula: Ula,
    keyboard: KeyboardState,
    tape: TapeDeck,
    ay: Option<Box<dyn AyPort>>,
    iorec: Option<IoRec>,
    /// Field boundary base for the outer loop.
    disp_base: Clock,
    /// Audio sample cadence base.
    snd_base: Clock,
    /// Tape sample cadence base.
    tape_base: Clock,
    /// Paint whole fields at once instead of chasing the beam.
    fast_video: bool,
    /// Arm the LD-BYTES / SA-BYTES traps.
    quick_tape: bool,
    /// Debugger stop address; `take_stop_hit` reports a hit.
    stop_addr: Option<u16>,
    stop_hit: bool,
    /// Latched tape sample.
    tape_smp: Level,
    audio: Vec<i16>,
}

impl Spectrum {
    /// A machine of the given model with blank ROM.
    #[must_use]
    pub fn new(model: Model) -> Self {
        let cpu = Z80::new();
        let clock = cpu.clock();
        Self {
            cpu,
            memory: SpectrumMemory::new(model),
            ula: Ula::new(clock),
            keyboard: KeyboardState::new(),
            tape: TapeDeck::new(ZX_TAPE_TICKS_SMP, model == Model::Spectrum48K),
            ay: None,
            iorec: None,
            disp_base: clock,
            snd_base: clock,
            tape_base: clock,
            fast_video: true,
            quick_tape: true,
            stop_addr: None,
            stop_hit: false,
            tape_smp: Level::Low,
            audio: Vec::new(),
        }
    }

    /// Load this model's ROM images from `base_dir` (e.g. `roms/zx48.rom`).
    pub fn load_roms(&mut self, base_dir: &Path) -> Result<(), SpectrumError> {
        self.memory.load_roms(base_dir)
    }

    /// Reset CPU, pager and video; the tape deck keeps its tape.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.memory.reset();
        self.ula.reset(self.cpu.clock());
        self.ula.border = 7;
        self.disp_base = self.cpu.clock();
        self.snd_base = self.cpu.clock();
        self.tape_base = self.cpu.clock();
        info!("machine reset ({:?})", self.memory.model());
    }

    // =====================================================================
    // Scheduling
    // =====================================================================

    /// Run one instruction and everything that is checked per instruction.
    pub fn step_instruction(&mut self) {
        // 1. Video catches up with the CPU.
        while self.ula.clock().before(self.cpu.clock()) {
            let int = if self.fast_video {
                self.ula.step_fast(self.memory.screen())
            } else {
                self.ula.step(self.memory.screen())
            };
            if int {
                self.cpu.interrupt();
            }
        }

        // 2. Audio sample cadence.
        if self.cpu.clock().reached(self.snd_base, ZX_SOUND_TICKS_SMP) {
            let sample = self.mix_sample();
            self.audio.push(sample);
            self.snd_base.advance(ZX_SOUND_TICKS_SMP);
        }

        // 3. Tape sample cadence: latch the EAR bit for ULA port reads.
        if self.cpu.clock().reached(self.tape_base, ZX_TAPE_TICKS_SMP) {
            self.tape_smp = self.tape.getsmp();
            self.ula.ear = self.tape_smp == Level::High;
            self.tape_base.advance(ZX_TAPE_TICKS_SMP);
        }

        // 4. Quick tape traps at the instruction boundary.
        if self.quick_tape && !self.tape.is_playing() {
            if self.cpu.regs.pc == TAPE_LDBYTES_TRAP {
                debug!("LD-BYTES trap at {:#06x}", self.cpu.regs.pc);
                quick::ldbytes(&mut self.cpu, &mut self.memory, &mut self.tape);
            } else if self.cpu.regs.pc == TAPE_SABYTES_TRAP {
                debug!("SA-BYTES trap at {:#06x}", self.cpu.regs.pc);
                quick::sabytes(&mut self.cpu, &mut self.memory, &mut self.tape);
            }
        }

        // 5. Debugger stop address.
        if let Some(stop) = self.stop_addr
            && self.cpu.regs.pc == stop
        {
            self.stop_hit = true;
        }

        // 6. One CPU instruction.
        let ay: Option<&mut dyn AyPort> = match &mut self.ay {
            Some(ay) => Some(&mut **ay),
            None => None,
        };
        let mut bus = SpectrumBus {
            memory: &mut self.memory,
            ula: &mut self.ula,
            keyboard: &self.keyboard,
            ay,
            iorec: self.iorec.as_mut(),
            clock: self.cpu.clock(),
        };
        self.cpu.step(&mut bus);
    }

    /// One instruction for a debugger: returns `true` when the boundary
    /// reached is a sensible place to stop (stepping lands between a
    /// DD/FD prefix and its instruction otherwise).
    pub fn step_debug(&mut self) -> bool {
        self.step_instruction();
        !self.cpu.mid_prefix()
    }

    /// Run instructions until the next 1/50 s field boundary.
    ///
    /// The caller presents the framebuffer and polls input between calls.
    pub fn run_field(&mut self) {
        while !self.cpu.clock().reached(self.disp_base, ULA_FIELD_TICKS) {
            self.step_instruction();
        }
        self.disp_base.advance(ULA_FIELD_TICKS);
    }

    /// One mixed audio sample: AY plus speaker plus tape EAR.
    fn mix_sample(&mut self) -> i16 {
        let ay = self.ay.as_deref_mut().map_or(0, AyPort::sample);
        let spk = if self.ula.spk { SPEAKER_AMP } else { -SPEAKER_AMP };
        let tape = if self.tape_smp == Level::High { TAPE_AMP } else { -TAPE_AMP };
        ay.saturating_add(spk).saturating_add(tape)
    }

    // =====================================================================
    // Accessors
    // =====================================================================

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn memory(&self) -> &SpectrumMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut SpectrumMemory {
        &mut self.memory
    }

    #[must_use]
    pub fn ula(&self) -> &Ula {
        &self.ula
    }

    pub fn keyboard_mut(&mut self) -> &mut KeyboardState {
        &mut self.keyboard
    }

    #[must_use]
    pub fn tape(&self) -> &TapeDeck {
        &self.tape
    }

    pub fn tape_mut(&mut self) -> &mut TapeDeck {
        &mut self.tape
    }

    /// Attach an AY chip (128K-class machines).
    pub fn attach_ay(&mut self, ay: Box<dyn AyPort>) {
        self.ay = Some(ay);
    }

    /// Start recording I/O writes.
    pub fn start_iorec(&mut self) {
        if self.iorec.is_none() {
            self.iorec = Some(IoRec::new());
        }
    }

    /// Stop recording and hand back the journal.
    pub fn take_iorec(&mut self) -> Option<IoRec> {
        self.iorec.take()
    }

    /// Choose between whole-field and beam-chasing video.
    pub fn set_fast_video(&mut self, fast: bool) {
        self.fast_video = fast;
    }

    /// Arm or disarm the quick tape traps.
    pub fn set_quick_tape(&mut self, on: bool) {
        self.quick_tape = on;
    }

    /// Arm a debugger stop address.
    pub fn set_stop_addr(&mut self, addr: Option<u16>) {
        self.stop_addr = addr;
    }

    /// Whether the stop address was hit since the last call.
    pub fn take_stop_hit(&mut self) -> bool {
        std::mem::take(&mut self.stop_hit)
    }

    /// Drain the mixed audio buffer.
    pub fn take_audio(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.audio)
    }

    // =====================================================================
    // Tape files
    // =====================================================================

    /// Load a tape file into the deck, dispatching on the extension
    /// (`.tap` or `.tzx`).
    pub fn open_tape(&mut self, path: &Path) -> Result<(), SpectrumError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                SpectrumError::Unsupported("tape file has no extension".to_string())
            })?;

        let data = fs::read(path)?;
        let tape = match ext.as_str() {
            "tap" => format_spectrum_tap::load(&data).map_err(SpectrumError::Malformed)?,
            "tzx" => format_tzx::load(&data).map_err(SpectrumError::Malformed)?,
            other => {
                return Err(SpectrumError::Unsupported(format!(
                    "unknown tape extension '{other}'"
                )));
            }
        };

        info!("tape loaded: {} blocks", tape.blocks.len());
        self.tape.insert(tape);
        Ok(())
    }

    /// Save the deck's tape, dispatching on the extension.
    pub fn save_tape(&self, path: &Path) -> Result<(), SpectrumError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                SpectrumError::Unsupported("tape file has no extension".to_string())
            })?;

        let bytes = match ext.as_str() {
            "tap" => {
                format_spectrum_tap::save(self.tape.tape()).map_err(SpectrumError::Unsupported)?
            }
            "tzx" => format_tzx::save(self.tape.tape()),
            other => {
                return Err(SpectrumError::Unsupported(format!(
                    "unknown tape extension '{other}'"
                )));
            }
        };

        fs::write(path, bytes)?;
        Ok(())
    }

    /// Insert an already-parsed tape.
    pub fn insert_tape(&mut self, tape: Tape) {
        self.tape.insert(tape);
    }

    // =====================================================================
    // Snapshot contract
    // =====================================================================

    /// Apply a restored machine state. Validation first; on error nothing
    /// changes.
    pub fn apply_state(&mut self, state: &MachineState) -> Result<(), SpectrumError> {
        state.validate(self.memory.model().ram_size())?;

        self.memory.reset();
        self.memory.set_ram(&state.ram)?;
        if self.memory.model().has_banksw() {
            self.memory.page_select(state.page_reg);
        }
        self.cpu.regs = state.regs;
        self.ula.border = state.border & 7;
        Ok(())
    }

    /// Capture the machine state in snapshot form.
    #[must_use]
    pub fn capture_state(&self) -> MachineState {
        MachineState {
            regs: self.cpu.regs,
            border: self.ula.border,
            page_reg: self.memory.page_reg(),
            ram: self.memory.ram().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zilog_z80::Registers;

    fn machine_48k() -> Spectrum {
        Spectrum::new(Model::Spectrum48K)
    }

    /// Poke a program into RAM and point PC at it.
    fn load_program(spectrum: &mut Spectrum, org: u16, code: &[u8]) {
        for (i, &byte) in code.iter().enumerate() {
            spectrum.memory_mut().write(org + i as u16, byte);
        }
        spectrum.cpu_mut().regs.pc = org;
    }

    #[test]
    fn ld_then_halt() {
        let mut spectrum = machine_48k();
        // LD A,0x42 ; HALT
        load_program(&mut spectrum, 0x8000, &[0x3E, 0x42, 0x76]);

        spectrum.step_instruction();
        spectrum.step_instruction();

        let cpu = spectrum.cpu();
        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(cpu.regs.pc, 0x8002, "PC rests on the HALT byte");
        assert!(cpu.regs.halted);
        assert_eq!(cpu.clock().get(), 11);
    }

    #[test]
    fn field_interrupt_wakes_halted_cpu() {
        let mut spectrum = machine_48k();
        // EI ; HALT at 0x8000. The 50 Hz interrupt must wake the CPU and
        // push the address after HALT.
        load_program(&mut spectrum, 0x8000, &[0xFB, 0x76]);
        spectrum.cpu_mut().regs.sp = 0xFF00;

        spectrum.run_field();
        // By the end of the field the interrupt has been taken: PC is in
        // the ROM ISR path (0x0038), and the stacked PC is after HALT.
        assert!(!spectrum.cpu().regs.halted);
        let stacked = spectrum.memory().read16(0xFEFE);
        assert_eq!(stacked, 0x8002);
    }

    #[test]
    fn sound_and_tape_cadence() {
        let mut spectrum = machine_48k();
        // A field's worth of NOPs produces 70000/125 sound samples and
        // 70000/79 tape samples (within one sample of rounding).
        spectrum.run_field();

        let audio = spectrum.take_audio();
        let expected = ULA_FIELD_TICKS / ZX_SOUND_TICKS_SMP;
        let got = audio.len() as u32;
        assert!(
            got.abs_diff(expected) <= 1,
            "expected ~{expected} samples, got {got}"
        );
    }

    #[test]
    fn run_field_advances_one_field() {
        let mut spectrum = machine_48k();
        spectrum.run_field();
        let t = spectrum.cpu().clock().get();
        // Instruction boundaries overshoot by at most one instruction.
        assert!((70_000..70_030).contains(&t), "one field is ~70000 T, got {t}");
    }

    #[test]
    fn snapshot_round_trip() {
        let mut spectrum = machine_48k();
        load_program(&mut spectrum, 0x8000, &[0x3E, 0x42, 0x76]);
        spectrum.step_instruction();

        let state = spectrum.capture_state();
        let mut restored = machine_48k();
        restored.apply_state(&state).expect("apply");

        assert_eq!(restored.cpu().regs.a, 0x42);
        assert_eq!(restored.cpu().regs.pc, 0x8002);
        assert_eq!(restored.memory().read(0x8000), 0x3E);
    }

    #[test]
    fn snapshot_rejects_impossible_interrupt_mode() {
        let mut spectrum = machine_48k();
        let state = MachineState {
            regs: Registers { im: 3, ..Registers::default() },
            border: 0,
            page_reg: 0,
            ram: vec![0; Model::Spectrum48K.ram_size()],
        };
        assert!(matches!(
            spectrum.apply_state(&state),
            Err(SpectrumError::Malformed(_))
        ));
    }

    #[test]
    fn snapshot_rejects_wrong_ram_size() {
        let mut spectrum = machine_48k();
        let state = MachineState {
            regs: Registers::default(),
            border: 0,
            page_reg: 0,
            ram: vec![0; 1024],
        };
        assert!(spectrum.apply_state(&state).is_err());
        // Prior state untouched.
        assert_eq!(spectrum.cpu().regs.pc, 0);
    }

    #[test]
    fn snapshot_restores_128k_pager() {
        let mut spectrum = Spectrum::new(Model::Spectrum128K);
        let mut state = spectrum.capture_state();
        state.page_reg = 0x11; // RAM bank 1, ROM 1
        state.ram[0x4000] = 0xAB; // bank 1, first byte

        spectrum.apply_state(&state).expect("apply");
        assert_eq!(spectrum.memory().read(0xC000), 0xAB);
    }

    #[test]
    fn stop_address_reports_once() {
        let mut spectrum = machine_48k();
        load_program(&mut spectrum, 0x8000, &[0x00, 0x00, 0x00]);
        spectrum.set_stop_addr(Some(0x8001));

        spectrum.step_instruction();
        spectrum.step_instruction();
        assert!(spectrum.take_stop_hit());
        assert!(!spectrum.take_stop_hit());
    }
}
