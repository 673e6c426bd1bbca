//! ZX Spectrum machine.
//!
//! Everything above the chips: the memory fabric with 48K/128K/+2/+2A/+3
//! and ZX81 banking, the I/O port fabric, the keyboard matrix, the I/O
//! write recorder, the quick tape load/save traps, the snapshot state
//! contract, and the [`Spectrum`] aggregate that schedules CPU, video,
//! sound and tape from a single T-state clock.

mod bus;
mod error;
mod iorec;
mod keyboard;
mod memory;
pub mod quick;
mod spectrum;
mod state;

pub use bus::{AyPort, SpectrumBus};
pub use error::SpectrumError;
pub use iorec::IoRec;
pub use keyboard::KeyboardState;
pub use memory::{Model, SpectrumMemory};
pub use spectrum::{Spectrum, ZX_SOUND_TICKS_SMP, ZX_TAPE_TICKS_SMP, Z80_CLOCK_HZ};
pub use state::MachineState;
