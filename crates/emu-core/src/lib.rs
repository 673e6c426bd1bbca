//! Core types shared by the emulation crates.
//!
//! Everything counts time in T-states of the 3.5 MHz CPU clock. The clock
//! wraps; consumers compare by subtraction and re-align their bases every
//! field, so differences never approach half the counter range.

mod bus;
mod clock;

pub use bus::Bus;
pub use clock::Clock;
