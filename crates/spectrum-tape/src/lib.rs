//! In-core, editable representation of a ZX Spectrum tape, and the
//! machinery that turns it into an EAR waveform.
//!
//! The model can represent any TZX file. Playback is layered: the *player*
//! walks the block list and programs a small *tone generator* with pending
//! pulses; the *sampler* integrates the resulting pulse stream at a fixed
//! period to deliver one EAR bit per CPU sampling tick; the *deck* adds
//! transport controls on top and owns the tape.
//!
//! Blocks are addressed by index into the tape's block list: cursors carry
//! indices, never references, so the deck and the player can observe the
//! same tape without aliasing.

mod deck;
mod player;
mod sampler;
mod tape;
mod tonegen;

pub use deck::TapeDeck;
pub use player::{Player, Signal};
pub use sampler::Sampler;
pub use tape::{Level, Tape, TapeBlock};
pub use tonegen::ToneGen;
