//! Tape deck: the tape, a transport, and the sample latch.

use crate::player::Signal;
use crate::sampler::Sampler;
use crate::tape::{Level, Tape, TapeBlock};

/// The tape deck.
///
/// Owns the tape and the playback chain. While stopped, the deck remembers
/// its position as a block index; while playing, the position lives in the
/// player. `getsmp` is the per-tick entry point: it latches the EAR level
/// and executes stop / stop-48K signals.
pub struct TapeDeck {
    tape: Tape,
    /// Current block while not playing.
    cur_block: Option<usize>,
    sampler: Sampler,
    playing: bool,
    paused: bool,
    /// Affects the stop-if-48K block.
    mode48k: bool,
    /// Latched sample level.
    cur_smp: Level,
}

impl TapeDeck {
    /// A deck with a fresh empty tape. `delta_t` is the sample period in
    /// T-states.
    #[must_use]
    pub fn new(delta_t: u32, mode48k: bool) -> Self {
        Self {
            tape: Tape::new(),
            cur_block: None,
            sampler: Sampler::new(delta_t),
            playing: false,
            paused: false,
            mode48k,
            cur_smp: Level::Low,
        }
    }

    /// Insert a tape, replacing the current one and rewinding.
    pub fn insert(&mut self, tape: Tape) {
        self.stop();
        self.cur_block = tape.first();
        self.tape = tape;
    }

    /// Replace the tape with a fresh empty one.
    pub fn eject(&mut self) {
        self.insert(Tape::new());
    }

    /// The tape (for saving or inspection).
    #[must_use]
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Start or resume playback.
    pub fn play(&mut self) {
        if self.paused {
            self.paused = false;
            return;
        }

        self.sampler.init(&self.tape, self.cur_block);
        if self.sampler.is_end(&self.tape) {
            return;
        }
        self.playing = true;
    }

    /// Pause playback (the position is kept).
    pub fn pause(&mut self) {
        if self.playing {
            self.paused = true;
        }
    }

    /// Stop playback, keeping the position at the block being played.
    pub fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.paused = false;
        self.cur_block = self.sampler.cur_block();
    }

    /// Rewind to the start of the tape.
    pub fn rewind(&mut self) {
        self.stop();
        self.cur_block = self.tape.first();
    }

    /// Skip to the next block.
    pub fn next_block(&mut self) {
        self.stop();
        self.cur_block = self.cur_block.and_then(|idx| self.tape.next(idx));
    }

    /// Set 48K mode (consulted by the stop-if-48K block).
    pub fn set_48k(&mut self, mode48k: bool) {
        self.mode48k = mode48k;
    }

    /// Whether the tape is playing (even when paused).
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// The current block: playback position while playing, the stored
    /// cursor otherwise.
    #[must_use]
    pub fn cur_block(&self) -> Option<usize> {
        if self.playing {
            self.sampler.cur_block()
        } else {
            self.cur_block
        }
    }

    /// Insert a block at the current position (before the current block,
    /// or appended at the end of the tape). Used by the quick-save trap;
    /// only meaningful while stopped.
    pub fn insert_block(&mut self, block: TapeBlock) {
        match self.cur_block() {
            Some(idx) => {
                self.tape.insert_before(idx, block);
                if !self.playing {
                    // The cursor keeps naming the block it named before.
                    self.cur_block = Some(idx + 1);
                }
            }
            None => self.tape.append(block),
        }
    }

    /// Produce one EAR sample. While stopped or paused the last level is
    /// held.
    pub fn getsmp(&mut self) -> Level {
        if !self.playing || self.paused {
            return self.cur_smp;
        }

        let (lvl, sig) = self.sampler.getsmp(&self.tape);
        self.cur_smp = lvl;
        match sig {
            Some(Signal::Stop) => self.stop(),
            Some(Signal::Stop48k) => {
                if self.mode48k {
                    self.stop();
                }
            }
            None => {
                if self.sampler.is_end(&self.tape) {
                    self.stop();
                }
            }
        }

        self.cur_smp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_tape(pulses: u16) -> Tape {
        let mut tape = Tape::new();
        tape.append(TapeBlock::Tone { pulse_len: 100, num_pulses: pulses });
        tape
    }

    #[test]
    fn empty_deck_holds_low() {
        let mut deck = TapeDeck::new(79, true);
        deck.play();
        assert!(!deck.is_playing());
        assert_eq!(deck.getsmp(), Level::Low);
    }

    #[test]
    fn play_and_run_out() {
        let mut deck = TapeDeck::new(100, true);
        deck.insert(tone_tape(4));
        deck.play();
        assert!(deck.is_playing());

        // Four 100 T pulses sampled at 100 T: one transition per sample.
        for _ in 0..8 {
            let _ = deck.getsmp();
            if !deck.is_playing() {
                break;
            }
        }
        assert!(!deck.is_playing(), "deck stops at end of tape");
    }

    #[test]
    fn stop_48k_only_in_48k_mode() {
        let mut tape = Tape::new();
        tape.append(TapeBlock::Tone { pulse_len: 50, num_pulses: 1 });
        tape.append(TapeBlock::Stop48k);
        tape.append(TapeBlock::Tone { pulse_len: 50, num_pulses: 2 });

        let mut deck = TapeDeck::new(60, true);
        deck.insert(tape.clone());
        deck.play();
        let _ = deck.getsmp();
        assert!(!deck.is_playing(), "stop-if-48K stops a 48K deck");

        let mut deck = TapeDeck::new(60, false);
        deck.insert(tape);
        deck.play();
        let _ = deck.getsmp();
        assert!(deck.is_playing(), "stop-if-48K is ignored on 128K");
    }

    #[test]
    fn pause_holds_the_level() {
        let mut deck = TapeDeck::new(100, true);
        deck.insert(tone_tape(40));
        deck.play();

        let lvl = deck.getsmp();
        deck.pause();
        for _ in 0..5 {
            assert_eq!(deck.getsmp(), lvl);
        }
        deck.play(); // resume
        assert!(deck.is_playing());
    }

    #[test]
    fn insert_block_appends_at_end() {
        let mut deck = TapeDeck::new(79, true);
        deck.insert_block(TapeBlock::Data { pause_after: 1000, data: vec![0xFF, 1, 2, 0xFC] });
        assert_eq!(deck.tape().blocks.len(), 1);
        assert_eq!(deck.cur_block(), None);
    }
}
