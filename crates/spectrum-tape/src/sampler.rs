//! Tape sampler: integrates the player's pulse stream at a fixed period.

use crate::player::{Player, Signal};
use crate::tape::{Level, Tape};

/// The tape sampler.
///
/// Each [`Sampler::getsmp`] call advances emulated time by the sample
/// period and returns the EAR level at the end of it. Pulses shorter than
/// the period collapse into instant transitions; the last one within the
/// interval wins. The output sequence is a function only of the tape, the
/// period and the initial level.
pub struct Sampler {
    player: Player,
    /// Sample period in T-states.
    delta_t: u32,
    /// Level at the last sample.
    cur_lvl: Level,
    /// T-states until the next transition.
    next_delay: u32,
    /// Level after the next transition.
    next_lvl: Level,
}

impl Sampler {
    #[must_use]
    pub fn new(delta_t: u32) -> Self {
        Self {
            player: Player::new(),
            delta_t,
            cur_lvl: Level::Low,
            next_delay: 0,
            next_lvl: Level::Low,
        }
    }

    /// Re-initialize at the start of playback or after a position change.
    pub fn init(&mut self, tape: &Tape, block: Option<usize>) {
        self.player.init(block);
        self.cur_lvl = self.player.cur_lvl();
        if !self.player.is_end(tape) {
            let (delay, lvl, _) = self.player.get_next(tape);
            self.next_delay = delay;
            self.next_lvl = lvl;
        }
    }

    /// True iff the tape has run out and no transition is due within a
    /// sample period.
    pub fn is_end(&mut self, tape: &Tape) -> bool {
        self.player.is_end(tape) && self.next_delay < self.delta_t
    }

    /// The block being played.
    #[must_use]
    pub fn cur_block(&self) -> Option<usize> {
        self.player.cur_block()
    }

    /// Deliver one sample: the EAR bit after one period, plus any signal
    /// the player raised within it.
    pub fn getsmp(&mut self, tape: &Tape) -> (Level, Option<Signal>) {
        let mut td = self.delta_t;
        let mut sig = None;

        while self.next_delay <= td && !self.player.is_end(tape) && sig.is_none() {
            td -= self.next_delay;
            self.cur_lvl = self.next_lvl;
            let (delay, lvl, s) = self.player.get_next(tape);
            self.next_delay = delay;
            self.next_lvl = lvl;
            sig = s;
        }

        if self.next_delay > td {
            self.next_delay -= td;
        }

        (self.cur_lvl, sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::TapeBlock;

    #[test]
    fn direct_recording_one_bit_per_sample() {
        let mut tape = Tape::new();
        tape.append(TapeBlock::DirectRec {
            smp_dur: 79,
            pause_after: 0,
            lb_bits: 8,
            data: vec![0xFF, 0x00],
        });

        let mut sampler = Sampler::new(79);
        sampler.init(&tape, tape.first());

        let mut bits = Vec::new();
        for _ in 0..16 {
            let (lvl, sig) = sampler.getsmp(&tape);
            assert_eq!(sig, None);
            bits.push(lvl.bit());
        }
        assert_eq!(bits, [1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(sampler.is_end(&tape));
    }

    #[test]
    fn short_pulses_collapse_last_one_wins() {
        let mut tape = Tape::new();
        // Three 10 T pulses inside a single 100 T sample period: the level
        // after the third transition (high) is what the sample reports.
        tape.append(TapeBlock::Pulses { pulse_len: vec![10, 10, 10] });

        let mut sampler = Sampler::new(100);
        sampler.init(&tape, tape.first());

        let (lvl, _) = sampler.getsmp(&tape);
        assert_eq!(lvl, Level::High);
        assert!(sampler.is_end(&tape));
    }

    #[test]
    fn sampler_is_deterministic() {
        let mut tape = Tape::new();
        tape.append(TapeBlock::Tone { pulse_len: 123, num_pulses: 9 });
        tape.append(TapeBlock::Pause { pause_len: 1 });
        tape.append(TapeBlock::PureData {
            zero_len: 81,
            one_len: 162,
            lb_bits: 8,
            pause_after: 0,
            data: vec![0xA5, 0x3C],
        });

        let run = |tape: &Tape| {
            let mut sampler = Sampler::new(79);
            sampler.init(tape, tape.first());
            let mut bits = Vec::new();
            while !sampler.is_end(tape) {
                bits.push(sampler.getsmp(tape).0.bit());
            }
            bits
        };

        assert_eq!(run(&tape), run(&tape));
    }

    #[test]
    fn stop_signal_reaches_the_caller() {
        let mut tape = Tape::new();
        tape.append(TapeBlock::Tone { pulse_len: 50, num_pulses: 1 });
        tape.append(TapeBlock::Stop);

        let mut sampler = Sampler::new(79);
        sampler.init(&tape, tape.first());

        let (lvl, sig) = sampler.getsmp(&tape);
        assert_eq!(lvl, Level::High);
        assert_eq!(sig, Some(Signal::Stop));
    }
}
