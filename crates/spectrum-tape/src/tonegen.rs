//! Tape tone generator.
//!
//! Produces a waveform from a short program of tones: each entry is either
//! a run of equal pulses (every pulse flips the level) or a direct pulse
//! that forces a specific level for a duration. The player refills the
//! program block by block; eleven entries is enough for the longest
//! refill (eight data bits plus lead-in).

use crate::tape::Level;

/// Maximum number of programmed entries.
const MAX_TONES: usize = 11;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    pulse_len: u32,
    num_pulses: u32,
    /// Level is forced for this entry instead of toggling.
    direct: Option<Level>,
}

/// The tone generator.
#[derive(Debug, Clone)]
pub struct ToneGen {
    tones: [Entry; MAX_TONES],
    num_tones: usize,
    /// Next entry to start.
    tidx: usize,
    /// Current output level.
    cur_lvl: Level,
    /// Pulse length of the active entry.
    cur_pulse_len: u32,
    /// Remaining pulses of the active entry.
    rem_pulses: u32,
    /// Active entry forces this level.
    cur_direct: Option<Level>,
    /// Last programmed level.
    plast_lvl: Level,
    /// Programmed level just before the last one.
    pprev_lvl: Level,
}

impl ToneGen {
    /// A tone generator resting at `lvl` with an empty program.
    #[must_use]
    pub fn new(lvl: Level) -> Self {
        Self {
            tones: [Entry::default(); MAX_TONES],
            num_tones: 0,
            tidx: 0,
            cur_lvl: lvl,
            cur_pulse_len: 0,
            rem_pulses: 0,
            cur_direct: None,
            plast_lvl: lvl,
            pprev_lvl: lvl,
        }
    }

    /// Drop the remaining program, keeping the output level and the
    /// programmed-level history. Only valid once the program has drained.
    pub fn clear(&mut self) {
        debug_assert!(self.is_end());
        self.num_tones = 0;
        self.tidx = 0;
    }

    /// Program `num_pulses` pulses of `pulse_len` T each; every pulse
    /// toggles the level.
    pub fn add_tone(&mut self, pulse_len: u32, num_pulses: u32) {
        debug_assert!(self.num_tones < MAX_TONES);
        self.tones[self.num_tones] =
            Entry { pulse_len, num_pulses, direct: None };
        self.num_tones += 1;

        // Track what the waveform will have looked like once this entry
        // has played, for the pause edge rule.
        if num_pulses == 1 {
            self.pprev_lvl = self.plast_lvl;
            self.plast_lvl = !self.plast_lvl;
        } else if num_pulses > 1 {
            if num_pulses % 2 == 1 {
                self.plast_lvl = !self.plast_lvl;
            }
            self.pprev_lvl = !self.plast_lvl;
        }
    }

    /// Program one direct pulse: the level is forced to `lvl` for
    /// `pulse_len` T.
    pub fn add_dpulse(&mut self, lvl: Level, pulse_len: u32) {
        debug_assert!(self.num_tones < MAX_TONES);
        self.tones[self.num_tones] =
            Entry { pulse_len, num_pulses: 1, direct: Some(lvl) };
        self.num_tones += 1;

        self.pprev_lvl = self.plast_lvl;
        self.plast_lvl = lvl;
    }

    /// True iff the program has fully drained.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.rem_pulses == 0 && self.tidx == self.num_tones
    }

    /// Current output level.
    #[must_use]
    pub fn cur_lvl(&self) -> Level {
        self.cur_lvl
    }

    /// Last programmed level.
    #[must_use]
    pub fn plast_lvl(&self) -> Level {
        self.plast_lvl
    }

    /// Programmed level preceding the last one.
    #[must_use]
    pub fn pprev_lvl(&self) -> Level {
        self.pprev_lvl
    }

    /// Produce the next waveform event: the delay from the previous event
    /// and the level after it. Entries with a zero pulse count are skipped.
    ///
    /// Must not be called when [`ToneGen::is_end`] is true.
    pub fn get_next(&mut self) -> (u32, Level) {
        while self.rem_pulses == 0 {
            debug_assert!(self.tidx < self.num_tones);
            let entry = self.tones[self.tidx];
            self.rem_pulses = entry.num_pulses;
            self.cur_pulse_len = entry.pulse_len;
            self.cur_direct = entry.direct;
            self.tidx += 1;
        }

        let lvl = match self.cur_direct {
            Some(direct) => direct,
            None => !self.cur_lvl,
        };
        self.cur_lvl = lvl;
        self.rem_pulses -= 1;

        (self.cur_pulse_len, lvl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_toggles_per_pulse() {
        let mut tg = ToneGen::new(Level::Low);
        tg.add_tone(100, 3);

        assert!(!tg.is_end());
        assert_eq!(tg.get_next(), (100, Level::High));
        assert_eq!(tg.get_next(), (100, Level::Low));
        assert_eq!(tg.get_next(), (100, Level::High));
        assert!(tg.is_end());
        assert_eq!(tg.cur_lvl(), Level::High);
    }

    #[test]
    fn zero_count_entries_are_skipped() {
        let mut tg = ToneGen::new(Level::Low);
        tg.add_tone(50, 0);
        tg.add_tone(70, 1);

        assert_eq!(tg.get_next(), (70, Level::High));
        assert!(tg.is_end());
    }

    #[test]
    fn direct_pulse_forces_level() {
        let mut tg = ToneGen::new(Level::Low);
        tg.add_dpulse(Level::High, 79);
        tg.add_dpulse(Level::High, 79);
        tg.add_dpulse(Level::Low, 79);

        assert_eq!(tg.get_next(), (79, Level::High));
        assert_eq!(tg.get_next(), (79, Level::High));
        assert_eq!(tg.get_next(), (79, Level::Low));
        assert!(tg.is_end());
    }

    #[test]
    fn programmed_level_history() {
        let mut tg = ToneGen::new(Level::Low);
        // One pulse: low -> high. Rising edge.
        tg.add_tone(855, 1);
        assert_eq!(tg.pprev_lvl(), Level::Low);
        assert_eq!(tg.plast_lvl(), Level::High);

        // Even pulse count leaves the level; previous is its complement.
        let mut tg = ToneGen::new(Level::Low);
        tg.add_tone(855, 2);
        assert_eq!(tg.pprev_lvl(), Level::High);
        assert_eq!(tg.plast_lvl(), Level::Low);
    }

    #[test]
    fn clear_keeps_level_and_history() {
        let mut tg = ToneGen::new(Level::Low);
        tg.add_tone(100, 1);
        let _ = tg.get_next();
        assert!(tg.is_end());

        tg.clear();
        assert_eq!(tg.cur_lvl(), Level::High);
        assert_eq!(tg.plast_lvl(), Level::High);
        assert!(tg.is_end());
    }
}
