//! Quick tape load/save traps.
//!
//! When quick loading is on, the machine compares PC against the ROM's
//! LD-BYTES and SA-BYTES routines at each instruction boundary and, on a
//! hit, performs the transfer directly between the tape deck and memory
//! instead of letting the Z80 chew through the waveform. The trap ends
//! with an in-place RET.
//!
//! Register conventions at the trap addresses: the requested flag byte is
//! in A', carry in F' distinguishes LOAD from VERIFY, DE holds the byte
//! count and IX the target address. Carry in F reports success.

use log::debug;
use spectrum_tape::{TapeBlock, TapeDeck};
use zilog_z80::{CF, Z80};

use crate::memory::SpectrumMemory;

/// ROM address of the LD-BYTES inner routine.
pub const TAPE_LDBYTES_TRAP: u16 = 0x056A;
/// ROM address of the SA-BYTES inner routine.
pub const TAPE_SABYTES_TRAP: u16 = 0x04D1;

/// Pause the ROM saver leaves after a block, in milliseconds.
const ROM_PAUSE_MS: u16 = 1000;

/// Service the LD-BYTES trap: feed the next standard data block on the
/// tape straight into memory (or just verify it).
pub fn ldbytes(cpu: &mut Z80, memory: &mut SpectrumMemory, deck: &mut TapeDeck) {
    if deck.is_playing() {
        return;
    }

    // Seek the next standard data block.
    loop {
        match deck.cur_block() {
            None => return,
            Some(idx) => {
                if matches!(deck.tape().blocks[idx], TapeBlock::Data { .. }) {
                    break;
                }
                deck.next_block();
            }
        }
    }
    let Some(idx) = deck.cur_block() else { return };

    let req_flag = cpu.regs.a_alt;
    let count = usize::from(cpu.regs.de());
    let addr = cpu.regs.ix;
    let verify = cpu.regs.f_alt & CF == 0;

    let ok = (|| {
        let TapeBlock::Data { data, .. } = &deck.tape().blocks[idx] else {
            return false;
        };
        let Some(&flag) = data.first() else {
            debug!("quick load: data block is empty");
            return false;
        };
        if flag != req_flag {
            debug!("quick load: flag {flag:#04x} != requested {req_flag:#04x}");
            return false;
        }

        let mut checksum = flag;
        for i in 0..count {
            let Some(&byte) = data.get(1 + i) else {
                debug!("quick load: out of data");
                return false;
            };
            if !verify {
                memory.write(addr.wrapping_add(i as u16), byte);
            }
            checksum ^= byte;
        }

        match data.get(1 + count) {
            Some(&stored) if stored == checksum => true,
            Some(&stored) => {
                debug!("quick load: checksum {stored:#04x} != computed {checksum:#04x}");
                false
            }
            None => {
                debug!("quick load: checksum missing");
                false
            }
        }
    })();

    if ok {
        cpu.regs.f |= CF;
        debug!("quick load: ok ({count} bytes to {addr:#06x})");
    } else {
        cpu.regs.f &= !CF;
    }

    deck.next_block();
    ret(cpu, memory);
}

/// Service the SA-BYTES trap: capture memory into a fresh standard data
/// block at the deck's position.
pub fn sabytes(cpu: &mut Z80, memory: &mut SpectrumMemory, deck: &mut TapeDeck) {
    let flag = cpu.regs.a_alt;
    let count = usize::from(cpu.regs.de());
    let addr = cpu.regs.ix;

    let mut data = Vec::with_capacity(count + 2);
    data.push(flag);
    let mut checksum = flag;
    for i in 0..count {
        let byte = memory.read(addr.wrapping_add(i as u16));
        data.push(byte);
        checksum ^= byte;
    }
    data.push(checksum);

    deck.insert_block(TapeBlock::Data { pause_after: ROM_PAUSE_MS, data });
    debug!("quick save: {count} bytes from {addr:#06x}");

    cpu.regs.f |= CF;
    ret(cpu, memory);
}

/// Execute an in-place RET: pop PC from the stack.
fn ret(cpu: &mut Z80, memory: &SpectrumMemory) {
    cpu.regs.pc = memory.read16(cpu.regs.sp);
    cpu.regs.sp = cpu.regs.sp.wrapping_add(2);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Model;
    use spectrum_tape::Tape;

    fn data_block(flag: u8, payload: &[u8]) -> TapeBlock {
        let mut data = vec![flag];
        data.extend_from_slice(payload);
        data.push(payload.iter().fold(flag, |x, &b| x ^ b));
        TapeBlock::Data { pause_after: 1000, data }
    }

    fn setup(payload: &[u8]) -> (Z80, SpectrumMemory, TapeDeck) {
        let mut cpu = Z80::new();
        let mut memory = SpectrumMemory::new(Model::Spectrum48K);
        let mut deck = TapeDeck::new(79, true);

        let mut tape = Tape::new();
        tape.append(data_block(0xFF, payload));
        deck.insert(tape);

        // Return address 0x8000 on the stack at 0xFF00.
        cpu.regs.sp = 0xFF00;
        memory.write16(0xFF00, 0x8000);

        cpu.regs.a_alt = 0xFF;
        cpu.regs.f_alt = CF; // LOAD (carry set)
        cpu.regs.set_de(payload.len() as u16);
        cpu.regs.ix = 0x9000;
        cpu.regs.pc = TAPE_LDBYTES_TRAP;

        (cpu, memory, deck)
    }

    #[test]
    fn quick_load_transfers_and_rets() {
        let (mut cpu, mut memory, mut deck) = setup(&[1, 2, 3, 4]);
        ldbytes(&mut cpu, &mut memory, &mut deck);

        for (i, expect) in [1, 2, 3, 4].into_iter().enumerate() {
            assert_eq!(memory.read(0x9000 + i as u16), expect);
        }
        assert_ne!(cpu.regs.f & CF, 0, "carry reports success");
        assert_eq!(cpu.regs.pc, 0x8000, "in-place RET");
        assert_eq!(cpu.regs.sp, 0xFF02);
    }

    #[test]
    fn quick_load_flag_mismatch_fails() {
        let (mut cpu, mut memory, mut deck) = setup(&[9, 9]);
        cpu.regs.a_alt = 0x00; // expects a header, block is data-flagged
        cpu.regs.f |= CF;
        ldbytes(&mut cpu, &mut memory, &mut deck);

        assert_eq!(cpu.regs.f & CF, 0, "carry cleared on failure");
        assert_eq!(cpu.regs.pc, 0x8000, "still returns in place");
    }

    #[test]
    fn quick_load_verify_writes_nothing() {
        let (mut cpu, mut memory, mut deck) = setup(&[7, 8]);
        cpu.regs.f_alt = 0; // VERIFY (carry clear)
        ldbytes(&mut cpu, &mut memory, &mut deck);

        assert_eq!(memory.read(0x9000), 0);
        assert_ne!(cpu.regs.f & CF, 0, "verify succeeds");
    }

    #[test]
    fn quick_save_appends_checksummed_block() {
        let mut cpu = Z80::new();
        let mut memory = SpectrumMemory::new(Model::Spectrum48K);
        let mut deck = TapeDeck::new(79, true);

        memory.write(0x7000, 0xAA);
        memory.write(0x7001, 0x55);
        cpu.regs.sp = 0xFF00;
        memory.write16(0xFF00, 0x1234);
        cpu.regs.a_alt = 0xFF;
        cpu.regs.set_de(2);
        cpu.regs.ix = 0x7000;

        sabytes(&mut cpu, &mut memory, &mut deck);

        assert_eq!(
            deck.tape().blocks,
            vec![TapeBlock::Data {
                pause_after: 1000,
                data: vec![0xFF, 0xAA, 0x55, 0xFF ^ 0xAA ^ 0x55],
            }]
        );
        assert_ne!(cpu.regs.f & CF, 0);
        assert_eq!(cpu.regs.pc, 0x1234);
    }
}
