//! Instruction execution for the Z80.
//!
//! Dispatch is one grouped `match` per opcode table (main, CB, ED, DD/FD,
//! DDCB/FDCB): the table-of-tables the prefix bytes select between. Every
//! arm advances the clock by that instruction's documented T-state total;
//! the DD/FD prefix byte itself contributes 4 T in `step`.

use emu_core::Bus;

use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, sz53, sz53p};

use super::{Index, Z80};

impl Z80 {
    // =========================================================================
    // Register helpers
    // =========================================================================

    /// 8-bit register by octal index (0=B 1=C 2=D 3=E 4=H 5=L 7=A).
    /// Index 6 is the (HL) slot and never reaches here.
    fn reg8(&self, idx: u8) -> u8 {
        match idx & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            _ => self.regs.a,
        }
    }

    fn set_reg8(&mut self, idx: u8, value: u8) {
        match idx & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            _ => self.regs.a = value,
        }
    }

    /// 16-bit pair by index (0=BC 1=DE 2=HL 3=SP).
    fn pair(&self, idx: u8) -> u16 {
        match idx & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_pair(&mut self, idx: u8, value: u16) {
        match idx & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Condition by octal index (NZ Z NC C PO PE P M).
    fn cond(&self, cc: u8) -> bool {
        match cc & 7 {
            0 => self.regs.f & ZF == 0,
            1 => self.regs.f & ZF != 0,
            2 => self.regs.f & CF == 0,
            3 => self.regs.f & CF != 0,
            4 => self.regs.f & PF == 0,
            5 => self.regs.f & PF != 0,
            6 => self.regs.f & SF == 0,
            _ => self.regs.f & SF != 0,
        }
    }

    fn index_reg(&self, index: Index) -> u16 {
        match index {
            Index::Ix => self.regs.ix,
            Index::Iy => self.regs.iy,
        }
    }

    fn set_index_reg(&mut self, index: Index, value: u16) {
        match index {
            Index::Ix => self.regs.ix = value,
            Index::Iy => self.regs.iy = value,
        }
    }

    /// Effective address of (IX+d) / (IY+d).
    fn index_addr(&self, index: Index, d: i8) -> u16 {
        self.index_reg(index).wrapping_add(d as u16)
    }

    /// 8-bit register with the undocumented H/L → IXH/IXL remapping.
    fn ireg8(&self, index: Index, idx: u8) -> u8 {
        match idx & 7 {
            4 => (self.index_reg(index) >> 8) as u8,
            5 => self.index_reg(index) as u8,
            other => self.reg8(other),
        }
    }

    fn set_ireg8(&mut self, index: Index, idx: u8, value: u8) {
        match idx & 7 {
            4 => {
                let r = (self.index_reg(index) & 0x00FF) | (u16::from(value) << 8);
                self.set_index_reg(index, r);
            }
            5 => {
                let r = (self.index_reg(index) & 0xFF00) | u16::from(value);
                self.set_index_reg(index, r);
            }
            other => self.set_reg8(other, value),
        }
    }

    /// Apply ALU operation `aluop` (octal row: ADD ADC SUB SBC AND XOR OR CP)
    /// between A and `value`.
    fn alu_a(&mut self, aluop: u8, value: u8) {
        let a = self.regs.a;
        let carry = self.regs.f & CF != 0;
        let result = match aluop & 7 {
            0 => alu::add8(a, value, false),
            1 => alu::add8(a, value, carry),
            2 => alu::sub8(a, value, false),
            3 => alu::sub8(a, value, carry),
            4 => alu::and8(a, value),
            5 => alu::xor8(a, value),
            6 => alu::or8(a, value),
            _ => alu::cp8(a, value),
        };
        if aluop & 7 != 7 {
            self.regs.a = result.value;
        }
        self.regs.f = result.flags;
    }

    /// CB-table rotate/shift by row (RLC RRC RL RR SLA SRA SLL SRL).
    fn shift_rot(&self, kind: u8, value: u8) -> alu::AluResult {
        let carry = self.regs.f & CF != 0;
        match kind & 7 {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(value, carry),
            3 => alu::rr8(value, carry),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            6 => alu::sll8(value),
            _ => alu::srl8(value),
        }
    }

    fn jr(&mut self, offset: u8) {
        self.regs.pc = self.regs.pc.wrapping_add(i16::from(offset as i8) as u16);
    }

    // =========================================================================
    // Unprefixed instructions
    // =========================================================================

    pub(super) fn execute_main(&mut self, op: u8, bus: &mut impl Bus) {
        match op {
            // NOP
            0x00 => self.advance(4),

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let nn = self.fetch16(bus);
                self.set_pair(op >> 4, nn);
                self.advance(10);
            }

            // LD (BC), A / LD (DE), A
            0x02 => {
                bus.write(self.regs.bc(), self.regs.a);
                self.advance(7);
            }
            0x12 => {
                bus.write(self.regs.de(), self.regs.a);
                self.advance(7);
            }

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                let rp = op >> 4;
                let v = self.pair(rp).wrapping_add(1);
                self.set_pair(rp, v);
                self.advance(6);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let rp = op >> 4;
                let v = self.pair(rp).wrapping_sub(1);
                self.set_pair(rp, v);
                self.advance(6);
            }

            // INC r / INC (HL)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let result = alu::inc8(self.reg8(r));
                self.set_reg8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(4);
            }
            0x34 => {
                let hl = self.regs.hl();
                let result = alu::inc8(bus.read(hl));
                bus.write(hl, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(11);
            }

            // DEC r / DEC (HL)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let result = alu::dec8(self.reg8(r));
                self.set_reg8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(4);
            }
            0x35 => {
                let hl = self.regs.hl();
                let result = alu::dec8(bus.read(hl));
                bus.write(hl, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(11);
            }

            // LD r, n / LD (HL), n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let n = self.fetch(bus);
                self.set_reg8((op >> 3) & 7, n);
                self.advance(7);
            }
            0x36 => {
                let n = self.fetch(bus);
                bus.write(self.regs.hl(), n);
                self.advance(10);
            }

            // RLCA / RRCA / RLA / RRA: S, Z, P/V survive, XY come from A
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
                self.advance(4);
            }
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
                self.advance(4);
            }
            0x17 => {
                let carry = self.regs.a >> 7;
                let old = u8::from(self.regs.f & CF != 0);
                self.regs.a = (self.regs.a << 1) | old;
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
                self.advance(4);
            }
            0x1F => {
                let carry = self.regs.a & 1;
                let old = u8::from(self.regs.f & CF != 0);
                self.regs.a = (self.regs.a >> 1) | (old << 7);
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
                self.advance(4);
            }

            // EX AF, AF'
            0x08 => {
                core::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                core::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
                self.advance(4);
            }

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let (result, flags) = alu::add16(self.regs.hl(), self.pair(op >> 4));
                self.regs.set_hl(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                self.advance(11);
            }

            // LD A, (BC) / LD A, (DE)
            0x0A => {
                self.regs.a = bus.read(self.regs.bc());
                self.advance(7);
            }
            0x1A => {
                self.regs.a = bus.read(self.regs.de());
                self.advance(7);
            }

            // DJNZ e
            0x10 => {
                let offset = self.fetch(bus);
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.jr(offset);
                    self.advance(13);
                } else {
                    self.advance(8);
                }
            }

            // JR e / JR cc, e
            0x18 => {
                let offset = self.fetch(bus);
                self.jr(offset);
                self.advance(12);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch(bus);
                if self.cond((op >> 3) & 3) {
                    self.jr(offset);
                    self.advance(12);
                } else {
                    self.advance(7);
                }
            }

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let addr = self.fetch16(bus);
                let hl = self.regs.hl();
                self.write16(bus, addr, hl);
                self.advance(16);
            }
            0x2A => {
                let addr = self.fetch16(bus);
                let v = self.read16(bus, addr);
                self.regs.set_hl(v);
                self.advance(16);
            }

            // DAA
            0x27 => {
                self.daa();
                self.advance(4);
            }

            // CPL
            0x2F => {
                self.regs.a ^= 0xFF;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
                self.advance(4);
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.fetch16(bus);
                bus.write(addr, self.regs.a);
                self.advance(13);
            }
            0x3A => {
                let addr = self.fetch16(bus);
                self.regs.a = bus.read(addr);
                self.advance(13);
            }

            // SCF / CCF: XY from A
            0x37 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | CF | (self.regs.a & (YF | XF));
                self.advance(4);
            }
            0x3F => {
                let hc = if self.regs.f & CF != 0 { HF } else { 0 };
                self.regs.f = ((self.regs.f ^ CF) & !(YF | HF | XF | NF))
                    | hc
                    | (self.regs.a & (YF | XF));
                self.advance(4);
            }

            // HALT: PC stays on the HALT byte while halted; acceptance of
            // an interrupt resumes after it.
            0x76 => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                self.advance(4);
            }

            // LD r, r' / LD r, (HL) / LD (HL), r
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let v = bus.read(self.regs.hl());
                    self.set_reg8(dst, v);
                    self.advance(7);
                } else if dst == 6 {
                    bus.write(self.regs.hl(), self.reg8(src));
                    self.advance(7);
                } else {
                    let v = self.reg8(src);
                    self.set_reg8(dst, v);
                    self.advance(4);
                }
            }

            // ALU A, r / ALU A, (HL)
            0x80..=0xBF => {
                let aluop = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let v = bus.read(self.regs.hl());
                    self.alu_a(aluop, v);
                    self.advance(7);
                } else {
                    let v = self.reg8(src);
                    self.alu_a(aluop, v);
                    self.advance(4);
                }
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.cond((op >> 3) & 7) {
                    self.regs.pc = self.pop16(bus);
                    self.advance(11);
                } else {
                    self.advance(5);
                }
            }

            // POP rr / POP AF
            0xC1 | 0xD1 | 0xE1 => {
                let v = self.pop16(bus);
                self.set_pair((op >> 4) & 3, v);
                self.advance(10);
            }
            0xF1 => {
                let v = self.pop16(bus);
                self.regs.set_af(v);
                self.advance(10);
            }

            // JP cc, nn / JP nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let addr = self.fetch16(bus);
                if self.cond((op >> 3) & 7) {
                    self.regs.pc = addr;
                }
                self.advance(10);
            }
            0xC3 => {
                self.regs.pc = self.fetch16(bus);
                self.advance(10);
            }

            // CALL cc, nn / CALL nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let addr = self.fetch16(bus);
                if self.cond((op >> 3) & 7) {
                    let pc = self.regs.pc;
                    self.push16(bus, pc);
                    self.regs.pc = addr;
                    self.advance(17);
                } else {
                    self.advance(10);
                }
            }
            0xCD => {
                let addr = self.fetch16(bus);
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = addr;
                self.advance(17);
            }

            // PUSH rr / PUSH AF
            0xC5 | 0xD5 | 0xE5 => {
                let v = self.pair((op >> 4) & 3);
                self.push16(bus, v);
                self.advance(11);
            }
            0xF5 => {
                let v = self.regs.af();
                self.push16(bus, v);
                self.advance(11);
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let n = self.fetch(bus);
                self.alu_a((op >> 3) & 7, n);
                self.advance(7);
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = u16::from(op & 0x38);
                self.advance(11);
            }

            // RET
            0xC9 => {
                self.regs.pc = self.pop16(bus);
                self.advance(10);
            }

            // OUT (n), A / IN A, (n): high address byte is A
            0xD3 => {
                let n = self.fetch(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                bus.io_write(port, self.regs.a);
                self.advance(11);
            }
            0xDB => {
                let n = self.fetch(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                self.regs.a = bus.io_read(port);
                self.advance(11);
            }

            // EXX
            0xD9 => {
                core::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                core::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                core::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                core::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                core::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                core::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
                self.advance(4);
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let tmp = self.read16(bus, sp);
                let hl = self.regs.hl();
                self.write16(bus, sp, hl);
                self.regs.set_hl(tmp);
                self.advance(19);
            }

            // JP (HL)
            0xE9 => {
                self.regs.pc = self.regs.hl();
                self.advance(4);
            }

            // EX DE, HL
            0xEB => {
                core::mem::swap(&mut self.regs.d, &mut self.regs.h);
                core::mem::swap(&mut self.regs.e, &mut self.regs.l);
                self.advance(4);
            }

            // DI / EI: both suppress interrupt acceptance at the next boundary
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                self.int_lock = true;
                self.advance(4);
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.int_lock = true;
                self.advance(4);
            }

            // LD SP, HL
            0xF9 => {
                self.regs.sp = self.regs.hl();
                self.advance(6);
            }

            // Prefix bytes are decoded in step() and never dispatched here.
            0xCB | 0xDD | 0xED | 0xFD => debug_assert!(false, "prefix byte in main table"),
        }
    }

    fn daa(&mut self) {
        let mut res = u16::from(self.regs.a);
        let mut f = self.regs.f;

        if f & NF == 0 {
            if f & CF != 0 {
                res += 0x60;
            } else if res > 0x99 {
                res += 0x60;
                f |= CF;
            }
            if f & HF != 0 {
                if res & 0x0F <= 0x09 {
                    f &= !HF;
                }
                res += 0x06;
            } else if res & 0x0F > 0x09 {
                res += 0x06;
                f |= HF;
            }
        } else {
            if f & CF != 0 {
                res = res.wrapping_sub(0x60);
            } else if res > 0x99 {
                res = res.wrapping_sub(0x60);
                f |= CF;
            }
            if f & HF != 0 {
                if res & 0x0F >= 0x06 {
                    f &= !HF;
                }
                res = res.wrapping_sub(0x06);
            } else if res & 0x0F > 0x09 {
                res = res.wrapping_sub(0x06);
            }
        }

        self.regs.a = res as u8;
        self.regs.f = (f & (HF | NF | CF)) | sz53p(res as u8);
    }

    // =========================================================================
    // CB-prefixed instructions
    // =========================================================================

    pub(super) fn execute_cb(&mut self, op: u8, bus: &mut impl Bus) {
        let target = op & 7;
        let row = (op >> 3) & 7;

        match op >> 6 {
            // Rotates and shifts
            0 => {
                if target == 6 {
                    let hl = self.regs.hl();
                    let result = self.shift_rot(row, bus.read(hl));
                    bus.write(hl, result.value);
                    self.regs.f = result.flags;
                    self.advance(15);
                } else {
                    let result = self.shift_rot(row, self.reg8(target));
                    self.set_reg8(target, result.value);
                    self.regs.f = result.flags;
                    self.advance(8);
                }
            }
            // BIT b: undocumented flags come from the source operand
            1 => {
                if target == 6 {
                    let v = bus.read(self.regs.hl());
                    self.bit_flags(row, v);
                    self.advance(12);
                } else {
                    let v = self.reg8(target);
                    self.bit_flags(row, v);
                    self.regs.f = (self.regs.f & !(YF | XF)) | (v & (YF | XF));
                    self.advance(8);
                }
            }
            // RES b
            2 => {
                if target == 6 {
                    let hl = self.regs.hl();
                    let v = bus.read(hl) & !(1 << row);
                    bus.write(hl, v);
                    self.advance(15);
                } else {
                    let v = self.reg8(target) & !(1 << row);
                    self.set_reg8(target, v);
                    self.advance(8);
                }
            }
            // SET b
            _ => {
                if target == 6 {
                    let hl = self.regs.hl();
                    let v = bus.read(hl) | (1 << row);
                    bus.write(hl, v);
                    self.advance(15);
                } else {
                    let v = self.reg8(target) | (1 << row);
                    self.set_reg8(target, v);
                    self.advance(8);
                }
            }
        }
    }

    fn bit_flags(&mut self, bit: u8, value: u8) {
        let res = value & (1 << bit);
        self.regs.f = (self.regs.f & CF) | sz53p(res) | HF;
    }

    // =========================================================================
    // ED-prefixed instructions
    // =========================================================================

    pub(super) fn execute_ed(&mut self, op: u8, bus: &mut impl Bus) {
        match op {
            // IN r, (C); ED 70 performs the input and discards the value
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let v = bus.io_read(self.regs.bc());
                self.regs.f = (self.regs.f & CF) | alu::in_flags(v);
                if op != 0x70 {
                    self.set_reg8((op >> 3) & 7, v);
                }
                self.advance(12);
            }

            // OUT (C), r; ED 71 outputs zero
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let v = if op == 0x71 { 0 } else { self.reg8((op >> 3) & 7) };
                bus.io_write(self.regs.bc(), v);
                self.advance(12);
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                let carry = self.regs.f & CF != 0;
                let (result, flags) = alu::sbc16(self.regs.hl(), self.pair(op >> 4), carry);
                self.regs.set_hl(result);
                self.regs.f = flags;
                self.advance(15);
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                let carry = self.regs.f & CF != 0;
                let (result, flags) = alu::adc16(self.regs.hl(), self.pair(op >> 4), carry);
                self.regs.set_hl(result);
                self.regs.f = flags;
                self.advance(15);
            }

            // LD (nn), rr / LD rr, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch16(bus);
                let v = self.pair(op >> 4);
                self.write16(bus, addr, v);
                self.advance(20);
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch16(bus);
                let v = self.read16(bus, addr);
                self.set_pair(op >> 4, v);
                self.advance(20);
            }

            // NEG and its undocumented duplicates
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let result = alu::sub8(0, self.regs.a, false);
                self.regs.a = result.value;
                self.regs.f = result.flags;
                self.advance(8);
            }

            // RETN / RETI (and duplicates): both restore IFF1 from IFF2
            0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D => {
                self.regs.iff1 = self.regs.iff2;
                self.regs.pc = self.pop16(bus);
                self.advance(14);
            }

            // IM 0 / 1 / 2 (and duplicates)
            0x46 | 0x4E | 0x66 | 0x6E => {
                self.regs.im = 0;
                self.advance(8);
            }
            0x56 | 0x76 => {
                self.regs.im = 1;
                self.advance(8);
            }
            0x5E | 0x7E => {
                self.regs.im = 2;
                self.advance(8);
            }

            // LD I, A / LD R, A
            0x47 => {
                self.regs.i = self.regs.a;
                self.advance(9);
            }
            0x4F => {
                self.regs.r = self.regs.a;
                self.advance(9);
            }

            // LD A, I / LD A, R: P/V mirrors IFF2
            0x57 => {
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
                self.advance(9);
            }
            0x5F => {
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
                self.advance(9);
            }

            // RRD / RLD
            0x67 => {
                let hl = self.regs.hl();
                let m = bus.read(hl);
                let low = self.regs.a & 0x0F;
                self.regs.a = (self.regs.a & 0xF0) | (m & 0x0F);
                bus.write(hl, (m >> 4) | (low << 4));
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                self.advance(18);
            }
            0x6F => {
                let hl = self.regs.hl();
                let m = bus.read(hl);
                let low = self.regs.a & 0x0F;
                self.regs.a = (self.regs.a & 0xF0) | (m >> 4);
                bus.write(hl, (m << 4) | low);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                self.advance(18);
            }

            // Block transfers
            0xA0 => self.block_ld(bus, 1, false),
            0xA8 => self.block_ld(bus, -1, false),
            0xB0 => self.block_ld(bus, 1, true),
            0xB8 => self.block_ld(bus, -1, true),

            // Block compares
            0xA1 => self.block_cp(bus, 1, false),
            0xA9 => self.block_cp(bus, -1, false),
            0xB1 => self.block_cp(bus, 1, true),
            0xB9 => self.block_cp(bus, -1, true),

            // Block input
            0xA2 => self.block_in(bus, 1, false),
            0xAA => self.block_in(bus, -1, false),
            0xB2 => self.block_in(bus, 1, true),
            0xBA => self.block_in(bus, -1, true),

            // Block output
            0xA3 => self.block_out(bus, 1, false),
            0xAB => self.block_out(bus, -1, false),
            0xB3 => self.block_out(bus, 1, true),
            0xBB => self.block_out(bus, -1, true),

            // ED holes: 8 T NOP (two NOPs' worth)
            _ => self.advance(8),
        }
    }

    /// LDI/LDD/LDIR/LDDR.
    fn block_ld(&mut self, bus: &mut impl Bus, delta: i16, repeat: bool) {
        let hl = self.regs.hl();
        let de = self.regs.de();
        let v = bus.read(hl);
        bus.write(de, v);
        self.regs.set_hl(hl.wrapping_add(delta as u16));
        self.regs.set_de(de.wrapping_add(delta as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let mut f = self.regs.f & (SF | ZF | CF);
        if bc != 0 {
            f |= PF;
        }
        let n = v.wrapping_add(self.regs.a);
        f |= (n & XF) | ((n & 0x02) << 4);
        self.regs.f = f;

        if repeat && bc != 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.advance(21);
        } else {
            self.advance(16);
        }
    }

    /// CPI/CPD/CPIR/CPDR.
    fn block_cp(&mut self, bus: &mut impl Bus, delta: i16, repeat: bool) {
        let hl = self.regs.hl();
        let a = self.regs.a;
        let v = bus.read(hl);
        let res = a.wrapping_sub(v);
        self.regs.set_hl(hl.wrapping_add(delta as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let mut f = (self.regs.f & CF) | NF;
        if res & 0x80 != 0 {
            f |= SF;
        }
        if res == 0 {
            f |= ZF;
        }
        if a & 0x0F < v & 0x0F {
            f |= HF;
        }
        if bc != 0 {
            f |= PF;
        }
        let mut n = res;
        if bc != 0 {
            n = n.wrapping_sub(1);
        }
        f |= (n & XF) | ((n & 0x02) << 4);
        self.regs.f = f;

        if repeat && bc != 0 && f & ZF == 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.advance(21);
        } else {
            self.advance(16);
        }
    }

    /// INI/IND/INIR/INDR. The port read uses B before the decrement.
    fn block_in(&mut self, bus: &mut impl Bus, delta: i16, repeat: bool) {
        let v = bus.io_read(self.regs.bc());
        let hl = self.regs.hl();
        bus.write(hl, v);
        self.regs.set_hl(hl.wrapping_add(delta as u16));

        let b_after = self.regs.b.wrapping_sub(1);
        let c_adj = self.regs.c.wrapping_add(delta as u8);
        let sum = u16::from(v) + u16::from(c_adj);
        self.regs.f = alu::block_io_flags(b_after, v, sum);
        self.regs.b = b_after;

        if repeat && b_after != 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.advance(21);
        } else {
            self.advance(16);
        }
    }

    /// OUTI/OUTD/OTIR/OTDR. The port address uses B after the decrement,
    /// and the flag sum uses L after the HL step.
    fn block_out(&mut self, bus: &mut impl Bus, delta: i16, repeat: bool) {
        let b_after = self.regs.b.wrapping_sub(1);
        let port = (u16::from(b_after) << 8) | u16::from(self.regs.c);
        let hl = self.regs.hl();
        let v = bus.read(hl);
        bus.io_write(port, v);
        self.regs.set_hl(hl.wrapping_add(delta as u16));

        let sum = u16::from(v) + u16::from(self.regs.l);
        self.regs.f = alu::block_io_flags(b_after, v, sum);
        self.regs.b = b_after;

        if repeat && b_after != 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.advance(21);
        } else {
            self.advance(16);
        }
    }

    // =========================================================================
    // DD/FD-prefixed instructions
    // =========================================================================

    pub(super) fn execute_indexed(&mut self, index: Index, op: u8, bus: &mut impl Bus) {
        match op {
            // ADD IX, rr (29 = ADD IX, IX)
            0x09 | 0x19 | 0x39 => {
                let (result, flags) = alu::add16(self.index_reg(index), self.pair(op >> 4));
                self.set_index_reg(index, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                self.advance(11);
            }
            0x29 => {
                let v = self.index_reg(index);
                let (result, flags) = alu::add16(v, v);
                self.set_index_reg(index, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                self.advance(11);
            }

            // LD IX, nn / LD (nn), IX / LD IX, (nn)
            0x21 => {
                let nn = self.fetch16(bus);
                self.set_index_reg(index, nn);
                self.advance(10);
            }
            0x22 => {
                let addr = self.fetch16(bus);
                let v = self.index_reg(index);
                self.write16(bus, addr, v);
                self.advance(16);
            }
            0x2A => {
                let addr = self.fetch16(bus);
                let v = self.read16(bus, addr);
                self.set_index_reg(index, v);
                self.advance(16);
            }

            // INC IX / DEC IX
            0x23 => {
                let v = self.index_reg(index).wrapping_add(1);
                self.set_index_reg(index, v);
                self.advance(6);
            }
            0x2B => {
                let v = self.index_reg(index).wrapping_sub(1);
                self.set_index_reg(index, v);
                self.advance(6);
            }

            // INC/DEC IXH, IXL (undocumented)
            0x24 | 0x2C => {
                let r = (op >> 3) & 7;
                let result = alu::inc8(self.ireg8(index, r));
                self.set_ireg8(index, r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(4);
            }
            0x25 | 0x2D => {
                let r = (op >> 3) & 7;
                let result = alu::dec8(self.ireg8(index, r));
                self.set_ireg8(index, r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(4);
            }

            // LD IXH, n / LD IXL, n (undocumented)
            0x26 | 0x2E => {
                let n = self.fetch(bus);
                self.set_ireg8(index, (op >> 3) & 7, n);
                self.advance(7);
            }

            // INC (IX+d) / DEC (IX+d) / LD (IX+d), n
            0x34 => {
                let d = self.fetch(bus) as i8;
                let addr = self.index_addr(index, d);
                let result = alu::inc8(bus.read(addr));
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(19);
            }
            0x35 => {
                let d = self.fetch(bus) as i8;
                let addr = self.index_addr(index, d);
                let result = alu::dec8(bus.read(addr));
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                self.advance(19);
            }
            0x36 => {
                let d = self.fetch(bus) as i8;
                let n = self.fetch(bus);
                bus.write(self.index_addr(index, d), n);
                self.advance(15);
            }

            // HALT keeps its unprefixed meaning
            0x76 => self.execute_main(op, bus),

            // LD group: memory forms use the real registers, register forms
            // substitute IXH/IXL for H/L
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let d = self.fetch(bus) as i8;
                    let v = bus.read(self.index_addr(index, d));
                    self.set_reg8(dst, v);
                    self.advance(15);
                } else if dst == 6 {
                    let d = self.fetch(bus) as i8;
                    bus.write(self.index_addr(index, d), self.reg8(src));
                    self.advance(15);
                } else {
                    let v = self.ireg8(index, src);
                    self.set_ireg8(index, dst, v);
                    self.advance(4);
                }
            }

            // ALU A, (IX+d) and ALU A, IXH/IXL
            0x80..=0xBF => {
                let aluop = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let d = self.fetch(bus) as i8;
                    let v = bus.read(self.index_addr(index, d));
                    self.alu_a(aluop, v);
                    self.advance(15);
                } else {
                    let v = self.ireg8(index, src);
                    self.alu_a(aluop, v);
                    self.advance(4);
                }
            }

            // POP IX / EX (SP), IX / PUSH IX / JP (IX) / LD SP, IX
            0xE1 => {
                let v = self.pop16(bus);
                self.set_index_reg(index, v);
                self.advance(10);
            }
            0xE3 => {
                let sp = self.regs.sp;
                let tmp = self.read16(bus, sp);
                let v = self.index_reg(index);
                self.write16(bus, sp, v);
                self.set_index_reg(index, tmp);
                self.advance(19);
            }
            0xE5 => {
                let v = self.index_reg(index);
                self.push16(bus, v);
                self.advance(11);
            }
            0xE9 => {
                self.regs.pc = self.index_reg(index);
                self.advance(4);
            }
            0xF9 => {
                self.regs.sp = self.index_reg(index);
                self.advance(6);
            }

            // Stray prefix: the opcode executes unmodified
            _ => self.execute_main(op, bus),
        }
    }

    // =========================================================================
    // DDCB/FDCB-prefixed instructions
    // =========================================================================

    /// All DDCB/FDCB operations work on (IX+d). When the low three bits name
    /// a register (not 6), the result is ALSO stored into that register;
    /// the documented memory-only form is the special case.
    pub(super) fn execute_index_cb(&mut self, index: Index, d: i8, op: u8, bus: &mut impl Bus) {
        let addr = self.index_addr(index, d);
        let target = op & 7;
        let row = (op >> 3) & 7;

        match op >> 6 {
            // Rotates and shifts
            0 => {
                let result = self.shift_rot(row, bus.read(addr));
                bus.write(addr, result.value);
                self.regs.f = result.flags;
                if target != 6 {
                    self.set_reg8(target, result.value);
                }
                self.advance(19);
            }
            // BIT b, (IX+d): undocumented flags from the high byte of the
            // effective address
            1 => {
                let v = bus.read(addr);
                self.bit_flags(row, v);
                self.regs.f =
                    (self.regs.f & !(YF | XF)) | (((addr >> 8) as u8) & (YF | XF));
                self.advance(16);
            }
            // RES b, (IX+d)
            2 => {
                let v = bus.read(addr) & !(1 << row);
                bus.write(addr, v);
                if target != 6 {
                    self.set_reg8(target, v);
                }
                self.advance(19);
            }
            // SET b, (IX+d)
            _ => {
                let v = bus.read(addr) | (1 << row);
                bus.write(addr, v);
                if target != 6 {
                    self.set_reg8(target, v);
                }
                self.advance(19);
            }
        }
    }
}
