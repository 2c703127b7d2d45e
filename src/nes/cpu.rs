use log::warn;

use super::{
    FLAG_BREAK, FLAG_CARRY, FLAG_DECIMAL, FLAG_INTERRUPT, FLAG_NEGATIVE, FLAG_OVERFLOW,
    FLAG_UNUSED, FLAG_ZERO, Nes,
};

pub(crate) const NMI_VECTOR: u16 = 0xFFFA;
pub(crate) const RESET_VECTOR: u16 = 0xFFFC;
pub(crate) const IRQ_VECTOR: u16 = 0xFFFE;

impl Nes {
    /// Execute one instruction (or one stall cycle, or an interrupt entry)
    /// and return the CPU cycles consumed. Bus accesses made while decoding
    /// tick the rest of the machine immediately; the caller makes up the
    /// internal cycles afterwards.
    pub(crate) fn cpu_step(&mut self) -> u32 {
        self.bus_cycles_this_step = 0;
        self.in_instruction = false;

        if self.stall_cycles > 0 {
            self.stall_cycles -= 1;
            return 1;
        }

        if self.pending_nmi {
            self.pending_nmi = false;
            self.service_interrupt(NMI_VECTOR);
            return 7;
        }

        let irq_line = self.apu.irq_asserted()
            || self.mapper.as_ref().is_some_and(|m| m.irq_asserted());
        if irq_line && !self.flag(FLAG_INTERRUPT) {
            self.service_interrupt(IRQ_VECTOR);
            if let Some(mapper) = self.mapper.as_mut() {
                mapper.acknowledge_irq();
            }
            return 7;
        }

        self.in_instruction = true;
        let opcode_pc = self.pc;
        let opcode = self.fetch8();
        let cycles = self.execute(opcode, opcode_pc);
        self.in_instruction = false;
        cycles
    }

    fn service_interrupt(&mut self, vector: u16) {
        self.push16(self.pc);
        self.push((self.p & !FLAG_BREAK) | FLAG_UNUSED);
        self.set_flag(FLAG_INTERRUPT, true);
        self.pc = self.read16(vector);
    }

    fn execute(&mut self, opcode: u8, opcode_pc: u16) -> u32 {
        match opcode {
            // Loads
            0xA9 => { let v = self.fetch8(); self.lda(v); 2 }
            0xA5 => { let a = self.zp(); let v = self.cpu_read(a); self.lda(v); 3 }
            0xB5 => { let a = self.zpx(); let v = self.cpu_read(a); self.lda(v); 4 }
            0xAD => { let a = self.abs(); let v = self.cpu_read(a); self.lda(v); 4 }
            0xBD => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.lda(v); 4 + extra }
            0xB9 => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.lda(v); 4 + extra }
            0xA1 => { let a = self.indx(); let v = self.cpu_read(a); self.lda(v); 6 }
            0xB1 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.lda(v); 5 + extra }

            0xA2 => { let v = self.fetch8(); self.ldx(v); 2 }
            0xA6 => { let a = self.zp(); let v = self.cpu_read(a); self.ldx(v); 3 }
            0xB6 => { let a = self.zpy(); let v = self.cpu_read(a); self.ldx(v); 4 }
            0xAE => { let a = self.abs(); let v = self.cpu_read(a); self.ldx(v); 4 }
            0xBE => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.ldx(v); 4 + extra }

            0xA0 => { let v = self.fetch8(); self.ldy(v); 2 }
            0xA4 => { let a = self.zp(); let v = self.cpu_read(a); self.ldy(v); 3 }
            0xB4 => { let a = self.zpx(); let v = self.cpu_read(a); self.ldy(v); 4 }
            0xAC => { let a = self.abs(); let v = self.cpu_read(a); self.ldy(v); 4 }
            0xBC => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.ldy(v); 4 + extra }

            // Stores
            0x85 => { let a = self.zp(); self.cpu_write(a, self.a); 3 }
            0x95 => { let a = self.zpx(); self.cpu_write(a, self.a); 4 }
            0x8D => { let a = self.abs(); self.cpu_write(a, self.a); 4 }
            0x9D => { let a = self.absx_write(); self.cpu_write(a, self.a); 5 }
            0x99 => { let a = self.absy_write(); self.cpu_write(a, self.a); 5 }
            0x81 => { let a = self.indx(); self.cpu_write(a, self.a); 6 }
            0x91 => { let a = self.indy_write(); self.cpu_write(a, self.a); 6 }

            0x86 => { let a = self.zp(); self.cpu_write(a, self.x); 3 }
            0x96 => { let a = self.zpy(); self.cpu_write(a, self.x); 4 }
            0x8E => { let a = self.abs(); self.cpu_write(a, self.x); 4 }

            0x84 => { let a = self.zp(); self.cpu_write(a, self.y); 3 }
            0x94 => { let a = self.zpx(); self.cpu_write(a, self.y); 4 }
            0x8C => { let a = self.abs(); self.cpu_write(a, self.y); 4 }

            // Transfers
            0xAA => { self.x = self.a; self.set_zn(self.x); 2 }
            0xA8 => { self.y = self.a; self.set_zn(self.y); 2 }
            0x8A => { self.a = self.x; self.set_zn(self.a); 2 }
            0x98 => { self.a = self.y; self.set_zn(self.a); 2 }
            0xBA => { self.x = self.sp; self.set_zn(self.x); 2 }
            0x9A => { self.sp = self.x; 2 }

            // Stack
            0x48 => { self.push(self.a); 3 }
            0x08 => { self.push(self.p | FLAG_BREAK | FLAG_UNUSED); 3 }
            0x68 => { self.a = self.pop(); self.set_zn(self.a); 4 }
            0x28 => { self.p = (self.pop() & !FLAG_BREAK) | FLAG_UNUSED; 4 }

            // Logic and arithmetic
            0x29 => { let v = self.fetch8(); self.and_a(v); 2 }
            0x25 => { let a = self.zp(); let v = self.cpu_read(a); self.and_a(v); 3 }
            0x35 => { let a = self.zpx(); let v = self.cpu_read(a); self.and_a(v); 4 }
            0x2D => { let a = self.abs(); let v = self.cpu_read(a); self.and_a(v); 4 }
            0x3D => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.and_a(v); 4 + extra }
            0x39 => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.and_a(v); 4 + extra }
            0x21 => { let a = self.indx(); let v = self.cpu_read(a); self.and_a(v); 6 }
            0x31 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.and_a(v); 5 + extra }

            0x09 => { let v = self.fetch8(); self.ora_a(v); 2 }
            0x05 => { let a = self.zp(); let v = self.cpu_read(a); self.ora_a(v); 3 }
            0x15 => { let a = self.zpx(); let v = self.cpu_read(a); self.ora_a(v); 4 }
            0x0D => { let a = self.abs(); let v = self.cpu_read(a); self.ora_a(v); 4 }
            0x1D => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.ora_a(v); 4 + extra }
            0x19 => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.ora_a(v); 4 + extra }
            0x01 => { let a = self.indx(); let v = self.cpu_read(a); self.ora_a(v); 6 }
            0x11 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.ora_a(v); 5 + extra }

            0x49 => { let v = self.fetch8(); self.eor_a(v); 2 }
            0x45 => { let a = self.zp(); let v = self.cpu_read(a); self.eor_a(v); 3 }
            0x55 => { let a = self.zpx(); let v = self.cpu_read(a); self.eor_a(v); 4 }
            0x4D => { let a = self.abs(); let v = self.cpu_read(a); self.eor_a(v); 4 }
            0x5D => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.eor_a(v); 4 + extra }
            0x59 => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.eor_a(v); 4 + extra }
            0x41 => { let a = self.indx(); let v = self.cpu_read(a); self.eor_a(v); 6 }
            0x51 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.eor_a(v); 5 + extra }

            0x69 => { let v = self.fetch8(); self.adc(v); 2 }
            0x65 => { let a = self.zp(); let v = self.cpu_read(a); self.adc(v); 3 }
            0x75 => { let a = self.zpx(); let v = self.cpu_read(a); self.adc(v); 4 }
            0x6D => { let a = self.abs(); let v = self.cpu_read(a); self.adc(v); 4 }
            0x7D => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.adc(v); 4 + extra }
            0x79 => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.adc(v); 4 + extra }
            0x61 => { let a = self.indx(); let v = self.cpu_read(a); self.adc(v); 6 }
            0x71 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.adc(v); 5 + extra }

            0xE9 | 0xEB => { let v = self.fetch8(); self.sbc(v); 2 }
            0xE5 => { let a = self.zp(); let v = self.cpu_read(a); self.sbc(v); 3 }
            0xF5 => { let a = self.zpx(); let v = self.cpu_read(a); self.sbc(v); 4 }
            0xED => { let a = self.abs(); let v = self.cpu_read(a); self.sbc(v); 4 }
            0xFD => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.sbc(v); 4 + extra }
            0xF9 => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.sbc(v); 4 + extra }
            0xE1 => { let a = self.indx(); let v = self.cpu_read(a); self.sbc(v); 6 }
            0xF1 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.sbc(v); 5 + extra }

            0xC9 => { let v = self.fetch8(); self.compare(self.a, v); 2 }
            0xC5 => { let a = self.zp(); let v = self.cpu_read(a); self.compare(self.a, v); 3 }
            0xD5 => { let a = self.zpx(); let v = self.cpu_read(a); self.compare(self.a, v); 4 }
            0xCD => { let a = self.abs(); let v = self.cpu_read(a); self.compare(self.a, v); 4 }
            0xDD => { let (a, extra) = self.absx_read(); let v = self.cpu_read(a); self.compare(self.a, v); 4 + extra }
            0xD9 => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.compare(self.a, v); 4 + extra }
            0xC1 => { let a = self.indx(); let v = self.cpu_read(a); self.compare(self.a, v); 6 }
            0xD1 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.compare(self.a, v); 5 + extra }

            0xE0 => { let v = self.fetch8(); self.compare(self.x, v); 2 }
            0xE4 => { let a = self.zp(); let v = self.cpu_read(a); self.compare(self.x, v); 3 }
            0xEC => { let a = self.abs(); let v = self.cpu_read(a); self.compare(self.x, v); 4 }

            0xC0 => { let v = self.fetch8(); self.compare(self.y, v); 2 }
            0xC4 => { let a = self.zp(); let v = self.cpu_read(a); self.compare(self.y, v); 3 }
            0xCC => { let a = self.abs(); let v = self.cpu_read(a); self.compare(self.y, v); 4 }

            0x24 => { let a = self.zp(); let v = self.cpu_read(a); self.bit_test(v); 3 }
            0x2C => { let a = self.abs(); let v = self.cpu_read(a); self.bit_test(v); 4 }

            // Increments and decrements
            0xE8 => { self.x = self.x.wrapping_add(1); self.set_zn(self.x); 2 }
            0xC8 => { self.y = self.y.wrapping_add(1); self.set_zn(self.y); 2 }
            0xCA => { self.x = self.x.wrapping_sub(1); self.set_zn(self.x); 2 }
            0x88 => { self.y = self.y.wrapping_sub(1); self.set_zn(self.y); 2 }

            0xE6 => { let a = self.zp(); self.rmw(a, Self::inc_value); 5 }
            0xF6 => { let a = self.zpx(); self.rmw(a, Self::inc_value); 6 }
            0xEE => { let a = self.abs(); self.rmw(a, Self::inc_value); 6 }
            0xFE => { let a = self.absx_write(); self.rmw(a, Self::inc_value); 7 }

            0xC6 => { let a = self.zp(); self.rmw(a, Self::dec_value); 5 }
            0xD6 => { let a = self.zpx(); self.rmw(a, Self::dec_value); 6 }
            0xCE => { let a = self.abs(); self.rmw(a, Self::dec_value); 6 }
            0xDE => { let a = self.absx_write(); self.rmw(a, Self::dec_value); 7 }

            // Shifts and rotates
            0x0A => { self.a = self.asl_value(self.a); 2 }
            0x06 => { let a = self.zp(); self.rmw(a, Self::asl_value); 5 }
            0x16 => { let a = self.zpx(); self.rmw(a, Self::asl_value); 6 }
            0x0E => { let a = self.abs(); self.rmw(a, Self::asl_value); 6 }
            0x1E => { let a = self.absx_write(); self.rmw(a, Self::asl_value); 7 }

            0x4A => { self.a = self.lsr_value(self.a); 2 }
            0x46 => { let a = self.zp(); self.rmw(a, Self::lsr_value); 5 }
            0x56 => { let a = self.zpx(); self.rmw(a, Self::lsr_value); 6 }
            0x4E => { let a = self.abs(); self.rmw(a, Self::lsr_value); 6 }
            0x5E => { let a = self.absx_write(); self.rmw(a, Self::lsr_value); 7 }

            0x2A => { self.a = self.rol_value(self.a); 2 }
            0x26 => { let a = self.zp(); self.rmw(a, Self::rol_value); 5 }
            0x36 => { let a = self.zpx(); self.rmw(a, Self::rol_value); 6 }
            0x2E => { let a = self.abs(); self.rmw(a, Self::rol_value); 6 }
            0x3E => { let a = self.absx_write(); self.rmw(a, Self::rol_value); 7 }

            0x6A => { self.a = self.ror_value(self.a); 2 }
            0x66 => { let a = self.zp(); self.rmw(a, Self::ror_value); 5 }
            0x76 => { let a = self.zpx(); self.rmw(a, Self::ror_value); 6 }
            0x6E => { let a = self.abs(); self.rmw(a, Self::ror_value); 6 }
            0x7E => { let a = self.absx_write(); self.rmw(a, Self::ror_value); 7 }

            // Jumps and subroutines
            0x4C => { self.pc = self.fetch16(); 3 }
            0x6C => { let ptr = self.fetch16(); self.pc = self.read16_bug(ptr); 5 }
            0x20 => {
                let target = self.fetch16();
                self.push16(self.pc.wrapping_sub(1));
                self.pc = target;
                6
            }
            0x60 => { self.pc = self.pop16().wrapping_add(1); 6 }
            0x00 => {
                self.pc = self.pc.wrapping_add(1);
                self.push16(self.pc);
                self.push(self.p | FLAG_BREAK | FLAG_UNUSED);
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.read16(IRQ_VECTOR);
                7
            }
            0x40 => {
                self.p = (self.pop() & !FLAG_BREAK) | FLAG_UNUSED;
                self.pc = self.pop16();
                6
            }

            // Branches
            0x10 => self.branch(!self.flag(FLAG_NEGATIVE)),
            0x30 => self.branch(self.flag(FLAG_NEGATIVE)),
            0x50 => self.branch(!self.flag(FLAG_OVERFLOW)),
            0x70 => self.branch(self.flag(FLAG_OVERFLOW)),
            0x90 => self.branch(!self.flag(FLAG_CARRY)),
            0xB0 => self.branch(self.flag(FLAG_CARRY)),
            0xD0 => self.branch(!self.flag(FLAG_ZERO)),
            0xF0 => self.branch(self.flag(FLAG_ZERO)),

            // Flags
            0x18 => { self.set_flag(FLAG_CARRY, false); 2 }
            0x38 => { self.set_flag(FLAG_CARRY, true); 2 }
            0x58 => { self.set_flag(FLAG_INTERRUPT, false); 2 }
            0x78 => { self.set_flag(FLAG_INTERRUPT, true); 2 }
            0xB8 => { self.set_flag(FLAG_OVERFLOW, false); 2 }
            0xD8 => { self.set_flag(FLAG_DECIMAL, false); 2 }
            0xF8 => { self.set_flag(FLAG_DECIMAL, true); 2 }

            0xEA => 2,

            // Unofficial: LAX
            0xA7 => { let a = self.zp(); let v = self.cpu_read(a); self.lax(v); 3 }
            0xB7 => { let a = self.zpy(); let v = self.cpu_read(a); self.lax(v); 4 }
            0xAF => { let a = self.abs(); let v = self.cpu_read(a); self.lax(v); 4 }
            0xBF => { let (a, extra) = self.absy_read(); let v = self.cpu_read(a); self.lax(v); 4 + extra }
            0xA3 => { let a = self.indx(); let v = self.cpu_read(a); self.lax(v); 6 }
            0xB3 => { let (a, extra) = self.indy_read(); let v = self.cpu_read(a); self.lax(v); 5 + extra }

            // Unofficial: SAX
            0x87 => { let a = self.zp(); self.cpu_write(a, self.a & self.x); 3 }
            0x97 => { let a = self.zpy(); self.cpu_write(a, self.a & self.x); 4 }
            0x8F => { let a = self.abs(); self.cpu_write(a, self.a & self.x); 4 }
            0x83 => { let a = self.indx(); self.cpu_write(a, self.a & self.x); 6 }

            // Unofficial RMW + ALU combos
            0x07 => { let a = self.zp(); self.rmw(a, Self::slo_value); 5 }
            0x17 => { let a = self.zpx(); self.rmw(a, Self::slo_value); 6 }
            0x0F => { let a = self.abs(); self.rmw(a, Self::slo_value); 6 }
            0x1F => { let a = self.absx_write(); self.rmw(a, Self::slo_value); 7 }
            0x1B => { let a = self.absy_write(); self.rmw(a, Self::slo_value); 7 }
            0x03 => { let a = self.indx(); self.rmw(a, Self::slo_value); 8 }
            0x13 => { let a = self.indy_write(); self.rmw(a, Self::slo_value); 8 }

            0x27 => { let a = self.zp(); self.rmw(a, Self::rla_value); 5 }
            0x37 => { let a = self.zpx(); self.rmw(a, Self::rla_value); 6 }
            0x2F => { let a = self.abs(); self.rmw(a, Self::rla_value); 6 }
            0x3F => { let a = self.absx_write(); self.rmw(a, Self::rla_value); 7 }
            0x3B => { let a = self.absy_write(); self.rmw(a, Self::rla_value); 7 }
            0x23 => { let a = self.indx(); self.rmw(a, Self::rla_value); 8 }
            0x33 => { let a = self.indy_write(); self.rmw(a, Self::rla_value); 8 }

            0x47 => { let a = self.zp(); self.rmw(a, Self::sre_value); 5 }
            0x57 => { let a = self.zpx(); self.rmw(a, Self::sre_value); 6 }
            0x4F => { let a = self.abs(); self.rmw(a, Self::sre_value); 6 }
            0x5F => { let a = self.absx_write(); self.rmw(a, Self::sre_value); 7 }
            0x5B => { let a = self.absy_write(); self.rmw(a, Self::sre_value); 7 }
            0x43 => { let a = self.indx(); self.rmw(a, Self::sre_value); 8 }
            0x53 => { let a = self.indy_write(); self.rmw(a, Self::sre_value); 8 }

            0x67 => { let a = self.zp(); self.rmw(a, Self::rra_value); 5 }
            0x77 => { let a = self.zpx(); self.rmw(a, Self::rra_value); 6 }
            0x6F => { let a = self.abs(); self.rmw(a, Self::rra_value); 6 }
            0x7F => { let a = self.absx_write(); self.rmw(a, Self::rra_value); 7 }
            0x7B => { let a = self.absy_write(); self.rmw(a, Self::rra_value); 7 }
            0x63 => { let a = self.indx(); self.rmw(a, Self::rra_value); 8 }
            0x73 => { let a = self.indy_write(); self.rmw(a, Self::rra_value); 8 }

            0xC7 => { let a = self.zp(); self.rmw(a, Self::dcp_value); 5 }
            0xD7 => { let a = self.zpx(); self.rmw(a, Self::dcp_value); 6 }
            0xCF => { let a = self.abs(); self.rmw(a, Self::dcp_value); 6 }
            0xDF => { let a = self.absx_write(); self.rmw(a, Self::dcp_value); 7 }
            0xDB => { let a = self.absy_write(); self.rmw(a, Self::dcp_value); 7 }
            0xC3 => { let a = self.indx(); self.rmw(a, Self::dcp_value); 8 }
            0xD3 => { let a = self.indy_write(); self.rmw(a, Self::dcp_value); 8 }

            0xE7 => { let a = self.zp(); self.rmw(a, Self::isb_value); 5 }
            0xF7 => { let a = self.zpx(); self.rmw(a, Self::isb_value); 6 }
            0xEF => { let a = self.abs(); self.rmw(a, Self::isb_value); 6 }
            0xFF => { let a = self.absx_write(); self.rmw(a, Self::isb_value); 7 }
            0xFB => { let a = self.absy_write(); self.rmw(a, Self::isb_value); 7 }
            0xE3 => { let a = self.indx(); self.rmw(a, Self::isb_value); 8 }
            0xF3 => { let a = self.indy_write(); self.rmw(a, Self::isb_value); 8 }

            // Unofficial immediate ALU ops
            0x0B | 0x2B => {
                let v = self.fetch8();
                self.a &= v;
                self.set_zn(self.a);
                self.set_flag(FLAG_CARRY, (self.a & 0x80) != 0);
                2
            }
            0x4B => {
                let v = self.fetch8();
                self.a &= v;
                self.a = self.lsr_value(self.a);
                2
            }
            0x6B => {
                let v = self.fetch8();
                self.a &= v;
                let carry_in = if self.flag(FLAG_CARRY) { 0x80 } else { 0 };
                self.a = (self.a >> 1) | carry_in;
                self.set_zn(self.a);
                self.set_flag(FLAG_CARRY, (self.a & 0x40) != 0);
                self.set_flag(
                    FLAG_OVERFLOW,
                    (((self.a >> 6) & 0x01) ^ ((self.a >> 5) & 0x01)) != 0,
                );
                2
            }
            // ANE / LXA are unstable; use the RP2A03-friendly $EE magic value.
            0x8B => {
                let v = self.fetch8();
                self.a = (self.a | 0xEE) & self.x & v;
                self.set_zn(self.a);
                2
            }
            0xAB => {
                let v = self.fetch8();
                self.a = (self.a | 0xEE) & v;
                self.x = self.a;
                self.set_zn(self.a);
                2
            }
            0xCB => {
                let v = self.fetch8();
                let in_ax = self.a & self.x;
                self.set_flag(FLAG_CARRY, in_ax >= v);
                self.x = in_ax.wrapping_sub(v);
                self.set_zn(self.x);
                2
            }

            // Unofficial stores with the high-byte corruption quirk
            0x93 => {
                let (base, addr, crossed) = self.indy_base();
                let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
                let h = ((base >> 8) as u8).wrapping_add(1);
                self.sh_store(addr, crossed, self.a & self.x & h, h & self.x);
                6
            }
            0x9F => {
                let (base, addr, crossed) = self.absy_base();
                let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
                let h = ((base >> 8) as u8).wrapping_add(1);
                self.sh_store(addr, crossed, self.a & self.x & h, h & self.x);
                5
            }
            0x9B => {
                let (base, addr, crossed) = self.absy_base();
                let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
                self.sp = self.a & self.x;
                let h = ((base >> 8) as u8).wrapping_add(1);
                self.sh_store(addr, crossed, self.sp & h, h & self.x);
                5
            }
            0x9C => {
                let (base, addr, crossed) = self.absx_base();
                let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
                let h = ((base >> 8) as u8).wrapping_add(1);
                let value = self.y & h;
                self.sh_store(addr, crossed, value, value);
                5
            }
            0x9E => {
                let (base, addr, crossed) = self.absy_base();
                let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
                let h = ((base >> 8) as u8).wrapping_add(1);
                let value = self.x & h;
                self.sh_store(addr, crossed, value, value);
                5
            }
            0xBB => {
                let (a, extra) = self.absy_read();
                let value = self.cpu_read(a) & self.sp;
                self.a = value;
                self.x = value;
                self.sp = value;
                self.set_zn(value);
                4 + extra
            }

            // Unofficial NOPs
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => { let _ = self.fetch8(); 2 }
            0x04 | 0x44 | 0x64 => { let a = self.zp(); let _ = self.cpu_read(a); 3 }
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => { let a = self.zpx(); let _ = self.cpu_read(a); 4 }
            0x0C => { let a = self.abs(); let _ = self.cpu_read(a); 4 }
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => {
                let (a, extra) = self.absx_read();
                let _ = self.cpu_read(a);
                4 + extra
            }
            0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => 2,

            // JAM: the hardware wedges until reset. Every remaining encoding
            // decodes to documented unofficial behavior above, so a wedge is
            // the only way a bad opcode stream degrades, and it is logged.
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2 => {
                if !self.halted {
                    warn!("CPU jammed on ${opcode:02X} at ${opcode_pc:04X}");
                }
                self.halted = true;
                2
            }
        }
    }

    // Addressing helpers. The extra reads here are the dummy bus cycles the
    // hardware performs, so mid-instruction timing stays aligned.

    fn zp(&mut self) -> u16 {
        self.fetch8() as u16
    }

    fn zpx(&mut self) -> u16 {
        let base = self.fetch8();
        let _ = self.cpu_read(base as u16);
        base.wrapping_add(self.x) as u16
    }

    fn zpy(&mut self) -> u16 {
        let base = self.fetch8();
        let _ = self.cpu_read(base as u16);
        base.wrapping_add(self.y) as u16
    }

    fn abs(&mut self) -> u16 {
        self.fetch16()
    }

    fn absx_base(&mut self) -> (u16, u16, bool) {
        let base = self.fetch16();
        let addr = base.wrapping_add(self.x as u16);
        (base, addr, (base ^ addr) & 0xFF00 != 0)
    }

    fn absy_base(&mut self) -> (u16, u16, bool) {
        let base = self.fetch16();
        let addr = base.wrapping_add(self.y as u16);
        (base, addr, (base ^ addr) & 0xFF00 != 0)
    }

    fn indy_base(&mut self) -> (u16, u16, bool) {
        let zp = self.fetch8();
        let base = self.read_zp16(zp);
        let addr = base.wrapping_add(self.y as u16);
        (base, addr, (base ^ addr) & 0xFF00 != 0)
    }

    fn absx_read(&mut self) -> (u16, u32) {
        let (base, addr, crossed) = self.absx_base();
        if crossed {
            let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
            (addr, 1)
        } else {
            (addr, 0)
        }
    }

    fn absy_read(&mut self) -> (u16, u32) {
        let (base, addr, crossed) = self.absy_base();
        if crossed {
            let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
            (addr, 1)
        } else {
            (addr, 0)
        }
    }

    fn indy_read(&mut self) -> (u16, u32) {
        let (base, addr, crossed) = self.indy_base();
        if crossed {
            let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
            (addr, 1)
        } else {
            (addr, 0)
        }
    }

    fn absx_write(&mut self) -> u16 {
        let (base, addr, _) = self.absx_base();
        let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
        addr
    }

    fn absy_write(&mut self) -> u16 {
        let (base, addr, _) = self.absy_base();
        let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
        addr
    }

    fn indy_write(&mut self) -> u16 {
        let (base, addr, _) = self.indy_base();
        let _ = self.cpu_read((base & 0xFF00) | (addr & 0x00FF));
        addr
    }

    fn indx(&mut self) -> u16 {
        let zp = self.fetch8();
        let _ = self.cpu_read(zp as u16);
        self.read_zp16(zp.wrapping_add(self.x))
    }

    fn read_zp16(&mut self, zp: u8) -> u16 {
        let lo = self.cpu_read(zp as u16) as u16;
        let hi = self.cpu_read(zp.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    fn branch(&mut self, condition: bool) -> u32 {
        let offset = self.fetch8() as i8;
        if !condition {
            return 2;
        }

        let old_pc = self.pc;
        let _ = self.cpu_read(old_pc);
        let new_pc = old_pc.wrapping_add(offset as i16 as u16);
        self.pc = new_pc;
        if (old_pc ^ new_pc) & 0xFF00 != 0 {
            let _ = self.cpu_read((old_pc & 0xFF00) | (new_pc & 0x00FF));
            4
        } else {
            3
        }
    }

    fn rmw(&mut self, addr: u16, op: fn(&mut Self, u8) -> u8) {
        let value = self.cpu_read(addr);
        // The hardware writes the unmodified value back first.
        self.cpu_write(addr, value);
        let out = op(self, value);
        self.cpu_write(addr, out);
    }

    fn sh_store(&mut self, addr: u16, crossed: bool, value: u8, corrupt_hi: u8) {
        let write_addr = if crossed {
            ((corrupt_hi as u16) << 8) | (addr & 0x00FF)
        } else {
            addr
        };
        self.cpu_write(write_addr, value);
    }

    // ALU primitives

    fn lda(&mut self, value: u8) {
        self.a = value;
        self.set_zn(self.a);
    }

    fn ldx(&mut self, value: u8) {
        self.x = value;
        self.set_zn(self.x);
    }

    fn ldy(&mut self, value: u8) {
        self.y = value;
        self.set_zn(self.y);
    }

    fn lax(&mut self, value: u8) {
        self.a = value;
        self.x = value;
        self.set_zn(value);
    }

    fn and_a(&mut self, value: u8) {
        self.a &= value;
        self.set_zn(self.a);
    }

    fn ora_a(&mut self, value: u8) {
        self.a |= value;
        self.set_zn(self.a);
    }

    fn eor_a(&mut self, value: u8) {
        self.a ^= value;
        self.set_zn(self.a);
    }

    fn bit_test(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, (self.a & value) == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
        self.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.set_zn(result);
    }

    fn adc(&mut self, value: u8) {
        let carry_in = u16::from(self.flag(FLAG_CARRY));
        let result = self.a as u16 + value as u16 + carry_in;
        let out = result as u8;

        self.set_flag(FLAG_CARRY, result > 0xFF);
        self.set_flag(FLAG_OVERFLOW, ((self.a ^ out) & (value ^ out) & 0x80) != 0);

        self.a = out;
        self.set_zn(self.a);
    }

    fn sbc(&mut self, value: u8) {
        self.adc(value ^ 0xFF);
    }

    fn asl_value(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.set_zn(result);
        result
    }

    fn lsr_value(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.set_zn(result);
        result
    }

    fn rol_value(&mut self, value: u8) -> u8 {
        let carry_in = u8::from(self.flag(FLAG_CARRY));
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.set_zn(result);
        result
    }

    fn ror_value(&mut self, value: u8) -> u8 {
        let carry_in = if self.flag(FLAG_CARRY) { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.set_zn(result);
        result
    }

    fn inc_value(&mut self, value: u8) -> u8 {
        let out = value.wrapping_add(1);
        self.set_zn(out);
        out
    }

    fn dec_value(&mut self, value: u8) -> u8 {
        let out = value.wrapping_sub(1);
        self.set_zn(out);
        out
    }

    fn slo_value(&mut self, value: u8) -> u8 {
        let shifted = self.asl_value(value);
        self.a |= shifted;
        self.set_zn(self.a);
        shifted
    }

    fn rla_value(&mut self, value: u8) -> u8 {
        let shifted = self.rol_value(value);
        self.a &= shifted;
        self.set_zn(self.a);
        shifted
    }

    fn sre_value(&mut self, value: u8) -> u8 {
        let shifted = self.lsr_value(value);
        self.a ^= shifted;
        self.set_zn(self.a);
        shifted
    }

    fn rra_value(&mut self, value: u8) -> u8 {
        let shifted = self.ror_value(value);
        self.adc(shifted);
        shifted
    }

    fn dcp_value(&mut self, value: u8) -> u8 {
        let out = value.wrapping_sub(1);
        self.compare(self.a, out);
        out
    }

    fn isb_value(&mut self, value: u8) -> u8 {
        let out = value.wrapping_add(1);
        self.sbc(out);
        out
    }
}
