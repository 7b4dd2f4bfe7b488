mod arithmetic;
mod bits;
mod control;

use crate::core::{IndexState, Registers, Z80};
use crate::traits::BusInterface;

/// Opcode `r`/`r'` operand field: B,C,D,E,H,L,(HL),A in ascending bit-pattern order.
pub(super) fn read_r8<B: BusInterface>(
    cpu: &mut Z80,
    bus: &mut B,
    code: u8,
    index: IndexState,
) -> u8 {
    match (code & 0x7, index) {
        (0, _) => cpu.registers.b,
        (1, _) => cpu.registers.c,
        (2, _) => cpu.registers.d,
        (3, _) => cpu.registers.e,
        (4, IndexState::None) => cpu.registers.h,
        (4, IndexState::Ix) => cpu.registers.ixh(),
        (4, IndexState::Iy) => cpu.registers.iyh(),
        (5, IndexState::None) => cpu.registers.l,
        (5, IndexState::Ix) => cpu.registers.ixl(),
        (5, IndexState::Iy) => cpu.registers.iyl(),
        (6, _) => {
            let addr = indirect_hl_address(cpu, bus, index);
            let value = bus.read_memory(addr);
            cpu.tick(3);
            value
        }
        (7, _) => cpu.registers.a,
        _ => unreachable!(),
    }
}

pub(super) fn write_r8<B: BusInterface>(
    cpu: &mut Z80,
    bus: &mut B,
    code: u8,
    index: IndexState,
    value: u8,
) {
    match (code & 0x7, index) {
        (0, _) => cpu.registers.b = value,
        (1, _) => cpu.registers.c = value,
        (2, _) => cpu.registers.d = value,
        (3, _) => cpu.registers.e = value,
        (4, IndexState::None) => cpu.registers.h = value,
        (4, IndexState::Ix) => cpu.registers.set_ixh(value),
        (4, IndexState::Iy) => cpu.registers.set_iyh(value),
        (5, IndexState::None) => cpu.registers.l = value,
        (5, IndexState::Ix) => cpu.registers.set_ixl(value),
        (5, IndexState::Iy) => cpu.registers.set_iyl(value),
        (6, _) => {
            let addr = indirect_hl_address(cpu, bus, index);
            bus.write_memory(addr, value);
            cpu.tick(3);
        }
        (7, _) => cpu.registers.a = value,
        _ => unreachable!(),
    }
}

/// Resolve the effective address for register-field code 6 (the `(HL)` slot): plain HL normally,
/// or `IX+d`/`IY+d` when a DD/FD prefix has redirected this instruction, consuming the
/// displacement byte and 5 extra T-states as real hardware does.
fn indirect_hl_address<B: BusInterface>(cpu: &mut Z80, bus: &mut B, index: IndexState) -> u16 {
    match index {
        IndexState::None => cpu.registers.hl(),
        IndexState::Ix => {
            let d = read_displacement(cpu, bus);
            cpu.registers.ix.wrapping_add_signed(i16::from(d))
        }
        IndexState::Iy => {
            let d = read_displacement(cpu, bus);
            cpu.registers.iy.wrapping_add_signed(i16::from(d))
        }
    }
}

fn read_displacement<B: BusInterface>(cpu: &mut Z80, bus: &mut B) -> i8 {
    let byte = bus.read_memory(cpu.registers.pc);
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
    cpu.tick(8);
    byte as i8
}

/// Opcode register-pair field for BC/DE/HL-or-IX-or-IY/SP, as used by e.g. `LD rr,nn`/`INC rr`.
pub(super) fn read_rp16(registers: &Registers, code: u8, index: IndexState) -> u16 {
    match (code & 0x3, index) {
        (0, _) => registers.bc(),
        (1, _) => registers.de(),
        (2, IndexState::None) => registers.hl(),
        (2, IndexState::Ix) => registers.ix,
        (2, IndexState::Iy) => registers.iy,
        (3, _) => registers.sp,
        _ => unreachable!(),
    }
}

pub(super) fn write_rp16(registers: &mut Registers, code: u8, index: IndexState, value: u16) {
    match (code & 0x3, index) {
        (0, _) => registers.set_bc(value),
        (1, _) => registers.set_de(value),
        (2, IndexState::None) => registers.set_hl(value),
        (2, IndexState::Ix) => registers.ix = value,
        (2, IndexState::Iy) => registers.iy = value,
        (3, _) => registers.sp = value,
        _ => unreachable!(),
    }
}

/// Opcode register-pair field for `PUSH`/`POP`, where slot 3 is AF instead of SP.
fn read_rp16_stack(registers: &Registers, code: u8, index: IndexState) -> u16 {
    if code & 0x3 == 3 { registers.af() } else { read_rp16(registers, code, index) }
}

fn write_rp16_stack(registers: &mut Registers, code: u8, index: IndexState, value: u16) {
    if code & 0x3 == 3 {
        registers.set_af(value);
    } else {
        write_rp16(registers, code, index, value);
    }
}

fn condition_met(registers: &Registers, code: u8) -> bool {
    match code & 0x7 {
        0 => !registers.f.zero(),
        1 => registers.f.zero(),
        2 => !registers.f.carry(),
        3 => registers.f.carry(),
        4 => !registers.f.overflow(),
        5 => registers.f.overflow(),
        6 => !registers.f.sign(),
        7 => registers.f.sign(),
        _ => unreachable!(),
    }
}

/// Top-level opcode dispatch. `index` indicates whether a DD/FD prefix has redirected HL
/// references to IX/IY for this instruction.
pub(super) fn execute<B: BusInterface>(
    cpu: &mut Z80,
    bus: &mut B,
    opcode: u8,
    index: IndexState,
) {
    match opcode {
        0x00 => {}
        0x01 | 0x11 | 0x21 | 0x31 => {
            let value = fetch_u16(cpu, bus);
            write_rp16(&mut cpu.registers, opcode >> 4, index, value);
        }
        0x02 => {
            bus.write_memory(cpu.registers.bc(), cpu.registers.a);
            cpu.tick(3);
        }
        0x03 | 0x13 | 0x23 | 0x33 => {
            let value = read_rp16(&cpu.registers, opcode >> 4, index);
            write_rp16(&mut cpu.registers, opcode >> 4, index, value.wrapping_add(1));
            cpu.tick(2);
        }
        0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
            arithmetic::inc_r8(cpu, bus, (opcode >> 3) & 0x7, index);
        }
        0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
            arithmetic::dec_r8(cpu, bus, (opcode >> 3) & 0x7, index);
        }
        0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
            let imm = fetch_u8(cpu, bus);
            write_r8(cpu, bus, (opcode >> 3) & 0x7, index, imm);
        }
        0x07 => arithmetic::rlca(cpu),
        0x08 => {
            let (af, af_alt) = (cpu.registers.af(), u16::from_be_bytes([cpu.registers.a_alt, cpu.registers.f_alt.to_byte()]));
            cpu.registers.set_af(af_alt);
            let [a, f] = af.to_be_bytes();
            cpu.registers.a_alt = a;
            cpu.registers.f_alt = f.into();
        }
        0x09 | 0x19 | 0x29 | 0x39 => arithmetic::add_hl_rp(cpu, opcode >> 4, index),
        0x0A => {
            cpu.registers.a = bus.read_memory(cpu.registers.bc());
            cpu.tick(3);
        }
        0x0B | 0x1B | 0x2B | 0x3B => {
            let value = read_rp16(&cpu.registers, opcode >> 4, index);
            write_rp16(&mut cpu.registers, opcode >> 4, index, value.wrapping_sub(1));
            cpu.tick(2);
        }
        0x0F => arithmetic::rrca(cpu),
        0x10 => control::djnz(cpu, bus),
        0x12 => {
            bus.write_memory(cpu.registers.de(), cpu.registers.a);
            cpu.tick(3);
        }
        0x17 => arithmetic::rla(cpu),
        0x18 => control::jr_unconditional(cpu, bus),
        0x1A => {
            cpu.registers.a = bus.read_memory(cpu.registers.de());
            cpu.tick(3);
        }
        0x1F => arithmetic::rra(cpu),
        0x20 | 0x28 | 0x30 | 0x38 => control::jr_conditional(cpu, bus, (opcode >> 3) & 0x3),
        0x22 => {
            let addr = fetch_u16(cpu, bus);
            let value = read_rp16(&cpu.registers, 0x2, index);
            write_u16_to_memory(cpu, bus, addr, value);
        }
        0x27 => arithmetic::daa(cpu),
        0x2A => {
            let addr = fetch_u16(cpu, bus);
            let value = read_u16_from_memory(cpu, bus, addr);
            write_rp16(&mut cpu.registers, 0x2, index, value);
        }
        0x2F => {
            cpu.registers.a = !cpu.registers.a;
            cpu.registers.f.set_subtract(true).set_half_carry(true).set_xy_from(cpu.registers.a);
        }
        0x32 => {
            let addr = fetch_u16(cpu, bus);
            bus.write_memory(addr, cpu.registers.a);
            cpu.tick(3);
        }
        0x37 => {
            cpu.registers.f.set_carry(true).set_subtract(false).set_half_carry(false);
            let a = cpu.registers.a;
            cpu.registers.f.set_xy_from(a);
        }
        0x3A => {
            let addr = fetch_u16(cpu, bus);
            cpu.registers.a = bus.read_memory(addr);
            cpu.tick(3);
        }
        0x3F => {
            let carry = cpu.registers.f.carry();
            cpu.registers.f.set_half_carry(carry).set_carry(!carry).set_subtract(false);
            let a = cpu.registers.a;
            cpu.registers.f.set_xy_from(a);
        }
        0x76 => {
            cpu.registers.halted = true;
        }
        0x40..=0x7F => {
            // LD r,r' block (0x76 HALT already handled above)
            let value = read_r8(cpu, bus, opcode, index);
            write_r8(cpu, bus, opcode >> 3, index, value);
        }
        0x80..=0xBF => arithmetic::alu_a_r8(cpu, bus, (opcode >> 3) & 0x7, opcode, index),
        0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
            control::ret_conditional(cpu, bus, (opcode >> 3) & 0x7);
        }
        0xC1 | 0xD1 | 0xE1 | 0xF1 => {
            let value = cpu.pop(bus);
            write_rp16_stack(&mut cpu.registers, opcode >> 4, index, value);
        }
        0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
            control::jp_conditional(cpu, bus, (opcode >> 3) & 0x7);
        }
        0xC3 => control::jp_unconditional(cpu, bus),
        0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
            control::call_conditional(cpu, bus, (opcode >> 3) & 0x7);
        }
        0xC5 | 0xD5 | 0xE5 | 0xF5 => {
            let value = read_rp16_stack(&cpu.registers, opcode >> 4, index);
            cpu.tick(1);
            cpu.push(bus, value);
        }
        0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
            let imm = fetch_u8(cpu, bus);
            arithmetic::alu_a_value((opcode >> 3) & 0x7, cpu, imm);
        }
        0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
            cpu.tick(1);
            let pc = cpu.registers.pc;
            cpu.push(bus, pc);
            cpu.registers.pc = u16::from(opcode & 0x38);
        }
        0xC9 => {
            let pc = cpu.pop(bus);
            cpu.registers.pc = pc;
        }
        0xCB => {
            if index == IndexState::None {
                let sub_opcode = bus.read_memory(cpu.registers.pc);
                cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
                cpu.tick(4);
                bits::execute_cb(cpu, bus, sub_opcode, index);
            } else {
                // DDCB/FDCB: displacement byte comes before the actual sub-opcode.
                let d = read_displacement_no_tick(cpu, bus);
                let sub_opcode = bus.read_memory(cpu.registers.pc);
                cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
                cpu.tick(5);
                bits::execute_ddfdcb(cpu, bus, sub_opcode, index, d);
            }
        }
        0xCD => control::call_unconditional(cpu, bus),
        0xD3 => {
            let port = fetch_u8(cpu, bus);
            let a = cpu.registers.a;
            bus.write_io(u16::from_be_bytes([a, port]), a);
            cpu.tick(4);
        }
        0xD9 => {
            std::mem::swap(&mut cpu.registers.b, &mut cpu.registers.b_alt);
            std::mem::swap(&mut cpu.registers.c, &mut cpu.registers.c_alt);
            std::mem::swap(&mut cpu.registers.d, &mut cpu.registers.d_alt);
            std::mem::swap(&mut cpu.registers.e, &mut cpu.registers.e_alt);
            std::mem::swap(&mut cpu.registers.h, &mut cpu.registers.h_alt);
            std::mem::swap(&mut cpu.registers.l, &mut cpu.registers.l_alt);
        }
        0xDB => {
            let port = fetch_u8(cpu, bus);
            let a = cpu.registers.a;
            cpu.registers.a = bus.read_io(u16::from_be_bytes([a, port]));
            cpu.tick(4);
        }
        0xDD => {
            let next = bus.read_memory(cpu.registers.pc);
            cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
            cpu.tick(4);
            execute(cpu, bus, next, IndexState::Ix);
        }
        0xE3 => {
            let sp_value = read_u16_from_memory(cpu, bus, cpu.registers.sp);
            let reg_value = read_rp16(&cpu.registers, 0x2, index);
            write_u16_to_memory(cpu, bus, cpu.registers.sp, reg_value);
            write_rp16(&mut cpu.registers, 0x2, index, sp_value);
            cpu.tick(2);
        }
        0xE9 => {
            cpu.registers.pc = read_rp16(&cpu.registers, 0x2, index);
        }
        0xEB => {
            let de = cpu.registers.de();
            let hl = cpu.registers.hl();
            cpu.registers.set_de(hl);
            cpu.registers.set_hl(de);
        }
        0xED => {
            let next = bus.read_memory(cpu.registers.pc);
            cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
            cpu.tick(4);
            control::execute_ed(cpu, bus, next);
        }
        0xF3 => {
            cpu.registers.iff1 = false;
            cpu.registers.iff2 = false;
        }
        0xF9 => {
            cpu.registers.sp = read_rp16(&cpu.registers, 0x2, index);
            cpu.tick(2);
        }
        0xFB => {
            cpu.registers.iff1 = true;
            cpu.registers.iff2 = true;
        }
        0xFD => {
            let next = bus.read_memory(cpu.registers.pc);
            cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
            cpu.tick(4);
            execute(cpu, bus, next, IndexState::Iy);
        }
        _ => {
            log::warn!("Unhandled Z80 opcode ${opcode:02X}; treating as NOP");
        }
    }
}

fn read_displacement_no_tick<B: BusInterface>(cpu: &mut Z80, bus: &mut B) -> i8 {
    let byte = bus.read_memory(cpu.registers.pc);
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
    byte as i8
}

pub(super) fn fetch_u8<B: BusInterface>(cpu: &mut Z80, bus: &mut B) -> u8 {
    let byte = bus.read_memory(cpu.registers.pc);
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
    cpu.tick(3);
    byte
}

pub(super) fn fetch_u16<B: BusInterface>(cpu: &mut Z80, bus: &mut B) -> u16 {
    let lsb = fetch_u8(cpu, bus);
    let msb = fetch_u8(cpu, bus);
    u16::from_le_bytes([lsb, msb])
}

pub(super) fn read_u16_from_memory<B: BusInterface>(cpu: &mut Z80, bus: &mut B, addr: u16) -> u16 {
    let lsb = bus.read_memory(addr);
    let msb = bus.read_memory(addr.wrapping_add(1));
    cpu.tick(6);
    u16::from_le_bytes([lsb, msb])
}

pub(super) fn write_u16_to_memory<B: BusInterface>(cpu: &mut Z80, bus: &mut B, addr: u16, value: u16) {
    let [lsb, msb] = value.to_le_bytes();
    bus.write_memory(addr, lsb);
    bus.write_memory(addr.wrapping_add(1), msb);
    cpu.tick(6);
}

