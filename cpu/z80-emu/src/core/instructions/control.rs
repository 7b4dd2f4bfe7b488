use crate::core::instructions::{
    condition_met, fetch_u16, fetch_u8, read_rp16, read_u16_from_memory, write_rp16,
    write_u16_to_memory,
};
use crate::core::{IndexState, Z80};
use crate::traits::BusInterface;

use super::arithmetic::{adc_hl_rp, sbc_hl_rp};

pub(super) fn djnz<B: BusInterface>(cpu: &mut Z80, bus: &mut B) {
    let offset = fetch_u8(cpu, bus) as i8;
    cpu.tick(1);
    cpu.registers.b = cpu.registers.b.wrapping_sub(1);
    if cpu.registers.b != 0 {
        cpu.registers.pc = cpu.registers.pc.wrapping_add_signed(i16::from(offset));
        cpu.tick(5);
    }
}

pub(super) fn jr_unconditional<B: BusInterface>(cpu: &mut Z80, bus: &mut B) {
    let offset = fetch_u8(cpu, bus) as i8;
    cpu.registers.pc = cpu.registers.pc.wrapping_add_signed(i16::from(offset));
    cpu.tick(5);
}

pub(super) fn jr_conditional<B: BusInterface>(cpu: &mut Z80, bus: &mut B, code: u8) {
    let offset = fetch_u8(cpu, bus) as i8;
    if condition_met(&cpu.registers, code) {
        cpu.registers.pc = cpu.registers.pc.wrapping_add_signed(i16::from(offset));
        cpu.tick(5);
    }
}

pub(super) fn jp_unconditional<B: BusInterface>(cpu: &mut Z80, bus: &mut B) {
    cpu.registers.pc = fetch_u16(cpu, bus);
}

pub(super) fn jp_conditional<B: BusInterface>(cpu: &mut Z80, bus: &mut B, code: u8) {
    let target = fetch_u16(cpu, bus);
    if condition_met(&cpu.registers, code) {
        cpu.registers.pc = target;
    }
}

pub(super) fn call_unconditional<B: BusInterface>(cpu: &mut Z80, bus: &mut B) {
    let target = fetch_u16(cpu, bus);
    cpu.tick(1);
    push_pc(cpu, bus);
    cpu.registers.pc = target;
}

pub(super) fn call_conditional<B: BusInterface>(cpu: &mut Z80, bus: &mut B, code: u8) {
    let target = fetch_u16(cpu, bus);
    if condition_met(&cpu.registers, code) {
        cpu.tick(1);
        push_pc(cpu, bus);
        cpu.registers.pc = target;
    }
}

pub(super) fn ret_conditional<B: BusInterface>(cpu: &mut Z80, bus: &mut B, code: u8) {
    cpu.tick(1);
    if condition_met(&cpu.registers, code) {
        cpu.registers.pc = pop_pc(cpu, bus);
    }
}

fn push_pc<B: BusInterface>(cpu: &mut Z80, bus: &mut B) {
    let pc = cpu.registers.pc;
    cpu.push(bus, pc);
}

fn pop_pc<B: BusInterface>(cpu: &mut Z80, bus: &mut B) -> u16 {
    cpu.pop(bus)
}

/// ED-prefixed instruction group: I/O, 16-bit ADC/SBC, block transfer/compare/IO, interrupt mode
/// and refresh-register moves, RRD/RLD.
pub(super) fn execute_ed<B: BusInterface>(cpu: &mut Z80, bus: &mut B, opcode: u8) {
    match opcode {
        0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
            let port = cpu.registers.c;
            let value = bus.read_io(u16::from_be_bytes([cpu.registers.b, port]));
            cpu.tick(4);
            if opcode != 0x70 {
                write_r8_by_ed_code(cpu, (opcode >> 3) & 0x7, value);
            }
            cpu.registers
                .f
                .set_sign(value & 0x80 != 0)
                .set_zero(value == 0)
                .set_half_carry(false)
                .set_overflow(value.count_ones() % 2 == 0)
                .set_subtract(false)
                .set_xy_from(value);
        }
        0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
            let value = if opcode == 0x71 { 0 } else { read_r8_by_ed_code(cpu, (opcode >> 3) & 0x7) };
            let port = cpu.registers.c;
            bus.write_io(u16::from_be_bytes([cpu.registers.b, port]), value);
            cpu.tick(4);
        }
        0x42 | 0x52 | 0x62 | 0x72 => {
            sbc_hl_rp(cpu, opcode >> 4);
        }
        0x4A | 0x5A | 0x6A | 0x7A => {
            adc_hl_rp(cpu, opcode >> 4);
        }
        0x43 | 0x53 | 0x63 | 0x73 => {
            let addr = fetch_u16(cpu, bus);
            let value = read_rp16(&cpu.registers, opcode >> 4, IndexState::None);
            write_u16_to_memory(cpu, bus, addr, value);
        }
        0x4B | 0x5B | 0x6B | 0x7B => {
            let addr = fetch_u16(cpu, bus);
            let value = read_u16_from_memory(cpu, bus, addr);
            write_rp16(&mut cpu.registers, opcode >> 4, IndexState::None, value);
        }
        0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
            let a = cpu.registers.a;
            let result = 0u8.wrapping_sub(a);
            cpu.registers.a = result;
            cpu.registers
                .f
                .set_sign(result & 0x80 != 0)
                .set_zero(result == 0)
                .set_half_carry(a & 0x0F != 0)
                .set_overflow(a == 0x80)
                .set_subtract(true)
                .set_carry(a != 0)
                .set_xy_from(result);
        }
        0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
            cpu.registers.iff1 = cpu.registers.iff2;
            cpu.registers.pc = cpu.pop(bus);
        }
        0x46 | 0x4E | 0x66 | 0x6E => {
            cpu.registers.interrupt_mode = crate::core::InterruptMode::Mode0.into();
        }
        0x56 | 0x76 => {
            cpu.registers.interrupt_mode = crate::core::InterruptMode::Mode1.into();
        }
        0x5E | 0x7E => {
            cpu.registers.interrupt_mode = crate::core::InterruptMode::Mode2.into();
        }
        0x47 => {
            cpu.registers.i = cpu.registers.a;
            cpu.tick(1);
        }
        0x4F => {
            cpu.registers.r = cpu.registers.a;
            cpu.tick(1);
        }
        0x57 => {
            cpu.registers.a = cpu.registers.i;
            cpu.tick(1);
            let iff2 = cpu.registers.iff2;
            cpu.registers
                .f
                .set_sign(cpu.registers.a & 0x80 != 0)
                .set_zero(cpu.registers.a == 0)
                .set_half_carry(false)
                .set_overflow(iff2)
                .set_subtract(false)
                .set_xy_from(cpu.registers.a);
        }
        0x5F => {
            cpu.registers.a = cpu.registers.r;
            cpu.tick(1);
            let iff2 = cpu.registers.iff2;
            cpu.registers
                .f
                .set_sign(cpu.registers.a & 0x80 != 0)
                .set_zero(cpu.registers.a == 0)
                .set_half_carry(false)
                .set_overflow(iff2)
                .set_subtract(false)
                .set_xy_from(cpu.registers.a);
        }
        0x67 => {
            let hl = cpu.registers.hl();
            let memory = bus.read_memory(hl);
            let a = cpu.registers.a;
            let result = (a & 0xF0) | (memory & 0x0F);
            bus.write_memory(hl, (memory >> 4) | (a << 4));
            cpu.registers.a = result;
            cpu.tick(4);
            cpu.registers
                .f
                .set_sign(result & 0x80 != 0)
                .set_zero(result == 0)
                .set_half_carry(false)
                .set_overflow(result.count_ones() % 2 == 0)
                .set_subtract(false)
                .set_xy_from(result);
        }
        0x6F => {
            let hl = cpu.registers.hl();
            let memory = bus.read_memory(hl);
            let a = cpu.registers.a;
            let result = (a & 0xF0) | (memory >> 4);
            bus.write_memory(hl, (memory << 4) | (a & 0x0F));
            cpu.registers.a = result;
            cpu.tick(4);
            cpu.registers
                .f
                .set_sign(result & 0x80 != 0)
                .set_zero(result == 0)
                .set_half_carry(false)
                .set_overflow(result.count_ones() % 2 == 0)
                .set_subtract(false)
                .set_xy_from(result);
        }
        0xA0 => block_transfer(cpu, bus, Direction::Increment, false),
        0xB0 => block_transfer(cpu, bus, Direction::Increment, true),
        0xA8 => block_transfer(cpu, bus, Direction::Decrement, false),
        0xB8 => block_transfer(cpu, bus, Direction::Decrement, true),
        0xA1 => block_compare(cpu, bus, Direction::Increment, false),
        0xB1 => block_compare(cpu, bus, Direction::Increment, true),
        0xA9 => block_compare(cpu, bus, Direction::Decrement, false),
        0xB9 => block_compare(cpu, bus, Direction::Decrement, true),
        0xA2 => block_in(cpu, bus, Direction::Increment, false),
        0xB2 => block_in(cpu, bus, Direction::Increment, true),
        0xAA => block_in(cpu, bus, Direction::Decrement, false),
        0xBA => block_in(cpu, bus, Direction::Decrement, true),
        0xA3 => block_out(cpu, bus, Direction::Increment, false),
        0xB3 => block_out(cpu, bus, Direction::Increment, true),
        0xAB => block_out(cpu, bus, Direction::Decrement, false),
        0xBB => block_out(cpu, bus, Direction::Decrement, true),
        _ => {
            log::warn!("Unhandled Z80 ED-prefixed opcode ${opcode:02X}; treating as 2-byte NOP");
        }
    }
}

fn read_r8_by_ed_code(cpu: &Z80, code: u8) -> u8 {
    match code & 0x7 {
        0 => cpu.registers.b,
        1 => cpu.registers.c,
        2 => cpu.registers.d,
        3 => cpu.registers.e,
        4 => cpu.registers.h,
        5 => cpu.registers.l,
        7 => cpu.registers.a,
        _ => 0,
    }
}

fn write_r8_by_ed_code(cpu: &mut Z80, code: u8, value: u8) {
    match code & 0x7 {
        0 => cpu.registers.b = value,
        1 => cpu.registers.c = value,
        2 => cpu.registers.d = value,
        3 => cpu.registers.e = value,
        4 => cpu.registers.h = value,
        5 => cpu.registers.l = value,
        7 => cpu.registers.a = value,
        _ => {}
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Increment,
    Decrement,
}

fn step_hl_de(hl: u16, de: u16, direction: Direction) -> (u16, u16) {
    match direction {
        Direction::Increment => (hl.wrapping_add(1), de.wrapping_add(1)),
        Direction::Decrement => (hl.wrapping_sub(1), de.wrapping_sub(1)),
    }
}

fn block_transfer<B: BusInterface>(cpu: &mut Z80, bus: &mut B, direction: Direction, repeat: bool) {
    let hl = cpu.registers.hl();
    let de = cpu.registers.de();
    let value = bus.read_memory(hl);
    bus.write_memory(de, value);
    cpu.tick(8);

    let (new_hl, new_de) = step_hl_de(hl, de, direction);
    cpu.registers.set_hl(new_hl);
    cpu.registers.set_de(new_de);

    let bc = cpu.registers.bc().wrapping_sub(1);
    cpu.registers.set_bc(bc);

    let transferred = cpu.registers.a.wrapping_add(value);
    cpu.registers
        .f
        .set_half_carry(false)
        .set_subtract(false)
        .set_overflow(bc != 0)
        .set_x(transferred & 0x02 != 0)
        .set_y(transferred & 0x08 != 0);

    if repeat && bc != 0 {
        cpu.registers.pc = cpu.registers.pc.wrapping_sub(2);
        cpu.tick(5);
    }
}

fn block_compare<B: BusInterface>(cpu: &mut Z80, bus: &mut B, direction: Direction, repeat: bool) {
    let hl = cpu.registers.hl();
    let value = bus.read_memory(hl);
    cpu.tick(8);

    let a = cpu.registers.a;
    let result = a.wrapping_sub(value);
    let half_carry = (a & 0x0F) < (value & 0x0F);

    let new_hl = match direction {
        Direction::Increment => hl.wrapping_add(1),
        Direction::Decrement => hl.wrapping_sub(1),
    };
    cpu.registers.set_hl(new_hl);

    let bc = cpu.registers.bc().wrapping_sub(1);
    cpu.registers.set_bc(bc);

    let n = if half_carry { result.wrapping_sub(1) } else { result };
    cpu.registers
        .f
        .set_sign(result & 0x80 != 0)
        .set_zero(result == 0)
        .set_half_carry(half_carry)
        .set_overflow(bc != 0)
        .set_subtract(true)
        .set_x(n & 0x02 != 0)
        .set_y(n & 0x08 != 0);

    if repeat && bc != 0 && result != 0 {
        cpu.registers.pc = cpu.registers.pc.wrapping_sub(2);
        cpu.tick(5);
    }
}

fn block_in<B: BusInterface>(cpu: &mut Z80, bus: &mut B, direction: Direction, repeat: bool) {
    let port = cpu.registers.c;
    let value = bus.read_io(u16::from_be_bytes([cpu.registers.b, port]));
    let hl = cpu.registers.hl();
    bus.write_memory(hl, value);
    cpu.tick(8);

    cpu.registers.b = cpu.registers.b.wrapping_sub(1);
    let new_hl = match direction {
        Direction::Increment => hl.wrapping_add(1),
        Direction::Decrement => hl.wrapping_sub(1),
    };
    cpu.registers.set_hl(new_hl);

    let b = cpu.registers.b;
    cpu.registers.f.set_zero(b == 0).set_subtract(value & 0x80 != 0).set_xy_from(b);

    if repeat && b != 0 {
        cpu.registers.pc = cpu.registers.pc.wrapping_sub(2);
        cpu.tick(5);
    }
}

fn block_out<B: BusInterface>(cpu: &mut Z80, bus: &mut B, direction: Direction, repeat: bool) {
    let hl = cpu.registers.hl();
    let value = bus.read_memory(hl);
    cpu.registers.b = cpu.registers.b.wrapping_sub(1);
    let port = cpu.registers.c;
    bus.write_io(u16::from_be_bytes([cpu.registers.b, port]), value);
    cpu.tick(8);

    let new_hl = match direction {
        Direction::Increment => hl.wrapping_add(1),
        Direction::Decrement => hl.wrapping_sub(1),
    };
    cpu.registers.set_hl(new_hl);

    let b = cpu.registers.b;
    cpu.registers.f.set_zero(b == 0).set_subtract(value & 0x80 != 0).set_xy_from(b);

    if repeat && b != 0 {
        cpu.registers.pc = cpu.registers.pc.wrapping_sub(2);
        cpu.tick(5);
    }
}
