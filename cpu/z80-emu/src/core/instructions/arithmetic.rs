use crate::core::instructions::{read_r8, read_rp16, write_r8, write_rp16};
use crate::core::{IndexState, Z80};
use crate::traits::BusInterface;

fn parity(value: u8) -> bool {
    value.count_ones() % 2 == 0
}

pub(super) fn inc_r8<B: BusInterface>(cpu: &mut Z80, bus: &mut B, code: u8, index: IndexState) {
    let value = read_r8(cpu, bus, code, index);
    let result = value.wrapping_add(1);
    write_r8(cpu, bus, code, index, result);

    cpu.registers
        .f
        .set_sign(result & 0x80 != 0)
        .set_zero(result == 0)
        .set_half_carry(value & 0x0F == 0x0F)
        .set_overflow(value == 0x7F)
        .set_subtract(false)
        .set_xy_from(result);
}

pub(super) fn dec_r8<B: BusInterface>(cpu: &mut Z80, bus: &mut B, code: u8, index: IndexState) {
    let value = read_r8(cpu, bus, code, index);
    let result = value.wrapping_sub(1);
    write_r8(cpu, bus, code, index, result);

    cpu.registers
        .f
        .set_sign(result & 0x80 != 0)
        .set_zero(result == 0)
        .set_half_carry(value & 0x0F == 0x00)
        .set_overflow(value == 0x80)
        .set_subtract(true)
        .set_xy_from(result);
}

pub(super) fn rlca(cpu: &mut Z80) {
    let a = cpu.registers.a;
    let carry = a & 0x80 != 0;
    let result = (a << 1) | u8::from(carry);
    cpu.registers.a = result;
    cpu.registers.f.set_carry(carry).set_half_carry(false).set_subtract(false).set_xy_from(result);
}

pub(super) fn rrca(cpu: &mut Z80) {
    let a = cpu.registers.a;
    let carry = a & 0x01 != 0;
    let result = (a >> 1) | (u8::from(carry) << 7);
    cpu.registers.a = result;
    cpu.registers.f.set_carry(carry).set_half_carry(false).set_subtract(false).set_xy_from(result);
}

pub(super) fn rla(cpu: &mut Z80) {
    let a = cpu.registers.a;
    let old_carry = cpu.registers.f.carry();
    let new_carry = a & 0x80 != 0;
    let result = (a << 1) | u8::from(old_carry);
    cpu.registers.a = result;
    cpu.registers
        .f
        .set_carry(new_carry)
        .set_half_carry(false)
        .set_subtract(false)
        .set_xy_from(result);
}

pub(super) fn rra(cpu: &mut Z80) {
    let a = cpu.registers.a;
    let old_carry = cpu.registers.f.carry();
    let new_carry = a & 0x01 != 0;
    let result = (a >> 1) | (u8::from(old_carry) << 7);
    cpu.registers.a = result;
    cpu.registers
        .f
        .set_carry(new_carry)
        .set_half_carry(false)
        .set_subtract(false)
        .set_xy_from(result);
}

pub(super) fn daa(cpu: &mut Z80) {
    let a = cpu.registers.a;
    let n = cpu.registers.f.subtract();
    let mut correction = 0u8;
    let mut carry = cpu.registers.f.carry();

    if cpu.registers.f.half_carry() || (!n && a & 0x0F > 9) {
        correction |= 0x06;
    }
    if carry || (!n && a > 0x99) {
        correction |= 0x60;
        carry = true;
    }

    let result = if n { a.wrapping_sub(correction) } else { a.wrapping_add(correction) };
    let half_carry = if n {
        cpu.registers.f.half_carry() && (a & 0x0F) < 6
    } else {
        a & 0x0F > 9
    };

    cpu.registers.a = result;
    cpu.registers
        .f
        .set_sign(result & 0x80 != 0)
        .set_zero(result == 0)
        .set_half_carry(half_carry)
        .set_overflow(parity(result))
        .set_carry(carry)
        .set_xy_from(result);
}

pub(super) fn add_hl_rp(cpu: &mut Z80, code: u8, index: IndexState) {
    let hl = read_rp16(&cpu.registers, 0x2, index);
    let operand = read_rp16(&cpu.registers, code, index);
    let (result, carry) = hl.overflowing_add(operand);
    let half_carry = (hl & 0x0FFF) + (operand & 0x0FFF) > 0x0FFF;

    write_rp16(&mut cpu.registers, 0x2, index, result);
    cpu.registers.f.set_half_carry(half_carry).set_subtract(false).set_carry(carry);
    let high_byte = (result >> 8) as u8;
    cpu.registers.f.set_xy_from(high_byte);
    cpu.tick(7);
}

pub(super) fn adc_hl_rp(cpu: &mut Z80, code: u8) {
    let hl = cpu.registers.hl();
    let operand = read_rp16(&cpu.registers, code, IndexState::None);
    let carry_in = u16::from(cpu.registers.f.carry());

    let (partial, carry1) = hl.overflowing_add(operand);
    let (result, carry2) = partial.overflowing_add(carry_in);
    let half_carry = (hl & 0x0FFF) + (operand & 0x0FFF) + carry_in > 0x0FFF;
    let overflow = (hl ^ operand) & 0x8000 == 0 && (hl ^ result) & 0x8000 != 0;

    cpu.registers.set_hl(result);
    cpu.registers
        .f
        .set_sign(result & 0x8000 != 0)
        .set_zero(result == 0)
        .set_half_carry(half_carry)
        .set_overflow(overflow)
        .set_subtract(false)
        .set_carry(carry1 || carry2);
    let high_byte = (result >> 8) as u8;
    cpu.registers.f.set_xy_from(high_byte);
    cpu.tick(7);
}

pub(super) fn sbc_hl_rp(cpu: &mut Z80, code: u8) {
    let hl = cpu.registers.hl();
    let operand = read_rp16(&cpu.registers, code, IndexState::None);
    let carry_in = u16::from(cpu.registers.f.carry());

    let (partial, borrow1) = hl.overflowing_sub(operand);
    let (result, borrow2) = partial.overflowing_sub(carry_in);
    let half_carry = (hl & 0x0FFF) < (operand & 0x0FFF) + carry_in;
    let overflow = (hl ^ operand) & 0x8000 != 0 && (hl ^ result) & 0x8000 != 0;

    cpu.registers.set_hl(result);
    cpu.registers
        .f
        .set_sign(result & 0x8000 != 0)
        .set_zero(result == 0)
        .set_half_carry(half_carry)
        .set_overflow(overflow)
        .set_subtract(true)
        .set_carry(borrow1 || borrow2);
    let high_byte = (result >> 8) as u8;
    cpu.registers.f.set_xy_from(high_byte);
    cpu.tick(7);
}

/// Apply one of the eight ALU operations (ADD,ADC,SUB,SBC,AND,XOR,OR,CP) to A and `value`.
pub(super) fn alu_a_value(op: u8, cpu: &mut Z80, value: u8) {
    let a = cpu.registers.a;
    let carry_in = u8::from(cpu.registers.f.carry());

    let (result, carry, half_carry, overflow, subtract) = match op & 0x7 {
        0 => {
            let (result, carry) = a.overflowing_add(value);
            let half = (a & 0x0F) + (value & 0x0F) > 0x0F;
            let overflow = (a ^ value) & 0x80 == 0 && (a ^ result) & 0x80 != 0;
            (result, carry, half, overflow, false)
        }
        1 => {
            let wide = u16::from(a) + u16::from(value) + u16::from(carry_in);
            let result = wide as u8;
            let half = (a & 0x0F) + (value & 0x0F) + carry_in > 0x0F;
            let overflow = (a ^ value) & 0x80 == 0 && (a ^ result) & 0x80 != 0;
            (result, wide > 0xFF, half, overflow, false)
        }
        2 => {
            let (result, carry) = a.overflowing_sub(value);
            let half = (a & 0x0F) < (value & 0x0F);
            let overflow = (a ^ value) & 0x80 != 0 && (a ^ result) & 0x80 != 0;
            (result, carry, half, overflow, true)
        }
        3 => {
            let wide = i16::from(a) - i16::from(value) - i16::from(carry_in);
            let result = wide as u8;
            let half = i16::from(a & 0x0F) - i16::from(value & 0x0F) - i16::from(carry_in) < 0;
            let overflow = (a ^ value) & 0x80 != 0 && (a ^ result) & 0x80 != 0;
            (result, wide < 0, half, overflow, true)
        }
        4 => {
            let result = a & value;
            (result, false, true, parity(result), false)
        }
        5 => {
            let result = a ^ value;
            (result, false, false, parity(result), false)
        }
        6 => {
            let result = a | value;
            (result, false, false, parity(result), false)
        }
        7 => {
            let (result, carry) = a.overflowing_sub(value);
            let half = (a & 0x0F) < (value & 0x0F);
            let overflow = (a ^ value) & 0x80 != 0 && (a ^ result) & 0x80 != 0;
            // CP sets flags like SUB but does not store the result; X/Y come from the operand.
            cpu.registers
                .f
                .set_sign(result & 0x80 != 0)
                .set_zero(result == 0)
                .set_half_carry(half)
                .set_overflow(overflow)
                .set_subtract(true)
                .set_carry(carry)
                .set_xy_from(value);
            return;
        }
        _ => unreachable!(),
    };

    cpu.registers.a = result;
    cpu.registers
        .f
        .set_sign(result & 0x80 != 0)
        .set_zero(result == 0)
        .set_half_carry(half_carry)
        .set_overflow(overflow)
        .set_subtract(subtract)
        .set_carry(carry)
        .set_xy_from(result);
}

pub(super) fn alu_a_r8<B: BusInterface>(
    cpu: &mut Z80,
    bus: &mut B,
    op: u8,
    opcode: u8,
    index: IndexState,
) {
    let value = read_r8(cpu, bus, opcode, index);
    alu_a_value(op, cpu, value);
}

/// Shared by the CB-prefixed rotate/shift group (RLC,RRC,RL,RR,SLA,SRA,SLL,SRL).
pub(super) fn rotate_shift(op: u8, cpu_carry_in: bool, value: u8) -> (u8, bool) {
    match op & 0x7 {
        0 => {
            let carry = value & 0x80 != 0;
            (((value << 1) | u8::from(carry)), carry)
        }
        1 => {
            let carry = value & 0x01 != 0;
            ((value >> 1) | (u8::from(carry) << 7), carry)
        }
        2 => {
            let carry = value & 0x80 != 0;
            ((value << 1) | u8::from(cpu_carry_in), carry)
        }
        3 => {
            let carry = value & 0x01 != 0;
            ((value >> 1) | (u8::from(cpu_carry_in) << 7), carry)
        }
        4 => {
            let carry = value & 0x80 != 0;
            (value << 1, carry)
        }
        5 => {
            let carry = value & 0x01 != 0;
            ((value >> 1) | (value & 0x80), carry)
        }
        // SLL / SLS: undocumented, shifts left setting bit 0
        6 => {
            let carry = value & 0x80 != 0;
            ((value << 1) | 0x01, carry)
        }
        7 => {
            let carry = value & 0x01 != 0;
            (value >> 1, carry)
        }
        _ => unreachable!(),
    }
}
