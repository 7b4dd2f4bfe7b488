use super::arithmetic::rotate_shift;
use crate::core::instructions::{read_r8, write_r8};
use crate::core::{IndexState, Z80};
use crate::traits::BusInterface;

fn apply_bit_test(cpu: &mut Z80, bit: u8, value: u8, xy_source: u8) {
    let set = value & (1 << bit) != 0;
    cpu.registers
        .f
        .set_zero(!set)
        .set_overflow(!set)
        .set_sign(bit == 7 && set)
        .set_half_carry(true)
        .set_subtract(false)
        .set_xy_from(xy_source);
}

/// Plain `CB xx` dispatch: rotate/shift (0x00-0x3F), BIT (0x40-0x7F), RES (0x80-0xBF), SET
/// (0xC0-0xFF), against one of the eight `r`/`(HL)` operand slots.
pub(super) fn execute_cb<B: BusInterface>(
    cpu: &mut Z80,
    bus: &mut B,
    sub_opcode: u8,
    index: IndexState,
) {
    let code = sub_opcode & 0x7;
    let group = sub_opcode >> 6;
    let is_memory = code == 6;

    match group {
        0 => {
            let value = read_r8(cpu, bus, code, index);
            let (result, carry) = rotate_shift(sub_opcode >> 3, cpu.registers.f.carry(), value);
            write_r8(cpu, bus, code, index, result);
            cpu.registers
                .f
                .set_sign(result & 0x80 != 0)
                .set_zero(result == 0)
                .set_half_carry(false)
                .set_overflow(result.count_ones() % 2 == 0)
                .set_subtract(false)
                .set_carry(carry)
                .set_xy_from(result);
            if is_memory {
                cpu.tick(1);
            }
        }
        1 => {
            let bit = (sub_opcode >> 3) & 0x7;
            let value = read_r8(cpu, bus, code, index);
            // BIT n,(HL) takes its X/Y flags from the high byte of HL rather than the result.
            let xy_source = if is_memory { cpu.registers.hl().to_be_bytes()[0] } else { value };
            apply_bit_test(cpu, bit, value, xy_source);
            if is_memory {
                cpu.tick(1);
            }
        }
        2 => {
            let bit = (sub_opcode >> 3) & 0x7;
            let value = read_r8(cpu, bus, code, index);
            write_r8(cpu, bus, code, index, value & !(1 << bit));
            if is_memory {
                cpu.tick(1);
            }
        }
        3 => {
            let bit = (sub_opcode >> 3) & 0x7;
            let value = read_r8(cpu, bus, code, index);
            write_r8(cpu, bus, code, index, value | (1 << bit));
            if is_memory {
                cpu.tick(1);
            }
        }
        _ => unreachable!(),
    }
}

/// `DDCB d xx`/`FDCB d xx`: the displacement byte has already been consumed by the caller. Always
/// operates on `(IX+d)`/`(IY+d)`; when the low 3 bits name a register (anything but 6) the result
/// is also copied into that register, an undocumented but well-known side effect.
pub(super) fn execute_ddfdcb<B: BusInterface>(
    cpu: &mut Z80,
    bus: &mut B,
    sub_opcode: u8,
    index: IndexState,
    displacement: i8,
) {
    let base = match index {
        IndexState::Ix => cpu.registers.ix,
        IndexState::Iy => cpu.registers.iy,
        IndexState::None => unreachable!("DDCB/FDCB always carries an index"),
    };
    let addr = base.wrapping_add_signed(i16::from(displacement));
    let value = bus.read_memory(addr);
    cpu.tick(1);

    let code = sub_opcode & 0x7;
    let group = sub_opcode >> 6;

    let result = match group {
        0 => {
            let (result, carry) = rotate_shift(sub_opcode >> 3, cpu.registers.f.carry(), value);
            cpu.registers
                .f
                .set_sign(result & 0x80 != 0)
                .set_zero(result == 0)
                .set_half_carry(false)
                .set_overflow(result.count_ones() % 2 == 0)
                .set_subtract(false)
                .set_carry(carry)
                .set_xy_from(result);
            Some(result)
        }
        1 => {
            let bit = (sub_opcode >> 3) & 0x7;
            // BIT n,(IX+d) takes its X/Y flags from the high byte of the effective address.
            apply_bit_test(cpu, bit, value, (addr >> 8) as u8);
            None
        }
        2 => {
            let bit = (sub_opcode >> 3) & 0x7;
            Some(value & !(1 << bit))
        }
        3 => {
            let bit = (sub_opcode >> 3) & 0x7;
            Some(value | (1 << bit))
        }
        _ => unreachable!(),
    };

    if let Some(result) = result {
        bus.write_memory(addr, result);
        cpu.tick(2);
        if code != 6 {
            write_r8(cpu, bus, code, IndexState::None, result);
        }
    }
}
