use crate::bus::BusInterface;
use crate::{Mos6502, StatusReadContext};

fn fetch_u8<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> u8 {
    let value = bus.read(cpu.registers.pc);
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
    value
}

fn fetch_u16<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> u16 {
    let lsb = fetch_u8(cpu, bus);
    let msb = fetch_u8(cpu, bus);
    u16::from_le_bytes([lsb, msb])
}

/// Effective address plus whether resolving it crossed a page boundary (adds a cycle for the
/// indexed-read addressing modes, but not for indexed-write or RMW instructions).
struct Operand {
    address: u16,
    page_crossed: bool,
}

fn zero_page<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> Operand {
    Operand { address: u16::from(fetch_u8(cpu, bus)), page_crossed: false }
}

fn zero_page_indexed<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, index: u8) -> Operand {
    let base = fetch_u8(cpu, bus);
    Operand { address: u16::from(base.wrapping_add(index)), page_crossed: false }
}

fn absolute<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> Operand {
    Operand { address: fetch_u16(cpu, bus), page_crossed: false }
}

fn absolute_indexed<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, index: u8) -> Operand {
    let base = fetch_u16(cpu, bus);
    let address = base.wrapping_add(u16::from(index));
    Operand { address, page_crossed: (base & 0xFF00) != (address & 0xFF00) }
}

fn indirect_x<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> Operand {
    let base = fetch_u8(cpu, bus).wrapping_add(cpu.registers.x);
    let lsb = bus.read(u16::from(base));
    let msb = bus.read(u16::from(base.wrapping_add(1)));
    Operand { address: u16::from_le_bytes([lsb, msb]), page_crossed: false }
}

fn indirect_y<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B) -> Operand {
    let pointer = fetch_u8(cpu, bus);
    let lsb = bus.read(u16::from(pointer));
    let msb = bus.read(u16::from(pointer.wrapping_add(1)));
    let base = u16::from_le_bytes([lsb, msb]);
    let address = base.wrapping_add(u16::from(cpu.registers.y));
    Operand { address, page_crossed: (base & 0xFF00) != (address & 0xFF00) }
}

fn branch<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, condition: bool) {
    let offset = fetch_u8(cpu, bus) as i8;
    if condition {
        let old_pc = cpu.registers.pc;
        let new_pc = old_pc.wrapping_add_signed(i16::from(offset));
        cpu.registers.pc = new_pc;
        cpu.tick(if old_pc & 0xFF00 != new_pc & 0xFF00 { 2 } else { 1 });
    }
}

fn set_nz(cpu: &mut Mos6502, value: u8) -> u8 {
    cpu.registers.status.set_nz_from(value);
    value
}

fn adc(cpu: &mut Mos6502, value: u8) {
    let a = cpu.registers.accumulator;
    let carry_in = u16::from(cpu.registers.status.carry);
    let wide = u16::from(a) + u16::from(value) + carry_in;
    let result = wide as u8;
    let overflow = (a ^ value) & 0x80 == 0 && (a ^ result) & 0x80 != 0;

    cpu.registers.accumulator = result;
    cpu.registers.status.set_carry(wide > 0xFF).set_overflow(overflow);
    set_nz(cpu, result);
}

fn sbc(cpu: &mut Mos6502, value: u8) {
    // SBC is ADC with the operand's bits inverted.
    adc(cpu, !value);
}

fn compare(cpu: &mut Mos6502, register: u8, value: u8) {
    let result = register.wrapping_sub(value);
    cpu.registers.status.set_carry(register >= value);
    set_nz(cpu, result);
}

/// Shared by ASL/LSR/ROL/ROR: real hardware writes the unmodified value back before writing the
/// shifted result, which matters if the address is a hardware register with write side effects.
fn read_modify_write<B: BusInterface>(
    cpu: &mut Mos6502,
    bus: &mut B,
    address: u16,
    op: impl FnOnce(&mut Mos6502, u8) -> u8,
) {
    let value = bus.read(address);
    bus.write(address, value);
    let result = op(cpu, value);
    bus.write(address, result);
}

fn asl(cpu: &mut Mos6502, value: u8) -> u8 {
    cpu.registers.status.set_carry(value & 0x80 != 0);
    set_nz(cpu, value << 1)
}

fn lsr(cpu: &mut Mos6502, value: u8) -> u8 {
    cpu.registers.status.set_carry(value & 0x01 != 0);
    set_nz(cpu, value >> 1)
}

fn rol(cpu: &mut Mos6502, value: u8) -> u8 {
    let carry_in = u8::from(cpu.registers.status.carry);
    cpu.registers.status.set_carry(value & 0x80 != 0);
    set_nz(cpu, (value << 1) | carry_in)
}

fn ror(cpu: &mut Mos6502, value: u8) -> u8 {
    let carry_in = u8::from(cpu.registers.status.carry);
    cpu.registers.status.set_carry(value & 0x01 != 0);
    set_nz(cpu, (value >> 1) | (carry_in << 7))
}

/// Execute one already-fetched opcode, including any operand bytes it still needs to read.
pub(super) fn execute<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) {
    match opcode {
        0x00 => {
            // BRK: PC is pushed pointing one past the signature byte that follows BRK's opcode.
            cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
            let [pcl, pch] = cpu.registers.pc.to_le_bytes();
            cpu.push(bus, pch);
            cpu.push(bus, pcl);
            let status_byte = cpu.registers.status.to_byte(StatusReadContext::Brk);
            cpu.push(bus, status_byte);
            cpu.registers.status.interrupt_disable = true;
            cpu.registers.pc = u16::from_le_bytes([bus.read(0xFFFE), bus.read(0xFFFF)]);
            cpu.tick(7);
        }
        0x40 => {
            let status_byte = cpu.pop(bus);
            cpu.registers.status = crate::StatusFlags::from_byte(status_byte);
            let pcl = cpu.pop(bus);
            let pch = cpu.pop(bus);
            cpu.registers.pc = u16::from_le_bytes([pcl, pch]);
            cpu.tick(6);
        }
        0x60 => {
            let pcl = cpu.pop(bus);
            let pch = cpu.pop(bus);
            cpu.registers.pc = u16::from_le_bytes([pcl, pch]).wrapping_add(1);
            cpu.tick(6);
        }
        0x20 => {
            let target = fetch_u16(cpu, bus);
            let return_addr = cpu.registers.pc.wrapping_sub(1);
            let [lsb, msb] = return_addr.to_le_bytes();
            cpu.push(bus, msb);
            cpu.push(bus, lsb);
            cpu.registers.pc = target;
            cpu.tick(6);
        }
        0x4C => {
            cpu.registers.pc = fetch_u16(cpu, bus);
            cpu.tick(3);
        }
        0x6C => {
            let pointer = fetch_u16(cpu, bus);
            // Hardware bug: if the pointer's low byte is $FF, the high byte is fetched from the
            // start of the same page instead of the next page.
            let hi_addr = (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF);
            let lsb = bus.read(pointer);
            let msb = bus.read(hi_addr);
            cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
            cpu.tick(5);
        }
        0xEA => cpu.tick(2),

        // Flag instructions
        0x18 => {
            cpu.registers.status.set_carry(false);
            cpu.tick(2);
        }
        0x38 => {
            cpu.registers.status.set_carry(true);
            cpu.tick(2);
        }
        0x58 => {
            cpu.registers.status.interrupt_disable = false;
            cpu.tick(2);
        }
        0x78 => {
            cpu.registers.status.interrupt_disable = true;
            cpu.tick(2);
        }
        0xB8 => {
            cpu.registers.status.set_overflow(false);
            cpu.tick(2);
        }
        0xD8 => {
            cpu.registers.status.decimal = false;
            cpu.tick(2);
        }
        0xF8 => {
            cpu.registers.status.decimal = true;
            cpu.tick(2);
        }

        // Register transfers
        0xAA => {
            let a = cpu.registers.accumulator;
            cpu.registers.x = set_nz(cpu, a);
            cpu.tick(2);
        }
        0xA8 => {
            let a = cpu.registers.accumulator;
            cpu.registers.y = set_nz(cpu, a);
            cpu.tick(2);
        }
        0xBA => {
            let sp = cpu.registers.sp;
            cpu.registers.x = set_nz(cpu, sp);
            cpu.tick(2);
        }
        0x8A => {
            let x = cpu.registers.x;
            cpu.registers.accumulator = set_nz(cpu, x);
            cpu.tick(2);
        }
        0x9A => {
            cpu.registers.sp = cpu.registers.x;
            cpu.tick(2);
        }
        0x98 => {
            let y = cpu.registers.y;
            cpu.registers.accumulator = set_nz(cpu, y);
            cpu.tick(2);
        }

        // Stack
        0x48 => {
            let a = cpu.registers.accumulator;
            cpu.push(bus, a);
            cpu.tick(3);
        }
        0x68 => {
            let value = cpu.pop(bus);
            cpu.registers.accumulator = set_nz(cpu, value);
            cpu.tick(4);
        }
        0x08 => {
            let status_byte = cpu.registers.status.to_byte(StatusReadContext::PushStack);
            cpu.push(bus, status_byte);
            cpu.tick(3);
        }
        0x28 => {
            let status_byte = cpu.pop(bus);
            cpu.registers.status = crate::StatusFlags::from_byte(status_byte);
            cpu.tick(4);
        }

        // Increments / decrements
        0xE8 => {
            let x = cpu.registers.x.wrapping_add(1);
            cpu.registers.x = set_nz(cpu, x);
            cpu.tick(2);
        }
        0xC8 => {
            let y = cpu.registers.y.wrapping_add(1);
            cpu.registers.y = set_nz(cpu, y);
            cpu.tick(2);
        }
        0xCA => {
            let x = cpu.registers.x.wrapping_sub(1);
            cpu.registers.x = set_nz(cpu, x);
            cpu.tick(2);
        }
        0x88 => {
            let y = cpu.registers.y.wrapping_sub(1);
            cpu.registers.y = set_nz(cpu, y);
            cpu.tick(2);
        }
        0xE6 | 0xF6 | 0xEE | 0xFE => {
            let (op, cycles) = addressed_rmw(cpu, bus, opcode);
            read_modify_write(cpu, bus, op.address, |cpu, v| set_nz(cpu, v.wrapping_add(1)));
            cpu.tick(cycles);
        }
        0xC6 | 0xD6 | 0xCE | 0xDE => {
            let (op, cycles) = addressed_rmw(cpu, bus, opcode);
            read_modify_write(cpu, bus, op.address, |cpu, v| set_nz(cpu, v.wrapping_sub(1)));
            cpu.tick(cycles);
        }

        // Shifts/rotates, accumulator and memory forms
        0x0A => {
            let a = cpu.registers.accumulator;
            cpu.registers.accumulator = asl(cpu, a);
            cpu.tick(2);
        }
        0x06 | 0x16 | 0x0E | 0x1E => {
            let (op, cycles) = addressed_rmw(cpu, bus, opcode);
            read_modify_write(cpu, bus, op.address, asl);
            cpu.tick(cycles);
        }
        0x4A => {
            let a = cpu.registers.accumulator;
            cpu.registers.accumulator = lsr(cpu, a);
            cpu.tick(2);
        }
        0x46 | 0x56 | 0x4E | 0x5E => {
            let (op, cycles) = addressed_rmw(cpu, bus, opcode);
            read_modify_write(cpu, bus, op.address, lsr);
            cpu.tick(cycles);
        }
        0x2A => {
            let a = cpu.registers.accumulator;
            cpu.registers.accumulator = rol(cpu, a);
            cpu.tick(2);
        }
        0x26 | 0x36 | 0x2E | 0x3E => {
            let (op, cycles) = addressed_rmw(cpu, bus, opcode);
            read_modify_write(cpu, bus, op.address, rol);
            cpu.tick(cycles);
        }
        0x6A => {
            let a = cpu.registers.accumulator;
            cpu.registers.accumulator = ror(cpu, a);
            cpu.tick(2);
        }
        0x66 | 0x76 | 0x6E | 0x7E => {
            let (op, cycles) = addressed_rmw(cpu, bus, opcode);
            read_modify_write(cpu, bus, op.address, ror);
            cpu.tick(cycles);
        }

        // Branches
        0x10 => branch_op(cpu, bus, !cpu.registers.status.negative),
        0x30 => branch_op(cpu, bus, cpu.registers.status.negative),
        0x50 => branch_op(cpu, bus, !cpu.registers.status.overflow),
        0x70 => branch_op(cpu, bus, cpu.registers.status.overflow),
        0x90 => branch_op(cpu, bus, !cpu.registers.status.carry),
        0xB0 => branch_op(cpu, bus, cpu.registers.status.carry),
        0xD0 => branch_op(cpu, bus, !cpu.registers.status.zero),
        0xF0 => branch_op(cpu, bus, cpu.registers.status.zero),

        // BIT
        0x24 | 0x2C => {
            let (op, cycles) = addressed_read(cpu, bus, opcode);
            let value = bus.read(op.address);
            let a = cpu.registers.accumulator;
            cpu.registers
                .status
                .set_zero(a & value == 0)
                .set_negative(value & 0x80 != 0)
                .set_overflow(value & 0x40 != 0);
            cpu.tick(cycles);
        }

        // ALU group: ORA,AND,EOR,ADC,STA,LDA,CMP,SBC share an addressing-mode column layout
        0x01 | 0x05 | 0x09 | 0x0D | 0x11 | 0x15 | 0x19 | 0x1D => alu_group(cpu, bus, opcode, 0),
        0x21 | 0x25 | 0x29 | 0x2D | 0x31 | 0x35 | 0x39 | 0x3D => alu_group(cpu, bus, opcode, 1),
        0x41 | 0x45 | 0x49 | 0x4D | 0x51 | 0x55 | 0x59 | 0x5D => alu_group(cpu, bus, opcode, 2),
        0x61 | 0x65 | 0x69 | 0x6D | 0x71 | 0x75 | 0x79 | 0x7D => alu_group(cpu, bus, opcode, 3),
        0x81 | 0x85 | 0x8D | 0x91 | 0x95 | 0x99 | 0x9D => sta_group(cpu, bus, opcode),
        0xA1 | 0xA5 | 0xA9 | 0xAD | 0xB1 | 0xB5 | 0xB9 | 0xBD => lda_group(cpu, bus, opcode),
        0xC1 | 0xC5 | 0xC9 | 0xCD | 0xD1 | 0xD5 | 0xD9 | 0xDD => alu_group(cpu, bus, opcode, 6),
        0xE1 | 0xE5 | 0xE9 | 0xED | 0xF1 | 0xF5 | 0xF9 | 0xFD => alu_group(cpu, bus, opcode, 7),

        // LDX/STX/LDY/STY/CPX/CPY (their own addressing-mode columns)
        0xA2 => {
            let value = fetch_u8(cpu, bus);
            cpu.registers.x = set_nz(cpu, value);
            cpu.tick(2);
        }
        0xA6 | 0xB6 | 0xAE | 0xBE => {
            let (op, cycles) = addressed_x_load(cpu, bus, opcode);
            let value = bus.read(op.address);
            cpu.registers.x = set_nz(cpu, value);
            cpu.tick(cycles + u32::from(op.page_crossed));
        }
        0x86 | 0x96 | 0x8E => {
            let op = addressed_x_store(cpu, bus, opcode);
            let x = cpu.registers.x;
            bus.write(op.address, x);
            cpu.tick(match opcode {
                0x86 => 3,
                0x96 => 4,
                _ => 4,
            });
        }
        0xA0 => {
            let value = fetch_u8(cpu, bus);
            cpu.registers.y = set_nz(cpu, value);
            cpu.tick(2);
        }
        0xA4 | 0xB4 | 0xAC | 0xBC => {
            let (op, cycles) = addressed_y_load(cpu, bus, opcode);
            let value = bus.read(op.address);
            cpu.registers.y = set_nz(cpu, value);
            cpu.tick(cycles + u32::from(op.page_crossed));
        }
        0x84 | 0x94 | 0x8C => {
            let op = addressed_y_store(cpu, bus, opcode);
            let y = cpu.registers.y;
            bus.write(op.address, y);
            cpu.tick(match opcode {
                0x84 => 3,
                0x94 => 4,
                _ => 4,
            });
        }
        0xE0 => {
            let value = fetch_u8(cpu, bus);
            let x = cpu.registers.x;
            compare(cpu, x, value);
            cpu.tick(2);
        }
        0xE4 | 0xEC => {
            let op = if opcode == 0xE4 { zero_page(cpu, bus) } else { absolute(cpu, bus) };
            let value = bus.read(op.address);
            let x = cpu.registers.x;
            compare(cpu, x, value);
            cpu.tick(if opcode == 0xE4 { 3 } else { 4 });
        }
        0xC0 => {
            let value = fetch_u8(cpu, bus);
            let y = cpu.registers.y;
            compare(cpu, y, value);
            cpu.tick(2);
        }
        0xC4 | 0xCC => {
            let op = if opcode == 0xC4 { zero_page(cpu, bus) } else { absolute(cpu, bus) };
            let value = bus.read(op.address);
            let y = cpu.registers.y;
            compare(cpu, y, value);
            cpu.tick(if opcode == 0xC4 { 3 } else { 4 });
        }

        _ => {
            log::trace!("Unofficial/unhandled 6502 opcode ${opcode:02X}; treating as single-cycle NOP");
            cpu.tick(2);
        }
    }
}

fn branch_op<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, condition: bool) {
    cpu.tick(2);
    branch(cpu, bus, condition);
}

/// Resolves the addressing mode for the INC/DEC/ASL/LSR/ROL/ROR column layout, returning the
/// operand and base cycle count (RMW instructions never skip the extra cycle on page crossing).
fn addressed_rmw<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> (Operand, u32) {
    match opcode & 0x1F {
        0x06 => (zero_page(cpu, bus), 5),
        0x16 => (zero_page_indexed(cpu, bus, cpu.registers.x), 6),
        0x0E => (absolute(cpu, bus), 6),
        0x1E => {
            let x = cpu.registers.x;
            (absolute_indexed(cpu, bus, x), 7)
        }
        _ => unreachable!("opcode {opcode:#04x} is not in the RMW column layout"),
    }
}

fn addressed_read<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> (Operand, u32) {
    match opcode {
        0x24 => (zero_page(cpu, bus), 3),
        0x2C => (absolute(cpu, bus), 4),
        _ => unreachable!(),
    }
}

fn addressed_x_load<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> (Operand, u32) {
    match opcode {
        0xA6 => (zero_page(cpu, bus), 3),
        0xB6 => (zero_page_indexed(cpu, bus, cpu.registers.y), 4),
        0xAE => (absolute(cpu, bus), 4),
        0xBE => {
            let y = cpu.registers.y;
            (absolute_indexed(cpu, bus, y), 4)
        }
        _ => unreachable!(),
    }
}

fn addressed_x_store<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> Operand {
    match opcode {
        0x86 => zero_page(cpu, bus),
        0x96 => zero_page_indexed(cpu, bus, cpu.registers.y),
        0x8E => absolute(cpu, bus),
        _ => unreachable!(),
    }
}

fn addressed_y_load<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> (Operand, u32) {
    match opcode {
        0xA4 => (zero_page(cpu, bus), 3),
        0xB4 => (zero_page_indexed(cpu, bus, cpu.registers.x), 4),
        0xAC => (absolute(cpu, bus), 4),
        0xBC => {
            let x = cpu.registers.x;
            (absolute_indexed(cpu, bus, x), 4)
        }
        _ => unreachable!(),
    }
}

fn addressed_y_store<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) -> Operand {
    match opcode {
        0x84 => zero_page(cpu, bus),
        0x94 => zero_page_indexed(cpu, bus, cpu.registers.x),
        0x8C => absolute(cpu, bus),
        _ => unreachable!(),
    }
}

/// Resolves one of the 8 addressing-mode columns shared by ORA/AND/EOR/ADC/CMP/SBC: (zp,X),
/// zp, #imm, abs, (zp),Y, zp,X, abs,Y, abs,X.
fn resolve_alu_operand<B: BusInterface>(
    cpu: &mut Mos6502,
    bus: &mut B,
    opcode: u8,
) -> (Operand, u32) {
    match opcode & 0x1F {
        0x01 => (indirect_x(cpu, bus), 6),
        0x05 => (zero_page(cpu, bus), 3),
        0x09 => (Operand { address: cpu.registers.pc, page_crossed: false }, 2),
        0x0D => (absolute(cpu, bus), 4),
        0x11 => (indirect_y(cpu, bus), 5),
        0x15 => (zero_page_indexed(cpu, bus, cpu.registers.x), 4),
        0x19 => {
            let y = cpu.registers.y;
            (absolute_indexed(cpu, bus, y), 4)
        }
        0x1D => {
            let x = cpu.registers.x;
            (absolute_indexed(cpu, bus, x), 4)
        }
        _ => unreachable!("opcode {opcode:#04x} is not in the ALU column layout"),
    }
}

fn alu_group<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8, op: u8) {
    let is_immediate = opcode & 0x1F == 0x09;
    let (operand, cycles) = resolve_alu_operand(cpu, bus, opcode);
    let value = if is_immediate { fetch_u8(cpu, bus) } else { bus.read(operand.address) };
    let extra = u32::from(!is_immediate && operand.page_crossed);

    match op {
        0 => {
            let a = cpu.registers.accumulator | value;
            cpu.registers.accumulator = set_nz(cpu, a);
        }
        1 => {
            let a = cpu.registers.accumulator & value;
            cpu.registers.accumulator = set_nz(cpu, a);
        }
        2 => {
            let a = cpu.registers.accumulator ^ value;
            cpu.registers.accumulator = set_nz(cpu, a);
        }
        3 => adc(cpu, value),
        6 => {
            let a = cpu.registers.accumulator;
            compare(cpu, a, value);
        }
        7 => sbc(cpu, value),
        _ => unreachable!(),
    }

    cpu.tick(cycles + extra);
}

fn lda_group<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) {
    let is_immediate = opcode & 0x1F == 0x09;
    let (operand, cycles) = resolve_alu_operand(cpu, bus, opcode);
    let value = if is_immediate { fetch_u8(cpu, bus) } else { bus.read(operand.address) };
    let extra = u32::from(!is_immediate && operand.page_crossed);
    cpu.registers.accumulator = set_nz(cpu, value);
    cpu.tick(cycles + extra);
}

fn sta_group<B: BusInterface>(cpu: &mut Mos6502, bus: &mut B, opcode: u8) {
    // STA has no immediate form and never takes the page-cross cycle penalty.
    let operand = match opcode & 0x1F {
        0x01 => indirect_x(cpu, bus),
        0x05 => zero_page(cpu, bus),
        0x0D => absolute(cpu, bus),
        0x11 => indirect_y(cpu, bus),
        0x15 => zero_page_indexed(cpu, bus, cpu.registers.x),
        0x19 => {
            let y = cpu.registers.y;
            absolute_indexed(cpu, bus, y)
        }
        0x1D => {
            let x = cpu.registers.x;
            absolute_indexed(cpu, bus, x)
        }
        _ => unreachable!(),
    };
    let cycles = match opcode & 0x1F {
        0x01 | 0x11 => 6,
        0x05 => 3,
        0x0D => 4,
        0x15 => 4,
        0x19 | 0x1D => 5,
        _ => unreachable!(),
    };
    let a = cpu.registers.accumulator;
    bus.write(operand.address, a);
    cpu.tick(cycles);
}
