//! Bytecode instructions: decoding instruction words into [`SimInstr`] and encoding them back.
//!
//! The decoder is total. Every 16-bit word decodes to some [`SimInstr`];
//! a word with the reserved opcode decodes to [`SimInstr::Reserved`],
//! and it is up to the executor to decide what to do with it.
//!
//! ```
//! use lc3_core::ast::sim::{Opcode, SimInstr};
//! use lc3_core::ast::reg_consts::{R0, R1};
//! use lc3_core::ast::{ImmOrReg, IOffset};
//!
//! let instr = SimInstr::decode(0x1220); // ADD R1, R0, #0
//! assert_eq!(instr, SimInstr::ADD(R1, R0, ImmOrReg::Imm(IOffset::new_trunc(0))));
//! assert_eq!(instr.opcode(), Opcode::ADD);
//! assert_eq!(instr.encode(), 0x1220);
//! assert_eq!(instr.to_string(), "ADD R1, R0, #0");
//! ```

use super::reg_consts::R7;
use super::{CondMask, IOffset, ImmOrReg, Reg, TrapVect8};

/// The 4-bit opcode held in bits `[15:12]` of an instruction word.
///
/// All 16 values are represented, so converting from a word never fails.
/// [`Opcode::Reserved`] (`0b1101`) has no defined operation.
#[allow(clippy::upper_case_acronyms)]
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Opcode {
    BR       = 0b0000,
    ADD      = 0b0001,
    LD       = 0b0010,
    ST       = 0b0011,
    JSR      = 0b0100,
    AND      = 0b0101,
    LDR      = 0b0110,
    STR      = 0b0111,
    RTI      = 0b1000,
    NOT      = 0b1001,
    LDI      = 0b1010,
    STI      = 0b1011,
    JMP      = 0b1100,
    Reserved = 0b1101,
    LEA      = 0b1110,
    TRAP     = 0b1111,
}
impl Opcode {
    /// Extracts the opcode from bits `[15:12]` of an instruction word.
    pub fn of(word: u16) -> Self {
        match word >> 12 {
            0b0000 => Opcode::BR,
            0b0001 => Opcode::ADD,
            0b0010 => Opcode::LD,
            0b0011 => Opcode::ST,
            0b0100 => Opcode::JSR,
            0b0101 => Opcode::AND,
            0b0110 => Opcode::LDR,
            0b0111 => Opcode::STR,
            0b1000 => Opcode::RTI,
            0b1001 => Opcode::NOT,
            0b1010 => Opcode::LDI,
            0b1011 => Opcode::STI,
            0b1100 => Opcode::JMP,
            0b1101 => Opcode::Reserved,
            0b1110 => Opcode::LEA,
            _      => Opcode::TRAP,
        }
    }

    /// The opcode's 4-bit value.
    pub fn bits(self) -> u16 {
        self as u16
    }
}
impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::Reserved => f.write_str("reserved opcode (0b1101)"),
            op => std::fmt::Debug::fmt(op, f),
        }
    }
}

/// A decoded instruction, holding the typed operands of its opcode family.
///
/// `RET` does not have its own variant; it is `JMP R7`.
/// `JSRR` is `JSR` with a register operand.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `BR{n,z,p} PCoffset9`
    BR(CondMask, IOffset<9>),
    /// `ADD DR, SR1, SR2` or `ADD DR, SR1, imm5`
    ADD(Reg, Reg, ImmOrReg<5>),
    /// `LD DR, PCoffset9`
    LD(Reg, IOffset<9>),
    /// `ST SR, PCoffset9`
    ST(Reg, IOffset<9>),
    /// `JSR PCoffset11` or `JSRR BaseR`
    JSR(ImmOrReg<11>),
    /// `AND DR, SR1, SR2` or `AND DR, SR1, imm5`
    AND(Reg, Reg, ImmOrReg<5>),
    /// `LDR DR, BaseR, offset6`
    LDR(Reg, Reg, IOffset<6>),
    /// `STR SR, BaseR, offset6`
    STR(Reg, Reg, IOffset<6>),
    /// `RTI`
    RTI,
    /// `NOT DR, SR`
    NOT(Reg, Reg),
    /// `LDI DR, PCoffset9`
    LDI(Reg, IOffset<9>),
    /// `STI SR, PCoffset9`
    STI(Reg, IOffset<9>),
    /// `JMP BaseR` (`RET` when the base register is R7)
    JMP(Reg),
    /// The reserved opcode. Carries the full instruction word.
    Reserved(u16),
    /// `LEA DR, PCoffset9`
    LEA(Reg, IOffset<9>),
    /// `TRAP trapvect8`
    TRAP(TrapVect8),
}

/// Extracts `width` bits of `word` starting at bit `lo`.
fn field(word: u16, lo: u32, width: u32) -> u16 {
    (word >> lo) & (u16::MAX >> (u16::BITS - width))
}
fn reg_at(word: u16, lo: u32) -> Reg {
    // 3-bit field, always in range
    Reg(field(word, lo, 3) as u8)
}

impl SimInstr {
    /// Decodes an instruction word.
    ///
    /// This never fails and never looks at anything but `word`.
    /// Bits that an opcode does not define (e.g., bits `[4:3]` of register-mode `ADD`) are ignored.
    pub fn decode(word: u16) -> Self {
        let dr = reg_at(word, 9);
        let sr1 = reg_at(word, 6);

        match Opcode::of(word) {
            Opcode::BR => SimInstr::BR(field(word, 9, 3) as CondMask, IOffset::from_field(field(word, 0, 9))),
            Opcode::ADD => SimInstr::ADD(dr, sr1, decode_imm_or_reg(word)),
            Opcode::LD => SimInstr::LD(dr, IOffset::from_field(field(word, 0, 9))),
            Opcode::ST => SimInstr::ST(dr, IOffset::from_field(field(word, 0, 9))),
            Opcode::JSR => match field(word, 11, 1) != 0 {
                true  => SimInstr::JSR(ImmOrReg::Imm(IOffset::from_field(field(word, 0, 11)))),
                false => SimInstr::JSR(ImmOrReg::Reg(sr1)),
            },
            Opcode::AND => SimInstr::AND(dr, sr1, decode_imm_or_reg(word)),
            Opcode::LDR => SimInstr::LDR(dr, sr1, IOffset::from_field(field(word, 0, 6))),
            Opcode::STR => SimInstr::STR(dr, sr1, IOffset::from_field(field(word, 0, 6))),
            Opcode::RTI => SimInstr::RTI,
            Opcode::NOT => SimInstr::NOT(dr, sr1),
            Opcode::LDI => SimInstr::LDI(dr, IOffset::from_field(field(word, 0, 9))),
            Opcode::STI => SimInstr::STI(dr, IOffset::from_field(field(word, 0, 9))),
            Opcode::JMP => SimInstr::JMP(sr1),
            Opcode::Reserved => SimInstr::Reserved(word),
            Opcode::LEA => SimInstr::LEA(dr, IOffset::from_field(field(word, 0, 9))),
            Opcode::TRAP => SimInstr::TRAP(TrapVect8::from_field(field(word, 0, 8))),
        }
    }

    /// The opcode tag of this instruction.
    pub fn opcode(&self) -> Opcode {
        match self {
            SimInstr::BR(_, _)     => Opcode::BR,
            SimInstr::ADD(_, _, _) => Opcode::ADD,
            SimInstr::LD(_, _)     => Opcode::LD,
            SimInstr::ST(_, _)     => Opcode::ST,
            SimInstr::JSR(_)       => Opcode::JSR,
            SimInstr::AND(_, _, _) => Opcode::AND,
            SimInstr::LDR(_, _, _) => Opcode::LDR,
            SimInstr::STR(_, _, _) => Opcode::STR,
            SimInstr::RTI          => Opcode::RTI,
            SimInstr::NOT(_, _)    => Opcode::NOT,
            SimInstr::LDI(_, _)    => Opcode::LDI,
            SimInstr::STI(_, _)    => Opcode::STI,
            SimInstr::JMP(_)       => Opcode::JMP,
            SimInstr::Reserved(_)  => Opcode::Reserved,
            SimInstr::LEA(_, _)    => Opcode::LEA,
            SimInstr::TRAP(_)      => Opcode::TRAP,
        }
    }

    /// Encodes this instruction back into an instruction word.
    ///
    /// Bits the instruction does not define are encoded as 0
    /// (except for `NOT`, whose low 6 bits are encoded as 1s, as the ISA specifies).
    pub fn encode(&self) -> u16 {
        let op = self.opcode().bits() << 12;
        let reg = |r: Reg, lo: u32| u16::from(r.reg_no()) << lo;

        let operands = match *self {
            SimInstr::BR(cc, off) => (u16::from(cc & 0b111) << 9) | off.field(),
            SimInstr::ADD(dr, sr1, sr2) | SimInstr::AND(dr, sr1, sr2) => {
                reg(dr, 9) | reg(sr1, 6) | match sr2 {
                    ImmOrReg::Imm(imm) => (1 << 5) | imm.field(),
                    ImmOrReg::Reg(sr2) => reg(sr2, 0),
                }
            },
            SimInstr::LD(r, off)
            | SimInstr::ST(r, off)
            | SimInstr::LDI(r, off)
            | SimInstr::STI(r, off)
            | SimInstr::LEA(r, off) => reg(r, 9) | off.field(),
            SimInstr::JSR(ImmOrReg::Imm(off)) => (1 << 11) | off.field(),
            SimInstr::JSR(ImmOrReg::Reg(br)) => reg(br, 6),
            SimInstr::LDR(r, br, off) | SimInstr::STR(r, br, off) => reg(r, 9) | reg(br, 6) | off.field(),
            SimInstr::RTI => 0,
            SimInstr::NOT(dr, sr) => reg(dr, 9) | reg(sr, 6) | 0b11_1111,
            SimInstr::JMP(br) => reg(br, 6),
            SimInstr::Reserved(word) => return word,
            SimInstr::TRAP(vect) => vect.field(),
        };

        op | operands
    }
}

fn decode_imm_or_reg(word: u16) -> ImmOrReg<5> {
    match field(word, 5, 1) != 0 {
        true  => ImmOrReg::Imm(IOffset::from_field(field(word, 0, 5))),
        false => ImmOrReg::Reg(reg_at(word, 0)),
    }
}

impl From<u16> for SimInstr {
    fn from(word: u16) -> Self {
        SimInstr::decode(word)
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimInstr::BR(0, off) => write!(f, "NOP {off}"),
            SimInstr::BR(cc, off) => {
                f.write_str("BR")?;
                if cc & 0b100 != 0 { f.write_str("n")?; }
                if cc & 0b010 != 0 { f.write_str("z")?; }
                if cc & 0b001 != 0 { f.write_str("p")?; }
                write!(f, " {off}")
            },
            SimInstr::ADD(dr, sr1, sr2) => write!(f, "ADD {dr}, {sr1}, {sr2}"),
            SimInstr::LD(dr, off) => write!(f, "LD {dr}, {off}"),
            SimInstr::ST(sr, off) => write!(f, "ST {sr}, {off}"),
            SimInstr::JSR(ImmOrReg::Imm(off)) => write!(f, "JSR {off}"),
            SimInstr::JSR(ImmOrReg::Reg(br)) => write!(f, "JSRR {br}"),
            SimInstr::AND(dr, sr1, sr2) => write!(f, "AND {dr}, {sr1}, {sr2}"),
            SimInstr::LDR(dr, br, off) => write!(f, "LDR {dr}, {br}, {off}"),
            SimInstr::STR(sr, br, off) => write!(f, "STR {sr}, {br}, {off}"),
            SimInstr::RTI => f.write_str("RTI"),
            SimInstr::NOT(dr, sr) => write!(f, "NOT {dr}, {sr}"),
            SimInstr::LDI(dr, off) => write!(f, "LDI {dr}, {off}"),
            SimInstr::STI(sr, off) => write!(f, "STI {sr}, {off}"),
            SimInstr::JMP(R7) => f.write_str("RET"),
            SimInstr::JMP(br) => write!(f, "JMP {br}"),
            SimInstr::Reserved(word) => write!(f, ".fill x{word:04X}"),
            SimInstr::LEA(dr, off) => write!(f, "LEA {dr}, {off}"),
            SimInstr::TRAP(vect) => write!(f, "TRAP x{:02X}", vect.get()),
        }
    }
}
