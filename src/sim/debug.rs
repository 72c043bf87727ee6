//! Utilities to debug simulation.
//!
//! The key type here is [`Breakpoint`], which can be inserted into the [`Simulator`]'s
//! `breakpoints` field to make [`Simulator::run`] stop early.
use std::fmt::Write;

use crate::ast::{CondMask, Reg};

use super::Simulator;

/// Common breakpoints.
///
/// Breakpoints are checked after each executed instruction.
#[derive(PartialEq, Eq, Hash)]
pub enum Breakpoint {
    /// Break when the PC is equal to the given value.
    PC(u16),

    /// Break when the provided register's value matches a predicate.
    Reg {
        /// Register to check.
        reg: Reg,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the provided memory address holds a value matching a predicate.
    Mem {
        /// Address to check.
        addr: u16,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the condition code matches any bit of the mask (same semantics as `BR`).
    CC(CondMask),
}

impl Breakpoint where Breakpoint: Send + Sync { /* assert Breakpoint is send/sync */ }

impl Breakpoint {
    /// Checks if a break should occur.
    pub fn check(&self, sim: &Simulator) -> bool {
        let m = &sim.machine;
        match self {
            Breakpoint::PC(expected) => *expected == m.pc,
            Breakpoint::Reg { reg, value } => value.check(m.reg_file[*reg]),
            Breakpoint::Mem { addr, value } => value.check(m.mem[*addr]),
            Breakpoint::CC(mask) => mask & m.cc.bits() != 0,
        }
    }
}
impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Breakpoint(")?;
        match self {
            Self::PC(expected) => write!(f, "PC == x{expected:04X}")?,
            Self::Reg { reg, value } => write!(f, "{reg} {value}")?,
            Self::Mem { addr, value } => write!(f, "mem[x{addr:04X}] {value}")?,
            Self::CC(mask) => write!(f, "CC & {mask:03b}")?,
        }
        f.write_char(')')
    }
}

/// Predicate over a word, interpreted as unsigned.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Comparator {
    /// Never breaks.
    Never,
    /// Break if the current value is less than the provided value.
    Lt(u16),
    /// Break if the current value is equal to the provided value.
    Eq(u16),
    /// Break if the current value is less than or equal to the provided value.
    Le(u16),
    /// Break if the current value is greater than the provided value.
    Gt(u16),
    /// Break if the current value is not equal to the provided value.
    Ne(u16),
    /// Break if the current value is greater than or equal to the provided value.
    Ge(u16),
    /// Always breaks.
    Always
}
impl Comparator {
    /// Checks if the operand passes the comparator.
    pub fn check(&self, operand: u16) -> bool {
        match *self {
            Comparator::Never  => false,
            Comparator::Lt(r)  => operand < r,
            Comparator::Eq(r)  => operand == r,
            Comparator::Le(r)  => operand <= r,
            Comparator::Gt(r)  => operand > r,
            Comparator::Ne(r)  => operand != r,
            Comparator::Ge(r)  => operand >= r,
            Comparator::Always => true,
        }
    }
}
impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Never  => f.write_str("never"),
            Comparator::Lt(r)  => write!(f, "< x{r:04X}"),
            Comparator::Eq(r)  => write!(f, "== x{r:04X}"),
            Comparator::Le(r)  => write!(f, "<= x{r:04X}"),
            Comparator::Gt(r)  => write!(f, "> x{r:04X}"),
            Comparator::Ne(r)  => write!(f, "!= x{r:04X}"),
            Comparator::Ge(r)  => write!(f, ">= x{r:04X}"),
            Comparator::Always => f.write_str("always"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Breakpoint, Comparator};
    use crate::ast::reg_consts::R2;

    #[test]
    fn test_comparator() {
        assert!(Comparator::Lt(5).check(4));
        assert!(!Comparator::Lt(5).check(5));
        assert!(Comparator::Ge(5).check(5));
        assert!(Comparator::Ne(0).check(0xFFFF));
        assert!(!Comparator::Never.check(0));
        assert!(Comparator::Always.check(0));
    }

    #[test]
    fn test_breakpoint_debug() {
        assert_eq!(format!("{:?}", Breakpoint::PC(0x3002)), "Breakpoint(PC == x3002)");
        assert_eq!(
            format!("{:?}", Breakpoint::Reg { reg: R2, value: Comparator::Eq(0x10) }),
            "Breakpoint(R2 == x0010)"
        );
        assert_eq!(format!("{:?}", Breakpoint::CC(0b010)), "Breakpoint(CC & 010)");
    }
}
