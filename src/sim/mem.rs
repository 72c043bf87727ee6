//! Architectural storage for the LC-3 simulator.
//!
//! This module consists of:
//! - [`Mem`]: The 64K-word memory.
//! - [`RegFile`]: The register file.
//! - [`ConditionCodes`]: The N/Z/P condition code register.
//! - [`MachineInitStrategy`]: How memory and registers are filled at construction.

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::Reg;

const N: usize = 1 << 16;

/// Trait that describes types that can be used to create the initial value of a memory cell or register.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u16;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u16 {
        rand::random()
    }
}
impl WordFiller for u16 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u16 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates deterministic, seeded values.
    fn generate(&mut self) -> u16 {
        self.gen()
    }
}

/// Strategy used to initialize the memory and register file of the [`Simulator`].
///
/// The default is [`MachineInitStrategy::Known`] with a value of 0 (a zeroed machine).
/// The random strategies are useful to shake out programs which read registers
/// or memory they never wrote.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each word to.
        value: u16
    },

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG is initialized with.
        seed: u64
    },

    /// Initializes each word randomly and non-deterministically.
    Unseeded,
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}
impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Known { value } => Generator::Known(*value),
            MachineInitStrategy::Seeded { seed } => Generator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Unseeded => Generator::Unseeded,
        }
    }
}

enum Generator {
    Known(u16),
    Seeded(Box<StdRng>),
    Unseeded,
}
impl WordFiller for Generator {
    fn generate(&mut self) -> u16 {
        match self {
            Generator::Known(k)  => k.generate(),
            Generator::Seeded(r) => r.generate(),
            Generator::Unseeded  => ().generate(),
        }
    }
}

/// Memory.
///
/// This can be indexed with any `u16` (16-bit address),
/// so every access is in bounds and the address space is circular:
/// anything computing an address with wrapping `u16` arithmetic lands on a real cell.
///
/// Indexing does not notify the simulator's [`AccessObserver`].
/// Only accesses performed by executing instructions are observed.
///
/// ```
/// use lc3_core::sim::mem::Mem;
///
/// let mut mem = Mem::new(&mut 0u16);
/// mem[0x3000] = 11;
/// assert_eq!(mem[0x3000], 11);
///
/// mem.copy_block(0xFFFF, &[1, 2, 3]);
/// assert_eq!((mem[0xFFFF], mem[0x0000], mem[0x0001]), (1, 2, 3));
/// ```
///
/// [`AccessObserver`]: super::observer::AccessObserver
#[derive(Clone)]
pub struct Mem(Box<[u16; N]>);

impl Mem {
    /// Creates a new memory with a provided word creation strategy.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        let data: Box<[u16]> = std::iter::repeat_with(|| filler.generate())
            .take(N)
            .collect();

        match data.try_into() {
            Ok(data) => Self(data),
            Err(_) => unreachable!("iterator should have had {N} elements"),
        }
    }

    /// Copies a contiguous block of words into memory starting at `start`.
    ///
    /// Addresses wrap around past `0xFFFF`.
    /// Blocks longer than the address space overwrite their own beginning.
    pub fn copy_block(&mut self, start: u16, data: &[u16]) {
        for (i, &word) in data.iter().enumerate() {
            // truncation to 16 bits is the wraparound
            let addr = start.wrapping_add(i as u16);
            self[addr] = word;
        }
    }

    /// Views the entire memory as a slice, indexed by address.
    pub fn as_slice(&self) -> &[u16] {
        &*self.0
    }
}
impl std::ops::Index<u16> for Mem {
    type Output = u16;

    fn index(&self, addr: u16) -> &Self::Output {
        &self.0[usize::from(addr)]
    }
}
impl std::ops::IndexMut<u16> for Mem {
    fn index_mut(&mut self, addr: u16) -> &mut Self::Output {
        &mut self.0[usize::from(addr)]
    }
}
impl std::fmt::Debug for Mem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 65536 words is far too many to print; summarize the non-zero cells.
        let nonzero = self.0.iter().filter(|&&w| w != 0).count();
        f.debug_struct("Mem")
            .field("nonzero_words", &nonzero)
            .finish()
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::try_from`]).
///
/// # Example
///
/// ```
/// use lc3_core::sim::mem::RegFile;
/// use lc3_core::ast::reg_consts::R0;
///
/// let mut reg = RegFile::new(&mut 0u16);
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegFile([u16; 8]);
impl RegFile {
    /// Creates a register file filled by the provided word creation strategy.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self(std::array::from_fn(|_| filler.generate()))
    }

    /// The register values, `R0` first.
    pub fn values(&self) -> [u16; 8] {
        self.0
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

/// The condition code register.
///
/// Exactly one of negative, zero, or positive holds at any time.
/// A new machine starts with [`ConditionCodes::Zero`].
///
/// The discriminants match the bit layout of a `BR` mask (`n` = `0b100`, `z` = `0b010`, `p` = `0b001`),
/// so a branch is taken when `mask & cc.bits() != 0`.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ConditionCodes {
    /// The last flag-setting result was negative (bit 15 set).
    Negative = 0b100,
    /// The last flag-setting result was zero.
    #[default]
    Zero = 0b010,
    /// The last flag-setting result was positive.
    Positive = 0b001,
}
impl ConditionCodes {
    /// Computes the condition codes for a result, interpreting it as a signed 16-bit value.
    pub fn from_result(result: u16) -> Self {
        match (result as i16).cmp(&0) {
            std::cmp::Ordering::Less    => ConditionCodes::Negative,
            std::cmp::Ordering::Equal   => ConditionCodes::Zero,
            std::cmp::Ordering::Greater => ConditionCodes::Positive,
        }
    }

    /// The 3-bit `nzp` representation.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Checks whether the condition code is `n`.
    pub fn is_n(self) -> bool {
        self == ConditionCodes::Negative
    }
    /// Checks whether the condition code is `z`.
    pub fn is_z(self) -> bool {
        self == ConditionCodes::Zero
    }
    /// Checks whether the condition code is `p`.
    pub fn is_p(self) -> bool {
        self == ConditionCodes::Positive
    }
}
impl std::fmt::Display for ConditionCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionCodes::Negative => f.write_str("N"),
            ConditionCodes::Zero     => f.write_str("Z"),
            ConditionCodes::Positive => f.write_str("P"),
        }
    }
}
