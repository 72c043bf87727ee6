//! Operand types for decoded LC-3 instructions.
//!
//! These components together are used to construct [`sim::SimInstr`],
//! the typed operand bundle produced by the decoder.
//!
//! Besides the operand types, this module holds [`sign_extend`],
//! which every offset and immediate field goes through when it is extracted from an instruction word.

pub mod sim;

use offset_base::OffsetBacking;

/// Sign-extends the low `width` bits of `value` to a 16-bit signed integer.
///
/// Any bits above `width` are ignored.
///
/// # Examples
///
/// ```
/// use lc3_core::ast::sign_extend;
///
/// assert_eq!(sign_extend(0b01111, 5), 15);
/// assert_eq!(sign_extend(0b10000, 5), -16);
/// assert_eq!(sign_extend(0x1FF, 9), -1);
/// assert_eq!(sign_extend(0xFE05, 9), 5); // upper bits are discarded
/// ```
///
/// # Panics
///
/// This will panic if `width` is not in `1..=16`.
pub fn sign_extend(value: u16, width: u32) -> i16 {
    assert!((1..=16).contains(&width), "field width {width} must be between 1 and 16");
    let shift = 16 - width;
    ((value << shift) as i16) >> shift
}

/// A register. Must be between 0 and 7.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// by using [`Reg::try_from`], or by masking an index with [`Reg::masked`].
///
/// ## Examples
///
/// ```text
/// AND R0, R0, #0
///     ~~  ~~
/// ADD R1, R1, R0
///     ~~  ~~  ~~
/// LDR R2, R6, #0
///     ~~  ~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The 0th register in the register file.
    pub const R0: Reg = Reg(0);
    /// The 1st register in the register file.
    pub const R1: Reg = Reg(1);
    /// The 2nd register in the register file.
    pub const R2: Reg = Reg(2);
    /// The 3rd register in the register file.
    pub const R3: Reg = Reg(3);
    /// The 4th register in the register file.
    pub const R4: Reg = Reg(4);
    /// The 5th register in the register file.
    pub const R5: Reg = Reg(5);
    /// The 6th register in the register file.
    pub const R6: Reg = Reg(6);
    /// The 7th register in the register file.
    ///
    /// By convention, this is the link register that `JSR`/`JSRR` write the return address to.
    pub const R7: Reg = Reg(7);
}
impl Reg {
    /// Creates a register from the low 3 bits of `index`, discarding the rest.
    pub fn masked(index: u8) -> Self {
        Reg(index & 0b111)
    }
    /// Gets the register number of this [`Reg`]. This is always between 0 and 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }
    /// Iterates over all 8 registers in order.
    pub fn all() -> impl Iterator<Item = Reg> {
        (0..8).map(Reg)
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file.
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}

/// Error returned by [`Reg::try_from`] when the index does not name one of the 8 registers.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
#[error("register index {0} is out of range (expected 0-7)")]
pub struct RegOutOfRange(pub u8);

impl TryFrom<u8> for Reg {
    type Error = RegOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Reg(value)),
            _     => Err(RegOutOfRange(value)),
        }
    }
}

/// A branch mask (used for `BR`), must be between 0 and 7.
///
/// A branch is taken if any bit of the mask matches the current condition code:
///
/// | instruction   | mask (bin) |
/// |---------------|------------|
/// | `NOP`         | `000`      |
/// | `BRn`         | `100`      |
/// | `BRz`         | `010`      |
/// | `BRnz`        | `110`      |
/// | `BRp`         | `001`      |
/// | `BRnp`        | `101`      |
/// | `BRzp`        | `011`      |
/// | `BR`, `BRnzp` | `111`      |
///
pub type CondMask = u8;

/// A value representing a signed offset or a signed immediate value.
///
/// `N` indicates the bit width of the field this value was extracted from.
///
/// ## Examples
///
/// `IOffset<5>` is used to represent `ADD`/`AND`'s imm5 operand,
/// `IOffset<6>` the base-register offset of `LDR`/`STR`,
/// `IOffset<9>` the PC offset of `BR`/`LD`/`LDI`/`LEA`/`ST`/`STI`,
/// and `IOffset<11>` the PC offset of `JSR`.
pub type IOffset<const N: u32> = Offset<i16, N>;
/// An unsigned 8-bit trap vector (used for `TRAP`).
pub type TrapVect8 = Offset<u16, 8>;

/// A value representing either an immediate value or a register.
///
/// This is used to handle cases where an operand can be either
/// an immediate value or a register (e.g., in `AND`, `ADD`, and `JSR`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ImmOrReg<const N: u32> {
    #[allow(missing_docs)]
    Imm(IOffset<N>),
    #[allow(missing_docs)]
    Reg(Reg)
}
impl<const N: u32> std::fmt::Display for ImmOrReg<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImmOrReg::Imm(imm) => imm.fmt(f),
            ImmOrReg::Reg(reg) => reg.fmt(f),
        }
    }
}

/// A value representing an offset or an immediate value.
///
/// The `OFF` type represents the backing type of this offset.
/// The signedness of this offset type is dependent on the signedness of the `OFF` type:
/// - `Offset<i16, _>`: signed offset (also aliased as [`IOffset`])
/// - `Offset<u16, _>`: unsigned offset
///
/// `N` indicates the bit width of this offset/immediate value.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Offset<OFF, const N: u32>(OFF);

impl<OFF: std::fmt::Display, const N: u32> std::fmt::Display for Offset<OFF, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
impl<OFF: std::fmt::UpperHex, const N: u32> std::fmt::UpperHex for Offset<OFF, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("x")?;
        self.0.fmt(f)
    }
}

/// The errors that can result from calling [`Offset::new`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
pub enum OffsetNewErr {
    /// The provided offset cannot fit an unsigned integer of the given bitsize.
    #[error("value is too big for unsigned {0}-bit integer")]
    CannotFitUnsigned(u32),
    /// The provided offset cannot fit a signed integer of the given bitsize.
    #[error("value is too big for signed {0}-bit integer")]
    CannotFitSigned(u32)
}

mod offset_base {
    use super::OffsetNewErr;

    /// Any type that could store a value for [`Offset`].
    ///
    /// [`Offset`]: super::Offset
    pub trait OffsetBacking: Copy + Eq {
        /// How many bits are contained within this backing.
        const BITS: u32;

        /// Keeps only the low `bit_size` bits, extending them back to the full backing.
        ///
        /// Signed backings sign-extend, unsigned backings zero-extend.
        fn truncate(self, bit_size: u32) -> Self;

        /// The raw `bit_size`-bit field this value encodes to.
        fn to_field(self, bit_size: u32) -> u16;

        /// The error to raise if a given value doesn't match
        /// its provided value when truncated to a given `bit_size`.
        fn does_not_fit_error(bit_size: u32) -> OffsetNewErr;
    }

    impl OffsetBacking for i16 {
        const BITS: u32 = i16::BITS;

        fn truncate(self, bit_size: u32) -> Self {
            super::sign_extend(self as u16, bit_size)
        }
        fn to_field(self, bit_size: u32) -> u16 {
            (self as u16) & mask(bit_size)
        }
        fn does_not_fit_error(bit_size: u32) -> OffsetNewErr {
            OffsetNewErr::CannotFitSigned(bit_size)
        }
    }
    impl OffsetBacking for u16 {
        const BITS: u32 = u16::BITS;

        fn truncate(self, bit_size: u32) -> Self {
            self & mask(bit_size)
        }
        fn to_field(self, bit_size: u32) -> u16 {
            self & mask(bit_size)
        }
        fn does_not_fit_error(bit_size: u32) -> OffsetNewErr {
            OffsetNewErr::CannotFitUnsigned(bit_size)
        }
    }

    fn mask(bit_size: u32) -> u16 {
        u16::MAX >> (u16::BITS - bit_size)
    }
}

impl<OFF: OffsetBacking, const N: u32> Offset<OFF, N> {
    /// Creates a new offset value.
    /// This must fit within `N` bits of the representation, otherwise an error is raised.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lc3_core::ast::Offset;
    /// #
    /// assert!(Offset::<i16, 5>::new(-16).is_ok());
    /// assert!(Offset::<i16, 5>::new(15).is_ok());
    /// assert!(Offset::<i16, 5>::new(16).is_err());
    ///
    /// assert!(Offset::<u16, 8>::new(0xFF).is_ok());
    /// assert!(Offset::<u16, 8>::new(0x100).is_err());
    /// ```
    ///
    /// # Panics
    ///
    /// This will panic if `N` is zero or larger than the offset backing.
    pub fn new(n: OFF) -> Result<Self, OffsetNewErr> {
        assert!(N >= 1 && N <= OFF::BITS, "bit size {N} is not valid for backing of size {}", OFF::BITS);
        match n == n.truncate(N) {
            true  => Ok(Offset(n)),
            false => Err(OFF::does_not_fit_error(N)),
        }
    }

    /// Creates a new offset by extending the first N bits of the integer,
    /// and discarding the rest.
    ///
    /// The extension is considered sign-extended if the offset's backing is signed,
    /// and zero-extended if the offset's backing is unsigned.
    ///
    /// # Examples
    ///
    /// ```
    /// # use lc3_core::ast::Offset;
    /// #
    /// assert_eq!(Offset::<i16, 5>::new_trunc(15).get(), 15);  // 0b01111
    /// assert_eq!(Offset::<i16, 5>::new_trunc(16).get(), -16); // 0b10000
    /// assert_eq!(Offset::<u16, 5>::new_trunc(32).get(), 0);   // 0b00000
    /// ```
    pub fn new_trunc(n: OFF) -> Self {
        assert!(N >= 1 && N <= OFF::BITS, "bit size {N} is not valid for backing of size {}", OFF::BITS);
        Self(n.truncate(N))
    }

    /// Gets the value of the offset.
    pub fn get(&self) -> OFF {
        self.0
    }

    /// Gets the raw `N`-bit field this offset occupies in an instruction word.
    pub fn field(&self) -> u16 {
        self.0.to_field(N)
    }
}
impl<const N: u32> Offset<i16, N> {
    /// Creates a signed offset from the raw `N`-bit field of an instruction word.
    pub fn from_field(bits: u16) -> Self {
        Self(sign_extend(bits, N))
    }
}
impl<const N: u32> Offset<u16, N> {
    /// Creates an unsigned offset from the raw `N`-bit field of an instruction word.
    pub fn from_field(bits: u16) -> Self {
        Self(bits.truncate(N))
    }
}
