//! The trap extension point.
//!
//! The simulator core does not implement any OS services itself.
//! When a `TRAP` instruction executes, the simulator looks up the trap vector
//! in its [`TrapRegistry`] and hands the [`Machine`] to the registered [`TrapHandler`].
//! A `TRAP` whose vector has no handler is a [`SimErr::UnimplementedOpcode`] fault.
//!
//! This module also provides some handlers:
//! - [`HaltTrap`]: Requests that the run loop stop.
//! - [`console::BufferedConsole`]: Character IO traps over in-memory buffers.
//! - [`console::ChannelConsole`]: Character IO traps over channels.
//!
//! Closures of the form `FnMut(u8, &mut Machine) -> Result<TrapOutcome, TrapErr>` are also handlers:
//!
//! ```
//! use lc3_core::sim::{Machine, Simulator, StepOutcome};
//! use lc3_core::sim::trap::{TrapErr, TrapOutcome};
//! use lc3_core::ast::reg_consts::R0;
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load(0x3000, &[0xF040]); // TRAP x40
//! sim.register_trap_handler(0x40, |_vect: u8, m: &mut Machine| -> Result<TrapOutcome, TrapErr> {
//!     m.reg_file[R0] = 0x2110;
//!     Ok(TrapOutcome::Continue)
//! });
//!
//! assert!(matches!(sim.step(), Ok(StepOutcome::Executed(_))));
//! assert_eq!(sim.register(0), 0x2110);
//! ```
//!
//! [`SimErr::UnimplementedOpcode`]: super::SimErr::UnimplementedOpcode

pub mod console;

use std::collections::BTreeMap;

use super::Machine;

/// Conventional trap vectors of the LC-3 operating system.
pub mod vectors {
    /// Read a character into R0 (no echo).
    pub const GETC: u8 = 0x20;
    /// Write the character in R0.
    pub const OUT: u8 = 0x21;
    /// Write the null-terminated string at R0, one character per word.
    pub const PUTS: u8 = 0x22;
    /// Prompt for, read, and echo a character into R0.
    pub const IN: u8 = 0x23;
    /// Write the null-terminated string at R0, two characters per word.
    pub const PUTSP: u8 = 0x24;
    /// Stop execution.
    pub const HALT: u8 = 0x25;
}

/// What the simulator should do once a trap handler returns.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum TrapOutcome {
    /// The service completed; continue with the next instruction.
    Continue,
    /// The service completed and requests that execution stop.
    Halt,
    /// The service cannot complete yet (e.g., it is waiting for input).
    ///
    /// The simulator rewinds the PC to the `TRAP` instruction so that
    /// the next step retries it. A handler returning this must not have changed the machine.
    Blocked,
}

/// Errors a trap handler can report.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum TrapErr {
    /// The channel backing a console was closed.
    #[error("console channel disconnected")]
    Disconnected,
    /// Any other handler-defined failure.
    #[error("{0}")]
    Custom(String),
}

/// A service that can be bound to a trap vector.
///
/// Handlers run synchronously inside [`Simulator::step`] and must not block.
/// A handler that needs data which is not yet available should return [`TrapOutcome::Blocked`].
///
/// [`Simulator::step`]: super::Simulator::step
pub trait TrapHandler: Send + Sync + 'static {
    /// Performs the service for trap vector `vect`.
    ///
    /// When this is called, the machine's PC already points past the `TRAP` instruction.
    /// Under [`PcTiming::Legacy`], it still holds the `TRAP` instruction's own address,
    /// and the increment happens after the handler returns.
    ///
    /// [`PcTiming::Legacy`]: super::PcTiming::Legacy
    fn call(&mut self, vect: u8, machine: &mut Machine) -> Result<TrapOutcome, TrapErr>;
}
impl<F> TrapHandler for F
    where F: FnMut(u8, &mut Machine) -> Result<TrapOutcome, TrapErr> + Send + Sync + 'static
{
    fn call(&mut self, vect: u8, machine: &mut Machine) -> Result<TrapOutcome, TrapErr> {
        self(vect, machine)
    }
}

/// Trap handler which halts the machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct HaltTrap;
impl TrapHandler for HaltTrap {
    fn call(&mut self, _vect: u8, _machine: &mut Machine) -> Result<TrapOutcome, TrapErr> {
        Ok(TrapOutcome::Halt)
    }
}

/// Mapping from trap vectors to their handlers.
#[derive(Default)]
pub struct TrapRegistry {
    handlers: BTreeMap<u8, Box<dyn TrapHandler>>
}
impl TrapRegistry {
    /// Creates a registry with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the conventional LC-3 services:
    /// the console bound to `GETC`, `OUT`, `PUTS`, `IN`, `PUTSP`, and [`HaltTrap`] bound to `HALT`.
    pub fn with_console(console: impl TrapHandler + Clone) -> Self {
        let mut registry = Self::new();
        registry.register_console(console);
        registry.register(vectors::HALT, HaltTrap);
        registry
    }

    /// Binds a handler to a trap vector, returning the handler previously bound to it.
    pub fn register(&mut self, vect: u8, handler: impl TrapHandler) -> Option<Box<dyn TrapHandler>> {
        self.handlers.insert(vect, Box::new(handler))
    }

    /// Binds a console to the character IO vectors (`GETC`, `OUT`, `PUTS`, `IN`, `PUTSP`).
    pub fn register_console(&mut self, console: impl TrapHandler + Clone) {
        use vectors::*;

        for vect in [GETC, OUT, PUTS, IN, PUTSP] {
            self.register(vect, console.clone());
        }
    }

    /// Removes the handler bound to a trap vector.
    pub fn unregister(&mut self, vect: u8) -> Option<Box<dyn TrapHandler>> {
        self.handlers.remove(&vect)
    }

    /// Checks whether a handler is bound to the trap vector.
    pub fn is_registered(&self, vect: u8) -> bool {
        self.handlers.contains_key(&vect)
    }

    /// All vectors that have handlers, in ascending order.
    pub fn vectors(&self) -> impl Iterator<Item = u8> + '_ {
        self.handlers.keys().copied()
    }

    /// Runs the handler for `vect`, or returns `None` if no handler is bound.
    pub fn dispatch(&mut self, vect: u8, machine: &mut Machine) -> Option<Result<TrapOutcome, TrapErr>> {
        let handler = self.handlers.get_mut(&vect)?;
        tracing::debug!("dispatching TRAP x{vect:02X}");
        Some(handler.call(vect, machine))
    }
}
impl std::fmt::Debug for TrapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct Vect(u8);
        impl std::fmt::Debug for Vect {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "x{:02X}", self.0)
            }
        }

        f.debug_set()
            .entries(self.vectors().map(Vect))
            .finish()
    }
}
