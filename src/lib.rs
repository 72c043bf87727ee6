//! An instruction-level LC-3 simulator core.
//!
//! This crate decodes and executes LC-3 machine words against a 64K-word memory,
//! eight general-purpose registers, a program counter, and condition codes.
//! It does not assemble source code and does not implement any OS services;
//! `TRAP` instructions are handed to user-registered handlers.
//!
//! # Usage
//!
//! Machine words are loaded into a [`sim::Simulator`], which can then be stepped or run:
//! ```
//! use lc3_core::sim::{Simulator, RunExit};
//! use lc3_core::sim::trap::TrapRegistry;
//! use lc3_core::sim::trap::console::BufferedConsole;
//!
//! let console = BufferedConsole::new();
//! let mut sim = Simulator::new(Default::default());
//! sim.traps = TrapRegistry::with_console(console.clone());
//!
//! sim.load_image(&[
//!     0x3000, // origin
//!     0xE002, // LEA R0, #2
//!     0xF022, // PUTS
//!     0xF025, // HALT
//!     0x0068, // 'h'
//!     0x0069, // 'i'
//!     0x0000,
//! ]);
//!
//! let result = sim.run(1000);
//! assert_eq!(result.exit, RunExit::Halted);
//! assert_eq!(console.take_output(), b"hi");
//! ```
//!
//! Words can also be decoded without a simulator. See the [`ast::sim`] module for more details.
#![warn(missing_docs)]

pub mod ast;
pub mod sim;
