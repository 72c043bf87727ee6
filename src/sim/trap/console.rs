//! Character IO services for the conventional LC-3 trap vectors.
//!
//! Both consoles implement `GETC`, `OUT`, `PUTS`, `IN`, and `PUTSP`
//! and can be bound with [`TrapRegistry::register_console`] or [`TrapRegistry::with_console`].
//! Neither blocks: if no input is available, the input traps report [`TrapOutcome::Blocked`].
//!
//! [`TrapRegistry::register_console`]: super::TrapRegistry::register_console
//! [`TrapRegistry::with_console`]: super::TrapRegistry::with_console

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use crossbeam_channel as cbc;

use crate::ast::reg_consts::R0;
use crate::sim::Machine;

use super::{vectors, TrapErr, TrapHandler, TrapOutcome};

const IN_PROMPT: &[u8] = b"Input a character> ";

/// The byte-level operations a console needs to provide.
///
/// The trap semantics are shared between consoles and implemented in terms of these.
trait ConsoleIo {
    /// Takes one byte of input, if any is available.
    fn take_input(&mut self) -> Result<Option<u8>, TrapErr>;
    /// Checks whether a byte of input is available without taking it.
    fn has_input(&mut self) -> Result<bool, TrapErr>;
    /// Writes bytes of output.
    fn put(&mut self, bytes: &[u8]) -> Result<(), TrapErr>;
}

/// Reads the string starting at `addr`, one character per word (low byte), up to the terminating 0.
///
/// Reading stops with an error if every word of memory was visited without finding a terminator.
fn read_string(m: &Machine, addr: u16) -> Result<Vec<u8>, TrapErr> {
    let mut out = vec![];
    for i in 0..=u16::MAX {
        let word = m.mem[addr.wrapping_add(i)];
        if word == 0 { return Ok(out); }
        out.push(word as u8);
    }
    Err(unterminated(addr))
}
/// Reads the string starting at `addr`, two characters per word (low byte first), up to a 0 byte.
///
/// Reading stops with an error if every word of memory was visited without finding a terminator.
fn read_packed_string(m: &Machine, addr: u16) -> Result<Vec<u8>, TrapErr> {
    let mut out = vec![];
    for i in 0..=u16::MAX {
        let [lo, hi] = m.mem[addr.wrapping_add(i)].to_le_bytes();
        if lo == 0 { return Ok(out); }
        out.push(lo);
        if hi == 0 { return Ok(out); }
        out.push(hi);
    }
    Err(unterminated(addr))
}
fn unterminated(addr: u16) -> TrapErr {
    TrapErr::Custom(format!("unterminated string at x{addr:04X}"))
}

fn console_trap(io: &mut impl ConsoleIo, vect: u8, m: &mut Machine) -> Result<TrapOutcome, TrapErr> {
    match vect {
        vectors::GETC => {
            let Some(byte) = io.take_input()? else { return Ok(TrapOutcome::Blocked) };
            m.reg_file[R0] = u16::from(byte);
        },
        vectors::OUT => io.put(&[m.reg_file[R0] as u8])?,
        vectors::PUTS => io.put(&read_string(m, m.reg_file[R0])?)?,
        vectors::IN => {
            // Check first so the prompt is only written once per character.
            if !io.has_input()? { return Ok(TrapOutcome::Blocked) };
            io.put(IN_PROMPT)?;
            let Some(byte) = io.take_input()? else { return Ok(TrapOutcome::Blocked) };
            io.put(&[byte, b'\n'])?;
            m.reg_file[R0] = u16::from(byte);
        },
        vectors::PUTSP => io.put(&read_packed_string(m, m.reg_file[R0])?)?,
        _ => return Err(TrapErr::Custom(format!("console does not implement TRAP x{vect:02X}"))),
    }
    Ok(TrapOutcome::Continue)
}

/// A console that reads from an input buffer and writes to an output buffer.
///
/// Cloning a `BufferedConsole` shares its buffers, so the caller keeps a clone to feed input and inspect output.
///
/// ```
/// use lc3_core::sim::{Simulator, RunExit};
/// use lc3_core::sim::trap::console::BufferedConsole;
///
/// let console = BufferedConsole::new();
/// let mut sim = Simulator::new(Default::default());
/// sim.traps.register_console(console.clone());
///
/// // GETC, OUT
/// sim.load(0x3000, &[0xF020, 0xF021]);
/// assert_eq!(sim.run(2).exit, RunExit::Blocked);
///
/// console.push_input(b"A");
/// assert_eq!(sim.run(2).exit, RunExit::BudgetExhausted);
/// assert_eq!(console.take_output(), b"A");
/// ```
#[derive(Default, Clone)]
pub struct BufferedConsole {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>
}
impl BufferedConsole {
    /// Creates a console with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a console from already defined buffers.
    pub fn with_bufs(input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { input, output }
    }

    /// Gets a reference to the input buffer.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// Gets a reference to the output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }

    /// Appends bytes to the input buffer.
    pub fn push_input(&self, bytes: &[u8]) {
        self.input.write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(bytes);
    }
    /// Takes everything written to the output buffer so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.output.write().unwrap_or_else(PoisonError::into_inner))
    }
}
impl ConsoleIo for BufferedConsole {
    fn take_input(&mut self) -> Result<Option<u8>, TrapErr> {
        Ok(self.input.write().unwrap_or_else(PoisonError::into_inner).pop_front())
    }

    fn has_input(&mut self) -> Result<bool, TrapErr> {
        Ok(!self.input.read().unwrap_or_else(PoisonError::into_inner).is_empty())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), TrapErr> {
        self.output.write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
        Ok(())
    }
}
impl TrapHandler for BufferedConsole {
    fn call(&mut self, vect: u8, machine: &mut Machine) -> Result<TrapOutcome, TrapErr> {
        console_trap(self, vect, machine)
    }
}

/// A console that receives input from one channel and sends output to another.
///
/// This is the console to use when the simulator runs on a different thread from its front end.
/// Input is polled with `try_recv`, so a missing character never blocks the simulator.
///
/// Once either side of the front end's channels is dropped,
/// traps that need that channel fail with [`TrapErr::Disconnected`].
#[derive(Clone)]
pub struct ChannelConsole {
    input: cbc::Receiver<u8>,
    peeked: Arc<RwLock<Option<u8>>>,
    output: cbc::Sender<u8>
}
impl ChannelConsole {
    /// Creates a console over the given channels.
    pub fn new(input: cbc::Receiver<u8>, output: cbc::Sender<u8>) -> Self {
        Self { input, peeked: Default::default(), output }
    }

    /// Creates a console along with the front end's halves of its channels:
    /// a sender for input and a receiver for output.
    pub fn pair() -> (Self, cbc::Sender<u8>, cbc::Receiver<u8>) {
        let (in_tx, in_rx) = cbc::unbounded();
        let (out_tx, out_rx) = cbc::unbounded();
        (Self::new(in_rx, out_tx), in_tx, out_rx)
    }

    fn poll(&mut self) -> Result<Option<u8>, TrapErr> {
        let mut peeked = self.peeked.write().unwrap_or_else(PoisonError::into_inner);
        if peeked.is_none() {
            *peeked = match self.input.try_recv() {
                Ok(byte) => Some(byte),
                Err(cbc::TryRecvError::Empty) => None,
                Err(cbc::TryRecvError::Disconnected) => return Err(TrapErr::Disconnected),
            };
        }
        Ok(*peeked)
    }
}
impl ConsoleIo for ChannelConsole {
    fn take_input(&mut self) -> Result<Option<u8>, TrapErr> {
        self.poll()?;
        Ok(self.peeked.write().unwrap_or_else(PoisonError::into_inner).take())
    }

    fn has_input(&mut self) -> Result<bool, TrapErr> {
        self.poll().map(|b| b.is_some())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), TrapErr> {
        for &b in bytes {
            self.output.send(b).map_err(|_| TrapErr::Disconnected)?;
        }
        Ok(())
    }
}
impl TrapHandler for ChannelConsole {
    fn call(&mut self, vect: u8, machine: &mut Machine) -> Result<TrapOutcome, TrapErr> {
        console_trap(self, vect, machine)
    }
}
