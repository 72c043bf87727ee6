//! Simulating and execution of LC-3 machine code.
//!
//! This module consists of:
//! - [`Simulator`]: The struct that executes machine code.
//! - [`Machine`]: The architectural state (memory, register file, PC, condition codes).
//! - [`mem`]: The module holding memory, the register file, and condition codes.
//! - [`trap`]: The module handling the trap extension point (OS services).
//! - [`debug`]: The module handling types of breakpoints for the simulator.
//! - [`observer`]: The module recording memory accesses made by each instruction.
//!
//! # Usage
//!
//! To simulate some code, create a `Simulator`, load words into its memory, and step or run it:
//!
//! ```
//! use lc3_core::sim::{Simulator, RunExit};
//! use lc3_core::sim::trap::HaltTrap;
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load(0x3000, &[
//!     0x5020, // AND R0, R0, #0
//!     0x1021, // ADD R0, R0, #1
//!     0x1021, // ADD R0, R0, #1
//!     0xF025, // HALT
//! ]);
//! sim.register_trap_handler(0x25, HaltTrap);
//!
//! let result = sim.run(100);
//! assert_eq!(result.exit, RunExit::Halted);
//! assert_eq!(result.steps, 4);
//! assert_eq!(sim.register(0), 2);
//! ```
//!
//! ## Flags
//!
//! Here, we define `sim` to have the default flags.
//! We could also configure the simulator by editing the flags. For example,
//! if we wish to skip over faulting instructions during [`Simulator::run`]:
//!
//! ```
//! # use lc3_core::sim::{Simulator, SimFlags, FaultPolicy};
//! let mut sim = Simulator::new(SimFlags { fault_policy: FaultPolicy::Skip, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! [`Simulator::step`] executes exactly one instruction:
//! 1. The word at the PC is fetched.
//! 2. The PC is incremented.
//! 3. The word is decoded (see [`SimInstr::decode`]).
//! 4. The instruction is executed. Any PC-relative address is computed from the incremented PC,
//!    and control transfers overwrite the PC.
//!
//! A word that cannot be executed (the reserved opcode, `RTI`, or a `TRAP` with no registered handler)
//! is reported as [`SimErr::UnimplementedOpcode`], and the machine is left untouched,
//! including the PC, which still points at the faulting word.
//!
//! ```
//! use lc3_core::sim::{Simulator, SimErr, StepOutcome};
//! use lc3_core::ast::sim::Opcode;
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load(0x3000, &[0x0405]); // BRz #5
//!
//! assert!(matches!(sim.step(), Ok(StepOutcome::Executed(_))));
//! assert_eq!(sim.pc(), 0x3006);
//!
//! sim.set_memory(0x3006, 0xD000); // reserved opcode
//! assert!(matches!(
//!     sim.step(),
//!     Err(SimErr::UnimplementedOpcode { opcode: Opcode::Reserved, addr: 0x3006, .. })
//! ));
//! assert_eq!(sim.pc(), 0x3006);
//! ```
//!
//! [`Simulator::run`] calls `step` until a trap handler requests a halt, a fault occurs,
//! a breakpoint is hit, or the step budget runs out. The budget is the only way to bound a run.
//!
//! ## Querying State
//!
//! The architectural state lives in the `machine` field and can be read or written directly.
//! The simulator also provides wrapping accessors
//! ([`Simulator::register`], [`Simulator::memory`], [`Simulator::pc`], [`Simulator::cc`], and their setters).
//!
//! ```
//! use lc3_core::sim::Simulator;
//! use lc3_core::ast::reg_consts::R0;
//!
//! let mut sim = Simulator::new(Default::default());
//!
//! sim.machine.reg_file[R0] = 0x1234;
//! assert_eq!(sim.register(0), 0x1234);
//! assert_eq!(sim.register(8), 0x1234); // register indices wrap
//!
//! sim.set_memory(0x3000, 0x5678);
//! assert_eq!(sim.machine.mem[0x3000], 0x5678);
//! ```

pub mod mem;
pub mod debug;
pub mod observer;
pub mod trap;

use std::collections::HashSet;

use tracing::{debug, info, trace, warn};

use crate::ast::reg_consts::R7;
use crate::ast::sim::{Opcode, SimInstr};
use crate::ast::{ImmOrReg, Reg};
use debug::Breakpoint;
use mem::{ConditionCodes, MachineInitStrategy, Mem, RegFile};
use observer::{AccessKind, AccessObserver};
use trap::{TrapErr, TrapHandler, TrapOutcome, TrapRegistry};

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum SimErr {
    /// The word at `addr` has no operation the simulator can execute.
    ///
    /// This is raised for the reserved opcode, for `RTI`,
    /// and for `TRAP` when no handler is registered for its vector.
    #[error("unimplemented {opcode} (x{word:04X}) at x{addr:04X}")]
    UnimplementedOpcode {
        /// The decoded opcode tag.
        opcode: Opcode,
        /// The full instruction word.
        word: u16,
        /// The address the word was fetched from.
        addr: u16
    },
    /// A registered trap handler failed.
    #[error("TRAP x{vect:02X} at x{addr:04X} failed: {source}")]
    Trap {
        /// The trap vector.
        vect: u8,
        /// The address of the `TRAP` instruction.
        addr: u16,
        /// The handler's error.
        #[source]
        source: TrapErr
    },
}

/// How [`Simulator::run`] reacts to a fault.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum FaultPolicy {
    /// Stop the run and report the fault.
    #[default]
    Stop,
    /// Move the PC past the faulting word and keep running.
    Skip,
}

/// When the PC is incremented relative to execution.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum PcTiming {
    /// The PC is incremented right after fetch, before execution.
    ///
    /// PC-relative offsets are relative to the instruction after the one executing,
    /// as the LC-3 ISA defines.
    #[default]
    Fetch,
    /// The PC is incremented after execution, unconditionally.
    ///
    /// Instructions see their own address as the PC, and even control transfers are followed by an increment.
    /// This reproduces the behavior of simulators that increment the PC at the end of every cycle.
    /// It is not architecturally correct and only exists for compatibility with such simulators.
    Legacy,
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`]
/// and their effects should still apply.
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The creation strategy for memory and register values.
    ///
    /// This only goes into effect after a `Simulator::new` or `Simulator::reset` call.
    ///
    /// By default, this flag is [`MachineInitStrategy::default`] (zeroed).
    pub machine_init: MachineInitStrategy,

    /// What [`Simulator::run`] does when a step faults.
    ///
    /// [`Simulator::step`] always reports faults regardless of this flag.
    ///
    /// By default, this flag is [`FaultPolicy::Stop`].
    pub fault_policy: FaultPolicy,

    /// When the PC is incremented.
    ///
    /// By default, this flag is [`PcTiming::Fetch`].
    pub pc_timing: PcTiming,

    /// The PC of a new (or reset) machine.
    ///
    /// This only goes into effect after a `Simulator::new` or `Simulator::reset` call.
    ///
    /// By default, this flag is `0x3000`.
    pub start_pc: u16,
}

impl Default for SimFlags {
    fn default() -> Self {
        Self {
            machine_init: Default::default(),
            fault_policy: Default::default(),
            pc_timing: Default::default(),
            start_pc: 0x3000,
        }
    }
}

/// The architectural state of an LC-3.
///
/// This is everything an instruction can read or write.
/// Trap handlers receive a mutable reference to it.
#[derive(Debug, Clone)]
pub struct Machine {
    /// The memory.
    ///
    /// Note that this is held in the heap, as it is too large for the stack.
    pub mem: Mem,
    /// The register file.
    pub reg_file: RegFile,
    /// The program counter (the address of the next instruction to fetch).
    pub pc: u16,
    /// The condition codes.
    pub cc: ConditionCodes,
}
impl Machine {
    /// Creates a machine filled according to `flags.machine_init`, with the PC at `flags.start_pc`.
    pub fn new(flags: &SimFlags) -> Self {
        let mut filler = flags.machine_init.generator();

        Self {
            mem: Mem::new(&mut filler),
            reg_file: RegFile::new(&mut filler),
            pc: flags.start_pc,
            cc: ConditionCodes::default(),
        }
    }

    /// Sets the condition codes using the provided result.
    pub fn set_cc(&mut self, result: u16) {
        self.cc = ConditionCodes::from_result(result);
    }
}

/// What an executed instruction changed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct StepEffects {
    /// Address the instruction was fetched from.
    pub addr: u16,
    /// The executed instruction.
    pub instr: SimInstr,
    /// The register written and its new value.
    ///
    /// For a `TRAP`, this is the lowest-numbered register the handler changed.
    pub reg: Option<(Reg, u16)>,
    /// The new condition codes, if the instruction sets them.
    pub cc: Option<ConditionCodes>,
    /// The memory address written and its new value.
    ///
    /// Memory written by a trap handler is not reported.
    pub mem: Option<(u16, u16)>,
    /// Whether the instruction redirected the PC (a taken branch, jump, or call).
    pub jumped: bool,
}
impl StepEffects {
    fn new(addr: u16, instr: SimInstr) -> Self {
        Self { addr, instr, reg: None, cc: None, mem: None, jumped: false }
    }
}

/// The result of a step which did not fault.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StepOutcome {
    /// An instruction executed.
    Executed(StepEffects),
    /// A trap handler executed and requested a halt.
    ///
    /// The PC points past the `TRAP` instruction.
    Halted {
        /// Address of the `TRAP` instruction.
        addr: u16,
        /// Its trap vector.
        vect: u8
    },
    /// A trap handler could not complete yet.
    ///
    /// Nothing changed; the PC still points at the `TRAP` instruction.
    Blocked {
        /// Address of the `TRAP` instruction.
        addr: u16,
        /// Its trap vector.
        vect: u8
    },
}

/// The result of [`Simulator::step`].
pub type StepResult = Result<StepOutcome, SimErr>;

/// Why [`Simulator::run`] stopped.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RunExit {
    /// A trap handler requested a halt.
    Halted,
    /// The step budget was used up.
    BudgetExhausted,
    /// A breakpoint matched after a step.
    Breakpoint,
    /// A trap handler is waiting on input.
    Blocked,
    /// A step faulted (only with [`FaultPolicy::Stop`]).
    Fault(SimErr),
}

/// The result of [`Simulator::run`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RunResult {
    /// Number of cycles that consumed an instruction (executed, halted, or skipped faults).
    pub steps: u32,
    /// Number of faulting words skipped under [`FaultPolicy::Skip`].
    pub faults_skipped: u32,
    /// Why the run stopped.
    pub exit: RunExit,
}

/// Executes LC-3 machine code.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The architectural state.
    pub machine: Machine,

    /// The number of instructions successfully run since this `Simulator` was initialized.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// Records the memory accesses of the last step.
    pub observer: AccessObserver,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Configuration settings for the simulator.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: HashSet<Breakpoint>,

    /// Handlers for `TRAP` instructions.
    pub traps: TrapRegistry,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    /// Creates a new simulator with the given flags,
    /// no trap handlers, and nothing loaded.
    pub fn new(flags: SimFlags) -> Self {
        Self {
            machine: Machine::new(&flags),
            instructions_run: 0,
            observer: Default::default(),

            flags,
            breakpoints: Default::default(),
            traps: Default::default(),
        }
    }

    /// Resets the simulator.
    ///
    /// This recreates the machine from the flags while preserving
    /// flags, breakpoints, and trap handlers.
    /// Anything loaded into memory has to be loaded again.
    pub fn reset(&mut self) {
        self.machine = Machine::new(&self.flags);
        self.instructions_run = 0;
        self.observer.clear();
    }

    /// Writes a contiguous block of words into memory starting at `start`.
    ///
    /// Addresses wrap around past `0xFFFF`. This does not change the PC.
    pub fn load(&mut self, start: u16, words: &[u16]) {
        debug!("loading {} words at x{start:04X}", words.len());
        self.machine.mem.copy_block(start, words);
    }

    /// Loads a program image, whose first word is its origin and the rest are the words to place there.
    ///
    /// The PC is set to the origin, which is returned.
    /// An empty image does nothing and returns `None`.
    pub fn load_image(&mut self, image: &[u16]) -> Option<u16> {
        let (&origin, words) = image.split_first()?;
        self.load(origin, words);
        self.machine.pc = origin;
        Some(origin)
    }

    /// Binds a trap handler to a trap vector, returning the handler previously bound to it.
    pub fn register_trap_handler(&mut self, vect: u8, handler: impl TrapHandler) -> Option<Box<dyn TrapHandler>> {
        self.traps.register(vect, handler)
    }

    /// Reads a register. Only the low 3 bits of `index` are used.
    pub fn register(&self, index: u8) -> u16 {
        self.machine.reg_file[Reg::masked(index)]
    }
    /// Writes a register. Only the low 3 bits of `index` are used.
    ///
    /// This does not change the condition codes.
    pub fn set_register(&mut self, index: u8, value: u16) {
        self.machine.reg_file[Reg::masked(index)] = value;
    }
    /// Reads a memory location without recording an access.
    pub fn memory(&self, addr: u16) -> u16 {
        self.machine.mem[addr]
    }
    /// Writes a memory location without recording an access.
    pub fn set_memory(&mut self, addr: u16, value: u16) {
        self.machine.mem[addr] = value;
    }
    /// The program counter.
    pub fn pc(&self) -> u16 {
        self.machine.pc
    }
    /// Sets the program counter.
    pub fn set_pc(&mut self, addr: u16) {
        self.machine.pc = addr;
    }
    /// The condition codes.
    pub fn cc(&self) -> ConditionCodes {
        self.machine.cc
    }

    fn read_mem(&mut self, addr: u16) -> u16 {
        let value = self.machine.mem[addr];
        self.observer.record(AccessKind::Read, addr, value);
        value
    }
    fn write_mem(&mut self, addr: u16, value: u16, fx: &mut StepEffects) {
        self.machine.mem[addr] = value;
        self.observer.record(AccessKind::Write, addr, value);
        fx.mem = Some((addr, value));
    }
    /// Writes a result to a register and sets the condition codes from it.
    fn set_dr(&mut self, dr: Reg, value: u16, fx: &mut StepEffects) {
        self.machine.reg_file[dr] = value;
        self.machine.set_cc(value);
        fx.reg = Some((dr, value));
        fx.cc = Some(self.machine.cc);
    }
    fn jump(&mut self, addr: u16, fx: &mut StepEffects) {
        self.machine.pc = addr;
        fx.jumped = true;
    }
    /// The PC offset by a sign-extended field.
    fn pc_rel(&self, off: i16) -> u16 {
        self.machine.pc.wrapping_add_signed(off)
    }

    /// Simulate one step, executing one instruction.
    ///
    /// The observer is cleared first, so afterwards it holds this step's memory accesses.
    /// Breakpoints are not checked.
    pub fn step(&mut self) -> StepResult {
        self.observer.clear();

        let addr = self.machine.pc;
        let word = self.machine.mem[addr];
        let instr = SimInstr::decode(word);

        // Faults are detected before anything is written.
        let executable = match instr {
            SimInstr::Reserved(_) | SimInstr::RTI => false,
            SimInstr::TRAP(vect) => self.traps.is_registered(vect.get() as u8),
            _ => true,
        };
        if !executable {
            let err = SimErr::UnimplementedOpcode { opcode: instr.opcode(), word, addr };
            warn!("{err}");
            return Err(err);
        }

        let legacy = self.flags.pc_timing == PcTiming::Legacy;
        if !legacy {
            self.machine.pc = addr.wrapping_add(1);
        }
        trace!("x{addr:04X}: {instr}");

        let mut fx = StepEffects::new(addr, instr);
        let mut halted = None;
        match instr {
            // ALU operations
            SimInstr::ADD(dr, sr1, sr2) => {
                let val1 = self.machine.reg_file[sr1];
                let val2 = self.imm_or_reg(sr2);
                self.set_dr(dr, val1.wrapping_add(val2), &mut fx);
            },
            SimInstr::AND(dr, sr1, sr2) => {
                let val1 = self.machine.reg_file[sr1];
                let val2 = self.imm_or_reg(sr2);
                self.set_dr(dr, val1 & val2, &mut fx);
            },
            SimInstr::NOT(dr, sr) => {
                let val = self.machine.reg_file[sr];
                self.set_dr(dr, !val, &mut fx);
            },

            // Memory access operations
            SimInstr::LD(dr, off) => {
                let ea = self.pc_rel(off.get());
                let val = self.read_mem(ea);
                self.set_dr(dr, val, &mut fx);
            },
            SimInstr::LDI(dr, off) => {
                let ptr = self.pc_rel(off.get());
                let ea = self.read_mem(ptr);
                let val = self.read_mem(ea);
                self.set_dr(dr, val, &mut fx);
            },
            SimInstr::LDR(dr, br, off) => {
                let ea = self.machine.reg_file[br].wrapping_add_signed(off.get());
                let val = self.read_mem(ea);
                self.set_dr(dr, val, &mut fx);
            },
            SimInstr::LEA(dr, off) => {
                let ea = self.pc_rel(off.get());
                self.set_dr(dr, ea, &mut fx);
            },
            SimInstr::ST(sr, off) => {
                let ea = self.pc_rel(off.get());
                let val = self.machine.reg_file[sr];
                self.write_mem(ea, val, &mut fx);
            },
            SimInstr::STI(sr, off) => {
                let ptr = self.pc_rel(off.get());
                let ea = self.read_mem(ptr);
                let val = self.machine.reg_file[sr];
                self.write_mem(ea, val, &mut fx);
            },
            SimInstr::STR(sr, br, off) => {
                let ea = self.machine.reg_file[br].wrapping_add_signed(off.get());
                let val = self.machine.reg_file[sr];
                self.write_mem(ea, val, &mut fx);
            },

            // Control transfer operations
            SimInstr::BR(mask, off) => {
                if mask & self.machine.cc.bits() != 0 {
                    let target = self.pc_rel(off.get());
                    self.jump(target, &mut fx);
                }
            },
            SimInstr::JMP(br) => {
                let target = self.machine.reg_file[br];
                self.jump(target, &mut fx);
            },
            SimInstr::JSR(op) => {
                // Target is computed before R7 is written, so JSRR R7 jumps to the old R7.
                let target = match op {
                    ImmOrReg::Imm(off) => self.pc_rel(off.get()),
                    ImmOrReg::Reg(br)  => self.machine.reg_file[br],
                };
                let link = self.machine.pc;
                self.machine.reg_file[R7] = link;
                fx.reg = Some((R7, link));
                self.jump(target, &mut fx);
            },

            // Extension point
            SimInstr::TRAP(vect) => {
                let vect = vect.get() as u8;
                let regs_before = self.machine.reg_file.clone();
                let cc_before = self.machine.cc;
                let outcome = match self.traps.dispatch(vect, &mut self.machine) {
                    Some(Ok(outcome)) => outcome,
                    Some(Err(source)) => {
                        self.machine.pc = addr;
                        let err = SimErr::Trap { vect, addr, source };
                        warn!("{err}");
                        return Err(err);
                    },
                    None => unreachable!("TRAP x{vect:02X} was checked to have a handler"),
                };

                // Handlers write the machine directly, so their register effects are recovered by comparison.
                let m = &self.machine;
                fx.reg = Reg::all()
                    .find(|&r| m.reg_file[r] != regs_before[r])
                    .map(|r| (r, m.reg_file[r]));
                fx.cc = (m.cc != cc_before).then_some(m.cc);

                match outcome {
                    TrapOutcome::Continue => {},
                    TrapOutcome::Halt => halted = Some(vect),
                    TrapOutcome::Blocked => {
                        self.machine.pc = addr;
                        debug!("TRAP x{vect:02X} at x{addr:04X} is blocked");
                        return Ok(StepOutcome::Blocked { addr, vect });
                    },
                }
            },
            SimInstr::RTI | SimInstr::Reserved(_) => unreachable!("{instr} was checked to be executable"),
        }

        if legacy {
            self.machine.pc = self.machine.pc.wrapping_add(1);
        }
        self.instructions_run = self.instructions_run.wrapping_add(1);

        match halted {
            Some(vect) => Ok(StepOutcome::Halted { addr, vect }),
            None => Ok(StepOutcome::Executed(fx)),
        }
    }

    fn imm_or_reg<const N: u32>(&self, op: ImmOrReg<N>) -> u16 {
        match op {
            ImmOrReg::Imm(imm) => imm.get() as u16,
            ImmOrReg::Reg(r)   => self.machine.reg_file[r],
        }
    }

    /// Runs until a halt, a fault, a breakpoint, a blocked trap,
    /// or until `max_steps` cycles have run.
    ///
    /// Breakpoints are checked after every executed instruction,
    /// so a run starting on a breakpoint still makes progress.
    pub fn run(&mut self, max_steps: u32) -> RunResult {
        let mut steps = 0;
        let mut faults_skipped = 0;

        let exit = loop {
            if steps >= max_steps {
                break RunExit::BudgetExhausted;
            }

            match self.step() {
                Ok(StepOutcome::Executed(_)) => steps += 1,
                Ok(StepOutcome::Halted { .. }) => {
                    steps += 1;
                    break RunExit::Halted;
                },
                Ok(StepOutcome::Blocked { .. }) => break RunExit::Blocked,
                Err(e) => match self.flags.fault_policy {
                    FaultPolicy::Stop => break RunExit::Fault(e),
                    FaultPolicy::Skip => {
                        self.machine.pc = self.machine.pc.wrapping_add(1);
                        steps += 1;
                        faults_skipped += 1;
                        continue;
                    },
                },
            }

            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break RunExit::Breakpoint;
            }
        };

        info!(steps, faults_skipped, "run stopped at x{:04X}: {exit:?}", self.machine.pc);
        RunResult { steps, faults_skipped, exit }
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{FaultPolicy, PcTiming, RunExit, SimErr, SimFlags, Simulator, StepOutcome};
    use crate::ast::reg_consts::{R0, R1, R2, R3, R7};
    use crate::ast::sim::{Opcode, SimInstr};
    use crate::ast::{IOffset, ImmOrReg, Reg};
    use crate::sim::debug::{Breakpoint, Comparator};
    use crate::sim::mem::{ConditionCodes, MachineInitStrategy};
    use crate::sim::observer::{AccessKind, MemAccess};
    use crate::sim::trap::{HaltTrap, TrapErr, TrapOutcome};
    use crate::sim::Machine;

    fn sim_with(words: &[u16]) -> Simulator {
        let mut sim = Simulator::new(Default::default());
        sim.load(0x3000, words);
        sim
    }
    fn exec(sim: &mut Simulator, instr: SimInstr) -> super::StepEffects {
        let pc = sim.pc();
        sim.set_memory(pc, instr.encode());
        match sim.step() {
            Ok(StepOutcome::Executed(fx)) => fx,
            r => panic!("expected {instr} to execute, got {r:?}"),
        }
    }
    fn imm5(n: i16) -> ImmOrReg<5> {
        ImmOrReg::Imm(IOffset::new_trunc(n))
    }

    #[test]
    fn test_add_and_scenario() {
        let mut sim = sim_with(&[0x1220, 0x5020]);
        sim.set_register(0, 0);

        let Ok(StepOutcome::Executed(fx)) = sim.step() else { panic!("ADD should execute") };
        assert_eq!(fx.reg, Some((R1, 0)));
        assert_eq!(sim.register(1), 0);
        assert_eq!(sim.cc(), ConditionCodes::Zero);

        let Ok(StepOutcome::Executed(fx)) = sim.step() else { panic!("AND should execute") };
        assert_eq!(fx.reg, Some((R0, 0)));
        assert_eq!(sim.cc(), ConditionCodes::Zero);
        assert_eq!(sim.pc(), 0x3002);
        assert_eq!(sim.instructions_run, 2);
    }

    #[test]
    fn test_alu_flags() {
        let mut sim = Simulator::default();

        sim.set_register(1, 0x7FFF);
        let fx = exec(&mut sim, SimInstr::ADD(R0, R1, imm5(1)));
        assert_eq!(sim.register(0), 0x8000);
        assert_eq!(fx.cc, Some(ConditionCodes::Negative));

        let fx = exec(&mut sim, SimInstr::ADD(R2, R0, ImmOrReg::Reg(R0)));
        assert_eq!(sim.register(2), 0, "0x8000 + 0x8000 should wrap to 0");
        assert_eq!(fx.cc, Some(ConditionCodes::Zero));

        sim.set_register(3, 0x00F0);
        exec(&mut sim, SimInstr::AND(R3, R3, imm5(-1)));
        assert_eq!(sim.register(3), 0x00F0, "imm5 #-1 should sign-extend to xFFFF");
        assert_eq!(sim.cc(), ConditionCodes::Positive);

        exec(&mut sim, SimInstr::NOT(R3, R3));
        assert_eq!(sim.register(3), 0xFF0F);
        assert_eq!(sim.cc(), ConditionCodes::Negative);
    }

    #[test]
    fn test_ld_ldr_lea() {
        let mut sim = Simulator::default();
        sim.set_memory(0x3001 + 4, 0xBEEF);

        // LD R0, #4 at x3000 reads x3005
        exec(&mut sim, SimInstr::LD(R0, IOffset::new_trunc(4)));
        assert_eq!(sim.register(0), 0xBEEF);
        assert_eq!(sim.cc(), ConditionCodes::Negative);

        // LEA R1, #-2 at x3001 gives x3000 and sets flags
        let fx = exec(&mut sim, SimInstr::LEA(R1, IOffset::new_trunc(-2)));
        assert_eq!(sim.register(1), 0x3000);
        assert_eq!(fx.cc, Some(ConditionCodes::Positive));
        assert!(sim.observer.accesses().is_empty(), "LEA should not access memory");

        sim.set_register(0, 0x3000);
        sim.set_memory(0x3000, 0x00FF);
        sim.set_pc(0x4000);
        exec(&mut sim, SimInstr::LDR(R2, R0, IOffset::new_trunc(0)));
        assert_eq!(sim.register(2), 0x00FF);
        assert_eq!(sim.cc(), ConditionCodes::Positive);
    }

    #[test]
    fn test_ldi_accesses() {
        let mut sim = Simulator::default();
        sim.set_memory(0x3003, 0x4000);
        sim.set_memory(0x4000, 0x0000);

        exec(&mut sim, SimInstr::LDI(R0, IOffset::new_trunc(2)));
        assert_eq!(sim.register(0), 0);
        assert_eq!(sim.cc(), ConditionCodes::Zero);
        assert_eq!(sim.observer.accesses(), &[
            MemAccess { kind: AccessKind::Read, addr: 0x3003, value: 0x4000 },
            MemAccess { kind: AccessKind::Read, addr: 0x4000, value: 0x0000 },
        ]);
        assert_eq!(sim.observer.writes(), 0);
    }

    #[test]
    fn test_sti_accesses() {
        let mut sim = Simulator::default();
        sim.set_memory(0x2FFF, 0x5000);
        sim.set_register(3, 0x1234);

        let fx = exec(&mut sim, SimInstr::STI(R3, IOffset::new_trunc(-2)));
        assert_eq!(sim.memory(0x5000), 0x1234);
        assert_eq!(fx.mem, Some((0x5000, 0x1234)));
        assert_eq!(fx.cc, None, "stores do not set condition codes");
        assert_eq!(sim.observer.accesses(), &[
            MemAccess { kind: AccessKind::Read, addr: 0x2FFF, value: 0x5000 },
            MemAccess { kind: AccessKind::Write, addr: 0x5000, value: 0x1234 },
        ]);
    }

    #[test]
    fn test_st_str() {
        let mut sim = Simulator::default();
        sim.set_register(1, 0xAAAA);
        sim.set_register(2, 0x4000);

        exec(&mut sim, SimInstr::ST(R1, IOffset::new_trunc(-1)));
        assert_eq!(sim.memory(0x3000), 0xAAAA, "ST #-1 should overwrite itself");

        exec(&mut sim, SimInstr::STR(R1, R2, IOffset::new_trunc(-32)));
        assert_eq!(sim.memory(0x4000 - 32), 0xAAAA);
        assert_eq!(sim.cc(), ConditionCodes::Zero);
    }

    #[test]
    fn test_address_wraparound() {
        let mut sim = Simulator::default();

        // base xFFFF + 2 = x0001
        sim.set_register(0, 0xFFFF);
        sim.set_memory(0x0001, 0x0042);
        exec(&mut sim, SimInstr::LDR(R1, R0, IOffset::new_trunc(2)));
        assert_eq!(sim.register(1), 0x0042);

        sim.set_register(2, 0x7777);
        exec(&mut sim, SimInstr::STR(R2, R0, IOffset::new_trunc(2)));
        assert_eq!(sim.memory(0x0001), 0x7777);

        // PC-relative from the end of memory
        sim.set_pc(0xFFFF);
        sim.set_memory(0x0002, 0x0099);
        exec(&mut sim, SimInstr::LD(R3, IOffset::new_trunc(2)));
        assert_eq!(sim.register(3), 0x0099);
        assert_eq!(sim.pc(), 0x0000);
    }

    #[test]
    fn test_br_scenario() {
        let mut sim = sim_with(&[0x0405]); // BRz #5
        assert_eq!(sim.cc(), ConditionCodes::Zero);

        let Ok(StepOutcome::Executed(fx)) = sim.step() else { panic!("BR should execute") };
        assert!(fx.jumped);
        assert_eq!(sim.pc(), 0x3006);
    }

    #[test]
    fn test_br_not_taken() {
        let mut sim = Simulator::default();
        sim.machine.cc = ConditionCodes::Positive;

        let fx = exec(&mut sim, SimInstr::BR(0b110, IOffset::new_trunc(5)));
        assert!(!fx.jumped);
        assert_eq!(sim.pc(), 0x3001);
    }

    #[test]
    fn test_jmp_ret() {
        let mut sim = Simulator::default();
        sim.set_register(2, 0x4321);
        exec(&mut sim, SimInstr::JMP(R2));
        assert_eq!(sim.pc(), 0x4321);

        sim.set_register(7, 0x3010);
        exec(&mut sim, SimInstr::JMP(R7));
        assert_eq!(sim.pc(), 0x3010);
    }

    #[test]
    fn test_jsr_links_following_instruction() {
        let mut sim = Simulator::default();

        // JSR #16 at x3000
        let fx = exec(&mut sim, SimInstr::JSR(ImmOrReg::Imm(IOffset::new_trunc(16))));
        assert_eq!(sim.register(7), 0x3001);
        assert_eq!(sim.pc(), 0x3011);
        assert_eq!(fx.reg, Some((R7, 0x3001)));
        assert_eq!(fx.cc, None, "JSR does not set condition codes");

        // JSRR R1 at x3011
        sim.set_register(1, 0x5000);
        exec(&mut sim, SimInstr::JSR(ImmOrReg::Reg(R1)));
        assert_eq!(sim.register(7), 0x3012);
        assert_eq!(sim.pc(), 0x5000);

        // JSRR R7 jumps to the old R7
        exec(&mut sim, SimInstr::JSR(ImmOrReg::Reg(R7)));
        assert_eq!(sim.pc(), 0x3012);
        assert_eq!(sim.register(7), 0x5001);
    }

    #[test]
    fn test_unimplemented_leaves_state() {
        for word in [0xD000, 0x8000, 0xF025] {
            let mut sim = sim_with(&[word]);
            sim.set_register(0, 0x1111);
            let before = sim.machine.clone();

            let err = sim.step().unwrap_err();
            assert!(matches!(err, SimErr::UnimplementedOpcode { word: w, addr: 0x3000, .. } if w == word));
            assert_eq!(sim.pc(), before.pc);
            assert_eq!(sim.machine.reg_file, before.reg_file);
            assert_eq!(sim.cc(), before.cc);
            assert_eq!(sim.instructions_run, 0);
        }

        let err = sim_with(&[0x8000]).step().unwrap_err();
        assert!(matches!(err, SimErr::UnimplementedOpcode { opcode: Opcode::RTI, .. }));
        assert_eq!(err.to_string(), "unimplemented RTI (x8000) at x3000");
    }

    #[test]
    fn test_trap_dispatch() {
        let mut sim = sim_with(&[0xF030, 0xF025]);
        sim.register_trap_handler(0x30, |vect: u8, m: &mut Machine| -> Result<TrapOutcome, TrapErr> {
            m.reg_file[R0] = u16::from(vect);
            // handlers see the incremented PC
            m.reg_file[R1] = m.pc;
            Ok(TrapOutcome::Continue)
        });
        sim.register_trap_handler(0x25, HaltTrap);

        let Ok(StepOutcome::Executed(fx)) = sim.step() else { panic!("TRAP x30 should execute") };
        assert_eq!(sim.register(0), 0x30);
        assert_eq!(sim.register(1), 0x3001);
        assert_eq!(fx.reg, Some((R0, 0x30)), "register writes by the handler should be reported");
        assert_eq!(fx.cc, None);

        assert_eq!(sim.step(), Ok(StepOutcome::Halted { addr: 0x3001, vect: 0x25 }));
        assert_eq!(sim.pc(), 0x3002);
    }

    #[test]
    fn test_trap_failure_rewinds() {
        let mut sim = sim_with(&[0xF031]);
        sim.register_trap_handler(0x31, |_: u8, _: &mut Machine| -> Result<TrapOutcome, TrapErr> {
            Err(TrapErr::Custom("device unplugged".to_string()))
        });

        let err = sim.step().unwrap_err();
        assert_eq!(err, SimErr::Trap { vect: 0x31, addr: 0x3000, source: TrapErr::Custom("device unplugged".to_string()) });
        assert_eq!(sim.pc(), 0x3000);
    }

    #[test]
    fn test_run_budget_and_halt() {
        // BR #-1 loops forever
        let mut sim = sim_with(&[0x0FFF]);
        let result = sim.run(50);
        assert_eq!(result.exit, RunExit::BudgetExhausted);
        assert_eq!(result.steps, 50);
        assert_eq!(sim.pc(), 0x3000);

        let mut sim = sim_with(&[0x1021, 0x1021, 0xF025, 0x1021]);
        sim.register_trap_handler(0x25, HaltTrap);
        let result = sim.run(50);
        assert_eq!(result.exit, RunExit::Halted);
        assert_eq!(result.steps, 3);
        assert_eq!(sim.register(0), 2);

        assert_eq!(sim_with(&[]).run(0).exit, RunExit::BudgetExhausted);
    }

    #[test]
    fn test_run_fault_policies() {
        let program = [0x1021, 0xD000, 0x1021, 0x8000, 0xF025];

        let mut sim = sim_with(&program);
        let result = sim.run(10);
        assert!(matches!(result.exit, RunExit::Fault(SimErr::UnimplementedOpcode { addr: 0x3001, .. })));
        assert_eq!(result.steps, 1);
        assert_eq!(sim.pc(), 0x3001);

        let mut sim = Simulator::new(SimFlags { fault_policy: FaultPolicy::Skip, ..Default::default() });
        sim.load(0x3000, &program);
        sim.register_trap_handler(0x25, HaltTrap);
        let result = sim.run(10);
        assert_eq!(result.exit, RunExit::Halted);
        assert_eq!(result.faults_skipped, 2);
        assert_eq!(result.steps, 5);
        assert_eq!(sim.register(0), 2);
    }

    #[test]
    fn test_run_breakpoints() {
        let mut sim = sim_with(&[0x1021, 0x1021, 0x1021, 0x1021]);
        sim.breakpoints.insert(Breakpoint::PC(0x3002));
        let result = sim.run(10);
        assert_eq!(result.exit, RunExit::Breakpoint);
        assert_eq!(sim.pc(), 0x3002);

        // starting on a breakpoint still executes
        let result = sim.run(10);
        assert_eq!(result.exit, RunExit::BudgetExhausted);
        assert_eq!(result.steps, 10);
        assert_eq!(sim.register(0), 4);
        assert_eq!(sim.pc(), 0x300C);

        let mut sim = sim_with(&[0x1021, 0x1021, 0x1021, 0x1021]);
        sim.set_pc(0x3002);
        sim.breakpoints.insert(Breakpoint::PC(0x3002));
        sim.breakpoints.insert(Breakpoint::Reg { reg: R0, value: Comparator::Ge(2) });
        let result = sim.run(10);
        assert_eq!(result.exit, RunExit::Breakpoint);
        assert_eq!(result.steps, 2);
        assert_eq!(sim.pc(), 0x3004);
        assert_eq!(sim.register(0), 2);
    }

    #[test]
    fn test_load_image_and_reset() {
        let mut sim = Simulator::default();
        assert_eq!(sim.load_image(&[]), None);
        assert_eq!(sim.load_image(&[0x4000, 0x1021, 0xF025]), Some(0x4000));
        assert_eq!(sim.pc(), 0x4000);
        assert_eq!(sim.memory(0x4001), 0xF025);

        sim.register_trap_handler(0x25, HaltTrap);
        sim.breakpoints.insert(Breakpoint::PC(0x1234));
        sim.run(10);
        sim.reset();

        assert_eq!(sim.pc(), 0x3000);
        assert_eq!(sim.memory(0x4000), 0);
        assert_eq!(sim.register(0), 0);
        assert_eq!(sim.instructions_run, 0);
        assert!(sim.traps.is_registered(0x25));
        assert_eq!(sim.breakpoints.len(), 1);
    }

    #[test]
    fn test_seeded_machine_init() {
        let flags = SimFlags { machine_init: MachineInitStrategy::Seeded { seed: 7 }, ..Default::default() };
        let a = Simulator::new(flags);
        let b = Simulator::new(flags);
        assert_eq!(a.machine.reg_file, b.machine.reg_file);
        assert_eq!(a.machine.mem.as_slice(), b.machine.mem.as_slice());
    }

    #[test]
    fn test_register_accessors_wrap() {
        let mut sim = Simulator::default();
        sim.set_register(15, 0xCAFE);
        assert_eq!(sim.register(7), 0xCAFE);
        assert_eq!(sim.machine.reg_file[Reg::masked(7)], 0xCAFE);
    }

    #[test]
    fn test_legacy_pc_timing() {
        let flags = SimFlags { pc_timing: PcTiming::Legacy, ..Default::default() };

        // LD R0, #0 reads the LD itself
        let mut sim = Simulator::new(flags);
        exec(&mut sim, SimInstr::LD(R0, IOffset::new_trunc(0)));
        assert_eq!(sim.register(0), 0x2000);
        assert_eq!(sim.pc(), 0x3001);

        // JSR links the call site and lands one past the target
        let mut sim = Simulator::new(flags);
        exec(&mut sim, SimInstr::JSR(ImmOrReg::Imm(IOffset::new_trunc(16))));
        assert_eq!(sim.register(7), 0x3000);
        assert_eq!(sim.pc(), 0x3011);

        // JMP lands one past the register's address
        let mut sim = Simulator::new(flags);
        sim.set_register(2, 0x4000);
        exec(&mut sim, SimInstr::JMP(R2));
        assert_eq!(sim.pc(), 0x4001);

        // handlers see the TRAP's own address, and the increment follows them
        let mut sim = Simulator::new(flags);
        sim.register_trap_handler(0x30, |_: u8, m: &mut Machine| -> Result<TrapOutcome, TrapErr> {
            m.reg_file[R1] = m.pc;
            Ok(TrapOutcome::Continue)
        });
        sim.register_trap_handler(0x31, |_: u8, _: &mut Machine| -> Result<TrapOutcome, TrapErr> {
            Ok(TrapOutcome::Blocked)
        });
        sim.load(0x3000, &[0xF030, 0xF031]);
        assert!(matches!(sim.step(), Ok(StepOutcome::Executed(_))));
        assert_eq!(sim.register(1), 0x3000);
        assert_eq!(sim.pc(), 0x3001);
        assert_eq!(sim.step(), Ok(StepOutcome::Blocked { addr: 0x3001, vect: 0x31 }));
        assert_eq!(sim.pc(), 0x3001);
    }

    proptest! {
        #[test]
        fn add_and_match_truncated_arithmetic(a in any::<u16>(), b in any::<u16>(), imm in -16i16..16) {
            let mut sim = Simulator::default();
            sim.set_register(1, a);
            sim.set_register(2, b);

            exec(&mut sim, SimInstr::ADD(R0, R1, ImmOrReg::Reg(R2)));
            prop_assert_eq!(sim.register(0), a.wrapping_add(b));
            prop_assert_eq!(sim.cc(), ConditionCodes::from_result(a.wrapping_add(b)));

            exec(&mut sim, SimInstr::AND(R0, R1, ImmOrReg::Reg(R2)));
            prop_assert_eq!(sim.register(0), a & b);
            prop_assert_eq!(sim.cc(), ConditionCodes::from_result(a & b));

            exec(&mut sim, SimInstr::AND(R3, R1, imm5(imm)));
            prop_assert_eq!(sim.register(3), a & imm as u16);
            prop_assert_eq!(sim.cc(), ConditionCodes::from_result(a & imm as u16));

            exec(&mut sim, SimInstr::ADD(R3, R1, imm5(imm)));
            prop_assert_eq!(sim.register(3), a.wrapping_add(imm as u16));
            prop_assert_eq!(sim.cc(), ConditionCodes::from_result(a.wrapping_add(imm as u16)));
        }

        #[test]
        fn br_taken_iff_mask_matches(
            cc in prop_oneof![
                Just(ConditionCodes::Negative),
                Just(ConditionCodes::Zero),
                Just(ConditionCodes::Positive)
            ],
            mask in 0u8..8,
            off in -256i16..256
        ) {
            let mut sim = Simulator::default();
            sim.machine.cc = cc;

            exec(&mut sim, SimInstr::BR(mask, IOffset::new_trunc(off)));
            let expected = match mask & cc.bits() != 0 {
                true  => 0x3001u16.wrapping_add_signed(off),
                false => 0x3001,
            };
            prop_assert_eq!(sim.pc(), expected);
            prop_assert_eq!(sim.cc(), cc, "BR does not change condition codes");
        }
    }
}
