//! Module handles memory access observers,
//! which record the memory accesses an instruction performs.
//!
//! You would typically access an observer via the [`Simulator::observer`] field.
//! It is cleared at the start of every step, so after a step it holds exactly
//! the accesses that step's instruction made, in the order it made them.
//!
//! Fetching the instruction word is not recorded; only accesses made while executing it are.
//!
//! [`Simulator::observer`]: crate::sim::Simulator::observer

/// Whether an access read or wrote memory.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AccessKind {
    /// A word was read from memory.
    Read,
    /// A word was written to memory.
    Write,
}

/// One memory access.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MemAccess {
    /// Read or write.
    pub kind: AccessKind,
    /// The (already wrapped) address accessed.
    pub addr: u16,
    /// The value read, or the value written.
    pub value: u16,
}

/// A struct that tracks memory accesses in program order.
#[derive(Debug, Default)]
pub struct AccessObserver {
    log: Vec<MemAccess>
}
impl AccessObserver {
    /// Creates a new access observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all accesses.
    pub fn clear(&mut self) {
        self.log.clear();
    }

    pub(super) fn record(&mut self, kind: AccessKind, addr: u16, value: u16) {
        self.log.push(MemAccess { kind, addr, value });
    }

    /// All accesses since the last clear, oldest first.
    pub fn accesses(&self) -> &[MemAccess] {
        &self.log
    }

    /// Number of reads since the last clear.
    pub fn reads(&self) -> usize {
        self.log.iter().filter(|a| a.kind == AccessKind::Read).count()
    }
    /// Number of writes since the last clear.
    pub fn writes(&self) -> usize {
        self.log.iter().filter(|a| a.kind == AccessKind::Write).count()
    }

    /// Takes all accesses since the last clear, clearing the observer.
    pub fn take_accesses(&mut self) -> Vec<MemAccess> {
        std::mem::take(&mut self.log)
    }
}
