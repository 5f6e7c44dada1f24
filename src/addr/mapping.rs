use std::cell::Cell;

use crate::plat::{PRG_BANK_SIZE, PRG_WINDOW_BASE, PRG_WINDOW_COUNT};

use super::{AResult, AddrError};

/// Tag carried by the absolute identifiers of the fixed (non bank-switched) region below
/// [PRG_WINDOW_BASE], so they never collide with PRG bank offsets.
pub const FIXED_REGION_TAG: u32 = 1 << 24;

/// Number of PRG banks addressable without reaching [FIXED_REGION_TAG].
pub const MAX_PRG_BANKS: u32 = FIXED_REGION_TAG / PRG_BANK_SIZE;

/// Which PRG bank currently occupies each CPU-visible window.
///
/// Only valid for the instant it was taken: a bank switch invalidates every address
/// translated through an older table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MappingTable {
    windows: [Option<u32>; PRG_WINDOW_COUNT],
}

impl MappingTable {
    /// A table with every window unmapped.
    pub fn unmapped() -> Self {
        Self::default()
    }

    /// A table with `banks[n]` mapped into window `n`.
    pub fn with_banks(banks: [u32; PRG_WINDOW_COUNT]) -> AResult<Self> {
        let mut table = Self::unmapped();
        for (window, bank) in banks.into_iter().enumerate() {
            table.map(window, Some(bank))?;
        }
        Ok(table)
    }

    /// Maps `bank` into `window`, or unmaps the window when `bank` is `None`.
    ///
    /// Banks at or above [MAX_PRG_BANKS] are rejected and leave the table unchanged.
    pub fn map(&mut self, window: usize, bank: Option<u32>) -> AResult<()> {
        if let Some(bank) = bank {
            if bank >= MAX_PRG_BANKS {
                return Err(AddrError::BankOutOfRange(bank));
            }
        }
        let slot = self
            .windows
            .get_mut(window)
            .ok_or(AddrError::WindowOutOfRange(window))?;
        *slot = bank;
        Ok(())
    }

    pub fn bank_at(&self, window: usize) -> Option<u32> {
        self.windows.get(window).copied().flatten()
    }

    /// The window serving `logical`, or `None` for the fixed region.
    pub fn window_of(logical: u16) -> Option<usize> {
        if logical < PRG_WINDOW_BASE {
            None
        } else {
            Some(((logical - PRG_WINDOW_BASE) as u32 / PRG_BANK_SIZE) as usize)
        }
    }

    /// Resolves a CPU-visible address to its bank-invariant identifier.
    pub fn to_absolute(&self, logical: u16) -> AResult<u32> {
        match Self::window_of(logical) {
            None => Ok(FIXED_REGION_TAG | logical as u32),
            Some(window) => {
                let bank = self
                    .bank_at(window)
                    .ok_or(AddrError::WindowUnmapped(logical))?;
                let offset = (logical - PRG_WINDOW_BASE) as u32 % PRG_BANK_SIZE;
                Ok(bank * PRG_BANK_SIZE + offset)
            }
        }
    }

    /// Finds where `absolute` is visible to the CPU right now.
    ///
    /// When a bank is mapped into more than one window the lowest window wins.
    pub fn to_logical(&self, absolute: u32) -> AResult<u16> {
        if absolute & FIXED_REGION_TAG != 0 {
            let logical = absolute & !FIXED_REGION_TAG;
            return if logical < PRG_WINDOW_BASE as u32 {
                Ok(logical as u16)
            } else {
                Err(AddrError::NotMapped(absolute))
            };
        }
        let bank = absolute / PRG_BANK_SIZE;
        let offset = absolute % PRG_BANK_SIZE;
        self.windows
            .iter()
            .position(|w| *w == Some(bank))
            .map(|window| PRG_WINDOW_BASE + (window as u32 * PRG_BANK_SIZE + offset) as u16)
            .ok_or(AddrError::NotMapped(absolute))
    }
}

/// The memory-mapper collaborator: reports the bank layout active at query time.
pub trait BankMapping {
    fn current_mapping(&self) -> MappingTable;
}

impl BankMapping for MappingTable {
    fn current_mapping(&self) -> MappingTable {
        *self
    }
}

/// A mapping the emulation side switches banks in while the debugger reads it.
#[derive(Debug, Default)]
pub struct SharedMapping {
    table: Cell<MappingTable>,
}

impl SharedMapping {
    pub fn new(table: MappingTable) -> Self {
        Self {
            table: Cell::new(table),
        }
    }

    /// Performs a bank switch.
    pub fn switch(&self, window: usize, bank: Option<u32>) -> AResult<()> {
        let mut table = self.table.get();
        table.map(window, bank)?;
        log::trace!("bank switch: window {} -> {:?}", window, bank);
        self.table.set(table);
        Ok(())
    }

    pub fn reset(&self) {
        self.table.set(MappingTable::unmapped());
    }
}

impl BankMapping for SharedMapping {
    fn current_mapping(&self) -> MappingTable {
        self.table.get()
    }
}
