//! Translation between source lines, CPU-visible (logical) addresses and bank-invariant
//! (absolute) addresses.
//!
//! Every translation is only valid for the bank layout active when it was made. Callers must
//! not cache the results across a bank switch.

use std::rc::Rc;

use thiserror::Error;

pub mod mapping;
pub mod symbols;

pub use mapping::{BankMapping, MappingTable, SharedMapping, FIXED_REGION_TAG, MAX_PRG_BANKS};
pub use symbols::{SourceMap, SymbolTable};

/// An error for the address translator. None of these are fatal: they mean "nothing to show".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("absolute address ${0:06X} is not mapped into the CPU address space")]
    NotMapped(u32),
    #[error("no bank is mapped behind ${0:04X}")]
    WindowUnmapped(u16),
    #[error("no source line assembled to ${0:04X}")]
    NoSourceLine(u16),
    #[error("source line {0} has no address")]
    NoAddress(usize),
    #[error("PRG window {0} does not exist")]
    WindowOutOfRange(usize),
    #[error("PRG bank {0} is beyond the addressable range")]
    BankOutOfRange(u32),
}

/// Type alias for Result<T, [AddrError]>.
pub type AResult<T> = Result<T, AddrError>;

/// A thin, swappable layer over the memory-mapper and debug-info collaborators.
#[derive(Clone)]
pub struct AddressTranslator {
    mapping: Rc<dyn BankMapping>,
    symbols: Rc<dyn SymbolTable>,
}

impl AddressTranslator {
    pub fn new(mapping: Rc<dyn BankMapping>, symbols: Rc<dyn SymbolTable>) -> Self {
        Self { mapping, symbols }
    }

    /// Replaces the debug info, e.g. after a rebuild of the cartridge.
    pub fn set_symbols(&mut self, symbols: Rc<dyn SymbolTable>) {
        self.symbols = symbols;
    }

    pub fn mapping(&self) -> MappingTable {
        self.mapping.current_mapping()
    }

    pub fn to_absolute(&self, logical: u16) -> AResult<u32> {
        self.mapping.current_mapping().to_absolute(logical)
    }

    pub fn to_logical(&self, absolute: u32) -> AResult<u16> {
        self.mapping.current_mapping().to_logical(absolute)
    }

    pub fn source_line_from_address(&self, logical: u16) -> AResult<usize> {
        let absolute = self.to_absolute(logical)?;
        self.symbols
            .source_line_for_address(absolute)
            .ok_or(AddrError::NoSourceLine(logical))
    }

    pub fn address_from_source_line(&self, sloc: usize) -> AResult<u16> {
        let absolute = self
            .symbols
            .address_for_source_line(sloc)
            .ok_or(AddrError::NoAddress(sloc))?;
        self.to_logical(absolute)
    }

    /// Resolves a source line to both of its addresses, as stored on breakpoints and markers.
    pub fn resolve_line(&self, sloc: usize) -> AResult<(u16, u32)> {
        let logical = self.address_from_source_line(sloc)?;
        Ok((logical, self.to_absolute(logical)?))
    }
}
