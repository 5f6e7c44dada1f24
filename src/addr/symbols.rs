use rustc_hash::FxHashMap;

/// The debug-info collaborator: maps source lines to the absolute address of the code
/// assembled from them.
pub trait SymbolTable {
    fn source_line_for_address(&self, absolute: u32) -> Option<usize>;
    fn address_for_source_line(&self, sloc: usize) -> Option<u32>;
}

/// An in-memory [SymbolTable] filled from an assembler listing.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    line_for_addr: FxHashMap<u32, usize>,
    addr_for_line: FxHashMap<usize, u32>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that line `sloc` assembled to the instruction at `absolute`.
    ///
    /// A line that emitted several instructions keeps the first address it was given.
    pub fn insert(&mut self, sloc: usize, absolute: u32) {
        self.line_for_addr.insert(absolute, sloc);
        self.addr_for_line.entry(sloc).or_insert(absolute);
    }

    pub fn len(&self) -> usize {
        self.addr_for_line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addr_for_line.is_empty()
    }

    pub fn clear(&mut self) {
        self.line_for_addr.clear();
        self.addr_for_line.clear();
    }
}

impl SymbolTable for SourceMap {
    fn source_line_for_address(&self, absolute: u32) -> Option<usize> {
        self.line_for_addr.get(&absolute).copied()
    }

    fn address_for_source_line(&self, sloc: usize) -> Option<u32> {
        self.addr_for_line.get(&sloc).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_map_lookup() {
        let mut map = SourceMap::new();
        map.insert(10, 0x018000);
        map.insert(11, 0x018002);
        map.insert(11, 0x018004);
        assert_eq!(map.len(), 2);
        assert_eq!(map.address_for_source_line(11), Some(0x018002));
        assert_eq!(map.source_line_for_address(0x018004), Some(11));
        assert_eq!(map.source_line_for_address(0x018001), None);
        assert_eq!(map.address_for_source_line(99), None);
    }
}
