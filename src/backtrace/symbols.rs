//! Symbol resolution for return addresses.
//!
//! The monitor resolves instruction addresses through the [`SymbolResolver`]
//! seam. The in-kernel implementation is a small sorted map of entry points
//! registered during boot; anything finer-grained (DWARF, a linker-generated
//! table) can implement the same trait later.

use alloc::vec::Vec;
use spin::Mutex;

/// Resolution result. `name` arrives already bounded by the resolver, so
/// formatting it can never over-read.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SymbolInfo<'a> {
    pub file: &'a str,
    pub line: u32,
    pub name: &'a str,
    pub func_start: u64,
}

pub trait SymbolResolver {
    fn resolve(&self, addr: u64) -> Option<SymbolInfo<'_>>;
}

struct KernelSymbol {
    start: u64,
    name: &'static str,
    file: &'static str,
    line: u32,
}

static SYMBOLS: Mutex<Vec<KernelSymbol>> = Mutex::new(Vec::new());

/// Addresses past the last registered symbol resolve only within this span.
const TAIL_SPAN: u64 = 64 * 1024;

/// Register one kernel entry point. Keeps the table sorted by start address.
pub fn register(start: u64, name: &'static str, file: &'static str, line: u32) {
    let mut table = SYMBOLS.lock();
    let pos = table.partition_point(|s| s.start <= start);
    table.insert(
        pos,
        KernelSymbol {
            start,
            name,
            file,
            line,
        },
    );
}

/// Resolver over the registered kernel entry points. A symbol covers the
/// addresses up to the next registered start.
pub struct KernelSymbols;

impl SymbolResolver for KernelSymbols {
    fn resolve(&self, addr: u64) -> Option<SymbolInfo<'_>> {
        let table = SYMBOLS.lock();
        let idx = table.partition_point(|s| s.start <= addr).checked_sub(1)?;
        let sym = &table[idx];
        let span_end = table
            .get(idx + 1)
            .map(|next| next.start)
            .unwrap_or(sym.start.saturating_add(TAIL_SPAN));
        if addr >= span_end {
            return None;
        }
        Some(SymbolInfo {
            file: sym.file,
            line: sym.line,
            name: sym.name,
            func_start: sym.start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The table is process-global; each test stays in its own address band.

    #[test]
    fn resolves_within_the_covering_symbol() {
        register(0x10_0000, "alpha", "src/a.rs", 10);
        register(0x10_4000, "beta", "src/b.rs", 20);

        let hit = KernelSymbols.resolve(0x10_2345).unwrap();
        assert_eq!(hit.name, "alpha");
        assert_eq!(hit.func_start, 0x10_0000);
        assert_eq!(hit.file, "src/a.rs");
        assert_eq!(hit.line, 10);

        let hit = KernelSymbols.resolve(0x10_4000).unwrap();
        assert_eq!(hit.name, "beta");
    }

    #[test]
    fn addresses_below_every_symbol_do_not_resolve() {
        register(0x20_0000, "gamma", "src/c.rs", 1);
        assert!(KernelSymbols.resolve(0x1000).is_none());
    }
}
