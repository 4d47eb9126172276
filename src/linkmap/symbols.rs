//! Symbols for one loaded object, read out of the object's backing file.
//! Cores don't carry symbol tables so this only works for blocks whose
//! NT_FILE entry resolved to a real file on disk.
use crate::elf::{ElfHeader, STT_FUNC, read_symbols};
use crate::space::AddressSpace;
use crate::utils;

#[derive(Clone)]
pub struct Symbol {
    /// The raw (possibly mangled) name as it appears in the file.
    pub name: String,

    /// Absolute address in the target's address space, load bias applied.
    pub addr: u64,

    /// Zero for many assembly routines and data symbols; callers treat a
    /// zero-size symbol as extending to the next one.
    pub size: u64,

    pub is_func: bool,
}

impl Symbol {
    /// True if addr falls strictly inside this symbol's extent.
    pub fn encloses(&self, addr: u64) -> bool {
        self.size > 0 && addr >= self.addr && addr < self.addr + self.size
    }
}

/// Demangled name for display, the raw name when it isn't a C++ mangling.
pub fn demangle(name: &str) -> String {
    match cpp_demangle::Symbol::new(name) {
        Ok(sym) => sym.to_string(),
        Err(_) => name.to_string(),
    }
}

/// Loads and sorts the symbols of the object loaded at `object_addr` under
/// `object_name`. Returns an empty table when the backing file is missing or
/// isn't a readable ELF image; symbol lookups just come up empty then.
pub fn load_symbols(space: &AddressSpace, object_addr: u64, object_name: &str) -> Vec<Symbol> {
    let Some(map) = space
        .blocks()
        .iter()
        .find(|b| b.name.as_deref() == Some(object_name) && b.mapped.is_some())
        .and_then(|b| b.mapped.clone())
    else {
        return Vec::new();
    };

    let reader = match map.elf_reader() {
        Ok(r) => r,
        Err(err) => {
            utils::warn(&format!("{object_name} is not a readable ELF image: {err}"));
            return Vec::new();
        }
    };
    let header = match ElfHeader::new(&reader) {
        Ok(h) => h,
        Err(err) => {
            utils::warn(&format!("bad ELF header in {object_name}: {err}"));
            return Vec::new();
        }
    };

    // ET_EXEC symbol values are already absolute; ET_DYN values are relative
    // to wherever the loader put the object.
    let bias = if header.etype == 0x02 { 0 } else { object_addr };

    let raw = match read_symbols(&reader, &header) {
        Ok(syms) => syms,
        Err(err) => {
            utils::warn(&format!("can't read symbols from {object_name}: {err}"));
            return Vec::new();
        }
    };

    let mut symbols: Vec<Symbol> = raw
        .into_iter()
        .filter(|(_, sym)| sym.value != 0)
        .map(|(name, sym)| Symbol {
            name,
            addr: bias.wrapping_add(sym.value),
            size: sym.size,
            is_func: sym.stype() == STT_FUNC,
        })
        .collect();

    // Sized symbols sort ahead of zero-sized aliases at the same address so
    // that address lookups land on the more informative one.
    symbols.sort_by(|a, b| a.addr.cmp(&b.addr).then(b.size.cmp(&a.size)));
    symbols.dedup_by(|a, b| a.addr == b.addr && a.name == b.name);
    symbols
}
