//! The dynamic linker's view of the target: which objects were loaded where.
//! Reconstructed entirely from target memory, the same way a debugger does
//! it: AT_PHDR locates the main executable's program headers, PT_DYNAMIC
//! locates its dynamic section, DT_DEBUG points at the loader's r_debug,
//! and r_debug.r_map heads the doubly linked list of link_map nodes.
//!
//! Cores are routinely missing pieces (a truncated dump, a stripped stack)
//! so the walk is best effort: whatever parsed before the first bad node is
//! kept and [`LinkMapIndex::complete`] records that there may be more.
pub mod symbols;

pub use symbols::*;

use crate::elf::{AT_PHDR, AT_PHENT, AT_PHNUM};
use crate::space::{AddressSpace, Error, Result};
use crate::utils;
use std::cell::OnceCell;
use std::ops::ControlFlow;

const PT_DYNAMIC: u32 = 2;
const PT_PHDR: u32 = 6;
const DT_DEBUG: u64 = 21;

/// Sanity cap on walk length; a cycle in the list would spin forever.
const MAX_OBJECTS: usize = 4096;

const MAX_NAME: usize = 512;

pub struct LoadedObject {
    /// Load bias (l_addr). Zero for non-PIE executables.
    pub addr: u64,

    /// Path as recorded by the loader. Often empty for the main executable.
    pub name: String,

    /// Address of the object's dynamic section (l_ld).
    pub dynamic: u64,

    symbols: OnceCell<Vec<Symbol>>,
}

impl LoadedObject {
    /// The object's symbols, loaded from its backing file on first use.
    pub fn symbols(&self, space: &AddressSpace) -> &[Symbol] {
        self.symbols
            .get_or_init(|| load_symbols(space, self.addr, &self.name))
    }

    /// The file name without its directory, for display and matching.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

pub struct LinkMapIndex {
    /// Walk order, i.e. the loader's own order with the executable first.
    pub objects: Vec<LoadedObject>,

    /// False when the walk stopped early on unreadable memory.
    pub complete: bool,
}

/// The result of resolving an address to a symbol.
pub struct Resolved<'a> {
    pub object: &'a LoadedObject,
    pub symbol: &'a Symbol,

    /// Distance from the symbol's address.
    pub offset: u64,

    /// False when the symbol has no recorded size and we fell back to the
    /// nearest preceding one.
    pub exact: bool,
}

impl LinkMapIndex {
    pub fn new(space: &AddressSpace) -> Result<Self> {
        let phdr_addr = space
            .auxval(AT_PHDR)
            .ok_or_else(|| Error::MalformedInput("no AT_PHDR in auxv".to_string()))?;
        let phnum = space
            .auxval(AT_PHNUM)
            .ok_or_else(|| Error::MalformedInput("no AT_PHNUM in auxv".to_string()))?;
        let default_ent = if space.ptr_size() == 8 { 56 } else { 32 };
        let phent = space.auxval(AT_PHENT).unwrap_or(default_ent);

        // Scan the executable's in-memory program headers for PT_PHDR (which
        // gives us the load bias) and PT_DYNAMIC.
        let mut phdr_vaddr = None;
        let mut dynamic_vaddr = None;
        for i in 0..phnum {
            let base = phdr_addr + i * phent;
            let ptype = space.read_word(base)?;
            let vaddr = if space.ptr_size() == 8 {
                space.read_pointer(base + 16)?
            } else {
                space.read_word(base + 8)? as u64
            };
            match ptype {
                PT_PHDR => phdr_vaddr = Some(vaddr),
                PT_DYNAMIC => dynamic_vaddr = Some(vaddr),
                _ => (),
            }
        }
        let bias = phdr_vaddr.map_or(0, |v| phdr_addr.wrapping_sub(v));
        let dynamic = bias.wrapping_add(dynamic_vaddr.ok_or_else(|| {
            Error::MalformedInput("executable has no PT_DYNAMIC".to_string())
        })?);

        let r_debug = Self::find_r_debug(space, dynamic)?;
        let version = space.read_word(r_debug)?;
        if version != 1 {
            utils::warn(&format!("unexpected r_debug version {version}"));
        }

        let ptr = space.ptr_size() as u64;
        let mut node = space.read_pointer(r_debug + ptr)?;
        let mut objects = Vec::new();
        let mut complete = true;
        while node != 0 {
            if objects.len() >= MAX_OBJECTS {
                utils::warn("link map list doesn't terminate, probably a cycle");
                complete = false;
                break;
            }
            match Self::read_node(space, node, ptr) {
                Ok((l_addr, l_name, l_ld, l_next)) => {
                    let name = if l_name == 0 {
                        String::new()
                    } else {
                        space.read_string(l_name, MAX_NAME).unwrap_or_else(|err| {
                            utils::warn(&format!("unreadable object name: {err}"));
                            String::new()
                        })
                    };
                    objects.push(LoadedObject {
                        addr: l_addr,
                        name,
                        dynamic: l_ld,
                        symbols: OnceCell::new(),
                    });
                    node = l_next;
                }
                Err(err) => {
                    // The rest of the list is gone but everything up to here
                    // is still good.
                    utils::warn(&format!("link map walk stopped at {node:#x}: {err}"));
                    complete = false;
                    break;
                }
            }
        }

        Ok(LinkMapIndex { objects, complete })
    }

    fn find_r_debug(space: &AddressSpace, dynamic: u64) -> Result<u64> {
        let ptr = space.ptr_size() as u64;
        let mut at = dynamic;
        let end = dynamic + MAX_OBJECTS as u64 * 2 * ptr;
        while at < end {
            let tag = space.read_pointer(at)?;
            if tag == 0 {
                break;
            }
            if tag == DT_DEBUG {
                let value = space.read_pointer(at + ptr)?;
                if value != 0 {
                    return Ok(value);
                }
            }
            at += 2 * ptr;
        }
        Err(Error::MalformedInput(
            "dynamic section has no usable DT_DEBUG".to_string(),
        ))
    }

    fn read_node(space: &AddressSpace, node: u64, ptr: u64) -> Result<(u64, u64, u64, u64)> {
        let l_addr = space.read_pointer(node)?;
        let l_name = space.read_pointer(node + ptr)?;
        let l_ld = space.read_pointer(node + 2 * ptr)?;
        let l_next = space.read_pointer(node + 3 * ptr)?;
        Ok((l_addr, l_name, l_ld, l_next))
    }

    /// Visits objects in load order until the callback breaks.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&LoadedObject) -> ControlFlow<()>,
    {
        for object in self.objects.iter() {
            if visit(object).is_break() {
                break;
            }
        }
    }

    /// Finds an object by full path or by file name.
    pub fn find_object(&self, name: &str) -> Option<&LoadedObject> {
        self.objects
            .iter()
            .find(|o| o.name == name || o.short_name() == name)
    }

    /// Finds a symbol by raw or demangled name, searching objects in load
    /// order so the executable's own symbols win over libraries.
    pub fn lookup_by_name<'a>(
        &'a self,
        space: &AddressSpace,
        name: &str,
    ) -> Option<(&'a LoadedObject, &'a Symbol)> {
        for object in self.objects.iter() {
            let found = object
                .symbols(space)
                .iter()
                .find(|s| s.name == name || demangle(&s.name) == name);
            if let Some(symbol) = found {
                return Some((object, symbol));
            }
        }
        None
    }

    /// Resolves an address to the symbol containing it. A symbol with a size
    /// that encloses the address wins. A zero-size symbol is assumed to
    /// extend up to the next one, so it soaks up everything past it; a sized
    /// symbol never claims addresses beyond its extent.
    pub fn lookup_by_address<'a>(
        &'a self,
        space: &AddressSpace,
        addr: u64,
    ) -> Option<Resolved<'a>> {
        let mut best: Option<Resolved> = None;
        for object in self.objects.iter() {
            let symbols = object.symbols(space);
            let i = symbols.partition_point(|s| s.addr <= addr);
            if i == 0 {
                continue;
            }
            // Sized symbols sort ahead of zero-sized aliases at the same
            // address, so back up to the first entry at that address.
            let mut j = i - 1;
            while j > 0 && symbols[j - 1].addr == symbols[i - 1].addr {
                j -= 1;
            }
            let group = &symbols[j..i];
            let Some(symbol) = group
                .iter()
                .find(|s| s.encloses(addr))
                .or_else(|| group.iter().find(|s| s.size == 0))
            else {
                continue;
            };
            let candidate = Resolved {
                object,
                symbol,
                offset: addr - symbol.addr,
                exact: symbol.encloses(addr),
            };
            let better = match &best {
                None => true,
                Some(b) => {
                    (candidate.exact && !b.exact)
                        || (candidate.exact == b.exact && candidate.offset < b.offset)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{AT_PAGESZ, CoreFile};
    use crate::testing::*;
    use std::path::Path;

    /// Builds a core whose memory contains a full link map chain: a main
    /// executable at 0x400000 and one library, whose on-disk image exists
    /// and carries a .dynsym.
    fn linked_space(name: &str, lib: &Path, lib_bias: u64) -> AddressSpace {
        let lib_path = lib.to_str().unwrap();

        // The executable image: program headers at +0x40, dynamic at +0x1000.
        let mut exe = vec![0u8; 0x2000];
        put_u32(&mut exe, 0x40, 6); // PT_PHDR
        put_u64(&mut exe, 0x40 + 16, 0x40);
        put_u32(&mut exe, 0x40 + 56, 2); // PT_DYNAMIC
        put_u64(&mut exe, 0x40 + 56 + 16, 0x1000);
        put_u64(&mut exe, 0x1000, 21); // DT_DEBUG
        put_u64(&mut exe, 0x1008, 0x500000);
        put_u64(&mut exe, 0x1010, 0); // DT_NULL

        // Loader data: r_debug at 0x500000, link_map nodes and name strings
        // after it.
        let mut loader = vec![0u8; 0x1000];
        put_u32(&mut loader, 0, 1); // r_version
        put_u64(&mut loader, 8, 0x500100); // r_map

        put_u64(&mut loader, 0x100, 0x400000); // exe: l_addr
        put_u64(&mut loader, 0x108, 0x500300); // l_name -> ""
        put_u64(&mut loader, 0x110, 0x401000); // l_ld
        put_u64(&mut loader, 0x118, 0x500180); // l_next

        put_u64(&mut loader, 0x180, lib_bias);
        put_u64(&mut loader, 0x188, 0x500310); // l_name -> lib path
        put_u64(&mut loader, 0x190, 0); // l_ld
        put_u64(&mut loader, 0x198, 0); // l_next

        loader[0x310..0x310 + lib_path.len()].copy_from_slice(lib_path.as_bytes());

        let mut synth = SynthCore::x64();
        synth.auxv = vec![
            (crate::elf::AT_PHDR, 0x400040),
            (crate::elf::AT_PHENT, 56),
            (crate::elf::AT_PHNUM, 2),
            (AT_PAGESZ, 0x1000),
        ];
        synth.blocks.push(SynthBlock::anon(0x400000, 0x2000, exe));
        synth.blocks.push(SynthBlock::anon(0x500000, 0x1000, loader));
        let mut lib_block = SynthBlock::anon(lib_bias, 0x1000, Vec::new());
        lib_block.file = Some((lib.to_path_buf(), 0));
        synth.blocks.push(lib_block);

        let path = synth.write(name);
        AddressSpace::new(CoreFile::new(path).unwrap()).unwrap()
    }

    #[test]
    fn walks_the_link_map() {
        let lib = write_min_lib("walks_link_map.so", &[]);
        let space = linked_space("walks_link_map", &lib, 0x7f0000000000);
        let index = LinkMapIndex::new(&space).unwrap();

        assert!(index.complete);
        assert_eq!(index.objects.len(), 2);
        assert_eq!(index.objects[0].addr, 0x400000);
        assert_eq!(index.objects[0].name, "");
        assert_eq!(index.objects[1].addr, 0x7f0000000000);
        assert_eq!(index.objects[1].name, lib.to_str().unwrap());
        assert!(index.find_object("walks_link_map.so").is_none()); // temp name has a prefix
        assert!(index.find_object(lib.to_str().unwrap()).is_some());
    }

    #[test]
    fn traversal_stops_when_asked() {
        let lib = write_min_lib("early_stop.so", &[]);
        let space = linked_space("early_stop", &lib, 0x7f0000000000);
        let index = LinkMapIndex::new(&space).unwrap();

        let mut visited = 0;
        index.for_each(|_| {
            visited += 1;
            ControlFlow::Break(())
        });
        assert_eq!(visited, 1);
    }

    #[test]
    fn symbol_lookups_apply_the_load_bias() {
        let bias = 0x7f0000000000u64;
        let lib = write_min_lib(
            "sym_lookup.so",
            &[("foo", 0x100, 0x20), ("bar", 0x200, 0)],
        );
        let space = linked_space("sym_lookup", &lib, bias);
        let index = LinkMapIndex::new(&space).unwrap();

        let (object, symbol) = index.lookup_by_name(&space, "foo").unwrap();
        assert_eq!(object.addr, bias);
        assert_eq!(symbol.addr, bias + 0x100);
        assert_eq!(symbol.size, 0x20);
        assert!(symbol.is_func);

        // Inside foo's extent.
        let hit = index.lookup_by_address(&space, bias + 0x110).unwrap();
        assert_eq!(hit.symbol.name, "foo");
        assert_eq!(hit.offset, 0x10);
        assert!(hit.exact);

        // Past foo's extent but before bar: foo has a size, so it doesn't
        // claim the gap.
        assert!(index.lookup_by_address(&space, bias + 0x150).is_none());

        // Past bar, which has no size, so it soaks up the address.
        let hit = index.lookup_by_address(&space, bias + 0x250).unwrap();
        assert_eq!(hit.symbol.name, "bar");
        assert_eq!(hit.offset, 0x50);
        assert!(!hit.exact);

        assert!(index.lookup_by_address(&space, 0x10).is_none());
        assert!(index.lookup_by_name(&space, "baz").is_none());
    }

    #[test]
    fn sized_symbols_stop_at_their_extent() {
        let bias = 0x7f0000000000u64;
        let lib = write_min_lib(
            "sized_extent.so",
            &[("foo", 0x1000, 0x10), ("bar", 0x1010, 0x10)],
        );
        let space = linked_space("sized_extent", &lib, bias);
        let index = LinkMapIndex::new(&space).unwrap();

        let hit = index.lookup_by_address(&space, bias + 0x1015).unwrap();
        assert_eq!(hit.symbol.name, "bar");
        assert_eq!(hit.offset, 5);
        assert!(hit.exact);

        // Both symbols have sizes, so an address past the last one resolves
        // to nothing rather than to bar with a huge offset.
        assert!(index.lookup_by_address(&space, bias + 0x2000).is_none());
    }

    #[test]
    fn partial_walk_keeps_what_parsed() {
        let lib = write_min_lib("partial_walk.so", &[]);
        let lib_path = lib.to_str().unwrap();

        let mut exe = vec![0u8; 0x2000];
        put_u32(&mut exe, 0x40, 6);
        put_u64(&mut exe, 0x40 + 16, 0x40);
        put_u32(&mut exe, 0x40 + 56, 2);
        put_u64(&mut exe, 0x40 + 56 + 16, 0x1000);
        put_u64(&mut exe, 0x1000, 21);
        put_u64(&mut exe, 0x1008, 0x500000);
        put_u64(&mut exe, 0x1010, 0);

        let mut loader = vec![0u8; 0x1000];
        put_u32(&mut loader, 0, 1);
        put_u64(&mut loader, 8, 0x500100);
        put_u64(&mut loader, 0x100, 0x400000);
        put_u64(&mut loader, 0x108, 0x500310);
        put_u64(&mut loader, 0x110, 0x401000);
        put_u64(&mut loader, 0x118, 0x900000); // next node is unmapped
        loader[0x310..0x310 + lib_path.len()].copy_from_slice(lib_path.as_bytes());

        let mut synth = SynthCore::x64();
        synth.auxv = vec![
            (crate::elf::AT_PHDR, 0x400040),
            (crate::elf::AT_PHENT, 56),
            (crate::elf::AT_PHNUM, 2),
            (AT_PAGESZ, 0x1000),
        ];
        synth.blocks.push(SynthBlock::anon(0x400000, 0x2000, exe));
        synth.blocks.push(SynthBlock::anon(0x500000, 0x1000, loader));
        let path = synth.write("partial_walk");
        let space = AddressSpace::new(CoreFile::new(path).unwrap()).unwrap();

        let index = LinkMapIndex::new(&space).unwrap();
        assert!(!index.complete);
        assert_eq!(index.objects.len(), 1);
    }

    #[test]
    fn missing_auxv_is_malformed() {
        let mut synth = SynthCore::x64();
        synth.blocks.push(SynthBlock::anon(0x1000, 0x1000, Vec::new()));
        let path = synth.write("missing_auxv");
        let space = AddressSpace::new(CoreFile::new(path).unwrap()).unwrap();
        match LinkMapIndex::new(&space) {
            Err(Error::MalformedInput(msg)) => assert!(msg.contains("AT_PHDR")),
            Err(err) => panic!("wrong error: {err}"),
            Ok(_) => panic!("expected MalformedInput"),
        }
    }

    #[test]
    fn demangles_cpp_names() {
        insta::assert_snapshot!(demangle("_ZN3foo3barEv"), @"foo::bar()");
        insta::assert_snapshot!(demangle("plain_c_name"), @"plain_c_name");
    }
}
