//! Sections only matter to us for one thing: the symbol tables inside the
//! files that back mapped segments. Cores themselves have no useful sections.
use super::{Reader, Stream};
use crate::utils;
use std::error::Error;

#[derive(Clone)]
pub struct SectionHeader {
    /// Index into the section name string table. Zero means no name.
    pub name: u32,
    pub stype: SectionType,
    pub offset: u64,
    pub size: u64,

    /// Link to another section with related information, for a symbol table
    /// the index of its string table.
    pub link: u32,

    /// Set if the section holds a table of fixed size entries.
    pub entry_size: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SectionType {
    /// Full symbol table, usually stripped from installed libraries.
    SymbolTable,

    /// Dynamic linker symbol table, always present in a shared object.
    DynamicSymbolTable,

    StringTable,

    /// Everything we have no use for.
    Other,
}

impl SectionType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x2 => SectionType::SymbolTable,
            0x3 => SectionType::StringTable,
            0xb => SectionType::DynamicSymbolTable,
            _ => SectionType::Other,
        }
    }
}

impl SectionHeader {
    pub fn new(reader: &Reader, offset: usize) -> Result<Self, Box<dyn Error>> {
        let mut s = Stream::new(reader, offset);
        if reader.sixty_four_bit {
            let name = s.read_word()?;
            let stype = SectionType::from_u32(s.read_word()?);
            let _flags = s.read_xword()?;
            let _vaddr = s.read_xword()?;
            let offset = s.read_xword()?;
            let size = s.read_xword()?;
            let link = s.read_word()?;
            let _info = s.read_word()?;
            let _align = s.read_xword()?;
            let entry_size = s.read_xword()?;
            Ok(SectionHeader {
                name,
                stype,
                offset,
                size,
                link,
                entry_size,
            })
        } else {
            let name = s.read_word()?;
            let stype = SectionType::from_u32(s.read_word()?);
            let _flags = s.read_word()?;
            let _vaddr = s.read_word()?;
            let offset = s.read_word()? as u64;
            let size = s.read_word()? as u64;
            let link = s.read_word()?;
            let _info = s.read_word()?;
            let _align = s.read_word()?;
            let entry_size = s.read_word()? as u64;
            Ok(SectionHeader {
                name,
                stype,
                offset,
                size,
                link,
                entry_size,
            })
        }
    }
}

/// One symbol record as it sits in the file: the name is still a string
/// table index, the value is still relative to the object's load base.
pub struct RawSymbol {
    pub name_index: u32,
    pub value: u64,
    pub size: u64,

    /// Type in the low nibble, binding in the high nibble (st_info).
    pub info: u8,
}

pub const STT_FUNC: u8 = 2;

impl RawSymbol {
    pub fn new(reader: &Reader, offset: usize) -> Result<Self, Box<dyn Error>> {
        // Field order is different so we need both cases.
        let mut s = Stream::new(reader, offset);
        if reader.sixty_four_bit {
            let name_index = s.read_word()?;
            let info = s.read_byte()?;
            let _other = s.read_byte()?;
            let _shndx = s.read_half()?;
            let value = s.read_xword()?;
            let size = s.read_xword()?;
            Ok(RawSymbol {
                name_index,
                value,
                size,
                info,
            })
        } else {
            let name_index = s.read_word()?;
            let value = s.read_word()? as u64;
            let size = s.read_word()? as u64;
            let info = s.read_byte()?;
            let _other = s.read_byte()?;
            let _shndx = s.read_half()?;
            Ok(RawSymbol {
                name_index,
                value,
                size,
                info,
            })
        }
    }

    pub fn stype(&self) -> u8 {
        self.info & 0xf
    }
}

/// Enumerates every symbol in the image's symbol tables (.dynsym and, when
/// the object isn't stripped, .symtab) with names resolved.
pub fn read_symbols(
    reader: &Reader,
    header: &super::ElfHeader,
) -> Result<Vec<(String, RawSymbol)>, Box<dyn Error>> {
    let mut sections = Vec::new();
    let mut offset = header.section_offset as usize;
    for _ in 0..header.num_section_entries {
        match SectionHeader::new(reader, offset) {
            Ok(h) => sections.push(h),
            Err(err) => utils::warn(&format!("failed to read section header at {offset}: {err}")),
        }
        offset += header.section_entry_size as usize;
    }

    let mut result = Vec::new();
    for section in sections.iter() {
        if section.stype != SectionType::SymbolTable
            && section.stype != SectionType::DynamicSymbolTable
        {
            continue;
        }
        if section.entry_size == 0 {
            utils::warn("symbol table with a zero entry size");
            continue;
        }
        let Some(strings) = sections.get(section.link as usize) else {
            utils::warn(&format!("symbol table links to bad section {}", section.link));
            continue;
        };

        let mut offset = section.offset;
        while offset + section.entry_size <= section.offset + section.size {
            match RawSymbol::new(reader, offset as usize) {
                Ok(sym) => {
                    let mut s =
                        Stream::new(reader, strings.offset as usize + sym.name_index as usize);
                    if let Ok(name) = s.read_string()
                        && !name.is_empty()
                    {
                        result.push((name, sym));
                    }
                }
                Err(err) => {
                    utils::warn(&format!("failed to read symbol at offset {offset}: {err}"));
                    break;
                }
            }
            offset += section.entry_size;
        }
    }
    Ok(result)
}
