//! One parsed core image.
use super::{
    AuxvEntry, ElfHeader, MappedFileEntry, Note, NoteType, PrStatus, ProgramHeader, Reader,
    SegmentType, Stream, read_auxv, read_mapped_files, read_note, read_prstatus,
};
use crate::utils;
use std::error::Error;
use std::path::PathBuf;

pub struct CoreFile {
    pub path: PathBuf,
    pub reader: Reader,
    pub header: ElfHeader,

    /// PT_LOAD headers only, in file order.
    pub loads: Vec<ProgramHeader>,
    pub notes: Vec<Note>,
}

impl CoreFile {
    pub fn new(path: PathBuf) -> Result<Self, Box<dyn Error>> {
        let reader = Reader::new(&path)?;
        utils::require(reader.is_core(), "not a core file")?;
        let header = ElfHeader::new(&reader)?;
        let loads = CoreFile::load_loads(&reader, &header);
        let notes = CoreFile::load_notes(&reader, &header);
        Ok(CoreFile {
            path,
            reader,
            header,
            loads,
            notes,
        })
    }

    pub fn find_note(&self, ntype: NoteType) -> Option<&Note> {
        self.notes.iter().find(|n| n.ntype == ntype)
    }

    /// The auxiliary vector, empty when missing or damaged.
    pub fn auxv(&self) -> Vec<AuxvEntry> {
        let Some(note) = self.find_note(NoteType::AuxV) else {
            return Vec::new();
        };
        let mut s = Stream::new(&self.reader, note.contents.offset);
        match read_auxv(&mut s, note.contents.size) {
            Ok(entries) => entries,
            Err(err) => {
                utils::warn(&format!("error reading auxv: {err}"));
                Vec::new()
            }
        }
    }

    /// The NT_FILE table: page size plus one row per mapped file range.
    pub fn mapped_files(&self) -> Option<(u64, Vec<MappedFileEntry>)> {
        let note = self.find_note(NoteType::File)?;
        let mut s = Stream::new(&self.reader, note.contents.offset);
        match read_mapped_files(&mut s, note.contents.size) {
            Ok(table) => Some(table),
            Err(err) => {
                utils::warn(&format!("error reading mapped file table: {err}"));
                None
            }
        }
    }

    /// One PrStatus per thread, dump order (the faulting thread first).
    pub fn threads(&self) -> Vec<PrStatus> {
        let mut result = Vec::new();
        for note in self.notes.iter() {
            if note.ntype == NoteType::PrStatus {
                let mut s = Stream::new(&self.reader, note.contents.offset);
                match read_prstatus(&mut s, note.contents.size) {
                    Ok(status) => result.push(status),
                    Err(err) => utils::warn(&format!("error reading prstatus: {err}")),
                }
            }
        }
        result
    }

    fn load_loads(reader: &Reader, header: &ElfHeader) -> Vec<ProgramHeader> {
        let mut loads = Vec::new();
        let mut offset = header.ph_offset as usize;

        // Even a large core file has a small number of program headers, so
        // it's OK to re-iterate over them for the notes below.
        for _ in 0..header.num_ph_entries {
            match ProgramHeader::new(reader, offset) {
                Ok(ph) => {
                    if ph.stype == SegmentType::Load {
                        loads.push(ph);
                    }
                }
                Err(err) => {
                    utils::warn(&format!("failed to read program header at {offset}: {err}"))
                }
            }
            offset += header.ph_entry_size as usize;
        }
        loads
    }

    fn load_notes(reader: &Reader, header: &ElfHeader) -> Vec<Note> {
        let mut notes = Vec::new();
        let mut offset = header.ph_offset as usize;

        for _ in 0..header.num_ph_entries {
            match ProgramHeader::new(reader, offset) {
                Ok(ph) => {
                    // Cores are often truncated. Not all notes are essential
                    // so we keep whatever parses.
                    if ph.stype == SegmentType::Note {
                        let mut s = Stream::new(reader, ph.offset as usize);
                        while s.offset < (ph.offset + ph.file_size) as usize {
                            match read_note(&mut s) {
                                Ok((name, ntype, contents)) => notes.push(Note {
                                    name,
                                    ntype: NoteType::from_u32(ntype),
                                    contents,
                                }),
                                Err(_) => {
                                    utils::warn(&format!(
                                        "failed to read note at offset {}",
                                        s.offset
                                    ));
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    utils::warn(&format!("failed to read program header at {offset}: {err}"))
                }
            }
            offset += header.ph_entry_size as usize;
        }
        notes
    }
}
