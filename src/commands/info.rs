//! `info` subcommands: the core file, the process inside it, and the
//! reconstructed address space.
use super::Session;
use super::tables::{SimpleTableBuilder, TableBuilder, add_field, add_simple};
use crate::repl::{ExplainArgs, RegistersArgs, TableArgs};
use crate::utils::{self, Styling};
use std::io::stdout;

pub fn info_header(session: &Session, args: &ExplainArgs) {
    let space = &session.space;
    let core = &space.core;

    let mut builder = SimpleTableBuilder::new();
    add_simple!(builder, "path", core.path.display(), "the core file being analyzed");
    add_simple!(builder, "type", core.header.stype(), "the ELF file type, should always be core");
    add_simple!(builder, "machine", space.machine, "the CPU family the process ran on");
    add_simple!(
        builder,
        "64-bit",
        core.reader.sixty_four_bit,
        "whether pointers are eight bytes"
    );
    add_simple!(
        builder,
        "little endian",
        core.reader.little_endian,
        "the byte order of the captured memory"
    );
    add_simple!(
        builder,
        "vaddr mask",
        "{:#x}",
        space.vaddr_mask(),
        "pointer bits that are actual virtual address; the rest is tag or sign extension"
    );
    add_simple!(builder, "load blocks", space.blocks().len(), "captured address ranges");
    add_simple!(builder, "notes", core.notes.len(), "metadata records in the PT_NOTE segment");
    add_simple!(builder, "page size", "{:#x}", space.page_size, "from NT_FILE or AT_PAGESZ");
    builder.writeln(stdout(), args.explain);
}

pub fn info_blocks(session: &Session, args: &TableArgs) {
    let space = &session.space;

    let mut builder = TableBuilder::new();
    builder.add_col_r("vaddr", "where the block starts");
    builder.add_col_r("end", "one past the last address");
    builder.add_col_l("perms", "read/write/execute permissions at dump time");
    builder.add_col_l(
        "src",
        "which sources have bytes: o = in the core, m = backing file, v = patched",
    );
    builder.add_col_r("origin", "how many bytes the core captured");
    builder.add_col_l("path", "backing file from the mapped file table");

    for block in space.blocks().iter() {
        add_field!(builder, "vaddr", "{:x}", block.vaddr);
        add_field!(builder, "end", "{:x}", block.end());
        add_field!(builder, "perms", block.perms());
        add_field!(builder, "src", block.sources());
        add_field!(builder, "origin", "{:x}", block.file_size);
        let path = block.name.clone().unwrap_or_default();
        builder.add_str_field("path", path.lib().to_string());
    }
    builder.writeln(stdout(), args.titles, args.explain);
}

pub fn info_mapped(session: &Session, args: &TableArgs) {
    let Some((page_size, entries)) = session.space.core.mapped_files() else {
        utils::warn("core has no NT_FILE note");
        return;
    };

    let mut builder = TableBuilder::new();
    builder.add_col_r("start", "where the file range was mapped");
    builder.add_col_r("end", "one past the last mapped address");
    builder.add_col_r("offset", "byte offset into the file");
    builder.add_col_l("path", "the file that was mapped");

    for entry in entries.iter() {
        add_field!(builder, "start", "{:x}", entry.start);
        add_field!(builder, "end", "{:x}", entry.end);
        add_field!(builder, "offset", "{:x}", entry.page_offset * page_size);
        builder.add_str_field("path", entry.path.as_str().lib().to_string());
    }
    builder.writeln(stdout(), args.titles, args.explain);
}

pub fn info_process(session: &Session, args: &ExplainArgs) {
    let threads = session.space.threads();
    let Some(main) = threads.first() else {
        utils::warn("core has no NT_PRSTATUS note");
        return;
    };

    let mut builder = SimpleTableBuilder::new();
    add_simple!(builder, "pid", main.pid, "the faulting thread's id");
    add_simple!(builder, "signal", main.signal(), "what stopped the process");
    add_simple!(builder, "threads", threads.len(), "thread count at dump time");
    if let Some(index) = session.index() {
        add_simple!(builder, "objects", index.objects.len(), "loaded objects in the link map");
    }
    builder.writeln(stdout(), args.explain);
}

/// Registers most people never care about, hidden without --all.
const UNCOMMON: [usize; 9] = [15, 17, 20, 21, 22, 23, 24, 25, 26];

pub fn info_registers(session: &Session, args: &RegistersArgs) {
    let threads = session.space.threads();
    let Some(thread) = threads.get(args.thread) else {
        utils::warn(&format!(
            "no thread {} (the core has {})",
            args.thread,
            threads.len()
        ));
        return;
    };

    let mut builder = TableBuilder::new();
    builder.add_col_l("name", "register name in the kernel's pt_regs layout");
    builder.add_col_r("value", "the value at dump time");

    for (i, value) in thread.registers.iter().enumerate() {
        if !args.all && UNCOMMON.contains(&i) {
            continue;
        }
        add_field!(builder, "name", thread.register_name(i));
        add_field!(builder, "value", "{:x}", value);
    }
    builder.writeln(stdout(), args.titles, args.explain);
}

pub fn info_auxv(session: &Session, args: &TableArgs) {
    let entries = session.space.auxv();
    if entries.is_empty() {
        utils::warn("core has no auxv note");
        return;
    }

    let mut builder = TableBuilder::new();
    builder.add_col_l("type", "the AT_* constant");
    builder.add_col_r("value", "raw value; an address, size, or flag depending on the type");

    for entry in entries.iter() {
        add_field!(builder, "type", entry.type_name());
        add_field!(builder, "value", "{:x}", entry.value);
    }
    builder.writeln(stdout(), args.titles, args.explain);
}
