//! Definitions for the commands that are used interactively, e.g.
//! `rd 0x7fff5000` and `map --sym libc.so.6`.
use crate::utils;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(infer_subcommands(true))] // allow abbreviations
pub struct Repl {
    #[command(subcommand)]
    pub command: MainCommand,
}

#[derive(Subcommand)]
pub enum MainCommand {
    /// Print memory as hex and ascii
    Rd(ReadArgs),

    /// Overwrite memory for this session (the core file is never touched)
    Patch(PatchArgs),

    /// Show the loaded objects, or the symbols of one of them
    Map(MapArgs),

    /// Disassemble at an address or symbol
    Disas(DisasArgs),

    /// Write a core file for a running process
    Dump(DumpArgs),

    /// Show information about the core and the process inside it
    Info(InfoCommand),

    /// Exit ucore
    Quit,
}

#[derive(Args)]
pub struct InfoCommand {
    #[clap(subcommand)]
    pub action: InfoAction,
}

#[derive(Subcommand)]
pub enum InfoAction {
    /// Show the auxiliary vector
    Auxv(TableArgs),

    /// Show the load blocks and where their bytes can come from
    Blocks(TableArgs),

    /// Show the ELF header of the core
    Header(ExplainArgs),

    /// Show the memory mapped files
    Mapped(TableArgs),

    /// Show the process and its threads
    Process(ExplainArgs),

    /// Show general purpose registers
    Registers(RegistersArgs),
}

#[derive(Args)]
pub struct ReadArgs {
    /// Start address
    #[arg(value_parser = parse_addr_arg)]
    pub addr: u64,

    /// Read up to this end address instead of --num (clamped to the end of
    /// the load block)
    #[arg(short, long, value_parser = parse_addr_arg)]
    pub end: Option<u64>,

    /// Number of 64-bit words to read
    #[arg(short, long, default_value_t = 8)]
    pub num: usize,

    /// Read only the bytes embedded in the core file
    #[arg(long, group = "source")]
    pub origin: bool,

    /// Read only the bytes of the backing file
    #[arg(long, group = "source")]
    pub mmap: bool,

    /// Read only session patches
    #[arg(long, group = "source")]
    pub overlay: bool,

    /// Print as a NUL-terminated string
    #[arg(short, long, group = "how")]
    pub string: bool,

    /// Disassemble instead of dumping
    #[arg(short, long, group = "how")]
    pub inst: bool,

    /// Write the raw bytes to a file instead of printing them
    #[arg(short, long, group = "how")]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct PatchArgs {
    /// Start address
    #[arg(value_parser = parse_addr_arg)]
    pub addr: u64,

    /// Bytes to write as hex, e.g. `de ad be ef` or `deadbeef`
    #[arg(required = true)]
    pub bytes: Vec<String>,
}

#[derive(Args)]
pub struct MapArgs {
    /// Show the symbols of this object (full path or file name)
    #[arg(long, value_name = "OBJECT")]
    pub sym: Option<String>,

    /// Max number of symbols to show, 0 for unlimited
    #[arg(short, long, default_value_t = 20)]
    pub max: usize,

    /// Add column headers
    #[arg(short, long)]
    pub titles: bool,

    /// Explain columns, fields, etc.
    #[arg(short, long)]
    pub explain: bool,
}

#[derive(Args)]
pub struct DisasArgs {
    /// An address or a symbol name
    pub location: String,

    /// Number of instructions to show
    #[arg(short, long, default_value_t = 16)]
    pub num: usize,

    /// Disassemble only the bytes embedded in the core file
    #[arg(long, group = "source")]
    pub origin: bool,

    /// Disassemble only the bytes of the backing file
    #[arg(long, group = "source")]
    pub mmap: bool,

    /// Disassemble only session patches
    #[arg(long, group = "source")]
    pub overlay: bool,
}

#[derive(Args)]
pub struct DumpArgs {
    /// Process to dump
    pub pid: i32,

    /// Output path, defaults to core.<pid> in the current directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Capture every readable region, even large clean file-backed ones
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ExplainArgs {
    /// Explain columns, fields, etc.
    #[arg(short, long)]
    pub explain: bool,
}

#[derive(Args)]
pub struct TableArgs {
    /// Explain columns, fields, etc.
    #[arg(short, long)]
    pub explain: bool,

    /// Add column headers
    #[arg(short, long)]
    pub titles: bool,
}

#[derive(Args)]
pub struct RegistersArgs {
    /// Also dump rarely used registers such as segment registers
    #[arg(short, long)]
    pub all: bool,

    /// Show this thread (an index into the thread list, 0 is the faulting
    /// thread)
    #[arg(long, default_value_t = 0)]
    pub thread: usize,

    /// Explain columns, fields, etc.
    #[arg(short, long)]
    pub explain: bool,

    /// Add column headers
    #[arg(short, long)]
    pub titles: bool,
}

fn parse_addr_arg(s: &str) -> Result<u64, String> {
    utils::parse_addr(s)
}
