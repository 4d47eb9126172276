//! `dump`: write a core file for a running process.
use crate::dump::{CaptureAll, DefaultFilter, dump_process};
use crate::repl::DumpArgs;
use crate::utils;
use std::path::PathBuf;

pub fn dump(args: &DumpArgs) {
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("core.{}", args.pid)));

    let result = if args.all {
        dump_process(args.pid, &CaptureAll, &path)
    } else {
        dump_process(args.pid, &DefaultFilter, &path)
    };
    match result {
        Ok(()) => println!("wrote {}", path.display()),
        Err(err) => utils::warn(&format!("dump of {} failed: {err}", args.pid)),
    }
}
