//! `map`: the loaded objects and their symbols.
use super::Session;
use super::tables::{TableBuilder, add_field};
use crate::linkmap::demangle;
use crate::repl::MapArgs;
use crate::utils::{self, Styling};
use std::io::stdout;
use std::ops::ControlFlow;

pub fn map(session: &Session, args: &MapArgs) {
    if session.index().is_none() {
        return;
    }
    match &args.sym {
        Some(object) => symbols(session, object, args),
        None => objects(session, args),
    }
}

fn objects(session: &Session, args: &MapArgs) {
    let index = session.index().unwrap();
    let mut builder = TableBuilder::new();
    builder.add_col_r("addr", "load bias, or the load address for non-PIE executables");
    builder.add_col_r("dynamic", "address of the object's dynamic section");
    builder.add_col_l("object", "path recorded by the dynamic linker, often empty for the executable");

    index.for_each(|object| {
        add_field!(builder, "addr", "{:x}", object.addr);
        add_field!(builder, "dynamic", "{:x}", object.dynamic);
        builder.add_str_field("object", object.name.as_str().lib().to_string());
        ControlFlow::Continue(())
    });
    builder.writeln(stdout(), args.titles, args.explain);
}

fn symbols(session: &Session, object_name: &str, args: &MapArgs) {
    let space = &session.space;
    let index = session.index().unwrap();
    let Some(object) = index.find_object(object_name) else {
        utils::warn(&format!("no loaded object named `{object_name}`"));
        return;
    };

    let symbols = object.symbols(space);
    if symbols.is_empty() {
        utils::warn(&format!(
            "no symbols for {object_name} (backing file missing or stripped)"
        ));
        return;
    }

    let mut builder = TableBuilder::new();
    builder.add_col_r("addr", "the symbol's address with the load bias applied");
    builder.add_col_r("size", "size in bytes, zero when the file doesn't record one");
    builder.add_col_l("name", "demangled symbol name");

    let max = if args.max == 0 { usize::MAX } else { args.max };
    for symbol in symbols.iter().take(max) {
        // Function pointers on some architectures carry an ISA mode bit
        // that isn't part of the address.
        let addr = if symbol.is_func {
            space.machine.strip_mode_bit(symbol.addr)
        } else {
            symbol.addr
        };
        add_field!(builder, "addr", "{:x}", addr);
        add_field!(builder, "size", "{:x}", symbol.size);
        builder.add_str_field("name", demangle(&symbol.name).symbol().to_string());
    }
    builder.writeln(stdout(), args.titles, args.explain);

    if symbols.len() > max {
        println!("... {} more (use --max to see them)", symbols.len() - max);
    }
}
