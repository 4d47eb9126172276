mod commands;
mod disasm;
mod dump;
mod elf;
mod linkmap;
mod repl;
mod runtime;
mod space;
#[cfg(test)]
mod testing;
mod utils;

use clap::Parser;
use clap_repl::ClapEditor;
use clap_repl::reedline::{
    DefaultPrompt, FileBackedHistory, Highlighter, Prompt, PromptEditMode, PromptHistorySearch,
    StyledText,
};
use commands::Session;
use elf::CoreFile;
use nu_ansi_term::{Color, Style};
use repl::{InfoAction, Repl};
use space::AddressSpace;
use std::borrow::Cow;
use std::path::PathBuf;
use std::process;

use crate::utils::warn;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a core file. Can be omitted to just use the `dump` command.
    core: Option<PathBuf>,
}

pub struct MyHighlighter {
    color: Color,
}

impl Highlighter for MyHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled_text = StyledText::new();

        styled_text.push((Style::new().fg(self.color), line.to_string()));

        styled_text
    }
}

impl MyHighlighter {
    pub fn new() -> MyHighlighter {
        MyHighlighter { color: Color::Blue }
    }
}

impl Default for MyHighlighter {
    fn default() -> Self {
        MyHighlighter::new()
    }
}

pub struct MyPrompt {
    color: clap_repl::reedline::Color,
    default: DefaultPrompt,
}

impl Prompt for MyPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed("ucore")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: PromptEditMode) -> Cow<str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        self.default.render_prompt_multiline_indicator()
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<str> {
        self.default
            .render_prompt_history_search_indicator(history_search)
    }

    fn get_prompt_color(&self) -> clap_repl::reedline::Color {
        self.color
    }

    fn get_indicator_color(&self) -> clap_repl::reedline::Color {
        clap_repl::reedline::Color::Black
    }
}

impl MyPrompt {
    fn new() -> MyPrompt {
        MyPrompt {
            color: clap_repl::reedline::Color::DarkBlue,
            default: DefaultPrompt::default(),
        }
    }
}

fn load_session(path: PathBuf) -> Session {
    let core = match CoreFile::new(path.clone()) {
        Ok(core) => core,
        Err(err) => {
            warn(&format!("couldn't load {}: {err}", path.display()));
            process::exit(1);
        }
    };
    match AddressSpace::new(core) {
        Ok(space) => Session::new(space),
        Err(err) => {
            warn(&format!("couldn't load {}: {err}", path.display()));
            process::exit(1);
        }
    }
}

fn no_core() {
    warn("this command needs a core file (start ucore with one)");
}

fn main() {
    utils::generate_style_file();

    let cli = Cli::parse();
    let mut session = cli.core.map(load_session);

    let prompt = MyPrompt::new();
    let rl = ClapEditor::<Repl>::builder()
        .with_prompt(Box::new(prompt))
        .with_editor_hook(|reed| {
            reed.with_highlighter(Box::new(MyHighlighter::new()))
                .with_history(Box::new(
                    FileBackedHistory::with_file(10000, "/tmp/ucore-history".into()).unwrap(),
                ))
        })
        .build();

    use repl::MainCommand::*;
    rl.repl(move |repl: Repl| match repl.command {
        Rd(args) => match &session {
            Some(s) => commands::read(s, &args),
            None => no_core(),
        },
        Patch(args) => match session.as_mut() {
            Some(s) => commands::patch(s, &args),
            None => no_core(),
        },
        Map(args) => match &session {
            Some(s) => commands::map(s, &args),
            None => no_core(),
        },
        Disas(args) => match &session {
            Some(s) => commands::disas(s, &args),
            None => no_core(),
        },
        Dump(args) => commands::dump(&args),
        Info(info) => match &session {
            Some(s) => match info.action {
                InfoAction::Auxv(args) => commands::info_auxv(s, &args),
                InfoAction::Blocks(args) => commands::info_blocks(s, &args),
                InfoAction::Header(args) => commands::info_header(s, &args),
                InfoAction::Mapped(args) => commands::info_mapped(s, &args),
                InfoAction::Process(args) => commands::info_process(s, &args),
                InfoAction::Registers(args) => commands::info_registers(s, &args),
            },
            None => no_core(),
        },
        Quit => process::exit(0),
    });
}
