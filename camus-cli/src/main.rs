// The `camusc` binary: wires lexing, parsing, rule resolution, compilation,
// target lowering, and emission together, and maps any stage's failure to
// a diagnostic on stderr and a non-zero exit code (spec §6 "Exit codes").
//
// Grounded in the teacher's `x4c` binary: a `clap`-derive `Opts`, a
// `process_file`-style driver, and `colored` caret-pointing diagnostics
// from `camus::error`.

use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use camus::compile::{self, CompileOptions};
use camus::error::Error as CamusError;
use camus::lexer::Lexer;
use camus::parser::Parser;
use camus::rule;
use camus_target::{emit, lower};
use clap::Parser as ClapParser;
use colored::Colorize;

#[derive(ClapParser)]
#[command(name = "camusc", version, about = "Compile a query-language rule file into match-action tables")]
struct Opts {
    /// Rule file to compile.
    filename: String,

    /// Show parsed lexical tokens and exit.
    #[arg(long)]
    show_tokens: bool,

    /// Show the parsed abstract syntax tree and exit.
    #[arg(long)]
    show_ast: bool,

    /// Parse and validate only; do not lower or emit.
    #[arg(long)]
    check: bool,

    /// Action to install at a terminal state with no actions of its own,
    /// instead of the default `query_drop`.
    #[arg(long)]
    default_action: Option<String>,

    /// Output path for the `table_add` command file.
    #[arg(short, long, default_value = "out.cmds")]
    out: String,

    /// Output path for the JSON table-entry document.
    #[arg(long, default_value = "out.json")]
    json_out: String,

    /// Output path for the multicast-group file.
    #[arg(long, default_value = "out.mcast")]
    mcast_out: String,
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(opts: &Opts) -> Result<()> {
    let contents = fs::read_to_string(&opts.filename)
        .with_context(|| format!("read input: {}", opts.filename))?;
    let lines: Vec<&str> = contents.lines().collect();
    let file = Arc::new(opts.filename.clone());

    let mut lexer = Lexer::new(lines.clone(), file);
    lexer.show_tokens = opts.show_tokens;

    let mut parser = Parser::new(lexer);
    let ast = parser.run().map_err(render)?;
    if opts.show_ast {
        println!("{ast:#?}");
    }

    let rule_set = rule::resolve(&ast, &lines).map_err(|errors| render(CamusError::from(errors)))?;

    if opts.check {
        return Ok(());
    }

    let options = CompileOptions {
        default_action: opts.default_action.clone(),
    };
    let (pipeline, diagnostics) = compile::compile_with_diagnostics(&rule_set, &options)
        .map_err(|e| anyhow::anyhow!("{}: {e}", "compile error".bright_red()))?;
    for d in diagnostics.iter() {
        eprintln!("{d}");
    }
    let target = lower::lower(&pipeline, &options)
        .map_err(|e| anyhow::anyhow!("{}: {e}", "lowering error".bright_red()))?;

    let mut cmds = BufWriter::new(
        File::create(&opts.out).with_context(|| format!("create {}", opts.out))?,
    );
    emit::write_commands(&target, &mut cmds).with_context(|| format!("write {}", opts.out))?;

    let mut json = BufWriter::new(
        File::create(&opts.json_out).with_context(|| format!("create {}", opts.json_out))?,
    );
    emit::write_json(&target, &mut json).with_context(|| format!("write {}", opts.json_out))?;

    let mut mcast = BufWriter::new(
        File::create(&opts.mcast_out).with_context(|| format!("create {}", opts.mcast_out))?,
    );
    emit::write_mcast_groups(&target, &mut mcast)
        .with_context(|| format!("write {}", opts.mcast_out))?;

    Ok(())
}

fn render(e: CamusError) -> anyhow::Error {
    anyhow::anyhow!("{e}")
}
