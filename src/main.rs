use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use scl::error::SclError;
use scl::interpreter::{InterpreterConfig, DEFAULT_MAX_CALL_DEPTH};
use scl::parser::ParseOutput;
use scl::runner::{self, TokenFile};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install the log subscriber. `RUST_LOG` wins; otherwise `-v` raises the
/// level to debug and `-vv` to trace. Logs go to stderr.
fn init_tracing(verbosity: u8) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            let level = match verbosity {
                0 => "warn",
                1 => "debug",
                _ => "trace",
            };
            EnvFilter::new(format!("scl={}", level))
        };

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr).with_target(true).with_level(true))
            .with(filter)
            .init();
    });
}

fn input_arg(help: &'static str) -> Arg {
    Arg::new("input")
        .help(help)
        .value_name("FILE")
        .required(true)
        .value_parser(value_parser!(PathBuf))
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .help("Write the JSON result here instead of stdout")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
}

fn depth_arg() -> Arg {
    Arg::new("max-depth")
        .long("max-depth")
        .help("Maximum call depth before a stack overflow error")
        .value_name("N")
        .default_value("256")
        .value_parser(value_parser!(usize))
}

fn cli() -> Command {
    Command::new("scl")
        .about("Scanner, parser and interpreter for the SCL teaching language")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log phase progress to stderr (repeat for more detail)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(
            Command::new("scan")
                .about("Turn SCL source into a token file")
                .arg(input_arg("SCL source file"))
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("parse")
                .about("Turn a token file into an AST file, reporting syntax errors")
                .arg(input_arg("Token file produced by 'scan'"))
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("execute")
                .about("Run an AST file produced by 'parse'")
                .arg(input_arg("AST file produced by 'parse'"))
                .arg(depth_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Scan, parse and execute a source file in one go")
                .arg(input_arg("SCL source file"))
                .arg(depth_arg()),
        )
}

fn main() {
    let matches = cli().get_matches();
    let verbosity = matches
        .subcommand()
        .map_or(0, |(_, sub)| sub.get_count("verbose"))
        .max(matches.get_count("verbose"));
    init_tracing(verbosity);

    let code = match matches.subcommand() {
        Some(("scan", sub)) => scan(sub),
        Some(("parse", sub)) => parse(sub),
        Some(("execute", sub)) => execute(sub),
        Some(("run", sub)) => run(sub),
        _ => 2,
    };
    process::exit(code);
}

fn input(matches: &ArgMatches) -> &Path {
    matches
        .get_one::<PathBuf>("input")
        .map(PathBuf::as_path)
        .unwrap_or_else(|| Path::new("-"))
}

fn config(matches: &ArgMatches) -> InterpreterConfig {
    InterpreterConfig {
        max_call_depth: matches
            .get_one::<usize>("max-depth")
            .copied()
            .unwrap_or(DEFAULT_MAX_CALL_DEPTH),
    }
}

fn fail(error: &SclError, source: Option<&str>, filename: Option<&Path>) -> i32 {
    let filename = filename.map(|path| path.display().to_string());
    error.report(source, filename.as_deref());
    1
}

fn scan(matches: &ArgMatches) -> i32 {
    let path = input(matches);
    let source = match runner::read_source(path) {
        Ok(source) => source,
        Err(error) => return fail(&error, None, None),
    };

    let tokens = runner::scan_source(&source);
    let output = matches.get_one::<PathBuf>("output").map(PathBuf::as_path);
    match runner::write_json(&tokens, output, io::stdout().lock()) {
        Ok(()) => 0,
        Err(error) => fail(&error, None, None),
    }
}

fn parse(matches: &ArgMatches) -> i32 {
    let tokens: TokenFile = match runner::read_json(input(matches)) {
        Ok(tokens) => tokens,
        Err(error) => return fail(&error, None, None),
    };

    let parsed = runner::parse_tokens(tokens);
    let output = matches.get_one::<PathBuf>("output").map(PathBuf::as_path);
    if let Err(error) = runner::write_json(&parsed, output, io::stdout().lock()) {
        return fail(&error, None, None);
    }

    if parsed.is_ok() {
        0
    } else {
        fail(&SclError::Syntax(parsed.errors), None, None)
    }
}

fn execute(matches: &ArgMatches) -> i32 {
    let parsed: ParseOutput = match runner::read_json(input(matches)) {
        Ok(parsed) => parsed,
        Err(error) => return fail(&error, None, None),
    };

    match runner::execute_parsed(parsed, io::stdout().lock(), config(matches)) {
        Ok(code) => exit_status(code),
        Err(error) => fail(&error, None, None),
    }
}

fn run(matches: &ArgMatches) -> i32 {
    let path = input(matches);
    let source = match runner::read_source(path) {
        Ok(source) => source,
        Err(error) => return fail(&error, None, None),
    };

    match runner::run_source(&source, io::stdout().lock(), config(matches)) {
        Ok(code) => exit_status(code),
        Err(error) => fail(&error, Some(&source), Some(path)),
    }
}

/// Process exit status for an SCL exit code; out of range codes clamp.
fn exit_status(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(if code < 0 { i32::MIN } else { i32::MAX })
}
