use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info, warn};

use zen::ast_printer::AstPrinter;
use zen::config::Config;
use zen::interpreter::Interpreter;
use zen::lexer::Lexer;
use zen::module::{FsModuleLoader, SOURCE_EXTENSIONS};
use zen::parser::{Parser, Program};
use zen::scope::Scope;
use zen::stdlib::Builtins;
use zen::token::Token;

/// Exit code for input that failed to parse.
const EXIT_PARSE: i32 = 65;

/// Exit code for an uncaught runtime error.
const EXIT_RUNTIME: i32 = 70;

/// Exit code for settings that could not be loaded or were rejected.
const EXIT_CONFIG: i32 = 64;

/// Words that open an indented block in the REPL.
const BLOCK_OPENERS: [&str; 12] = [
    "function", "class", "if", "when", "unless", "while", "until", "whenever", "during",
    "throughout", "for", "try",
];

#[derive(ClapParser, Debug)]
#[command(
    version,
    about = "Zen language interpreter",
    long_about = None,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Script to run (same as `zen run <FILE>`); starts the REPL when omitted
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Write logs to a file (zen.log unless --log-file is given)
    #[arg(long, global = true)]
    log: bool,

    /// Log file destination; implies --log
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log at debug level (to stderr unless --log is given)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON settings file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print per-function call counts and timings when done
    #[arg(long, global = true)]
    profile: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs a Zen program
    Run { file: PathBuf },

    /// Starts an interactive session
    Repl,

    /// Tokenizes a file, printing each token
    Tokenize {
        file: PathBuf,

        /// Emit the token list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parses a file and prints its syntax tree
    Parse {
        file: PathBuf,

        /// Emit the tree as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Reads a source file into a String.
fn read_file(filename: &Path) -> Result<String> {
    info!("Reading file: {:?}", filename);

    if !SOURCE_EXTENSIONS
        .iter()
        .any(|ext| filename.extension().is_some_and(|e| e == *ext))
    {
        warn!("{:?} does not have a .zen or .zn extension", filename);
    }

    let file = File::open(filename).context(format!("Failed to open file {:?}", filename))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    let bytes = reader
        .read_to_end(&mut buf)
        .context(format!("Failed to read file {:?}", filename))?;

    info!("Read {} bytes from {:?}", bytes, filename);

    String::from_utf8(buf).context(format!("{:?} is not valid UTF-8", filename))
}

fn init_logger(cli: &Cli) -> Result<()> {
    let to_file: bool = cli.log || cli.log_file.is_some();

    if !to_file && !cli.verbose {
        Builder::new().filter_level(log::LevelFilter::Off).init();
        return Ok(());
    }

    let level: log::LevelFilter = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut builder: Builder = Builder::new();
    builder
        .format(|buf, record| {
            let module = record
                .module_path()
                .unwrap_or("<unnamed>")
                .strip_prefix("zen::")
                .unwrap_or(record.module_path().unwrap_or("<unnamed>"));
            writeln!(
                buf,
                "{} {:<5} [{}:{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter(None, level);

    if to_file {
        let path: PathBuf = cli
            .log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("zen.log"));
        let log_file = File::create(&path).context(format!("Failed to create {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();

    info!("Logger initialized at {}", level);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config: Config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?
            .with_env_overrides(),
        None => Config::from_env(),
    };

    config.validate()?;

    Ok(config)
}

fn report_parse_errors(program: &Program) {
    for error in &program.errors {
        eprintln!("{}", error);
    }
    eprintln!("Parse Error: {} syntax errors", program.error_count());
}

fn run_file(file: &Path, config: Config, profile: bool) -> Result<()> {
    let source: String = read_file(file)?;
    let base: PathBuf = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut interpreter: Interpreter =
        Interpreter::new(config).with_loader(Box::new(FsModuleLoader::new(base)));

    let program: Program = interpreter.parse(&source);
    info!("Parsed {} statement(s)", program.statements().len());

    if program.has_errors() {
        debug!("Parse failed with {} error(s)", program.error_count());
        report_parse_errors(&program);
        std::process::exit(EXIT_PARSE);
    }

    let result = interpreter.interpret(&program);

    if profile {
        eprint!("{}", interpreter.profile());
    }

    match result {
        Ok(value) => {
            info!("Program finished with {}", value);
            Ok(())
        }
        Err(e) => {
            debug!("Runtime debug: {}", e);
            eprintln!("{}", e);
            if let Some(exception) = interpreter.exception() {
                for name in exception.trace.iter().rev() {
                    eprintln!("    in {}", name);
                }
            }
            std::process::exit(EXIT_RUNTIME);
        }
    }
}

fn tokenize(file: &Path, json: bool) -> Result<()> {
    let source: String = read_file(file)?;
    let tokens: Vec<Token<'_>> = Lexer::new(&source).collect();

    info!("Scanned {} token(s)", tokens.len());

    if json {
        println!("{}", serde_json::to_string_pretty(&tokens)?);
    } else {
        for token in &tokens {
            println!("{}", token);
        }
    }

    Ok(())
}

fn parse(file: &Path, json: bool) -> Result<()> {
    let source: String = read_file(file)?;
    let builtins: Builtins = Builtins::new();
    let program: Program = Parser::new(&source, Scope::new_ref(), &builtins).parse();

    if program.has_errors() {
        report_parse_errors(&program);
        std::process::exit(EXIT_PARSE);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&program.body)?);
    } else {
        println!("{}", AstPrinter::print(&program.body));
    }

    Ok(())
}

/// Does this line start a block that continues on indented lines?
fn opens_block(line: &str) -> bool {
    let first: &str = line.split_whitespace().next().unwrap_or("");
    BLOCK_OPENERS.contains(&first)
}

fn repl(config: Config, profile: bool) -> Result<()> {
    let mut interpreter: Interpreter = Interpreter::new(config);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut buffer: String = String::new();

    println!("Zen {} (`help` lists builtins, `exit` quits)", env!("CARGO_PKG_VERSION"));

    loop {
        print!("{}", if buffer.is_empty() { "zen> " } else { "...> " });
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line: String = line.context("Failed to read from stdin")?;

        if buffer.is_empty() {
            match line.trim() {
                "" => continue,
                "exit" | "quit" => break,
                "help" => {
                    println!("Builtins: {}", Builtins::new().names().join(", "));
                    continue;
                }
                _ => {}
            }
        }

        let in_block: bool = !buffer.is_empty();

        buffer.push_str(&line);
        buffer.push('\n');

        // a block runs once a blank line closes it
        if !line.trim().is_empty() && (in_block || opens_block(&line)) {
            continue;
        }

        let source: String = std::mem::take(&mut buffer);
        let program: Program = interpreter.parse(&source);

        if program.has_errors() {
            for error in &program.errors {
                debug!("REPL parse error: {}", error);
            }
            println!("Parse Error: {} syntax errors", program.error_count());
            continue;
        }

        match interpreter.interpret(&program) {
            Ok(value) if !value.is_null() => println!("{}", value),
            Ok(_) => {}
            Err(e) => println!("{}", e),
        }
        interpreter.clear_exception();
    }

    if profile {
        eprint!("{}", interpreter.profile());
    }

    Ok(())
}

fn dispatch(cli: Cli) -> Result<()> {
    let config: Config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };
    info!("CLI arguments: {:?}", cli);

    match (cli.command, cli.file) {
        (Some(Commands::Run { file }), _) | (None, Some(file)) => {
            info!("Running {:?}", file);
            run_file(&file, config, cli.profile)
        }
        (Some(Commands::Tokenize { file, json }), _) => tokenize(&file, json),
        (Some(Commands::Parse { file, json }), _) => parse(&file, json),
        (Some(Commands::Repl), _) | (None, None) => repl(config, cli.profile),
    }
}

fn main() -> Result<()> {
    let cli: Cli = Cli::parse();
    init_logger(&cli)?;

    dispatch(cli)
}
