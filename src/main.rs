use std::collections::BTreeMap;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use toy::ast::Program;
use toy::bytecode::disassemble;
use toy::compiler;
use toy::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use toy::interpreter::Interpreter;
use toy::value::Value;
use toy::vm::{ScopeMode, Vm, VmConfig};

#[derive(Parser, Debug)]
#[command(name = "toy", version, about = "Run toy programs on the bytecode VM or the tree-walker")]
struct Cli {
    /// Source file to run. Starts a REPL when omitted.
    file: Option<PathBuf>,

    /// Use the tree-walking interpreter instead of the VM
    #[arg(long)]
    interpret: bool,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Trace every VM instruction to stderr
    #[arg(long)]
    trace: bool,

    /// VM memory size in cells
    #[arg(long, value_name = "CELLS", default_value_t = VmConfig::default().memory_size)]
    memory: usize,

    /// Maximum call depth
    #[arg(long, value_name = "N", default_value_t = VmConfig::default().max_call_depth)]
    max_depth: usize,

    /// Resolve free names in a call through the caller's scope
    #[arg(long)]
    call_site_scoping: bool,

    /// Report errors as JSON lines
    #[arg(long)]
    json: bool,

    /// Disable colored diagnostics
    #[arg(long)]
    no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    Ast,
    Bytecode,
}

impl Cli {
    fn vm_config(&self) -> VmConfig {
        VmConfig {
            memory_size: self.memory,
            max_call_depth: self.max_depth,
            scope_mode: if self.call_site_scoping { ScopeMode::CallSite } else { ScopeMode::Lexical },
            trace: self.trace,
        }
    }

    fn report(&self, diagnostic: Diagnostic) {
        if self.json {
            eprintln!("{}", json::render(&diagnostic));
        } else {
            let use_color = !self.no_color && io::stderr().is_terminal();
            eprint!("{}", AnsiRenderer { use_color }.render(&diagnostic));
        }
    }

    /// Run a parsed program and return its globals.
    fn execute<R: BufRead, W: Write>(
        &self,
        program: &Program,
        input: &mut R,
        output: &mut W,
    ) -> Result<BTreeMap<String, Value>, toy::Error> {
        if self.interpret {
            return Ok(Interpreter::new(self.max_depth).run(program, input, output)?);
        }
        let code = compiler::compile(program)?;
        Ok(Vm::new(self.vm_config()).run(&code, input, output)?.globals)
    }
}

fn run_file(cli: &Cli, source: &str) -> Result<(), toy::Error> {
    let program = toy::parse_program(source)?;
    match cli.emit {
        Some(Emit::Ast) => println!("{}", toy::ast_json(&program)?),
        Some(Emit::Bytecode) => print!("{}", disassemble(&compiler::compile(&program)?)),
        None => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            cli.execute(&program, &mut stdin.lock(), &mut stdout.lock())?;
        }
    }
    Ok(())
}

fn format_globals(globals: &BTreeMap<String, Value>) -> String {
    let fields: Vec<String> = globals.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    format!("{{{}}}", fields.join(", "))
}

fn repl(cli: &Cli) -> io::Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            writeln!(stdout)?;
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let result = toy::parse_program(&line)
            .and_then(|program| cli.execute(&program, &mut stdin, &mut stdout));
        match result {
            Ok(globals) => writeln!(stdout, "{}", format_globals(&globals))?,
            Err(e) => cli.report(Diagnostic::from(&e).with_source(line.trim_end())),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(path) = &cli.file else {
        return match repl(&cli) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                cli.report(Diagnostic::error(format!("i/o error: {e}")));
                ExitCode::FAILURE
            }
        };
    };

    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            cli.report(Diagnostic::error(format!("cannot read {}: {e}", path.display())));
            return ExitCode::FAILURE;
        }
    };

    match run_file(&cli, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            cli.report(Diagnostic::from(&e).with_source(source.as_str()));
            ExitCode::FAILURE
        }
    }
}
