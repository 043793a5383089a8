pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;
pub mod vm;

use std::io::{BufRead, Write};

use ast::Program;
use bytecode::Instruction;
use vm::{Execution, Vm, VmConfig};

/// Any failure from source text to finished run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error(transparent)]
    Runtime(#[from] vm::RuntimeError),
    #[error("cannot serialize the AST: {0}")]
    Emit(#[from] serde_json::Error),
}

pub fn parse_program(source: &str) -> Result<Program, Error> {
    let tokens = lexer::lex(source)?;
    Ok(parser::parse(tokens)?)
}

/// Pretty JSON form of a parsed program.
pub fn ast_json(program: &Program) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(program)?)
}

pub fn compile_source(source: &str) -> Result<Vec<Instruction>, Error> {
    Ok(compiler::compile(&parse_program(source)?)?)
}

/// Lex, parse, compile and run `source` on a fresh VM.
pub fn run_source<R: BufRead, W: Write>(
    source: &str,
    config: VmConfig,
    input: &mut R,
    output: &mut W,
) -> Result<Execution, Error> {
    let code = compile_source(source)?;
    Ok(Vm::new(config).run(&code, input, output)?)
}
