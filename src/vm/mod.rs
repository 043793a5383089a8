use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use crate::builtins::{self, BuiltinError};
use crate::bytecode::Instruction;
use crate::value::{self, Value, ValueError};

pub mod memory;
pub mod scope;

pub use memory::Memory;
use scope::{CallFrame, FuncEntry, ScopeId, Scopes, GLOBAL};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    ArityMismatch { function: String, expected: usize, got: usize },
    #[error("use of uninitialized {0}")]
    Uninitialized(String),
    #[error("address {addr} is outside the frame (size {size})")]
    AddressOutOfBounds { addr: usize, size: usize },
    #[error("out of memory: frame of {requested} cells does not fit in {capacity}")]
    MemoryExhausted { requested: usize, capacity: usize },
    #[error("call depth exceeded {depth}")]
    StackOverflow { depth: usize },
    #[error("return outside of a function")]
    ReturnOutsideFunction,
    #[error("function '{name}' has no FUNC_DEC_END")]
    UnterminatedFunction { name: String },
    #[error("entry {entry} for '{name}' is not a function start")]
    InvalidEntry { name: String, entry: usize },
    #[error("jump to {target} is past the end of the program ({len} instructions)")]
    InvalidJump { target: usize, len: usize },
    #[error("'{0}' outside of a loop")]
    StrayLoopControl(&'static str),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("builtin '{name}' takes {expected} argument(s), got {got}")]
    BuiltinArity { name: String, expected: String, got: usize },
}

impl From<BuiltinError> for RuntimeError {
    fn from(e: BuiltinError) -> Self {
        match e {
            BuiltinError::Unknown(name) => RuntimeError::UndefinedFunction { name },
            BuiltinError::Arity { name, expected, got } => {
                RuntimeError::BuiltinArity { name: name.to_string(), expected, got }
            }
            BuiltinError::Value(ValueError::Nil) => RuntimeError::Uninitialized("builtin argument".into()),
            BuiltinError::Value(v) => RuntimeError::Value(v),
            BuiltinError::Io(io) => RuntimeError::Io(io),
        }
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

/// How a call's scope finds names it does not bind itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeMode {
    /// Parent is the scope the function was declared in.
    #[default]
    Lexical,
    /// Parent is the caller's scope at the call site.
    CallSite,
}

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub memory_size: usize,
    pub max_call_depth: usize,
    pub scope_mode: ScopeMode,
    /// Write each dispatched instruction to stderr.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            memory_size: 1 << 16,
            max_call_depth: 1024,
            scope_mode: ScopeMode::Lexical,
            trace: false,
        }
    }
}

/// Final machine state after a program runs to completion.
#[derive(Debug)]
pub struct Execution {
    pub memory: Memory,
    /// Top-level variables resolved to their values.
    pub globals: BTreeMap<String, Value>,
}

pub struct Vm {
    config: VmConfig,
    memory: Memory,
    scopes: Scopes,
    current: CallFrame,
    callers: Vec<CallFrame>,
    ip: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new(VmConfig::default())
    }
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Vm {
            memory: Memory::new(config.memory_size),
            scopes: Scopes::new(),
            current: CallFrame::main(0),
            callers: Vec::new(),
            ip: 0,
            config,
        }
    }

    pub fn run<R: BufRead, W: Write>(
        mut self,
        code: &[Instruction],
        input: &mut R,
        output: &mut W,
    ) -> Result<Execution> {
        let main_size = top_level_extent(code);
        let base = self.memory.allocate(main_size)?;
        self.current = CallFrame { base, ..CallFrame::main(main_size) };

        while let Some(inst) = code.get(self.ip) {
            if self.config.trace {
                eprintln!("[vm] {:>4} {}", self.ip, inst);
            }
            self.ip = self.step(code, inst, input, output)?;
        }
        output.flush()?;

        let globals = self
            .scopes
            .vars(GLOBAL)
            .map(|(name, addr)| {
                let value = self.memory.get(addr).cloned().unwrap_or_default();
                (name.to_string(), value)
            })
            .collect();
        Ok(Execution { memory: self.memory, globals })
    }

    /// Execute one instruction and return the next instruction pointer.
    fn step<R: BufRead, W: Write>(
        &mut self,
        code: &[Instruction],
        inst: &Instruction,
        input: &mut R,
        output: &mut W,
    ) -> Result<usize> {
        let next = self.ip + 1;
        match inst {
            Instruction::LoadInt { addr, value } => self.store(*addr, Value::Int(*value))?,
            Instruction::LoadFloat { addr, value } => self.store(*addr, Value::Float(*value))?,
            Instruction::LoadBool { addr, value } => self.store(*addr, Value::Bool(*value))?,
            Instruction::LoadString { addr, value } => self.store(*addr, Value::Str(value.clone()))?,

            Instruction::Infix { left_addr, right_addr, dest_addr, op } => {
                let result = value::binary(*op, self.load(*left_addr)?, self.load(*right_addr)?)?;
                self.store(*dest_addr, result)?;
            }

            Instruction::Not { src_addr, dest_addr } => {
                let truthy = self.load(*src_addr)?.truthy()?;
                self.store(*dest_addr, Value::Bool(!truthy))?;
            }

            Instruction::DeclareVar { name, addr } => {
                let abs = self.absolute(*addr)?;
                self.scopes.set_var(self.current.scope, name, abs);
            }

            Instruction::RefVar { name, dest_addr } => {
                let abs = self
                    .scopes
                    .lookup_var(self.current.scope, name)
                    .ok_or_else(|| RuntimeError::UndefinedVariable { name: name.clone() })?;
                let value = match self.memory.get(abs) {
                    Some(Value::Nil) | None => {
                        return Err(RuntimeError::Uninitialized(format!("variable '{name}'")));
                    }
                    Some(v) => v.clone(),
                };
                self.store(*dest_addr, value)?;
            }

            Instruction::Jmp { target } => return check_jump(*target, code.len()),

            Instruction::JmpIfFalse { cond_addr, target } => {
                if !self.load(*cond_addr)?.truthy()? {
                    return check_jump(*target, code.len());
                }
            }

            Instruction::FuncDecStart { name, .. } => {
                let scope = self.current.scope;
                self.scopes.set_func(scope, name, FuncEntry { entry: self.ip, scope });
                return Ok(matching_end(code, self.ip, name)? + 1);
            }

            // Falling off the end of a body returns nothing.
            Instruction::FuncDecEnd => return self.pop_frame(None),

            Instruction::Return { src_addr } => {
                let abs = self.absolute(*src_addr)?;
                let value = self.memory.get(abs).cloned().unwrap_or_default();
                return self.pop_frame(Some(value));
            }

            Instruction::FuncCall { name, arg_addrs, dest_addr } => {
                return self.call(code, name, arg_addrs, *dest_addr);
            }

            Instruction::CallBuiltin { name, arg_addrs, dest_addr } => {
                let args = arg_addrs
                    .iter()
                    .map(|a| self.load(*a).cloned())
                    .collect::<Result<Vec<_>>>()?;
                let result = builtins::call(name, &args, input, output)?;
                self.store(*dest_addr, result)?;
            }
        }
        Ok(next)
    }

    fn call(&mut self, code: &[Instruction], name: &str, arg_addrs: &[usize], dest_addr: usize) -> Result<usize> {
        let func = self
            .scopes
            .lookup_func(self.current.scope, name)
            .ok_or_else(|| RuntimeError::UndefinedFunction { name: name.to_string() })?;
        let Some(Instruction::FuncDecStart { param_names, frame_size, .. }) = code.get(func.entry) else {
            return Err(RuntimeError::InvalidEntry { name: name.to_string(), entry: func.entry });
        };
        if param_names.len() != arg_addrs.len() {
            return Err(RuntimeError::ArityMismatch {
                function: name.to_string(),
                expected: param_names.len(),
                got: arg_addrs.len(),
            });
        }
        if self.callers.len() >= self.config.max_call_depth {
            return Err(RuntimeError::StackOverflow { depth: self.config.max_call_depth });
        }

        // Resolve against the caller's window before switching frames.
        let args = arg_addrs
            .iter()
            .map(|a| self.absolute(*a))
            .collect::<Result<Vec<_>>>()?;
        let dest = self.absolute(dest_addr)?;

        let parent: ScopeId = match self.config.scope_mode {
            ScopeMode::Lexical => func.scope,
            ScopeMode::CallSite => self.current.scope,
        };
        let scope = self.scopes.push(parent);
        for (param, abs) in param_names.iter().zip(args) {
            self.scopes.set_var(scope, param, abs);
        }
        let base = self.memory.allocate(*frame_size)?;

        let frame = CallFrame {
            scope,
            resume_ip: self.ip + 1,
            dest_addr: Some(dest),
            base,
            size: *frame_size,
            function: Some(name.to_string()),
        };
        self.callers.push(std::mem::replace(&mut self.current, frame));
        Ok(func.entry + 1)
    }

    fn pop_frame(&mut self, result: Option<Value>) -> Result<usize> {
        let caller = self.callers.pop().ok_or(RuntimeError::ReturnOutsideFunction)?;
        let frame = std::mem::replace(&mut self.current, caller);
        if self.config.trace {
            if let Some(name) = &frame.function {
                eprintln!("[vm]      leave {name}, resume at {}", frame.resume_ip);
            }
        }
        if let (Some(value), Some(dest)) = (result, frame.dest_addr) {
            self.memory.set(dest, value)?;
        }
        self.memory.release(frame.base);
        self.scopes.truncate(frame.scope);
        Ok(frame.resume_ip)
    }

    fn absolute(&self, addr: usize) -> Result<usize> {
        if addr >= self.current.size {
            return Err(RuntimeError::AddressOutOfBounds { addr, size: self.current.size });
        }
        Ok(self.current.base + addr)
    }

    /// Read an operand; never-written cells are an error.
    fn load(&self, addr: usize) -> Result<&Value> {
        let abs = self.absolute(addr)?;
        match self.memory.get(abs) {
            Some(Value::Nil) | None => Err(RuntimeError::Uninitialized(format!("address {addr}"))),
            Some(v) => Ok(v),
        }
    }

    fn store(&mut self, addr: usize, value: Value) -> Result<()> {
        let abs = self.absolute(addr)?;
        self.memory.set(abs, value)
    }
}

fn check_jump(target: usize, len: usize) -> Result<usize> {
    if target > len {
        return Err(RuntimeError::InvalidJump { target, len });
    }
    Ok(target)
}

/// Index of the FUNC_DEC_END closing the declaration at `start`.
fn matching_end(code: &[Instruction], start: usize, name: &str) -> Result<usize> {
    let mut depth = 0usize;
    for (i, inst) in code.iter().enumerate().skip(start) {
        match inst {
            Instruction::FuncDecStart { .. } => depth += 1,
            Instruction::FuncDecEnd => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(RuntimeError::UnterminatedFunction { name: name.to_string() })
}

/// Number of addresses the top level uses, ignoring function bodies.
fn top_level_extent(code: &[Instruction]) -> usize {
    let mut depth = 0usize;
    let mut extent = 0;
    for inst in code {
        match inst {
            Instruction::FuncDecStart { .. } => depth += 1,
            Instruction::FuncDecEnd => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if let Some(max) = inst.addresses().into_iter().max() {
                    extent = extent.max(max + 1);
                }
            }
            _ => {}
        }
    }
    extent
}

/// Run with the default configuration on the process's stdin and stdout.
pub fn execute(code: &[Instruction]) -> Result<Execution> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    Vm::default().run(code, &mut stdin.lock(), &mut stdout.lock())
}
