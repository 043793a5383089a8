use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Write};

use crate::ast::*;
use crate::builtins;
use crate::bytecode::OpCode;
use crate::value::{self, Value, ValueError};
use crate::vm::RuntimeError;

pub const DEFAULT_MAX_DEPTH: usize = 1024;

type Result<T> = std::result::Result<T, RuntimeError>;

/// A declared function and the frame it was declared in.
#[derive(Clone, Copy)]
struct Func<'p> {
    params: &'p [String],
    body: &'p [Stmt],
    frame: usize,
}

struct Frame<'p> {
    vars: HashMap<String, Value>,
    funcs: HashMap<String, Func<'p>>,
    parent: Option<usize>,
}

impl Frame<'_> {
    fn new(parent: Option<usize>) -> Self {
        Frame { vars: HashMap::new(), funcs: HashMap::new(), parent }
    }
}

/// How a statement list finished.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Env<'p, 'io, R, W> {
    frames: Vec<Frame<'p>>,
    current: usize,
    depth: usize,
    max_depth: usize,
    input: &'io mut R,
    output: &'io mut W,
}

impl<'p, R: BufRead, W: Write> Env<'p, '_, R, W> {
    fn chain(&self) -> impl Iterator<Item = &Frame<'p>> {
        std::iter::successors(self.frames.get(self.current), |f| {
            f.parent.and_then(|p| self.frames.get(p))
        })
    }

    fn get(&self, name: &str) -> Result<Value> {
        match self.chain().find_map(|f| f.vars.get(name)) {
            Some(Value::Nil) => Err(RuntimeError::Uninitialized(format!("variable '{name}'"))),
            Some(v) => Ok(v.clone()),
            None => Err(RuntimeError::UndefinedVariable { name: name.to_string() }),
        }
    }

    fn set(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.get_mut(self.current) {
            frame.vars.insert(name.to_string(), value);
        }
    }

    fn function(&self, name: &str) -> Result<Func<'p>> {
        self.chain()
            .find_map(|f| f.funcs.get(name).copied())
            .ok_or_else(|| RuntimeError::UndefinedFunction { name: name.to_string() })
    }

    fn exec_block(&mut self, stmts: &'p [Stmt]) -> Result<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &'p Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Let { name, value } | Stmt::Assign { name, value } => {
                let v = self.eval_expr(value)?;
                self.set(name, v);
            }
            Stmt::If { condition, body, alternative } => {
                let branch = if truthy(&self.eval_expr(condition)?)? { body } else { alternative };
                return self.exec_block(branch);
            }
            Stmt::While { condition, body } => {
                while truthy(&self.eval_expr(condition)?)? {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }
            Stmt::Break { .. } => return Ok(Flow::Break),
            Stmt::Continue { .. } => return Ok(Flow::Continue),
            Stmt::Function { name, params, body, .. } => {
                let func = Func { params, body, frame: self.current };
                if let Some(frame) = self.frames.get_mut(self.current) {
                    frame.funcs.insert(name.clone(), func);
                }
            }
            Stmt::Return(value) => return Ok(Flow::Return(self.eval_expr(value)?)),
            Stmt::Expr(expr) => {
                self.eval_expr(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_expr(&mut self, expr: &'p Expr) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(x) => Value::Float(*x),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Text(s) => Value::Str(s.clone()),
            }),
            Expr::Ref(name) => self.get(name),
            Expr::Binary { op, left, right } => {
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                apply(OpCode::from(*op), &l, &r)
            }
            Expr::Unary { op: UnaryOp::Not, operand } => {
                let v = self.eval_expr(operand)?;
                Ok(Value::Bool(!truthy(&v)?))
            }
            Expr::Unary { op: UnaryOp::Negate, operand } => {
                let v = self.eval_expr(operand)?;
                apply(OpCode::Sub, &Value::Int(0), &v)
            }
            Expr::Call { function, args } => {
                let args = args.iter().map(|a| self.eval_expr(a)).collect::<Result<Vec<_>>>()?;
                if builtins::lookup(function).is_some() {
                    return Ok(builtins::call(function, &args, &mut *self.input, &mut *self.output)?);
                }
                self.call(function, args)
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        let func = self.function(name)?;
        if func.params.len() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                function: name.to_string(),
                expected: func.params.len(),
                got: args.len(),
            });
        }
        if self.depth >= self.max_depth {
            return Err(RuntimeError::StackOverflow { depth: self.max_depth });
        }

        let id = self.frames.len();
        let mut frame = Frame::new(Some(func.frame));
        frame.vars.extend(func.params.iter().cloned().zip(args));
        self.frames.push(frame);
        let caller = std::mem::replace(&mut self.current, id);
        self.depth += 1;

        let flow = self.exec_block(func.body);

        self.depth -= 1;
        self.current = caller;
        self.frames.truncate(id);

        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::Nil),
            Flow::Break => Err(RuntimeError::StrayLoopControl("break")),
            Flow::Continue => Err(RuntimeError::StrayLoopControl("continue")),
        }
    }
}

fn truthy(v: &Value) -> Result<bool> {
    v.truthy().map_err(nil_to_uninitialized)
}

fn apply(op: OpCode, l: &Value, r: &Value) -> Result<Value> {
    value::binary(op, l, r).map_err(nil_to_uninitialized)
}

fn nil_to_uninitialized(e: ValueError) -> RuntimeError {
    match e {
        ValueError::Nil => RuntimeError::Uninitialized("value".into()),
        other => RuntimeError::Value(other),
    }
}

/// Tree-walking executor. Same value rules and builtins as the VM.
pub struct Interpreter {
    pub max_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter { max_depth: DEFAULT_MAX_DEPTH }
    }
}

impl Interpreter {
    pub fn new(max_depth: usize) -> Self {
        Interpreter { max_depth }
    }

    /// Run a program and return its top-level bindings.
    pub fn run<R: BufRead, W: Write>(
        &self,
        program: &Program,
        input: &mut R,
        output: &mut W,
    ) -> Result<BTreeMap<String, Value>> {
        let mut env = Env {
            frames: vec![Frame::new(None)],
            current: 0,
            depth: 0,
            max_depth: self.max_depth,
            input,
            output,
        };
        match env.exec_block(&program.statements)? {
            Flow::Normal => {}
            Flow::Break => return Err(RuntimeError::StrayLoopControl("break")),
            Flow::Continue => return Err(RuntimeError::StrayLoopControl("continue")),
            Flow::Return(_) => return Err(RuntimeError::ReturnOutsideFunction),
        }
        env.output.flush()?;
        let globals = env.frames.swap_remove(0).vars;
        Ok(globals.into_iter().collect())
    }
}

pub fn run<R: BufRead, W: Write>(
    program: &Program,
    input: &mut R,
    output: &mut W,
) -> Result<BTreeMap<String, Value>> {
    Interpreter::default().run(program, input, output)
}
