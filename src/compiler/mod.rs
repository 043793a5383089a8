use crate::ast::*;
use crate::builtins;
use crate::bytecode::{Instruction, OpCode};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("'break' outside of a loop")]
    BreakOutsideLoop { span: Span },
    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop { span: Span },
    #[error("duplicate parameter '{param}' in function '{function}'")]
    DuplicateParameter { function: String, param: String, span: Span },
    #[error("builtin '{name}' takes {expected} argument(s), got {got}")]
    BuiltinArity { name: String, expected: String, got: usize },
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::BreakOutsideLoop { span }
            | CompileError::ContinueOutsideLoop { span }
            | CompileError::DuplicateParameter { span, .. } => Some(*span),
            CompileError::BuiltinArity { .. } => None,
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Innermost-loop bookkeeping for `break` and `continue`.
struct LoopContext {
    head: usize,
    breaks: Vec<usize>,
}

struct Compiler {
    code: Vec<Instruction>,
    /// Next free address in the current address space (top level or one function body).
    next_addr: usize,
    loops: Vec<LoopContext>,
}

impl Compiler {
    fn new() -> Self {
        Compiler { code: Vec::new(), next_addr: 0, loops: Vec::new() }
    }

    fn alloc(&mut self) -> usize {
        let addr = self.next_addr;
        self.next_addr += 1;
        addr
    }

    fn emit(&mut self, inst: Instruction) -> usize {
        let idx = self.code.len();
        self.code.push(inst);
        idx
    }

    fn emit_jmp_placeholder(&mut self) -> usize {
        self.emit(Instruction::Jmp { target: usize::MAX })
    }

    /// Point the jump at `pos` to the next instruction to be emitted.
    fn patch_jump(&mut self, pos: usize) {
        let here = self.code.len();
        match &mut self.code[pos] {
            Instruction::Jmp { target } | Instruction::JmpIfFalse { target, .. } => *target = here,
            other => unreachable!("patch_jump on non-jump {other}"),
        }
    }

    fn compile_program(mut self, program: &Program) -> Result<Vec<Instruction>> {
        self.compile_block(&program.statements)?;
        Ok(self.code)
    }

    fn compile_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Let { name, value } | Stmt::Assign { name, value } => {
                let addr = self.compile_expr(value)?;
                self.emit(Instruction::DeclareVar { name: name.clone(), addr });
            }

            Stmt::If { condition, body, alternative } => {
                let cond_addr = self.compile_expr(condition)?;
                let skip_body = self.emit(Instruction::JmpIfFalse { cond_addr, target: usize::MAX });
                self.compile_block(body)?;
                if alternative.is_empty() {
                    self.patch_jump(skip_body);
                } else {
                    let skip_else = self.emit_jmp_placeholder();
                    self.patch_jump(skip_body);
                    self.compile_block(alternative)?;
                    self.patch_jump(skip_else);
                }
            }

            Stmt::While { condition, body } => {
                let head = self.code.len();
                self.loops.push(LoopContext { head, breaks: Vec::new() });
                let cond_addr = self.compile_expr(condition)?;
                let exit = self.emit(Instruction::JmpIfFalse { cond_addr, target: usize::MAX });
                self.compile_block(body)?;
                self.emit(Instruction::Jmp { target: head });
                self.patch_jump(exit);
                if let Some(ctx) = self.loops.pop() {
                    for pos in ctx.breaks {
                        self.patch_jump(pos);
                    }
                }
            }

            Stmt::Break { span } => {
                if self.loops.is_empty() {
                    return Err(CompileError::BreakOutsideLoop { span: *span });
                }
                let pos = self.emit_jmp_placeholder();
                if let Some(ctx) = self.loops.last_mut() {
                    ctx.breaks.push(pos);
                }
            }

            Stmt::Continue { span } => {
                let head = self
                    .loops
                    .last()
                    .map(|ctx| ctx.head)
                    .ok_or(CompileError::ContinueOutsideLoop { span: *span })?;
                self.emit(Instruction::Jmp { target: head });
            }

            Stmt::Function { name, params, body, span } => {
                self.compile_function(name, params, body, *span)?;
            }

            Stmt::Return(value) => {
                let src_addr = self.compile_expr(value)?;
                self.emit(Instruction::Return { src_addr });
            }

            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, name: &str, params: &[String], body: &[Stmt], span: Span) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            if params[..i].contains(param) {
                return Err(CompileError::DuplicateParameter {
                    function: name.to_string(),
                    param: param.clone(),
                    span,
                });
            }
        }

        let start = self.emit(Instruction::FuncDecStart {
            name: name.to_string(),
            param_count: params.len(),
            param_names: params.to_vec(),
            frame_size: 0,
        });

        // The body gets its own address space and cannot see enclosing loops.
        let saved_addr = std::mem::replace(&mut self.next_addr, 0);
        let saved_loops = std::mem::take(&mut self.loops);
        let result = self.compile_block(body);
        let body_size = std::mem::replace(&mut self.next_addr, saved_addr);
        self.loops = saved_loops;
        result?;

        if let Instruction::FuncDecStart { frame_size, .. } = &mut self.code[start] {
            *frame_size = body_size;
        }
        self.emit(Instruction::FuncDecEnd);
        Ok(())
    }

    /// Compile an expression; returns the address holding its value.
    fn compile_expr(&mut self, expr: &Expr) -> Result<usize> {
        match expr {
            Expr::Literal(lit) => {
                let addr = self.alloc();
                let inst = match lit {
                    Literal::Int(value) => Instruction::LoadInt { addr, value: *value },
                    Literal::Float(value) => Instruction::LoadFloat { addr, value: *value },
                    Literal::Bool(value) => Instruction::LoadBool { addr, value: *value },
                    Literal::Text(value) => Instruction::LoadString { addr, value: value.clone() },
                };
                self.emit(inst);
                Ok(addr)
            }

            Expr::Ref(name) => {
                let dest_addr = self.alloc();
                self.emit(Instruction::RefVar { name: name.clone(), dest_addr });
                Ok(dest_addr)
            }

            Expr::Binary { op, left, right } => {
                let left_addr = self.compile_expr(left)?;
                let right_addr = self.compile_expr(right)?;
                let dest_addr = self.alloc();
                self.emit(Instruction::infix(left_addr, right_addr, dest_addr, OpCode::from(*op)));
                Ok(dest_addr)
            }

            Expr::Unary { op: UnaryOp::Not, operand } => {
                let src_addr = self.compile_expr(operand)?;
                let dest_addr = self.alloc();
                self.emit(Instruction::Not { src_addr, dest_addr });
                Ok(dest_addr)
            }

            // -e is 0 - e
            Expr::Unary { op: UnaryOp::Negate, operand } => {
                let zero = self.alloc();
                self.emit(Instruction::load_int(zero, 0));
                let operand_addr = self.compile_expr(operand)?;
                let dest_addr = self.alloc();
                self.emit(Instruction::infix(zero, operand_addr, dest_addr, OpCode::Sub));
                Ok(dest_addr)
            }

            Expr::Call { function, args } => {
                let builtin = builtins::lookup(function);
                if let Some(b) = builtin.filter(|b| !b.accepts(args.len())) {
                    return Err(CompileError::BuiltinArity {
                        name: function.clone(),
                        expected: b.arity(),
                        got: args.len(),
                    });
                }

                let arg_addrs = args
                    .iter()
                    .map(|arg| self.compile_expr(arg))
                    .collect::<Result<Vec<_>>>()?;
                let dest_addr = self.alloc();
                let name = function.clone();
                self.emit(if builtin.is_some() {
                    Instruction::CallBuiltin { name, arg_addrs, dest_addr }
                } else {
                    Instruction::FuncCall { name, arg_addrs, dest_addr }
                });
                Ok(dest_addr)
            }
        }
    }
}

pub fn compile(program: &Program) -> Result<Vec<Instruction>> {
    Compiler::new().compile_program(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn compile_str(source: &str) -> Vec<Instruction> {
        compile(&parse_source(source).unwrap()).unwrap()
    }

    fn compile_err(source: &str) -> CompileError {
        compile(&parse_source(source).unwrap()).unwrap_err()
    }

    fn declare(name: &str, addr: usize) -> Instruction {
        Instruction::DeclareVar { name: name.into(), addr }
    }

    fn ref_var(name: &str, dest_addr: usize) -> Instruction {
        Instruction::RefVar { name: name.into(), dest_addr }
    }

    #[test]
    fn compile_simple_addition() {
        assert_eq!(compile_str("4 + 3;"), vec![
            Instruction::load_int(0, 4),
            Instruction::load_int(1, 3),
            Instruction::infix(0, 1, 2, OpCode::Add),
        ]);
    }

    #[test]
    fn compile_nested_arithmetic() {
        assert_eq!(compile_str("4 + 2 - 2;"), vec![
            Instruction::load_int(0, 4),
            Instruction::load_int(1, 2),
            Instruction::infix(0, 1, 2, OpCode::Add),
            Instruction::load_int(3, 2),
            Instruction::infix(2, 3, 4, OpCode::Sub),
        ]);
    }

    #[test]
    fn compile_let_and_reference() {
        assert_eq!(compile_str("let x = 5; let y = x * 3;"), vec![
            Instruction::load_int(0, 5),
            declare("x", 0),
            ref_var("x", 1),
            Instruction::load_int(2, 3),
            Instruction::infix(1, 2, 3, OpCode::Mul),
            declare("y", 3),
        ]);
    }

    #[test]
    fn compile_if_else_patches_jumps() {
        assert_eq!(compile_str("if true{let x = 2;} else {let x = 4;}"), vec![
            Instruction::LoadBool { addr: 0, value: true },
            Instruction::JmpIfFalse { cond_addr: 0, target: 5 },
            Instruction::load_int(1, 2),
            declare("x", 1),
            Instruction::Jmp { target: 7 },
            Instruction::load_int(2, 4),
            declare("x", 2),
        ]);
    }

    #[test]
    fn compile_if_without_else() {
        let code = compile_str("if false{let x = 1;}");
        assert_eq!(code[1], Instruction::JmpIfFalse { cond_addr: 0, target: 4 });
        assert_eq!(code.len(), 4);
    }

    #[test]
    fn compile_while_loop_shape() {
        let code = compile_str("let x = 0; while x < 10{x++;}");
        assert_eq!(code, vec![
            Instruction::load_int(0, 0),
            declare("x", 0),
            ref_var("x", 1),
            Instruction::load_int(2, 10),
            Instruction::infix(1, 2, 3, OpCode::Lt),
            Instruction::JmpIfFalse { cond_addr: 3, target: 11 },
            ref_var("x", 4),
            Instruction::load_int(5, 1),
            Instruction::infix(4, 5, 6, OpCode::Add),
            declare("x", 6),
            Instruction::Jmp { target: 2 },
        ]);
    }

    #[test]
    fn compile_break_and_continue_targets() {
        let code = compile_str("while true{if true{break;} continue;}");
        // 0 LOAD_BOOL, 1 JIF -> exit, 2 LOAD_BOOL, 3 JIF, 4 JMP (break), 5 JMP 0 (continue), 6 JMP 0
        assert_eq!(code[1], Instruction::JmpIfFalse { cond_addr: 0, target: 7 });
        assert_eq!(code[4], Instruction::Jmp { target: 7 });
        assert_eq!(code[5], Instruction::Jmp { target: 0 });
        assert_eq!(code[6], Instruction::Jmp { target: 0 });
    }

    #[test]
    fn compile_nested_loops_break_inner_only() {
        let code = compile_str("while true{while true{break;} break;}");
        // outer: 0 LOAD_BOOL, 1 JIF; inner: 2 LOAD_BOOL, 3 JIF, 4 JMP(break), 5 JMP 2; 6 JMP(break); 7 JMP 0
        assert_eq!(code[4], Instruction::Jmp { target: 6 });
        assert_eq!(code[3], Instruction::JmpIfFalse { cond_addr: 1, target: 6 });
        assert_eq!(code[6], Instruction::Jmp { target: 8 });
        assert_eq!(code[1], Instruction::JmpIfFalse { cond_addr: 0, target: 8 });
    }

    #[test]
    fn compile_function_and_call() {
        let code = compile_str("fn add(a, b){return a + b;} let c = add(2, 3);");
        assert_eq!(code, vec![
            Instruction::FuncDecStart {
                name: "add".into(),
                param_count: 2,
                param_names: vec!["a".into(), "b".into()],
                frame_size: 3,
            },
            ref_var("a", 0),
            ref_var("b", 1),
            Instruction::infix(0, 1, 2, OpCode::Add),
            Instruction::Return { src_addr: 2 },
            Instruction::FuncDecEnd,
            Instruction::load_int(0, 2),
            Instruction::load_int(1, 3),
            Instruction::FuncCall { name: "add".into(), arg_addrs: vec![0, 1], dest_addr: 2 },
            declare("c", 2),
        ]);
    }

    #[test]
    fn compile_builtin_call() {
        assert_eq!(compile_str("println(\"hi\");"), vec![
            Instruction::LoadString { addr: 0, value: "hi".into() },
            Instruction::CallBuiltin { name: "println".into(), arg_addrs: vec![0], dest_addr: 1 },
        ]);
    }

    #[test]
    fn compile_not_and_negate() {
        assert_eq!(compile_str("!x; -y;"), vec![
            ref_var("x", 0),
            Instruction::Not { src_addr: 0, dest_addr: 1 },
            Instruction::load_int(2, 0),
            ref_var("y", 3),
            Instruction::infix(2, 3, 4, OpCode::Sub),
        ]);
    }

    #[test]
    fn addresses_increase_monotonically() {
        let code = compile_str("let a = 1; let b = a + 2 * (a - 3); if b > a {b = !true;}");
        let mut last = None;
        for inst in &code {
            let writes = match inst {
                Instruction::LoadInt { addr, .. } | Instruction::LoadBool { addr, .. } => Some(*addr),
                Instruction::Infix { dest_addr, .. }
                | Instruction::Not { dest_addr, .. }
                | Instruction::RefVar { dest_addr, .. } => Some(*dest_addr),
                _ => None,
            };
            if let Some(addr) = writes {
                assert!(last.is_none_or(|prev| addr > prev), "{inst} reuses an address");
                last = Some(addr);
            }
        }
    }

    #[test]
    fn jump_targets_within_program() {
        let code = compile_str(
            "let x = 0; while x < 100{x++; if x == 7{continue;} if x == 8{break;}} if x {x = 1;} else {x = 2;}",
        );
        for inst in &code {
            if let Some(target) = inst.jump_target() {
                assert!(target <= code.len(), "{inst} jumps past the end");
            }
        }
    }

    #[test]
    fn break_outside_loop_rejected() {
        assert_eq!(compile_err("break;"), CompileError::BreakOutsideLoop { span: Span::new(0, 5) });
    }

    #[test]
    fn continue_in_function_inside_loop_rejected() {
        let err = compile_err("while true{fn f(){continue;}}");
        assert!(matches!(err, CompileError::ContinueOutsideLoop { .. }));
    }

    #[test]
    fn duplicate_parameter_rejected() {
        let err = compile_err("fn f(a, a){return a;}");
        assert!(matches!(err, CompileError::DuplicateParameter { ref param, .. } if param == "a"));
    }

    #[test]
    fn builtin_arity_checked() {
        let err = compile_err("println(1, 2);");
        assert_eq!(err.to_string(), "builtin 'println' takes 1 argument(s), got 2");
        let err = compile_err("input(1, 2);");
        assert_eq!(err.to_string(), "builtin 'input' takes 0-1 argument(s), got 2");
    }

    #[test]
    fn nested_function_has_own_frame_size() {
        let code = compile_str("fn outer(){fn inner(){return 1;} return inner();}");
        assert!(matches!(&code[0], Instruction::FuncDecStart { frame_size: 1, .. }));
        assert!(matches!(&code[1], Instruction::FuncDecStart { frame_size: 1, .. }));
    }
}
