use std::fmt;

use serde::Serialize;

use crate::ast::BinOp;

// ── Operator codes ───────────────────────────────────────────────────
//
// The numeric codes are stable; disassembly shows them by name.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum OpCode {
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Lt = 5,
    Le = 6,
    Gt = 7,
    Ge = 8,
    Eq = 9,
    Neq = 10,
    And = 11,
    Or = 12,
    Mod = 13,
    Pow = 14,
}

impl OpCode {
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Gt => "GT",
            OpCode::Ge => "GE",
            OpCode::Eq => "EQ",
            OpCode::Neq => "NEQ",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Mod => "MOD",
            OpCode::Pow => "POW",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<BinOp> for OpCode {
    fn from(op: BinOp) -> Self {
        match op {
            BinOp::Add => OpCode::Add,
            BinOp::Subtract => OpCode::Sub,
            BinOp::Multiply => OpCode::Mul,
            BinOp::Divide => OpCode::Div,
            BinOp::Modulo => OpCode::Mod,
            BinOp::Power => OpCode::Pow,
            BinOp::LessThan => OpCode::Lt,
            BinOp::LessOrEqual => OpCode::Le,
            BinOp::GreaterThan => OpCode::Gt,
            BinOp::GreaterOrEqual => OpCode::Ge,
            BinOp::Equals => OpCode::Eq,
            BinOp::NotEquals => OpCode::Neq,
            BinOp::And => OpCode::And,
            BinOp::Or => OpCode::Or,
        }
    }
}

// ── Instructions ─────────────────────────────────────────────────────

/// One VM instruction. Addresses are relative to the executing frame's
/// memory window; jump targets are absolute instruction indices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    LoadInt { addr: usize, value: i64 },
    LoadFloat { addr: usize, value: f64 },
    LoadBool { addr: usize, value: bool },
    LoadString { addr: usize, value: String },
    Infix { left_addr: usize, right_addr: usize, dest_addr: usize, op: OpCode },
    Not { src_addr: usize, dest_addr: usize },
    DeclareVar { name: String, addr: usize },
    RefVar { name: String, dest_addr: usize },
    Jmp { target: usize },
    JmpIfFalse { cond_addr: usize, target: usize },
    FuncDecStart { name: String, param_count: usize, param_names: Vec<String>, frame_size: usize },
    FuncDecEnd,
    FuncCall { name: String, arg_addrs: Vec<usize>, dest_addr: usize },
    CallBuiltin { name: String, arg_addrs: Vec<usize>, dest_addr: usize },
    Return { src_addr: usize },
}

impl Instruction {
    pub fn load_int(addr: usize, value: i64) -> Self {
        Instruction::LoadInt { addr, value }
    }

    pub fn infix(left_addr: usize, right_addr: usize, dest_addr: usize, op: OpCode) -> Self {
        Instruction::Infix { left_addr, right_addr, dest_addr, op }
    }

    /// Jump target carried by this instruction, if any.
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Instruction::Jmp { target } | Instruction::JmpIfFalse { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Every frame-relative address the instruction reads or writes.
    pub fn addresses(&self) -> Vec<usize> {
        match self {
            Instruction::LoadInt { addr, .. }
            | Instruction::LoadFloat { addr, .. }
            | Instruction::LoadBool { addr, .. }
            | Instruction::LoadString { addr, .. }
            | Instruction::DeclareVar { addr, .. } => vec![*addr],
            Instruction::Infix { left_addr, right_addr, dest_addr, .. } => {
                vec![*left_addr, *right_addr, *dest_addr]
            }
            Instruction::Not { src_addr, dest_addr } => vec![*src_addr, *dest_addr],
            Instruction::RefVar { dest_addr, .. } => vec![*dest_addr],
            Instruction::JmpIfFalse { cond_addr, .. } => vec![*cond_addr],
            Instruction::FuncCall { arg_addrs, dest_addr, .. }
            | Instruction::CallBuiltin { arg_addrs, dest_addr, .. } => {
                arg_addrs.iter().copied().chain(std::iter::once(*dest_addr)).collect()
            }
            Instruction::Return { src_addr } => vec![*src_addr],
            Instruction::Jmp { .. } | Instruction::FuncDecStart { .. } | Instruction::FuncDecEnd => {
                Vec::new()
            }
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LoadInt { addr, value } => write!(f, "LOAD_INT {addr}, {value}"),
            Instruction::LoadFloat { addr, value } => write!(f, "LOAD_FLOAT {addr}, {value:?}"),
            Instruction::LoadBool { addr, value } => write!(f, "LOAD_BOOL {addr}, {value}"),
            Instruction::LoadString { addr, value } => write!(f, "LOAD_STRING {addr}, {value:?}"),
            Instruction::Infix { left_addr, right_addr, dest_addr, op } => {
                write!(f, "INFIX {left_addr}, {right_addr}, {dest_addr}, {op}")
            }
            Instruction::Not { src_addr, dest_addr } => write!(f, "NOT {src_addr}, {dest_addr}"),
            Instruction::DeclareVar { name, addr } => write!(f, "DECLARE_VAR {name}, {addr}"),
            Instruction::RefVar { name, dest_addr } => write!(f, "REF_VAR {name}, {dest_addr}"),
            Instruction::Jmp { target } => write!(f, "JMP {target}"),
            Instruction::JmpIfFalse { cond_addr, target } => {
                write!(f, "JMP_IF_FALSE {cond_addr}, {target}")
            }
            Instruction::FuncDecStart { name, param_count, param_names, frame_size } => {
                write!(f, "FUNC_DEC_START {name}, {param_count}, ")?;
                write_list(f, param_names)?;
                write!(f, ", {frame_size}")
            }
            Instruction::FuncDecEnd => f.write_str("FUNC_DEC_END"),
            Instruction::FuncCall { name, arg_addrs, dest_addr } => {
                write!(f, "FUNC_CALL {name}, ")?;
                write_list(f, arg_addrs)?;
                write!(f, ", {dest_addr}")
            }
            Instruction::CallBuiltin { name, arg_addrs, dest_addr } => {
                write!(f, "CALL_BUILTIN {name}, ")?;
                write_list(f, arg_addrs)?;
                write!(f, ", {dest_addr}")
            }
            Instruction::Return { src_addr } => write!(f, "RETURN {src_addr}"),
        }
    }
}

/// Numbered listing, one instruction per line. Function bodies are indented.
pub fn disassemble(code: &[Instruction]) -> String {
    let width = code.len().saturating_sub(1).to_string().len();
    let mut out = String::new();
    let mut depth = 0usize;
    for (i, inst) in code.iter().enumerate() {
        if matches!(inst, Instruction::FuncDecEnd) {
            depth = depth.saturating_sub(1);
        }
        out.push_str(&format!("{i:>width$}  {}{inst}\n", "  ".repeat(depth)));
        if matches!(inst, Instruction::FuncDecStart { .. }) {
            depth += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_codes_are_stable() {
        assert_eq!(OpCode::Add as u8, 1);
        assert_eq!(OpCode::Or as u8, 12);
        assert_eq!(OpCode::Pow as u8, 14);
    }

    #[test]
    fn binop_maps_one_to_one() {
        assert_eq!(OpCode::from(BinOp::Modulo), OpCode::Mod);
        assert_eq!(OpCode::from(BinOp::NotEquals), OpCode::Neq);
        assert_eq!(OpCode::from(BinOp::Power), OpCode::Pow);
    }

    #[test]
    fn debug_text() {
        let cases = [
            (Instruction::load_int(0, 4), "LOAD_INT 0, 4"),
            (Instruction::infix(0, 1, 2, OpCode::Add), "INFIX 0, 1, 2, ADD"),
            (Instruction::DeclareVar { name: "x".into(), addr: 2 }, "DECLARE_VAR x, 2"),
            (Instruction::RefVar { name: "x".into(), dest_addr: 3 }, "REF_VAR x, 3"),
            (Instruction::Jmp { target: 7 }, "JMP 7"),
            (Instruction::JmpIfFalse { cond_addr: 0, target: 5 }, "JMP_IF_FALSE 0, 5"),
            (
                Instruction::FuncDecStart {
                    name: "add".into(),
                    param_count: 2,
                    param_names: vec!["a".into(), "b".into()],
                    frame_size: 4,
                },
                "FUNC_DEC_START add, 2, [a, b], 4",
            ),
            (Instruction::FuncDecEnd, "FUNC_DEC_END"),
            (
                Instruction::FuncCall { name: "add".into(), arg_addrs: vec![3, 4], dest_addr: 5 },
                "FUNC_CALL add, [3, 4], 5",
            ),
            (
                Instruction::CallBuiltin { name: "println".into(), arg_addrs: vec![0], dest_addr: 1 },
                "CALL_BUILTIN println, [0], 1",
            ),
            (Instruction::Return { src_addr: 3 }, "RETURN 3"),
            (Instruction::LoadString { addr: 0, value: "hi".into() }, "LOAD_STRING 0, \"hi\""),
            (Instruction::LoadFloat { addr: 1, value: 2.0 }, "LOAD_FLOAT 1, 2.0"),
            (Instruction::LoadBool { addr: 0, value: true }, "LOAD_BOOL 0, true"),
            (Instruction::Not { src_addr: 0, dest_addr: 1 }, "NOT 0, 1"),
        ];
        for (inst, text) in cases {
            assert_eq!(inst.to_string(), text);
        }
    }

    #[test]
    fn addresses_cover_reads_and_writes() {
        let call = Instruction::FuncCall { name: "f".into(), arg_addrs: vec![1, 2], dest_addr: 3 };
        assert_eq!(call.addresses(), vec![1, 2, 3]);
        assert!(Instruction::Jmp { target: 0 }.addresses().is_empty());
    }

    #[test]
    fn disassemble_numbers_and_indents() {
        let code = vec![
            Instruction::FuncDecStart {
                name: "f".into(),
                param_count: 0,
                param_names: vec![],
                frame_size: 1,
            },
            Instruction::load_int(0, 1),
            Instruction::Return { src_addr: 0 },
            Instruction::FuncDecEnd,
        ];
        let text = disassemble(&code);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0  FUNC_DEC_START f, 0, [], 1");
        assert_eq!(lines[1], "1    LOAD_INT 0, 1");
        assert_eq!(lines[3], "3  FUNC_DEC_END");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(Instruction::infix(0, 1, 2, OpCode::Mul)).unwrap();
        assert_eq!(json["kind"], "infix");
        assert_eq!(json["dest_addr"], 2);
        assert_eq!(json["op"], "Mul");
    }
}
