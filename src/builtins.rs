use std::io::{self, BufRead, Write};

use crate::value::{Value, ValueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
}

impl Builtin {
    pub fn accepts(&self, argc: usize) -> bool {
        (self.min_args..=self.max_args).contains(&argc)
    }

    /// Accepted argument counts, e.g. `1` or `0-1`.
    pub fn arity(&self) -> String {
        if self.min_args == self.max_args {
            self.min_args.to_string()
        } else {
            format!("{}-{}", self.min_args, self.max_args)
        }
    }
}

pub const BUILTINS: &[Builtin] = &[
    Builtin { name: "print", min_args: 1, max_args: 1 },
    Builtin { name: "println", min_args: 1, max_args: 1 },
    Builtin { name: "input", min_args: 0, max_args: 1 },
    Builtin { name: "str", min_args: 1, max_args: 1 },
    Builtin { name: "int", min_args: 1, max_args: 1 },
    Builtin { name: "bool", min_args: 1, max_args: 1 },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

#[derive(Debug, thiserror::Error)]
pub enum BuiltinError {
    #[error("unknown builtin '{0}'")]
    Unknown(String),
    #[error("builtin '{name}' takes {expected} argument(s), got {got}")]
    Arity { name: &'static str, expected: String, got: usize },
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Run a builtin by name, checking the name and argument count first.
pub fn call<R: BufRead, W: Write>(
    name: &str,
    args: &[Value],
    input: &mut R,
    output: &mut W,
) -> Result<Value, BuiltinError> {
    let builtin = lookup(name).ok_or_else(|| BuiltinError::Unknown(name.to_string()))?;
    let arity_error = || BuiltinError::Arity {
        name: builtin.name,
        expected: builtin.arity(),
        got: args.len(),
    };
    if !builtin.accepts(args.len()) {
        return Err(arity_error());
    }
    if args.iter().any(Value::is_nil) {
        return Err(ValueError::Nil.into());
    }
    match (builtin.name, args) {
        ("print", [v]) => {
            write!(output, "{v}")?;
            output.flush()?;
            Ok(Value::Nil)
        }
        ("println", [v]) => {
            writeln!(output, "{v}")?;
            Ok(Value::Nil)
        }
        ("input", prompt) => {
            if let [p] = prompt {
                write!(output, "{p}")?;
            }
            output.flush()?;
            let mut line = String::new();
            input.read_line(&mut line)?;
            let trimmed = line.trim_end_matches(['\n', '\r']).len();
            line.truncate(trimmed);
            Ok(Value::Str(line))
        }
        ("str", [v]) => Ok(Value::Str(v.to_string())),
        ("int", [v]) => Ok(Value::Int(v.to_int()?)),
        ("bool", [v]) => Ok(Value::Bool(v.truthy()?)),
        _ => Err(arity_error()),
    }
}
