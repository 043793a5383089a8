use serde_json::{Value, json};

use super::{Diagnostic, Severity};
use crate::ast::SourceMap;

/// Single-line JSON object for machine consumers.
pub fn render(d: &Diagnostic) -> String {
    let severity = match d.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };

    let source_map = d.source.as_deref().map(SourceMap::new);

    let labels: Vec<Value> = d
        .labels
        .iter()
        .map(|l| {
            let mut obj = json!({
                "start": l.span.start,
                "end": l.span.end,
                "message": l.message,
                "primary": l.is_primary,
            });
            if let Some(map) = &source_map {
                let (line, col) = map.lookup(l.span.start);
                obj["line"] = Value::from(line);
                obj["col"] = Value::from(col);
            }
            obj
        })
        .collect();

    let mut obj = json!({
        "severity": severity,
        "message": d.message,
        "labels": labels,
        "notes": d.notes,
    });
    if let Some(code) = d.code {
        obj["code"] = Value::from(code);
    }
    if let Some(s) = &d.suggestion {
        obj["suggestion"] = Value::from(s.as_str());
    }

    obj.to_string()
}
