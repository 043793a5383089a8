use super::{Diagnostic, Severity};
use crate::ast::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, style: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{style}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn bold_yellow(&self, s: &str) -> String {
        self.paint("1;33", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[P001]: message"
        let mut heading = match d.severity {
            Severity::Error => "error".to_string(),
            Severity::Warning => "warning".to_string(),
        };
        if let Some(code) = d.code {
            heading.push_str(&format!("[{code}]"));
        }
        let heading = match d.severity {
            Severity::Error => self.bold_red(&heading),
            Severity::Warning => self.bold_yellow(&heading),
        };
        out.push_str(&format!("{}: {}\n", heading, self.bold(&d.message)));

        let primary = d.labels.iter().find(|l| l.is_primary);
        if let (Some(label), Some(source)) = (primary, &d.source) {
            let map = SourceMap::new(source);
            let (line, col) = map.lookup(label.span.start);
            let line_text = map.line_text(source, line);

            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

            let gutter = line.to_string().len();
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);

            out.push_str(&format!("{pad} {pipe}\n"));
            let line_num = self.cyan(&format!("{line:>gutter$}"));
            out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

            // Carets stop at the end of the line for spans that run past it.
            let indent = col.saturating_sub(1);
            let room = line_text.len().saturating_sub(indent).max(1);
            let span_len = label.span.end.saturating_sub(label.span.start).clamp(1, room);
            let carets = self.bold_red(&"^".repeat(span_len));
            let indent = " ".repeat(indent);
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
            } else {
                out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
            }
            out.push_str(&format!("{pad} {pipe}\n"));
        }

        for label in d.labels.iter().filter(|l| !l.is_primary && !l.message.is_empty()) {
            out.push_str(&format!("  {} {}\n", self.dim("="), label.message));
        }
        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} help: {}\n", self.dim("="), suggestion));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    const SRC: &str = "let x = 1;\nwhile x < 3 { brk; }";

    fn plain() -> AnsiRenderer {
        AnsiRenderer { use_color: false }
    }

    fn make_diag() -> Diagnostic {
        Diagnostic::error("undefined variable: brk")
            .with_code("R001")
            .with_span(Span::new(25, 28), "here")
            .with_source(SRC)
            .with_note("in the loop body")
            .with_suggestion("did you mean 'break'?")
    }

    #[test]
    fn render_heading_with_code() {
        let out = plain().render(&make_diag());
        assert!(out.starts_with("error[R001]: undefined variable: brk\n"), "got:\n{out}");
    }

    #[test]
    fn render_location_and_source_line() {
        let out = plain().render(&make_diag());
        assert!(out.contains("--> 2:15"), "got:\n{out}");
        assert!(out.contains("2 | while x < 3 { brk; }"), "got:\n{out}");
    }

    #[test]
    fn render_caret_under_span() {
        let out = plain().render(&make_diag());
        let caret_line = out.lines().find(|l| l.contains('^')).unwrap();
        assert_eq!(caret_line, "  |               ^^^ here");
    }

    #[test]
    fn render_note_and_help() {
        let out = plain().render(&make_diag());
        assert!(out.contains("= note: in the loop body"));
        assert!(out.contains("= help: did you mean 'break'?"));
    }

    #[test]
    fn render_without_source_has_no_snippet() {
        let out = plain().render(&Diagnostic::error("something bad"));
        assert_eq!(out, "error: something bad\n");
    }

    #[test]
    fn color_toggle() {
        let colored = AnsiRenderer { use_color: true }.render(&make_diag());
        assert!(colored.contains("\x1b["));
        assert!(!plain().render(&make_diag()).contains("\x1b["));
    }

    #[test]
    fn carets_clamped_to_line() {
        let d = Diagnostic::error("bad").with_span(Span::new(4, 40), "").with_source("let x = 1;\nnext");
        let out = plain().render(&d);
        assert!(out.contains("    ^^^^^^\n"), "got:\n{out}");
    }
}
