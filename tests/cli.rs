use std::io::Write;
use std::process::{Command, Output, Stdio};

use tempfile::NamedTempFile;

fn toy() -> Command {
    Command::new(env!("CARGO_BIN_EXE_toy"))
}

fn source_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(source.as_bytes()).expect("write source");
    file
}

fn run_file(source: &str, args: &[&str], stdin: &str) -> Output {
    let file = source_file(source);
    let mut child = toy()
        .arg(file.path())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run toy");
    child.stdin.take().unwrap().write_all(stdin.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- Running files ---

#[test]
fn file_prints_output() {
    let out = run_file("let x = 4 * (3 + 2);\nprintln(x);", &[], "");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "20\n");
}

#[test]
fn file_recursion() {
    let src = "fn fact(n){\n  if n == 0{return 1;}\n  if n == 1{return 1;}\n  return n * fact(n - 1);\n}\nprintln(fact(6));\n";
    let out = run_file(src, &[], "");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "720\n");
}

#[test]
fn file_reads_input() {
    let out = run_file("let name = input(\"name: \");\nprintln(\"hello \" + name);", &[], "toy\n");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "name: hello toy\n");
}

#[test]
fn interpret_flag_matches_vm() {
    let src = "let s = 0; let i = 0; while i < 5{i++; s += i;} println(s);";
    let vm = run_file(src, &[], "");
    let tree = run_file(src, &["--interpret"], "");
    assert_eq!(stdout(&vm), "15\n");
    assert_eq!(stdout(&tree), stdout(&vm));
}

#[test]
fn call_site_scoping_flag() {
    let src = "fn show(){return v;} fn caller(){let v = 7; return show();} let v = 1; println(caller());";
    assert_eq!(stdout(&run_file(src, &[], "")), "1\n");
    assert_eq!(stdout(&run_file(src, &["--call-site-scoping"], "")), "7\n");
}

// --- Emit ---

#[test]
fn emit_bytecode_listing() {
    let out = run_file("4 + 3;", &["--emit", "bytecode"], "");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "0  LOAD_INT 0, 4\n1  LOAD_INT 1, 3\n2  INFIX 0, 1, 2, ADD\n");
}

#[test]
fn emit_ast_is_json() {
    let out = run_file("let x = 1;", &["--emit", "ast"], "");
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("AST JSON");
    assert_eq!(v["statements"][0]["Let"]["name"], "x");
}

#[test]
fn trace_goes_to_stderr() {
    let out = run_file("let x = 1;", &["--trace"], "");
    assert!(out.status.success());
    assert!(stderr(&out).contains("[vm]    0 LOAD_INT 0, 1"), "stderr: {}", stderr(&out));
    assert!(stdout(&out).is_empty());
}

#[test]
fn trace_shows_function_exit() {
    let out = run_file("fn f(){return 1;} f();", &["--trace"], "");
    assert!(out.status.success());
    assert!(stderr(&out).contains("leave f, resume at 5"), "stderr: {}", stderr(&out));
}

#[test]
fn input_numbers_do_arithmetic() {
    let out = run_file("let n = input(\"n: \");\nprintln(n * 2);", &[], "21\n");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "n: 42\n");
}

// --- Errors ---

#[test]
fn builtin_arity_reads_the_same_on_both_backends() {
    let msg = "builtin 'input' takes 0-1 argument(s), got 2";
    for args in [&["--no-color"][..], &["--no-color", "--interpret"][..]] {
        let out = run_file("input(1, 2);", args, "");
        assert_eq!(out.status.code(), Some(1));
        assert!(stderr(&out).contains(msg), "{args:?}: {}", stderr(&out));
    }
}

#[test]
fn runtime_error_exits_nonzero() {
    let out = run_file("let x = 1;\nlet y = x / 0;", &["--no-color"], "");
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[R013]: division by zero"), "stderr: {err}");
}

#[test]
fn parse_error_points_at_source() {
    let out = run_file("let x = 1\nlet y = 2;", &["--no-color"], "");
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[P001]"), "stderr: {err}");
    assert!(err.contains("--> 2:1"), "stderr: {err}");
}

#[test]
fn compile_error_reported() {
    let out = run_file("break;", &["--no-color"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("'break' outside of a loop"));
}

#[test]
fn json_diagnostics() {
    let out = run_file("let x = y;", &["--json"], "");
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_str(stderr(&out).trim()).expect("JSON diagnostic");
    assert_eq!(v["code"], "R001");
    assert_eq!(v["message"], "undefined variable: y");
}

#[test]
fn depth_limit_flag() {
    let out = run_file("fn f(n){return f(n + 1);} f(0);", &["--max-depth", "10", "--no-color"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("call depth exceeded 10"));
}

#[test]
fn missing_file_fails() {
    let out = toy().arg("/definitely/not/here.toy").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("cannot read"));
}

// --- REPL ---

fn repl(stdin: &str) -> Output {
    let mut child = toy()
        .arg("--no-color")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run toy");
    child.stdin.take().unwrap().write_all(stdin.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn repl_prints_globals() {
    let out = repl("let x = 5; let y = x * 3;\n");
    assert!(out.status.success());
    assert!(stdout(&out).contains("{x: 5, y: 15}"), "stdout: {}", stdout(&out));
}

#[test]
fn repl_lines_are_independent_and_survive_errors() {
    let out = repl("let a = 1;\nlet b = a;\nlet c = \"ok\";\n");
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("{a: 1}"));
    assert!(text.contains("{c: ok}"));
    assert!(stderr(&out).contains("undefined variable: a"));
}

#[test]
fn repl_exits_cleanly_on_eof() {
    let out = repl("");
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("> "));
}
