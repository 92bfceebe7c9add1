//! End-to-end pipeline tests: compile AtomC source text and run it on the
//! stack machine, checking program output and diagnostics.

use atomcc::{RunConfig, compile_file, compile_source, run_source};
use atomc_runtime::Vm;

fn run(source: &str) -> Result<String, String> {
    let mut out = Vec::new();
    run_source(source, &RunConfig::default(), &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn run_ok(source: &str) -> String {
    match run(source) {
        Ok(out) => out,
        Err(e) => panic!("program failed: {}", e),
    }
}

#[test]
fn integer_loop_counts_up() {
    let out = run_ok(
        "void f(int n) { int i; i=0; while(i<n) { put_i(i); i=i+1; } }\n\
         void main() { f(3); }",
    );
    assert_eq!(out, "=> 0=> 1=> 2");
}

#[test]
fn mixed_arithmetic_promotes_to_double() {
    let out = run_ok("void main() { double x; x = 1.5 + 2; put_d(x); }");
    assert_eq!(out, "=> 3.500000");
}

#[test]
fn if_else_takes_the_false_branch() {
    let out = run_ok("void main() { int x; x = 10; if(x<5) put_i(1); else put_i(2); }");
    assert_eq!(out, "=> 2");
}

#[test]
fn struct_members_read_back_what_was_stored() {
    let out = run_ok(
        "struct P { int x; int y; };\n\
         void main() { struct P p; p.x = 7; put_i(p.x); }",
    );
    assert_eq!(out, "=> 7");
}

#[test]
fn locals_shadow_globals_which_stay_reachable_elsewhere() {
    let out = run_ok(
        "int v;\n\
         void setv() { v = 9; }\n\
         void showv() { put_i(v); }\n\
         void main() { int v; v = 1; put_i(v); setv(); showv(); put_i(v); }",
    );
    assert_eq!(out, "=> 1=> 9=> 1");
}

#[test]
fn undefined_symbols_are_reported_with_their_line() {
    let err = run("void main() { put_i(missing); }").unwrap_err();
    assert_eq!(err, "error in line 1: undefined id: missing");
}

#[test]
fn assignment_chains_through_conversions() {
    let out = run_ok("void main() { int a; a = 2.9; put_i(a); }");
    assert_eq!(out, "=> 2");
}

#[test]
fn casts_truncate_doubles() {
    let out = run_ok("void main() { put_i((int)2.9); }");
    assert_eq!(out, "=> 2");
}

#[test]
fn char_values_behave_as_small_ints() {
    let out = run_ok("void main() { put_i('a' + 1); if('a' < 'b') put_i(1); }");
    assert_eq!(out, "=> 98=> 1");
}

#[test]
fn string_literals_are_indexable_char_arrays() {
    let out = run_ok(r#"void main() { put_i("abc"[0]); put_i("abc"[2]); }"#);
    assert_eq!(out, "=> 97=> 99");
}

#[test]
fn global_arrays_live_in_the_data_segment() {
    let out = run_ok(
        "int sum(int a[], int n) {\n\
             int s; int i;\n\
             s = 0; i = 0;\n\
             while(i < n) { s = s + a[i]; i = i + 1; }\n\
             return s;\n\
         }\n\
         int v[3];\n\
         void main() { v[0] = 10; v[1] = 20; v[2] = 12; put_i(sum(v, 3)); }",
    );
    assert_eq!(out, "=> 42");
}

#[test]
fn local_arrays_index_within_the_frame() {
    let out = run_ok(
        "void main() {\n\
             int v[2];\n\
             v[0] = 5; v[1] = v[0] * 3;\n\
             put_i(v[1]);\n\
         }",
    );
    assert_eq!(out, "=> 15");
}

#[test]
fn arrays_of_structs_scale_and_offset() {
    let out = run_ok(
        "struct P { int x; int y; };\n\
         struct P v[3];\n\
         void main() { v[2].y = 6; v[2].x = v[2].y * 7; put_i(v[2].x); }",
    );
    assert_eq!(out, "=> 42");
}

#[test]
fn aggregates_are_passed_by_reference() {
    let out = run_ok(
        "struct P { int x; int y; };\n\
         void bump(struct P q) { q.x = q.x + 1; }\n\
         void main() { struct P p; p.x = 5; bump(p); put_i(p.x); }",
    );
    assert_eq!(out, "=> 6");
}

#[test]
fn recursion_keeps_its_frames_apart() {
    let out = run_ok(
        "int fact(int n) { if(n <= 1) return 1; return n * fact(n - 1); }\n\
         void main() { put_i(fact(5)); }",
    );
    assert_eq!(out, "=> 120");
}

#[test]
fn logical_and_short_circuits() {
    let out = run_ok("void main() { int n; n = 0; put_i(n != 0 && 10 / n); }");
    assert_eq!(out, "=> 0");
}

#[test]
fn logical_or_short_circuits() {
    let out = run_ok("void main() { int n; n = 0; put_i(n == 0 || 10 / n); }");
    assert_eq!(out, "=> 1");
}

#[test]
fn logical_not_inverts_truthiness() {
    let out = run_ok("void main() { put_i(!0); put_i(!3); }");
    assert_eq!(out, "=> 1=> 0");
}

#[test]
fn nested_blocks_shadow_and_restore() {
    let out = run_ok(
        "void main() { int x; x = 1; { int x; x = 2; put_i(x); } put_i(x); }",
    );
    assert_eq!(out, "=> 2=> 1");
}

#[test]
fn globals_start_zeroed() {
    let out = run_ok("double d; int n; void main() { put_d(d); put_i(n); }");
    assert_eq!(out, "=> 0.000000=> 0");
}

#[test]
fn while_conditions_truncate_doubles() {
    // 0.5 truncates to 0, so the body never runs
    let out = run_ok("void main() { while(0.5) put_i(1); put_i(2); }");
    assert_eq!(out, "=> 2");
}

#[test]
fn empty_main_prints_nothing() {
    assert_eq!(run_ok("void main() {}"), "");
}

#[test]
fn the_stack_unwinds_to_empty_after_halt() {
    let unit = compile_source(
        "int twice(int n) { return n + n; }\n\
         void main() { put_i(twice(21)); }",
    )
    .unwrap();
    let mut out = Vec::new();
    let mut vm = Vm::new(&unit.program, &mut out);
    vm.run().unwrap();
    assert_eq!(vm.depth(), 0);
    assert_eq!(String::from_utf8_lossy(&out), "=> 42");
}

#[test]
fn runaway_recursion_overflows_the_stack() {
    let source = "int f(int n) { return f(n); } void main() { put_i(f(1)); }";
    let cfg = RunConfig {
        stack_size: 64,
        ..RunConfig::default()
    };
    let mut out = Vec::new();
    let err = run_source(source, &cfg, &mut out).unwrap_err();
    assert_eq!(err, "[ERROR]: trying to push into a full stack");
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let err = run("void main() { put_i(1 / 0); }").unwrap_err();
    assert_eq!(err, "[ERROR]: division by zero");
}

#[test]
fn lexer_errors_carry_the_error_prefix() {
    let err = run("void main() { int a; a = a # 1; }").unwrap_err();
    assert_eq!(err, "[ERROR]: Invalid char: # (35)");
}

#[test]
fn source_files_compile_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.atc");
    std::fs::write(&path, "void main() { put_i(1); }").unwrap();
    let unit = compile_file(&path).unwrap();
    let mut out = Vec::new();
    let mut vm = Vm::new(&unit.program, &mut out);
    vm.run().unwrap();
    assert_eq!(String::from_utf8_lossy(&out), "=> 1");

    let err = compile_file(&dir.path().join("absent.atc")).unwrap_err();
    assert!(err.starts_with("[ERROR]: Unable to open"), "{}", err);
}
