use std::borrow::Cow;

use bstr::ByteSlice;

use crate::{
    compile::{compile, Options},
    tam::Instr,
    vm::{self, VmError},
};

fn exec_vm(code: &[Instr], input: &str) -> Result<String, VmError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut output = vec![];
    vm::execute_with(code, &mut input.as_bytes(), &mut output)?;
    Ok(output.to_str().unwrap().trim().to_owned())
}

/// Compiles and runs `src` once without folding and once with it.
fn run(src: &str, input: &str) -> Vec<Result<String, VmError>> {
    [false, true]
        .into_iter()
        .map(|folding| {
            let compilation = compile(src, Options { folding, ..Options::default() }).unwrap();
            exec_vm(compilation.encoding.instructions(), input)
        })
        .collect()
}

macro_rules! test_program {
    ($src: expr, $expected: expr) => {
        test_program!($src, "", $expected)
    };
    ($src: expr, $input: expr, $expected: expr) => {
        for output in run($src, $input) {
            assert_eq!(output.unwrap(), $expected);
        }
    };
}

#[test]
fn test_fizzbuzz_example() {
    let src = include_str!("../programs/fizzbuzz.tri");
    let expected: String = (1..=30)
        .map(|i| match i {
            _ if i % 15 == 0 => "FB\n".into(),
            _ if i % 3 == 0 => "F\n".into(),
            _ if i % 5 == 0 => "B\n".into(),
            _ => Cow::Owned(i.to_string() + "\n"),
        })
        .collect();
    test_program!(src, expected.trim());
}

#[test]
fn test_sort_example() {
    let src = include_str!("../programs/sort.tri");
    test_program!(src, "5\n3 1 4 1 5\n", "1 1 3 4 5");
    test_program!(src, "12 9 8 7 6 5 4 3 2 1 0 -1 -2", "0 1 2 3 4 5 6 7 8 9");
}

#[test]
fn test_arithmetic() {
    test_program!("putint(7 // 3 + 10 / 4 * 2)", "5");
    test_program!("begin putint(-7 / 2); puteol(); putint(-7 // 2) end", "-3\n-1");
    test_program!("putint(maxint - (maxint - 1))", "1");
}

#[test]
fn test_logic() {
    test_program!("if \\(1 > 2) /\\ (true \\/ false) then put('t') else put('f')", "t");
    test_program!("if ord('a') < ord('b') then put('t') else put('f')", "t");
    test_program!("if 3 \\= 3 then put('t') else put('f')", "f");
}

#[test]
fn test_while_loops() {
    test_program!(
        "let var i: Integer in begin i := 0; while i < 5 do begin putint(i); i := i + 1 end end",
        "01234"
    );
}

#[test]
fn test_recursion() {
    test_program!(
        "let func fact(n: Integer): Integer ~ if n <= 1 then 1 else n * fact(n - 1) \
         in putint(fact(7))",
        "5040"
    );
}

#[test]
fn test_static_links() {
    test_program!(
        "let var total: Integer; \
             proc addTo(var acc: Integer, n: Integer) ~ acc := acc + n; \
             proc outer(k: Integer) ~ \
               let proc inner(j: Integer) ~ addTo(var total, j * k) \
               in begin inner(1); inner(2) end \
         in begin total := 0; outer(10); putint(total) end",
        "30"
    );
}

#[test]
fn test_arrays_and_records() {
    test_program!(
        "let type Point ~ record x: Integer, y: Integer end; \
             var ps: array 3 of Point; \
             var i: Integer \
         in begin \
           ps := [{x ~ 1, y ~ 2}, {x ~ 3, y ~ 4}, {x ~ 5, y ~ 6}]; \
           i := 0; \
           while i < 3 do begin ps[i].y := ps[i].y * 10; i := i + 1 end; \
           putint(ps[0].y + ps[1].y + ps[2].x); \
           puteol(); \
           if ps[1] = {x ~ 3, y ~ 40} then put('y') else put('n') \
         end",
        "65\ny"
    );
}

#[test]
fn test_routine_parameters() {
    test_program!(
        "let func twice(func f(n: Integer): Integer, x: Integer): Integer ~ f(f(x)); \
             func inc(n: Integer): Integer ~ n + 1 \
         in putint(twice(func inc, 5))",
        "7"
    );
    test_program!("let proc apply(proc p(c: Char), c: Char) ~ p(c) in apply(proc put, 'z')", "z");
}

#[test]
fn test_let_expressions() {
    test_program!(
        "let var v: Integer in begin v := 4; putint(let const w ~ v * 2 in w + 1) end",
        "9"
    );
    test_program!("putint(let const x ~ 3 in x + 4)", "7");
    test_program!("put(chr(ord('a') + 1))", "b");
}

#[test]
fn test_input() {
    test_program!(
        "let var n: Integer; var c: Char \
         in begin getint(var n); geteol(); get(var c); putint(n * 2); put(c) end",
        "21\nq",
        "42q"
    );
    test_program!(
        "let var c: Char in while \\eof() do begin get(var c); put(c) end",
        "echo",
        "echo"
    );
}

#[test]
fn test_runtime_errors() {
    for output in run("putint(maxint + 1)", "") {
        assert!(matches!(output, Err(VmError::Overflow { .. })));
    }
    for output in run("let var z: Integer in begin z := 0; putint(1 / z) end", "") {
        assert!(matches!(output, Err(VmError::ZeroDivide { .. })));
    }
    for output in run("let var n: Integer in getint(var n)", "x") {
        assert!(matches!(output, Err(VmError::BadInput { .. })));
    }
}
