//! End-to-end semantic pipeline tests: representative programs on the
//! front-end side, plus the boundary behaviors that must be rejected.

mod common;

use common::*;
use sushi_ast::*;
use sushi_compiler::codes;
use sushi_diagnostics::Span;

fn sum_squares_program() -> Program {
    // fn sum_squares(i32 n) i32:
    //     let i32 total = 0
    //     foreach(i in 0..n):
    //         total := total + i * i
    //     return Result.Ok(total)
    let sum_squares = function(
        "sum_squares",
        vec![Param::new("n", Type::I32)],
        Type::I32,
        None,
        vec![
            let_stmt("total", Type::I32, Expression::int(0)),
            foreach(
                "i",
                range(Expression::int(0), Expression::name("n")),
                vec![rebind(
                    Expression::name("total"),
                    Expression::binary(
                        BinaryOp::Add,
                        Expression::name("total"),
                        Expression::binary(
                            BinaryOp::Mul,
                            Expression::name("i"),
                            Expression::name("i"),
                        ),
                    ),
                )],
            ),
            return_ok(Expression::name("total")),
        ],
    );

    // fn main() i32:
    //     let i32 s = sum_squares(5).realise(0)
    //     println "{s}"
    //     return Result.Ok(0)
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt(
                "s",
                Type::I32,
                Expression::method_call(
                    Expression::call("sum_squares", vec![Expression::int(5)]),
                    "realise",
                    vec![Expression::int(0)],
                ),
            ),
            println_interp(vec![InterpolationPart::Expr(Expression::name("s"))]),
            return_ok(Expression::int(0)),
        ],
    );

    program_with(vec![sum_squares, main])
}

#[test]
fn scenario_sum_squares_passes_all_passes() {
    let mut program = sum_squares_program();
    let (ctx, reporter) = analyze(&mut program);
    assert!(
        !reporter.has_errors(),
        "diagnostics: {:?}",
        reporter.diagnostics()
    );
    // The implicit wrapped return produced its concrete enum.
    assert!(ctx.enums.contains_key("Result<i32, StdError>"));
    // Every body the emitter will compile is annotated.
    let body = &ctx.function_bodies["sum_squares"];
    let Statement::Let(let_total) = &body.body.statements[0] else {
        panic!("expected let");
    };
    assert_eq!(let_total.init.as_ref().unwrap().ty, Some(Type::I32));
}

#[test]
fn scenario_match_on_maybe() {
    // let i32[] a = from([10, 20, 30])
    // let Maybe<i32> m = a.get(0)
    // match m: Maybe.Some(x) -> println "got {x}" / Maybe.None -> println "empty"
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt(
                "a",
                Type::dyn_array(Type::I32),
                dyn_array_from(vec![
                    Expression::int(10),
                    Expression::int(20),
                    Expression::int(30),
                ]),
            ),
            let_stmt(
                "m",
                Type::generic_ref("Maybe", vec![Type::I32]),
                Expression::method_call(Expression::name("a"), "get", vec![Expression::int(0)]),
            ),
            match_stmt(
                Expression::name("m"),
                vec![
                    arm(
                        "Maybe",
                        "Some",
                        vec![PatternBinding::Name("x".to_string())],
                        vec![println_interp(vec![
                            InterpolationPart::Literal("got ".to_string()),
                            InterpolationPart::Expr(Expression::name("x")),
                        ])],
                    ),
                    arm(
                        "Maybe",
                        "None",
                        vec![],
                        vec![println_interp(vec![InterpolationPart::Literal(
                            "empty".to_string(),
                        )])],
                    ),
                ],
            ),
            return_ok(Expression::int(0)),
        ],
    );
    let (ctx, reporter) = analyze(&mut program_with(vec![main]));
    assert!(
        !reporter.has_errors(),
        "diagnostics: {:?}",
        reporter.diagnostics()
    );
    assert!(ctx.enums.contains_key("Maybe<i32>"));
}

#[test]
fn non_exhaustive_match_is_rejected() {
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt(
                "m",
                Type::generic_ref("Maybe", vec![Type::I32]),
                Expression::dot_call("Maybe", "Some", vec![Expression::int(1)]),
            ),
            match_stmt(
                Expression::name("m"),
                vec![arm(
                    "Maybe",
                    "Some",
                    vec![PatternBinding::Discard],
                    vec![],
                )],
            ),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![main]));
    assert!(reporter.has_code(codes::CE2040));
}

#[test]
fn scenario_try_propagation_annotations() {
    // fn parse(string s) i32 | StdError: return Result.Ok(1)
    // fn compute(string a, string b) i32:
    //     let i32 x = parse(a)??
    //     let i32 y = parse(b)??
    //     return Result.Ok(x + y)
    let parse = function(
        "parse",
        vec![Param::new("s", Type::STRING)],
        Type::I32,
        Some(Type::Unknown("StdError".to_string())),
        vec![return_ok(Expression::int(1))],
    );
    let compute = function(
        "compute",
        vec![
            Param::new("a", Type::STRING),
            Param::new("b", Type::STRING),
        ],
        Type::I32,
        None,
        vec![
            let_stmt(
                "x",
                Type::I32,
                try_expr(Expression::call("parse", vec![Expression::name("a")])),
            ),
            let_stmt(
                "y",
                Type::I32,
                try_expr(Expression::call("parse", vec![Expression::name("b")])),
            ),
            return_ok(Expression::binary(
                BinaryOp::Add,
                Expression::name("x"),
                Expression::name("y"),
            )),
        ],
    );
    let (ctx, reporter) = analyze(&mut program_with(vec![parse, compute]));
    assert!(
        !reporter.has_errors(),
        "diagnostics: {:?}",
        reporter.diagnostics()
    );

    // The lowering reads these annotations without re-inference.
    let compute_body = &ctx.function_bodies["compute"];
    let Statement::Let(let_x) = &compute_body.body.statements[0] else {
        panic!("expected let");
    };
    let ExprKind::Try {
        inferred_inner_type,
        inferred_unwrapped_type,
        inferred_success_tag,
        inferred_error_type,
        inferred_func_return_type,
        ..
    } = &let_x.init.as_ref().unwrap().kind
    else {
        panic!("expected try");
    };
    assert!(matches!(
        inferred_inner_type,
        Some(Type::Enum(e)) if e.name == "Result<i32, StdError>"
    ));
    assert_eq!(inferred_unwrapped_type, &Some(Type::I32));
    assert_eq!(inferred_success_tag, &Some(0));
    assert!(matches!(
        inferred_error_type,
        Some(Type::Enum(e)) if e.name == "StdError"
    ));
    assert!(matches!(
        inferred_func_return_type,
        Some(Type::Enum(e)) if e.name == "Result<i32, StdError>"
    ));
}

#[test]
fn scenario_hashmap_round_trip_types() {
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt(
                "m",
                Type::generic_ref("HashMap", vec![Type::STRING, Type::I32]),
                Expression::dot_call("HashMap", "new", vec![]),
            ),
            expr_stmt(Expression::dot_call(
                "m",
                "insert",
                vec![Expression::string("a"), Expression::int(1)],
            )),
            expr_stmt(Expression::dot_call(
                "m",
                "insert",
                vec![Expression::string("b"), Expression::int(2)],
            )),
            expr_stmt(Expression::dot_call(
                "m",
                "insert",
                vec![Expression::string("a"), Expression::int(99)],
            )),
            let_stmt(
                "size",
                Type::I32,
                Expression::dot_call("m", "size", vec![]),
            ),
            let_stmt(
                "v",
                Type::I32,
                Expression::method_call(
                    Expression::dot_call("m", "get", vec![Expression::string("a")]),
                    "realise",
                    vec![Expression::int(0)],
                ),
            ),
            println_interp(vec![InterpolationPart::Expr(Expression::name("size"))]),
            println_interp(vec![InterpolationPart::Expr(Expression::name("v"))]),
            return_ok(Expression::int(0)),
        ],
    );
    let (ctx, reporter) = analyze(&mut program_with(vec![main]));
    assert!(
        !reporter.has_errors(),
        "diagnostics: {:?}",
        reporter.diagnostics()
    );
    // M1: exactly one concrete identity per instantiation.
    assert!(ctx.structs.contains_key("HashMap<string, i32>"));
    assert!(ctx.structs.contains_key("Entry<string, i32>"));
    assert!(ctx.enums.contains_key("Maybe<i32>"));
}

#[test]
fn scenario_generic_function_inference() {
    let pair = generic_function(
        "pair",
        vec!["T"],
        vec![
            Param::new("x", Type::TypeParam("T".to_string())),
            Param::new("y", Type::TypeParam("T".to_string())),
        ],
        Type::I32,
        vec![return_ok(Expression::int(2))],
    );
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt(
                "n",
                Type::I32,
                Expression::method_call(
                    Expression::call("pair", vec![Expression::int(1), Expression::int(2)]),
                    "realise",
                    vec![Expression::int(0)],
                ),
            ),
            let_stmt(
                "m",
                Type::I32,
                Expression::method_call(
                    Expression::call(
                        "pair",
                        vec![Expression::string("a"), Expression::string("b")],
                    ),
                    "realise",
                    vec![Expression::int(0)],
                ),
            ),
            return_ok(Expression::binary(
                BinaryOp::Add,
                Expression::name("n"),
                Expression::name("m"),
            )),
        ],
    );
    let (ctx, reporter) = analyze(&mut program_with(vec![pair, main]));
    assert!(
        !reporter.has_errors(),
        "diagnostics: {:?}",
        reporter.diagnostics()
    );
    // Two separate monomorphs, one per argument type (T1).
    assert!(ctx.functions.contains_key("pair__i32"));
    assert!(ctx.functions.contains_key("pair__string"));
    assert!(!ctx.functions.contains_key("pair"));
    assert_eq!(ctx.functions["pair__string"].params[0].ty, Type::STRING);
}

#[test]
fn scenario_move_on_return() {
    // struct Bag: string[] items
    // fn make() Bag: let Bag b = Bag(items: from(["x"])); return Result.Ok(b)
    let mut program = program_with(vec![function(
        "make",
        vec![],
        Type::Unknown("Bag".to_string()),
        None,
        vec![
            let_stmt(
                "b",
                Type::Unknown("Bag".to_string()),
                Expression::new(
                    ExprKind::StructConstructor {
                        name: "Bag".to_string(),
                        args: vec![ConstructorArg::named(
                            "items",
                            dyn_array_from(vec![Expression::string("x")]),
                        )],
                        resolved_struct_type: None,
                    },
                    Span::synthetic(),
                ),
            ),
            return_ok(Expression::name("b")),
        ],
    )]);
    program.items.insert(
        0,
        Item::Struct(StructDecl {
            name: "Bag".to_string(),
            type_params: vec![],
            fields: vec![FieldDecl {
                name: "items".to_string(),
                ty: Type::dyn_array(Type::STRING),
                span: Span::synthetic(),
            }],
            span: Span::synthetic(),
        }),
    );
    let (ctx, reporter) = analyze(&mut program);
    assert!(
        !reporter.has_errors(),
        "diagnostics: {:?}",
        reporter.diagnostics()
    );
    assert!(ctx.structs.contains_key("Bag"));
}

// ---------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------

#[test]
fn i32_overflow_literal_is_rejected() {
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt("x", Type::I32, Expression::int(2147483648)),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![main]));
    assert!(reporter.has_code(codes::CE2012));
}

#[test]
fn zero_size_array_is_rejected() {
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            Statement::Let(LetStmt {
                name: "a".to_string(),
                declared_type: Type::array(Type::I32, 0),
                init: None,
                span: Span::synthetic(),
            }),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![main]));
    assert!(reporter.has_code(codes::CE2010));
}

#[test]
fn string_plus_is_rejected() {
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt(
                "s",
                Type::STRING,
                Expression::binary(
                    BinaryOp::Add,
                    Expression::string("a"),
                    Expression::string("b"),
                ),
            ),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![main]));
    assert!(reporter.has_code(codes::CE2509));
}

#[test]
fn blank_variable_type_is_rejected() {
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            let_stmt("nothing", Type::BLANK, Expression::int(0)),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![main]));
    assert!(reporter.has_code(codes::CE2032));
}

#[test]
fn bare_return_is_rejected() {
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![Statement::Return(ReturnStmt {
            value: None,
            span: Span::synthetic(),
        })],
    );
    let (_, reporter) = analyze(&mut program_with(vec![main]));
    assert!(reporter.has_code(codes::CE2030));
}

#[test]
fn unused_result_warns() {
    let helper = function(
        "helper",
        vec![],
        Type::I32,
        None,
        vec![return_ok(Expression::int(1))],
    );
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            expr_stmt(Expression::call("helper", vec![])),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![helper, main]));
    assert!(!reporter.has_errors());
    assert!(reporter.has_code(codes::CW2001));
}

#[test]
fn unhandled_result_binding_is_rejected() {
    let helper = function(
        "helper",
        vec![],
        Type::I32,
        None,
        vec![return_ok(Expression::int(1))],
    );
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            // let i32 x = helper() — the Result is neither bound as Result,
            // propagated, nor unwrapped.
            let_stmt("x", Type::I32, Expression::call("helper", vec![])),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![helper, main]));
    assert!(reporter.has_code(codes::CE2505));
}

#[test]
fn printing_a_result_is_rejected() {
    let helper = function(
        "helper",
        vec![],
        Type::I32,
        None,
        vec![return_ok(Expression::int(1))],
    );
    let main = function(
        "main",
        vec![],
        Type::I32,
        None,
        vec![
            Statement::Print(PrintStmt {
                value: Expression::call("helper", vec![]),
                newline: true,
                span: Span::synthetic(),
            }),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![helper, main]));
    assert!(reporter.has_code(codes::CE2037));
}

#[test]
fn mixed_numeric_arithmetic_requires_cast() {
    let main = function(
        "main",
        vec![Param::new("a", Type::I32), Param::new("b", Type::I64)],
        Type::I32,
        None,
        vec![
            let_stmt(
                "x",
                Type::I32,
                Expression::binary(
                    BinaryOp::Add,
                    Expression::name("a"),
                    Expression::name("b"),
                ),
            ),
            return_ok(Expression::int(0)),
        ],
    );
    let (_, reporter) = analyze(&mut program_with(vec![main]));
    assert!(reporter.has_code(codes::CE2510));
}
