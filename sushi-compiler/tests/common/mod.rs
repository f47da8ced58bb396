//! Shared AST builders for the pipeline tests. The parser front end is a
//! separate component, so tests assemble programs directly.

use sushi_ast::*;
use sushi_compiler::{run_semantic_pipeline, CompilerContext, DiagnosticEngine};
use sushi_diagnostics::Span;

pub fn function(
    name: &str,
    params: Vec<Param>,
    return_type: Type,
    err_type: Option<Type>,
    statements: Vec<Statement>,
) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        type_params: vec![],
        params,
        return_type,
        err_type,
        visibility: Visibility::Public,
        body: Block::new(statements),
        span: Span::synthetic(),
    }
}

pub fn generic_function(
    name: &str,
    type_params: Vec<&str>,
    params: Vec<Param>,
    return_type: Type,
    statements: Vec<Statement>,
) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        type_params: type_params
            .into_iter()
            .map(TypeParamDecl::plain)
            .collect(),
        params,
        return_type,
        err_type: None,
        visibility: Visibility::Public,
        body: Block::new(statements),
        span: Span::synthetic(),
    }
}

pub fn let_stmt(name: &str, ty: Type, init: Expression) -> Statement {
    Statement::Let(LetStmt {
        name: name.to_string(),
        declared_type: ty,
        init: Some(init),
        span: Span::synthetic(),
    })
}

pub fn rebind(target: Expression, value: Expression) -> Statement {
    Statement::Rebind(RebindStmt {
        target,
        value,
        span: Span::synthetic(),
    })
}

/// `return Result.Ok(value)` through the ambiguous dot form, the way the
/// parser delivers it.
pub fn return_ok(value: Expression) -> Statement {
    Statement::Return(ReturnStmt {
        value: Some(Expression::dot_call("Result", "Ok", vec![value])),
        span: Span::synthetic(),
    })
}

pub fn expr_stmt(expr: Expression) -> Statement {
    Statement::Expr(ExprStmt {
        expr,
        span: Span::synthetic(),
    })
}

pub fn println_interp(parts: Vec<InterpolationPart>) -> Statement {
    Statement::Print(PrintStmt {
        value: Expression::new(ExprKind::InterpolatedString(parts), Span::synthetic()),
        newline: true,
        span: Span::synthetic(),
    })
}

pub fn foreach(item: &str, iterable: Expression, body: Vec<Statement>) -> Statement {
    Statement::Foreach(ForeachStmt {
        item: item.to_string(),
        declared_item_type: None,
        item_type: None,
        iterable,
        body: Block::new(body),
        span: Span::synthetic(),
    })
}

pub fn range(start: Expression, end: Expression) -> Expression {
    Expression::new(
        ExprKind::Range {
            start: Box::new(start),
            end: Box::new(end),
            inclusive: false,
        },
        Span::synthetic(),
    )
}

pub fn try_expr(inner: Expression) -> Expression {
    Expression::new(
        ExprKind::Try {
            inner: Box::new(inner),
            inferred_inner_type: None,
            inferred_unwrapped_type: None,
            inferred_success_tag: None,
            inferred_error_type: None,
            inferred_func_return_type: None,
        },
        Span::synthetic(),
    )
}

pub fn dyn_array_from(items: Vec<Expression>) -> Expression {
    Expression::new(ExprKind::DynArrayFrom(items), Span::synthetic())
}

pub fn match_stmt(scrutinee: Expression, arms: Vec<MatchArm>) -> Statement {
    Statement::Match(MatchStmt {
        scrutinee,
        arms,
        span: Span::synthetic(),
    })
}

pub fn arm(
    enum_name: &str,
    variant: &str,
    bindings: Vec<PatternBinding>,
    body: Vec<Statement>,
) -> MatchArm {
    MatchArm {
        pattern: Pattern::Enum(EnumPattern {
            enum_name: enum_name.to_string(),
            variant: variant.to_string(),
            bindings,
            span: Span::synthetic(),
        }),
        body: Block::new(body),
        span: Span::synthetic(),
    }
}

pub fn program_with(functions: Vec<FunctionDecl>) -> Program {
    let mut program = Program::new("main");
    program
        .items
        .extend(functions.into_iter().map(Item::Function));
    program
}

/// Run the full semantic pipeline over a program.
pub fn analyze(program: &mut Program) -> (CompilerContext, DiagnosticEngine) {
    let mut ctx = CompilerContext::new();
    let mut reporter = DiagnosticEngine::new("test.sushi");
    run_semantic_pipeline(program, &mut ctx, &mut reporter);
    (ctx, reporter)
}
