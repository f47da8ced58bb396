//! Semantic passes. Fixed order:
//! Collect → Resolve → MonomorphizeTypes → MonomorphizeFunctions →
//! HashRegistration → TypeValidate (match + borrow checks inside) → seal.

pub mod borrow;
pub mod collect;
pub mod const_eval;
pub mod monomorphize;
pub mod resolve;
pub mod stdlib;
pub mod typecheck;

use crate::context::{CompilerContext, PerkImpl};
use sushi_ast::{FunctionDecl, Program, Type};
use sushi_diagnostics::DiagnosticEngine;

/// The wrapped return type of a function: `fn f() T` returns
/// `Result<T, StdError>`, `fn f() T | E` returns `Result<T, E>`.
pub fn wrapped_return_type(decl: &FunctionDecl) -> Type {
    let err = decl
        .err_type
        .clone()
        .unwrap_or_else(|| Type::Unknown("StdError".to_string()));
    Type::result(decl.return_type.clone(), err)
}

/// HashRegistration: every concrete struct and enum gets an auto-derived
/// `hash()` implementation entry unless the user provided one via a perk.
fn register_hashables(ctx: &mut CompilerContext) {
    let names: Vec<String> = ctx
        .structs
        .keys()
        .chain(ctx.enums.keys())
        .cloned()
        .collect();
    for name in names {
        let key = (name.clone(), "Hashable".to_string());
        if !ctx.perk_impls.contains_key(&key) {
            ctx.register_perk_impl(name, "Hashable".to_string(), PerkImpl::AutoDerived);
        }
    }
}

/// Run every semantic pass over one compilation unit. On return the
/// reporter holds all diagnostics; the context is sealed and, if no errors
/// were reported, ready for emission.
pub fn run_semantic_pipeline(
    program: &mut Program,
    ctx: &mut CompilerContext,
    reporter: &mut DiagnosticEngine,
) {
    collect::Collector::new(ctx, reporter).run(program);

    resolve::Resolver::new(ctx, reporter).run(program);

    monomorphize::Monomorphizer::new(ctx, reporter).run_types(program);
    monomorphize::Monomorphizer::new(ctx, reporter).run_functions(program);

    register_hashables(ctx);

    const_eval::run(ctx, reporter);

    typecheck::TypeValidator::new(ctx, reporter).run(program);

    borrow::BorrowChecker::new(reporter).run(ctx);

    ctx.seal();
}
