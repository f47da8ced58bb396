//! Type resolution: lowering `Unknown(name)` and `GenericRef(base, args)`
//! to concrete table entries.
//!
//! Nominal types are interned by name in the context tables. Resolution
//! inlines a nominal definition at its use site, with one exception: in
//! pointee position (`Pointer`, the only legal recursion edge, used by
//! `Own<T>`) references stay name-interned so the type tree stays finite
//! for self-referential types. The LLVM mapping resolves interned pointee
//! names through its own cache, which breaks the same cycle at IR level.

use crate::context::CompilerContext;
use std::collections::HashSet;
use sushi_ast::{mangle_generic_name, Item, Program, Type};
use sushi_diagnostics::{codes, DiagnosticEngine, Span};

/// Resolve a type as far as the current tables allow. Idempotent: resolving
/// an already-resolved type returns it unchanged. GenericRefs whose
/// monomorph is not yet installed are returned with resolved arguments so
/// the monomorphizer can pick them up.
pub fn resolve_type(ctx: &CompilerContext, ty: &Type) -> Type {
    resolve_inner(ctx, ty, false)
}

fn resolve_inner(ctx: &CompilerContext, ty: &Type, in_pointee: bool) -> Type {
    match ty {
        Type::Unknown(name) => {
            if in_pointee {
                // Keep the interned name; it resolves through the tables.
                ty.clone()
            } else {
                ctx.named_type(name).unwrap_or_else(|| ty.clone())
            }
        }
        Type::GenericRef { base, args } => {
            let resolved_args: Vec<Type> =
                args.iter().map(|a| resolve_inner(ctx, a, false)).collect();
            let mangled = mangle_generic_name(base, &resolved_args);
            if ctx.named_type(&mangled).is_some() {
                if in_pointee {
                    Type::Unknown(mangled)
                } else {
                    ctx.named_type(&mangled).unwrap()
                }
            } else {
                Type::GenericRef {
                    base: base.clone(),
                    args: resolved_args,
                }
            }
        }
        Type::Array { base, size } => Type::Array {
            base: Box::new(resolve_inner(ctx, base, in_pointee)),
            size: *size,
        },
        Type::DynArray { base } => Type::DynArray {
            base: Box::new(resolve_inner(ctx, base, in_pointee)),
        },
        Type::Reference { inner, mode } => Type::Reference {
            inner: Box::new(resolve_inner(ctx, inner, in_pointee)),
            mode: *mode,
        },
        Type::Pointer { pointee } => Type::Pointer {
            pointee: Box::new(resolve_inner(ctx, pointee, true)),
        },
        Type::Iterator { element } => Type::Iterator {
            element: Box::new(resolve_inner(ctx, element, in_pointee)),
        },
        Type::Result { ok, err } => Type::Result {
            ok: Box::new(resolve_inner(ctx, ok, false)),
            err: Box::new(resolve_inner(ctx, err, false)),
        },
        // Builtins, concrete nominals and type parameters resolve to
        // themselves; parameters are the monomorphizer's job.
        _ => ty.clone(),
    }
}

/// Resolve and require a fully usable type: no unresolved generic refs, no
/// unknown names outside the tables, no leftover type parameters. Reports
/// CE0020 / CE0045 on failure.
pub fn resolve_or_report(
    ctx: &CompilerContext,
    reporter: &mut DiagnosticEngine,
    ty: &Type,
    span: &Span,
) -> Option<Type> {
    let resolved = resolve_type(ctx, ty);
    match first_unresolved(ctx, &resolved) {
        None => Some(resolved),
        Some(Unresolved::UnknownName(name)) => {
            reporter.emit_error(
                codes::CE0020,
                format!("unknown type `{}`", name),
                span.clone(),
            );
            None
        }
        Some(Unresolved::TypeParameter(name)) => {
            reporter.emit_error(
                codes::CE0045,
                format!("type parameter `{}` is not bound here", name),
                span.clone(),
            );
            None
        }
    }
}

enum Unresolved {
    UnknownName(String),
    TypeParameter(String),
}

/// Depth-first search for anything still unresolved, cycle-safe via a
/// visited set keyed by nominal name.
fn first_unresolved(ctx: &CompilerContext, ty: &Type) -> Option<Unresolved> {
    let mut visited = HashSet::new();
    find_unresolved(ctx, ty, &mut visited)
}

fn find_unresolved(
    ctx: &CompilerContext,
    ty: &Type,
    visited: &mut HashSet<String>,
) -> Option<Unresolved> {
    match ty {
        Type::Unknown(name) => {
            if ctx.named_type(name).is_some() {
                None
            } else {
                Some(Unresolved::UnknownName(name.clone()))
            }
        }
        Type::GenericRef { base, args } => {
            let mangled = mangle_generic_name(base, args);
            if ctx.named_type(&mangled).is_some() {
                None
            } else {
                Some(Unresolved::UnknownName(mangled))
            }
        }
        Type::TypeParam(name) => Some(Unresolved::TypeParameter(name.clone())),
        Type::Array { base, .. } | Type::DynArray { base } => {
            find_unresolved(ctx, base, visited)
        }
        Type::Reference { inner, .. } => find_unresolved(ctx, inner, visited),
        Type::Pointer { pointee } => find_unresolved(ctx, pointee, visited),
        Type::Iterator { element } => find_unresolved(ctx, element, visited),
        Type::Result { ok, err } => {
            find_unresolved(ctx, ok, visited).or_else(|| find_unresolved(ctx, err, visited))
        }
        Type::Struct(s) => {
            if !visited.insert(s.name.clone()) {
                return None;
            }
            s.fields
                .iter()
                .find_map(|(_, field_ty)| find_unresolved(ctx, field_ty, visited))
        }
        Type::Enum(e) => {
            if !visited.insert(e.name.clone()) {
                return None;
            }
            e.variants.iter().find_map(|v| {
                v.associated_types
                    .iter()
                    .find_map(|t| find_unresolved(ctx, t, visited))
            })
        }
        Type::Builtin(_) => None,
    }
}

/// The Resolve pass: surfaces unknown-name errors at declaration sites
/// before monomorphization runs. Generic templates are skipped — their
/// type parameters are legitimately unbound until instantiation.
pub struct Resolver<'a> {
    ctx: &'a CompilerContext,
    reporter: &'a mut DiagnosticEngine,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a mut CompilerContext, reporter: &'a mut DiagnosticEngine) -> Self {
        Self { ctx, reporter }
    }

    pub fn run(&mut self, program: &Program) {
        for item in &program.items {
            match item {
                Item::Struct(decl) if !decl.is_generic() => {
                    for field in &decl.fields {
                        self.check_declared(&field.ty, &field.span);
                    }
                }
                Item::Enum(decl) if !decl.is_generic() => {
                    for variant in &decl.variants {
                        for ty in &variant.associated_types {
                            self.check_declared(ty, &variant.span);
                        }
                    }
                }
                Item::Const(decl) => self.check_declared(&decl.ty, &decl.span),
                Item::Function(decl) if !decl.is_generic() => {
                    for param in &decl.params {
                        self.check_declared(&param.ty, &decl.span);
                    }
                    self.check_declared(&decl.return_type, &decl.span);
                    if let Some(err) = &decl.err_type {
                        self.check_declared(err, &decl.span);
                    }
                }
                _ => {}
            }
        }
    }

    fn check_declared(&mut self, ty: &Type, span: &Span) {
        // Only plain unknown names are checkable before monomorphization;
        // generic refs are instantiated by the next pass.
        if let Some(name) = first_plain_unknown(ty) {
            if self.ctx.named_type(&name).is_none() && !self.ctx.is_generic_base(&name) {
                self.reporter.emit_error(
                    codes::CE0020,
                    format!("unknown type `{}`", name),
                    span.clone(),
                );
            }
        }
    }
}

fn first_plain_unknown(ty: &Type) -> Option<String> {
    match ty {
        Type::Unknown(name) => Some(name.clone()),
        Type::Array { base, .. } | Type::DynArray { base } => first_plain_unknown(base),
        Type::Reference { inner, .. } => first_plain_unknown(inner),
        Type::Pointer { pointee } => first_plain_unknown(pointee),
        Type::Iterator { element } => first_plain_unknown(element),
        Type::Result { ok, err } => first_plain_unknown(ok).or_else(|| first_plain_unknown(err)),
        Type::GenericRef { args, .. } => args.iter().find_map(first_plain_unknown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantics::collect::Collector;
    use sushi_ast::{EnumType, EnumVariant, StructType};

    fn prepared_ctx() -> CompilerContext {
        let mut ctx = CompilerContext::new();
        let mut reporter = DiagnosticEngine::new("t.sushi");
        Collector::new(&mut ctx, &mut reporter).run(&Program::new("main"));
        ctx
    }

    #[test]
    fn unknown_resolves_to_registered_enum() {
        let ctx = prepared_ctx();
        let resolved = resolve_type(&ctx, &Type::Unknown("StdError".to_string()));
        assert!(matches!(resolved, Type::Enum(ref e) if e.name == "StdError"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let ctx = prepared_ctx();
        let once = resolve_type(&ctx, &Type::Unknown("FileMode".to_string()));
        let twice = resolve_type(&ctx, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn generic_ref_resolves_after_monomorph_installed() {
        let mut ctx = prepared_ctx();
        let maybe_ref = Type::generic_ref("Maybe", vec![Type::I32]);
        // Not installed yet: stays a generic ref with resolved args.
        assert!(matches!(
            resolve_type(&ctx, &maybe_ref),
            Type::GenericRef { .. }
        ));

        ctx.install_enum(EnumType::new(
            "Maybe<i32>",
            vec![
                EnumVariant::new("Some", vec![Type::I32]),
                EnumVariant::unit("None"),
            ],
        ));
        assert!(matches!(
            resolve_type(&ctx, &maybe_ref),
            Type::Enum(ref e) if e.name == "Maybe<i32>"
        ));
    }

    #[test]
    fn pointee_references_stay_interned() {
        let mut ctx = prepared_ctx();
        ctx.install_struct(StructType::new(
            "Node",
            vec![(
                "next".to_string(),
                Type::pointer(Type::Unknown("Node".to_string())),
            )],
        ));
        let resolved = resolve_type(&ctx, &Type::pointer(Type::Unknown("Node".to_string())));
        match resolved {
            Type::Pointer { pointee } => {
                assert!(matches!(*pointee, Type::Unknown(ref n) if n == "Node"))
            }
            other => panic!("expected pointer, got {other}"),
        }
    }

    #[test]
    fn unresolved_names_are_reported() {
        let ctx = prepared_ctx();
        let mut reporter = DiagnosticEngine::new("t.sushi");
        let missing = Type::Unknown("Ghost".to_string());
        assert!(
            resolve_or_report(&ctx, &mut reporter, &missing, &Span::synthetic()).is_none()
        );
        assert!(reporter.has_code(codes::CE0020));
    }

    #[test]
    fn leftover_type_parameters_are_reported() {
        let ctx = prepared_ctx();
        let mut reporter = DiagnosticEngine::new("t.sushi");
        let param = Type::dyn_array(Type::TypeParam("T".to_string()));
        assert!(resolve_or_report(&ctx, &mut reporter, &param, &Span::synthetic()).is_none());
        assert!(reporter.has_code(codes::CE0045));
    }

    #[test]
    fn cycle_safe_unresolved_search() {
        let mut ctx = prepared_ctx();
        // Node -> Own-style pointer back to Node; must terminate.
        ctx.install_struct(StructType::new(
            "Node",
            vec![
                ("value".to_string(), Type::I32),
                (
                    "next".to_string(),
                    Type::pointer(Type::Unknown("Node".to_string())),
                ),
            ],
        ));
        let mut reporter = DiagnosticEngine::new("t.sushi");
        let node = resolve_type(&ctx, &Type::Unknown("Node".to_string()));
        assert!(resolve_or_report(&ctx, &mut reporter, &node, &Span::synthetic()).is_some());
        assert!(!reporter.has_errors());
    }
}
