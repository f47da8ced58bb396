//! Method-call dispatch. Priority order: builtin primitive
//! methods → builtin methods on generic instantiations / arrays / strings /
//! file handles → perk methods → auto-derived hash → user extension
//! methods → generic extension methods.

use super::TypeValidator;
use crate::context::PerkImpl;
use crate::semantics::monomorphize::Monomorphizer;
use crate::semantics::resolve::resolve_type;
use crate::semantics::typecheck::compat::compatible;
use crate::semantics::wrapped_return_type;
use sushi_ast::{
    BuiltinKind, ExprKind, Expression, MethodDispatch, Type,
};
use sushi_diagnostics::{codes, Span};

/// A resolved method: parameter types (receiver excluded), return type,
/// and the dispatch route the emitter should take.
struct ResolvedMethod {
    params: Vec<Type>,
    ret: Type,
    dispatch: MethodDispatch,
}

impl TypeValidator<'_> {
    pub(crate) fn validate_method_call(&mut self, expr: &mut Expression) -> Option<Type> {
        let span = expr.span.clone();
        let ExprKind::MethodCall {
            receiver, method, ..
        } = &mut expr.kind
        else {
            unreachable!()
        };
        let method_name = method.clone();
        let mut receiver_owned = std::mem::replace(
            receiver,
            Box::new(Expression::boolean(false)),
        );
        let receiver_ty = self.validate_expression(&mut receiver_owned, None);

        let resolved = receiver_ty.as_ref().and_then(|ty| {
            let mut bare = resolve_type(self.ctx, ty.unwrap_reference());
            // Result sugar dispatches like its concrete enum.
            if let Some(e) = self.result_enum_of(&bare) {
                bare = Type::Enum(e);
            }
            self.resolve_method(&bare, &method_name, &span)
        });

        // `.destroy()` consumes the receiver variable.
        if method_name == "destroy" {
            if let ExprKind::Name(name) = &receiver_owned.kind {
                self.destroyed.insert(name.clone());
            }
        }

        let ExprKind::MethodCall {
            receiver,
            args,
            inferred_return_type,
            dispatch,
            ..
        } = &mut expr.kind
        else {
            unreachable!()
        };
        *receiver = receiver_owned;
        let mut args_owned = std::mem::take(args);

        let Some(resolved) = resolved else {
            if let Some(ty) = receiver_ty {
                self.reporter.emit_error(
                    codes::CE2025,
                    format!("no method `{}` on `{}`", method_name, ty),
                    span,
                );
            }
            let ExprKind::MethodCall { args, .. } = &mut expr.kind else {
                unreachable!()
            };
            *args = args_owned;
            return None;
        };

        *inferred_return_type = Some(resolved.ret.clone());
        *dispatch = Some(resolved.dispatch.clone());

        if args_owned.len() != resolved.params.len() {
            self.reporter.emit_error(
                codes::CE2009,
                format!(
                    "`.{}` takes {} argument{} but {} {} supplied",
                    method_name,
                    resolved.params.len(),
                    if resolved.params.len() == 1 { "" } else { "s" },
                    args_owned.len(),
                    if args_owned.len() == 1 { "was" } else { "were" }
                ),
                span.clone(),
            );
        }

        for (arg, param_ty) in args_owned.iter_mut().zip(&resolved.params) {
            let param_ty = resolve_type(self.ctx, param_ty);
            self.propagate_expected(arg, &param_ty);
            if let Some(arg_ty) = self.validate_expression(arg, Some(&param_ty)) {
                if !compatible(self.ctx, &arg_ty, &param_ty) {
                    self.reporter.emit_error(
                        codes::CE2023,
                        format!("expected `{}`, found `{}`", param_ty, arg_ty),
                        arg.span.clone(),
                    );
                }
            }
        }

        let ExprKind::MethodCall { args, .. } = &mut expr.kind else {
            unreachable!()
        };
        *args = args_owned;

        Some(resolved.ret)
    }

    fn resolve_method(
        &mut self,
        receiver: &Type,
        method: &str,
        span: &Span,
    ) -> Option<ResolvedMethod> {
        if let Some(found) = self.builtin_method(receiver, method, span) {
            return Some(found);
        }
        if let Some(found) = self.perk_method(receiver, method) {
            return Some(found);
        }
        if let Some(found) = self.auto_hash_method(receiver, method) {
            return Some(found);
        }
        if let Some(found) = self.extension_method(receiver, method) {
            return Some(found);
        }
        self.generic_extension_method(receiver, method, span)
    }

    /// Instantiated `Maybe<inner>` as a concrete enum type.
    fn maybe_of(&mut self, inner: Type, span: &Span) -> Type {
        Monomorphizer::new(self.ctx, self.reporter)
            .ensure_instantiated("Maybe", &[inner.clone()], span, 0)
            .unwrap_or_else(|| Type::generic_ref("Maybe", vec![inner]))
    }

    fn builtin_method(
        &mut self,
        receiver: &Type,
        method: &str,
        span: &Span,
    ) -> Option<ResolvedMethod> {
        let builtin = |params: Vec<Type>, ret: Type| {
            Some(ResolvedMethod {
                params,
                ret,
                dispatch: MethodDispatch::BuiltinGeneric,
            })
        };
        let primitive = |params: Vec<Type>, ret: Type| {
            Some(ResolvedMethod {
                params,
                ret,
                dispatch: MethodDispatch::BuiltinPrimitive,
            })
        };

        match receiver {
            Type::Builtin(BuiltinKind::String) => match method {
                // len() counts UTF-8 characters; size() counts bytes.
                "len" => primitive(vec![], Type::I32),
                "size" => primitive(vec![], Type::I32),
                "is_empty" => primitive(vec![], Type::BOOL),
                "find" => {
                    let ret = self.maybe_of(Type::I32, span);
                    primitive(vec![Type::STRING], ret)
                }
                "substring" => primitive(vec![Type::I32, Type::I32], Type::STRING),
                _ => None,
            },

            Type::Builtin(BuiltinKind::Stdin) => match method {
                "read_line" => builtin(vec![], Type::STRING),
                "lines" => builtin(vec![], Type::iterator(Type::STRING)),
                _ => None,
            },
            Type::Builtin(BuiltinKind::Stdout) | Type::Builtin(BuiltinKind::Stderr) => {
                match method {
                    "write" => builtin(vec![Type::STRING], Type::BLANK),
                    _ => None,
                }
            }
            Type::Builtin(BuiltinKind::File) => match method {
                "read_all" => builtin(vec![], Type::STRING),
                "write" => builtin(vec![Type::STRING], Type::BLANK),
                "close" => builtin(vec![], Type::BLANK),
                "lines" => builtin(vec![], Type::iterator(Type::STRING)),
                "seek" => builtin(
                    vec![Type::Unknown("SeekFrom".to_string()), Type::I32],
                    Type::BLANK,
                ),
                _ => None,
            },

            Type::Enum(e) if e.is_result_shaped() => {
                let ok_ty = e.variants[0]
                    .associated_types
                    .first()
                    .cloned()
                    .unwrap_or(Type::BLANK);
                let err_ty = e.variants[1]
                    .associated_types
                    .first()
                    .cloned()
                    .unwrap_or(Type::BLANK);
                match method {
                    "is_ok" => builtin(vec![], Type::BOOL),
                    "is_err" => builtin(vec![], Type::BOOL),
                    "realise" => {
                        let ok_ty = resolve_type(self.ctx, &ok_ty);
                        builtin(vec![ok_ty.clone()], ok_ty)
                    }
                    "expect" => {
                        let ok_ty = resolve_type(self.ctx, &ok_ty);
                        builtin(vec![Type::STRING], ok_ty)
                    }
                    "err" => {
                        let err_ty = resolve_type(self.ctx, &err_ty);
                        let ret = self.maybe_of(err_ty, span);
                        builtin(vec![], ret)
                    }
                    _ => None,
                }
            }

            Type::Enum(e) if e.is_maybe_shaped() => {
                let some_ty = e.variants[0]
                    .associated_types
                    .first()
                    .cloned()
                    .unwrap_or(Type::BLANK);
                match method {
                    "is_some" => builtin(vec![], Type::BOOL),
                    "is_none" => builtin(vec![], Type::BOOL),
                    "realise" => {
                        let some_ty = resolve_type(self.ctx, &some_ty);
                        builtin(vec![some_ty.clone()], some_ty)
                    }
                    "expect" => {
                        let some_ty = resolve_type(self.ctx, &some_ty);
                        builtin(vec![Type::STRING], some_ty)
                    }
                    _ => None,
                }
            }

            Type::Struct(s) if s.is_monomorph_of("Own") => {
                let inner = s
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(Type::BLANK);
                let inner = resolve_type(self.ctx, &inner);
                match method {
                    "get" => builtin(vec![], inner),
                    "destroy" => builtin(vec![], Type::BLANK),
                    _ => None,
                }
            }

            Type::Struct(s) if s.is_monomorph_of("HashMap") => {
                let args = s.generic_args.clone().unwrap_or_default();
                let key_ty = resolve_type(self.ctx, args.first().unwrap_or(&Type::BLANK));
                let value_ty = resolve_type(self.ctx, args.get(1).unwrap_or(&Type::BLANK));
                match method {
                    "insert" => builtin(vec![key_ty, value_ty], Type::BLANK),
                    "get" => {
                        let ret = self.maybe_of(value_ty, span);
                        builtin(vec![key_ty], ret)
                    }
                    "remove" => builtin(vec![key_ty], Type::BLANK),
                    "size" => builtin(vec![], Type::I32),
                    "clear" => builtin(vec![], Type::BLANK),
                    "keys" => builtin(vec![], Type::iterator(key_ty)),
                    "values" => builtin(vec![], Type::iterator(value_ty)),
                    "entries" => {
                        let entry = self
                            .ctx
                            .named_type(&sushi_ast::mangle_generic_name(
                                "Entry",
                                &[key_ty, value_ty],
                            ))?
                            .clone();
                        builtin(vec![], Type::iterator(entry))
                    }
                    "destroy" => builtin(vec![], Type::BLANK),
                    _ => None,
                }
            }

            Type::Struct(s) if s.is_monomorph_of("List") => {
                let inner = s
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(Type::BLANK);
                let inner = resolve_type(self.ctx, &inner);
                match method {
                    "push" => builtin(vec![inner], Type::BLANK),
                    "pop" => {
                        let ret = self.maybe_of(inner, span);
                        builtin(vec![], ret)
                    }
                    "get" => {
                        let ret = self.maybe_of(inner, span);
                        builtin(vec![Type::I32], ret)
                    }
                    "len" => builtin(vec![], Type::I32),
                    "reserve" => builtin(vec![Type::I32], Type::BLANK),
                    "shrink_to_fit" => builtin(vec![], Type::BLANK),
                    "clear" => builtin(vec![], Type::BLANK),
                    "iter" => builtin(vec![], Type::iterator(inner)),
                    "destroy" => builtin(vec![], Type::BLANK),
                    _ => None,
                }
            }

            Type::DynArray { base } => {
                let base = resolve_type(self.ctx, base);
                match method {
                    "push" => builtin(vec![base], Type::BLANK),
                    "pop" => {
                        let ret = self.maybe_of(base, span);
                        builtin(vec![], ret)
                    }
                    "get" => {
                        let ret = self.maybe_of(base, span);
                        builtin(vec![Type::I32], ret)
                    }
                    "len" => builtin(vec![], Type::I32),
                    "iter" => builtin(vec![], Type::iterator(base)),
                    "fill" => builtin(vec![base], Type::BLANK),
                    "reverse" => builtin(vec![], Type::BLANK),
                    "destroy" => builtin(vec![], Type::BLANK),
                    _ => None,
                }
            }

            Type::Array { base, .. } => {
                let base = resolve_type(self.ctx, base);
                match method {
                    "len" => builtin(vec![], Type::I32),
                    "get" => {
                        let ret = self.maybe_of(base, span);
                        builtin(vec![Type::I32], ret)
                    }
                    "iter" => builtin(vec![], Type::iterator(base)),
                    "fill" => builtin(vec![base], Type::BLANK),
                    "reverse" => builtin(vec![], Type::BLANK),
                    _ => None,
                }
            }

            _ => None,
        }
    }

    fn perk_method(&mut self, receiver: &Type, method: &str) -> Option<ResolvedMethod> {
        let receiver_key = receiver.to_string();
        let perk_name = self
            .ctx
            .perk_impls
            .iter()
            .find_map(|((ty_name, perk), imp)| {
                if ty_name != &receiver_key {
                    return None;
                }
                let has_method = match imp {
                    PerkImpl::Explicit(methods) => methods.iter().any(|m| m.name == method),
                    PerkImpl::AutoDerived => false,
                };
                has_method.then(|| perk.clone())
            })?;

        let imp = self
            .ctx
            .perk_impls
            .get(&(receiver_key, perk_name.clone()))?;
        let PerkImpl::Explicit(methods) = imp else {
            return None;
        };
        let decl = methods.iter().find(|m| m.name == method)?.clone();
        let params = decl.params.iter().skip(1).map(|p| p.ty.clone()).collect();
        let ret = self.resolve_return(&wrapped_return_type(&decl));
        Some(ResolvedMethod {
            params,
            ret,
            dispatch: MethodDispatch::Perk(perk_name),
        })
    }

    fn auto_hash_method(&self, receiver: &Type, method: &str) -> Option<ResolvedMethod> {
        if method != "hash" {
            return None;
        }
        match receiver {
            Type::Struct(_) | Type::Enum(_) => Some(ResolvedMethod {
                params: vec![],
                ret: Type::U64,
                dispatch: MethodDispatch::AutoHash,
            }),
            Type::Builtin(kind)
                if kind.is_integer()
                    || *kind == BuiltinKind::Bool
                    || *kind == BuiltinKind::String =>
            {
                Some(ResolvedMethod {
                    params: vec![],
                    ret: Type::U64,
                    dispatch: MethodDispatch::AutoHash,
                })
            }
            _ => None,
        }
    }

    fn extension_method(&mut self, receiver: &Type, method: &str) -> Option<ResolvedMethod> {
        let entry = self
            .ctx
            .extensions
            .get(&receiver.to_string())
            .and_then(|methods| methods.get(method))?
            .clone();
        let params = entry
            .decl
            .params
            .iter()
            .skip(1)
            .map(|p| p.ty.clone())
            .collect();
        let ret = self.resolve_return(&wrapped_return_type(&entry.decl));
        Some(ResolvedMethod {
            params,
            ret,
            dispatch: MethodDispatch::Extension(entry.symbol),
        })
    }

    fn generic_extension_method(
        &mut self,
        receiver: &Type,
        method: &str,
        span: &Span,
    ) -> Option<ResolvedMethod> {
        let base = match receiver {
            Type::Struct(s) => s.generic_base.clone()?,
            Type::Enum(e) => e.generic_base.clone()?,
            _ => return None,
        };
        let entry = Monomorphizer::new(self.ctx, self.reporter).instantiate_generic_extension(
            &base, receiver, method, span,
        )?;
        let params = entry
            .decl
            .params
            .iter()
            .skip(1)
            .map(|p| p.ty.clone())
            .collect();
        let ret = self.resolve_return(&wrapped_return_type(&entry.decl));
        Some(ResolvedMethod {
            params,
            ret,
            dispatch: MethodDispatch::Extension(entry.symbol),
        })
    }
}
