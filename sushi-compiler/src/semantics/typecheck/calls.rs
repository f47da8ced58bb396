//! Call and constructor validation: free function calls (with generic
//! instantiation fallback), the ambiguous `X.Y(args)` dot form, and enum /
//! struct constructors with expected-type propagation.

use super::TypeValidator;
use crate::semantics::monomorphize::Monomorphizer;
use crate::semantics::resolve::resolve_type;
use crate::semantics::typecheck::compat::compatible;
use sushi_ast::{
    ConstructorArg, EnumType, ExprKind, Expression, StructType, Type, Visibility,
};
use sushi_diagnostics::{codes, fuzzy, Span};

impl TypeValidator<'_> {
    /// Resolve the return type of a call for annotation purposes: Result
    /// sugar becomes its concrete enum once monomorphized.
    pub(crate) fn resolve_return(&self, ty: &Type) -> Type {
        if let Some(e) = self.result_enum_of(ty) {
            return Type::Enum(e);
        }
        resolve_type(self.ctx, ty)
    }

    /// Rewrite the ambiguous `X.Y(args)` form into an enum constructor, a
    /// builtin-generic constructor, or a method call on a variable.
    pub(crate) fn rewrite_dot_call(&mut self, expr: &mut Expression) {
        let ExprKind::DotCall { target, name, args } = &mut expr.kind else {
            return;
        };
        let target = target.clone();
        let name = name.clone();
        let args = std::mem::take(args);

        if self.ctx.enums.contains_key(&target) || self.ctx.generic_enums.contains_key(&target) {
            expr.kind = ExprKind::EnumConstructor {
                enum_name: target,
                variant: name,
                args,
                resolved_enum_type: None,
            };
            return;
        }

        // Builtin-generic construction: HashMap.new(), List.new(), Own.new(v)
        if self.ctx.generic_structs.contains_key(&target) {
            if name == "new" {
                expr.kind = ExprKind::StructConstructor {
                    name: target,
                    args: args.into_iter().map(ConstructorArg::positional).collect(),
                    resolved_struct_type: None,
                };
            } else {
                self.reporter.emit_error(
                    codes::CE2025,
                    format!("`{}` has no constructor `{}`", target, name),
                    expr.span.clone(),
                );
            }
            return;
        }

        if self.lookup_var(&target).is_some() || self.ctx.constants.contains_key(&target) {
            let mut receiver = Expression::name(target);
            receiver.span = expr.span.clone();
            expr.kind = ExprKind::MethodCall {
                receiver: Box::new(receiver),
                method: name,
                args,
                inferred_return_type: None,
                dispatch: None,
            };
            return;
        }

        self.reporter.emit_error(
            codes::CE2008,
            format!("cannot find `{}` in this scope", target),
            expr.span.clone(),
        );
    }

    pub(crate) fn validate_call(
        &mut self,
        expr: &mut Expression,
        expected: Option<&Type>,
    ) -> Option<Type> {
        let span = expr.span.clone();
        let ExprKind::Call { callee, .. } = &expr.kind else {
            unreachable!()
        };
        let callee_name = callee.clone();

        // A call whose callee names a struct is positional construction.
        if self.ctx.structs.contains_key(&callee_name) {
            let ExprKind::Call { args, .. } = &mut expr.kind else {
                unreachable!()
            };
            let args = std::mem::take(args);
            expr.kind = ExprKind::StructConstructor {
                name: callee_name,
                args: args.into_iter().map(ConstructorArg::positional).collect(),
                resolved_struct_type: None,
            };
            return self.validate_struct_constructor(expr, expected);
        }

        let sig = if let Some(sig) = self.ctx.functions.get(&callee_name) {
            sig.clone()
        } else if self.ctx.generic_functions.contains_key(&callee_name) {
            // Left generic by the monomorphizer (an argument it could not
            // quick-infer); instantiate now with validated argument types.
            let ExprKind::Call { args, .. } = &mut expr.kind else {
                unreachable!()
            };
            let mut args_owned = std::mem::take(args);
            let arg_types: Vec<Option<Type>> = args_owned
                .iter_mut()
                .map(|arg| self.validate_expression(arg, None))
                .collect();
            let mangled = Monomorphizer::new(self.ctx, self.reporter).instantiate_function(
                &callee_name,
                &arg_types,
                &span,
            );
            let ExprKind::Call { callee, args } = &mut expr.kind else {
                unreachable!()
            };
            *args = args_owned;
            let mangled = mangled?;
            *callee = mangled.clone();
            let sig = self.ctx.functions.get(&mangled)?.clone();
            // Arguments were validated above; check them against the
            // substituted parameters and return.
            let ExprKind::Call { args, .. } = &expr.kind else {
                unreachable!()
            };
            for ((arg, arg_ty), param) in
                args.iter().zip(arg_types).zip(sig.params.iter())
            {
                let (Some(arg_ty), param_ty) =
                    (arg_ty, resolve_type(self.ctx, &param.ty))
                else {
                    continue;
                };
                if !compatible(self.ctx, &arg_ty, &param_ty) {
                    self.reporter.emit_error(
                        codes::CE2006,
                        format!("expected `{}`, found `{}`", param_ty, arg_ty),
                        arg.span.clone(),
                    );
                }
            }
            return Some(self.resolve_return(&sig.return_type));
        } else {
            let candidates = self.ctx.function_names();
            let mut diag = sushi_diagnostics::Diagnostic::error(
                codes::CE2008,
                format!("cannot find function `{}`", callee_name),
                span.clone(),
            );
            let suggestions = fuzzy::suggest(&callee_name, &candidates);
            if !suggestions.is_empty() {
                diag = diag.with_help(format!("did you mean `{}`?", suggestions.join("`, `")));
            }
            self.reporter.emit(diag);
            return None;
        };

        // Cross-unit visibility: private functions are callable only from
        // their own unit. Stdlib and monomorphized bodies are unit-less.
        if sig.visibility == Visibility::Private
            && !sig.is_stdlib
            && !sig.unit.is_empty()
            && sig.unit != self.current_unit
        {
            self.reporter.emit_error(
                codes::CE2008,
                format!(
                    "function `{}` is private to unit `{}`",
                    callee_name, sig.unit
                ),
                span.clone(),
            );
            return None;
        }

        let ExprKind::Call { args, .. } = &mut expr.kind else {
            unreachable!()
        };
        let mut args_owned = std::mem::take(args);

        if args_owned.len() != sig.params.len() {
            self.reporter.emit_error(
                codes::CE2009,
                format!(
                    "`{}` takes {} argument{} but {} {} supplied",
                    callee_name,
                    sig.params.len(),
                    if sig.params.len() == 1 { "" } else { "s" },
                    args_owned.len(),
                    if args_owned.len() == 1 { "was" } else { "were" }
                ),
                span.clone(),
            );
        }

        for (arg, param) in args_owned.iter_mut().zip(sig.params.iter()) {
            let param_ty = resolve_type(self.ctx, &param.ty);
            self.propagate_expected(arg, &param_ty);
            if let Some(arg_ty) = self.validate_expression(arg, Some(&param_ty)) {
                if !compatible(self.ctx, &arg_ty, &param_ty) {
                    self.reporter.emit_error(
                        codes::CE2006,
                        format!("expected `{}`, found `{}`", param_ty, arg_ty),
                        arg.span.clone(),
                    );
                }
            }
        }

        let ExprKind::Call { args, .. } = &mut expr.kind else {
            unreachable!()
        };
        *args = args_owned;

        Some(self.resolve_return(&sig.return_type))
    }

    pub(crate) fn validate_enum_constructor(
        &mut self,
        expr: &mut Expression,
        expected: Option<&Type>,
    ) -> Option<Type> {
        let span = expr.span.clone();
        let ExprKind::EnumConstructor {
            enum_name,
            variant,
            resolved_enum_type,
            ..
        } = &expr.kind
        else {
            unreachable!()
        };
        let enum_name = enum_name.clone();
        let variant_name = variant.clone();
        let preset = resolved_enum_type.clone();

        let resolved = match preset {
            Some(e) => Some(e),
            None => self.resolve_constructor_enum(expr, &enum_name, &variant_name, expected, &span),
        };
        let Some(enum_ty) = resolved else {
            return None;
        };

        let Some(variant) = enum_ty.variant(&variant_name).cloned() else {
            self.reporter.emit_error(
                codes::CE2045,
                format!("enum `{}` has no variant `{}`", enum_ty.name, variant_name),
                span,
            );
            return None;
        };

        let ExprKind::EnumConstructor {
            args,
            resolved_enum_type,
            ..
        } = &mut expr.kind
        else {
            unreachable!()
        };
        *resolved_enum_type = Some(enum_ty.clone());
        let mut args_owned = std::mem::take(args);

        // `Result.Ok()` with no argument is how a blank success returns.
        let blank_payload = variant.associated_types.len() == 1
            && resolve_type(self.ctx, &variant.associated_types[0]).is_blank();
        if blank_payload && args_owned.is_empty() {
            let ExprKind::EnumConstructor { args, .. } = &mut expr.kind else {
                unreachable!()
            };
            *args = args_owned;
            return Some(Type::Enum(enum_ty));
        }

        if args_owned.len() != variant.associated_types.len() {
            self.reporter.emit_error(
                codes::CE2050,
                format!(
                    "variant `{}.{}` carries {} value{} but {} {} supplied",
                    enum_ty.name,
                    variant_name,
                    variant.associated_types.len(),
                    if variant.associated_types.len() == 1 { "" } else { "s" },
                    args_owned.len(),
                    if args_owned.len() == 1 { "was" } else { "were" }
                ),
                span.clone(),
            );
        }

        for (arg, slot_ty) in args_owned.iter_mut().zip(&variant.associated_types) {
            let slot_ty = resolve_type(self.ctx, slot_ty);
            // Nested generic constructors see their expected type before
            // they are validated.
            self.propagate_expected(arg, &slot_ty);
            if let Some(arg_ty) = self.validate_expression(arg, Some(&slot_ty)) {
                if !compatible(self.ctx, &arg_ty, &slot_ty) {
                    self.reporter.emit_error(
                        codes::CE2006,
                        format!("expected `{}`, found `{}`", slot_ty, arg_ty),
                        arg.span.clone(),
                    );
                }
            }
        }

        let ExprKind::EnumConstructor { args, .. } = &mut expr.kind else {
            unreachable!()
        };
        *args = args_owned;

        Some(Type::Enum(enum_ty))
    }

    /// Resolve which concrete enum a constructor targets: concrete name,
    /// the propagated/expected monomorph, or single-parameter inference
    /// from the argument (`Maybe.Some(5)`).
    fn resolve_constructor_enum(
        &mut self,
        expr: &mut Expression,
        enum_name: &str,
        variant_name: &str,
        expected: Option<&Type>,
        span: &Span,
    ) -> Option<EnumType> {
        if let Some(concrete) = self.ctx.enums.get(enum_name) {
            return Some(concrete.clone());
        }

        let Some(template) = self.ctx.generic_enums.get(enum_name).cloned() else {
            self.reporter.emit_error(
                codes::CE2001,
                format!("unknown enum `{}`", enum_name),
                span.clone(),
            );
            return None;
        };

        if let Some(expected) = expected {
            let expected = resolve_type(self.ctx, expected);
            if let Some(e) = expected.as_enum() {
                if e.is_monomorph_of(enum_name) {
                    return Some(e.clone());
                }
            }
            if enum_name == "Result" {
                if let Some(e) = self.result_enum_of(&expected) {
                    return Some(e);
                }
            }
        }

        // Single-parameter template whose named variant carries exactly the
        // parameter: infer it from the argument.
        if template.type_params.len() == 1 {
            let param_name = template.type_params[0].name.clone();
            let carries_param = template.variants.iter().any(|v| {
                v.name == variant_name
                    && v.associated_types.len() == 1
                    && v.associated_types[0] == Type::TypeParam(param_name.clone())
            });
            if carries_param {
                let ExprKind::EnumConstructor { args, .. } = &mut expr.kind else {
                    unreachable!()
                };
                let mut args_owned = std::mem::take(args);
                let inferred = args_owned
                    .first_mut()
                    .and_then(|arg| self.validate_expression(arg, None));
                let ExprKind::EnumConstructor { args, .. } = &mut expr.kind else {
                    unreachable!()
                };
                *args = args_owned;
                if let Some(arg_ty) = inferred {
                    let concrete = Monomorphizer::new(self.ctx, self.reporter)
                        .ensure_instantiated(enum_name, &[arg_ty], span, 0);
                    if let Some(Type::Enum(e)) = concrete {
                        return Some(e);
                    }
                }
            }
        }

        self.reporter.emit_error(
            codes::CE2001,
            format!(
                "cannot infer the type arguments of `{}.{}`; annotate the surrounding \
                 declaration",
                enum_name, variant_name
            ),
            span.clone(),
        );
        None
    }

    pub(crate) fn validate_struct_constructor(
        &mut self,
        expr: &mut Expression,
        expected: Option<&Type>,
    ) -> Option<Type> {
        let span = expr.span.clone();
        let ExprKind::StructConstructor {
            name,
            resolved_struct_type,
            ..
        } = &expr.kind
        else {
            unreachable!()
        };
        let name = name.clone();
        let preset = resolved_struct_type.clone();

        let resolved = match preset {
            Some(s) => Some(s),
            None => self.resolve_constructor_struct(expr, &name, expected, &span),
        };
        let Some(struct_ty) = resolved else {
            return None;
        };

        let ExprKind::StructConstructor {
            args,
            resolved_struct_type,
            ..
        } = &mut expr.kind
        else {
            unreachable!()
        };
        *resolved_struct_type = Some(struct_ty.clone());
        let mut args_owned = std::mem::take(args);

        // Builtin heap generics construct through methods, not fields.
        match struct_ty.generic_base.as_deref() {
            Some("Own") => {
                let inner = struct_ty
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(Type::BLANK);
                if args_owned.len() != 1 {
                    self.reporter.emit_error(
                        codes::CE2050,
                        format!("`Own.new` takes 1 argument but {} were supplied", args_owned.len()),
                        span.clone(),
                    );
                }
                for arg in &mut args_owned {
                    self.propagate_expected(&mut arg.value, &inner);
                    if let Some(arg_ty) = self.validate_expression(&mut arg.value, Some(&inner)) {
                        if !compatible(self.ctx, &arg_ty, &inner) {
                            self.reporter.emit_error(
                                codes::CE2006,
                                format!("expected `{}`, found `{}`", inner, arg_ty),
                                arg.value.span.clone(),
                            );
                        }
                    }
                }
                let ExprKind::StructConstructor { args, .. } = &mut expr.kind else {
                    unreachable!()
                };
                *args = args_owned;
                return Some(Type::Struct(struct_ty));
            }
            Some("HashMap") | Some("List") => {
                if !args_owned.is_empty() {
                    self.reporter.emit_error(
                        codes::CE2050,
                        format!("`{}.new` takes no arguments", struct_ty.generic_base.as_deref().unwrap_or("")),
                        span.clone(),
                    );
                }
                let ExprKind::StructConstructor { args, .. } = &mut expr.kind else {
                    unreachable!()
                };
                *args = args_owned;
                return Some(Type::Struct(struct_ty));
            }
            _ => {}
        }

        if args_owned.len() != struct_ty.fields.len() {
            self.reporter.emit_error(
                codes::CE2050,
                format!(
                    "`{}` has {} field{} but {} {} supplied",
                    struct_ty.name,
                    struct_ty.fields.len(),
                    if struct_ty.fields.len() == 1 { "" } else { "s" },
                    args_owned.len(),
                    if args_owned.len() == 1 { "was" } else { "were" }
                ),
                span.clone(),
            );
        }

        for (index, arg) in args_owned.iter_mut().enumerate() {
            let field = match &arg.name {
                Some(field_name) => struct_ty
                    .fields
                    .iter()
                    .find(|(name, _)| name == field_name)
                    .cloned(),
                None => struct_ty.fields.get(index).cloned(),
            };
            let Some((field_name, field_ty)) = field else {
                self.reporter.emit_error(
                    codes::CE2050,
                    format!(
                        "`{}` has no field `{}`",
                        struct_ty.name,
                        arg.name.as_deref().unwrap_or("<positional>")
                    ),
                    arg.value.span.clone(),
                );
                continue;
            };
            let field_ty = resolve_type(self.ctx, &field_ty);
            self.propagate_expected(&mut arg.value, &field_ty);
            if let Some(arg_ty) = self.validate_expression(&mut arg.value, Some(&field_ty)) {
                if !compatible(self.ctx, &arg_ty, &field_ty) {
                    self.reporter.emit_error(
                        codes::CE2006,
                        format!(
                            "field `{}` expects `{}`, found `{}`",
                            field_name, field_ty, arg_ty
                        ),
                        arg.value.span.clone(),
                    );
                }
            }
        }

        let ExprKind::StructConstructor { args, .. } = &mut expr.kind else {
            unreachable!()
        };
        *args = args_owned;

        Some(Type::Struct(struct_ty))
    }

    fn resolve_constructor_struct(
        &mut self,
        expr: &mut Expression,
        name: &str,
        expected: Option<&Type>,
        span: &Span,
    ) -> Option<StructType> {
        if let Some(concrete) = self.ctx.structs.get(name) {
            return Some(concrete.clone());
        }

        if !self.ctx.generic_structs.contains_key(name) {
            self.reporter.emit_error(
                codes::CE2001,
                format!("unknown struct `{}`", name),
                span.clone(),
            );
            return None;
        }

        if let Some(expected) = expected {
            let expected = resolve_type(self.ctx, expected);
            if let Some(s) = expected.as_struct() {
                if s.is_monomorph_of(name) {
                    return Some(s.clone());
                }
            }
        }

        // Own.new(v) infers T from its argument.
        if name == "Own" {
            let ExprKind::StructConstructor { args, .. } = &mut expr.kind else {
                unreachable!()
            };
            let mut args_owned = std::mem::take(args);
            let inferred = args_owned
                .first_mut()
                .and_then(|arg| self.validate_expression(&mut arg.value, None));
            let ExprKind::StructConstructor { args, .. } = &mut expr.kind else {
                unreachable!()
            };
            *args = args_owned;
            if let Some(arg_ty) = inferred {
                let concrete = Monomorphizer::new(self.ctx, self.reporter).ensure_instantiated(
                    "Own",
                    &[arg_ty],
                    span,
                    0,
                );
                if let Some(Type::Struct(s)) = concrete {
                    return Some(s);
                }
            }
        }

        self.reporter.emit_error(
            codes::CE2001,
            format!(
                "cannot infer the type arguments of `{}.new`; annotate the surrounding \
                 declaration",
                name
            ),
            span.clone(),
        );
        None
    }
}
