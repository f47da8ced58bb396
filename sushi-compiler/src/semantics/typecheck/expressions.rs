//! Expression validation and type inference. Every successfully validated
//! expression gets its `ty` annotation written; a `None` return means an
//! error was already reported and downstream checks should skip.

use super::TypeValidator;
use crate::semantics::const_eval::int_fits;
use crate::semantics::resolve::{resolve_or_report, resolve_type};
use crate::semantics::typecheck::compat::compatible;
use sushi_ast::{
    BinaryOp, BuiltinKind, ExprKind, Expression, InterpolationPart, Type, UnaryOp,
};
use sushi_diagnostics::{codes, fuzzy};

impl TypeValidator<'_> {
    pub(crate) fn validate_expression(
        &mut self,
        expr: &mut Expression,
        expected: Option<&Type>,
    ) -> Option<Type> {
        let span = expr.span.clone();
        let ty = match &mut expr.kind {
            ExprKind::IntLiteral(value) => {
                let value = *value;
                let kind = match expected {
                    Some(t) if t.is_integer() => t.builtin().unwrap(),
                    _ => BuiltinKind::I32,
                };
                if !int_fits(value, kind) {
                    self.reporter.emit_error(
                        codes::CE2012,
                        format!("integer literal `{}` does not fit in `{}`", value, kind),
                        span.clone(),
                    );
                    return None;
                }
                Some(Type::Builtin(kind))
            }
            ExprKind::FloatLiteral(_) => {
                let kind = match expected {
                    Some(t) if t.is_float() => t.builtin().unwrap(),
                    _ => BuiltinKind::F64,
                };
                Some(Type::Builtin(kind))
            }
            ExprKind::BoolLiteral(_) => Some(Type::BOOL),
            ExprKind::StringLiteral(_) => Some(Type::STRING),

            ExprKind::InterpolatedString(parts) => {
                let mut parts = std::mem::take(parts);
                for part in &mut parts {
                    if let InterpolationPart::Expr(e) = part {
                        if let Some(part_ty) = self.validate_expression(e, None) {
                            if self.is_result_shaped(&part_ty) {
                                self.reporter.emit_error(
                                    codes::CE2037,
                                    "cannot interpolate a `Result`; unwrap it first".to_string(),
                                    e.span.clone(),
                                );
                            } else if !self.is_stringifiable(&part_ty) {
                                self.reporter.emit_error(
                                    codes::CE2055,
                                    format!(
                                        "`{}` cannot be interpolated into a string",
                                        part_ty
                                    ),
                                    e.span.clone(),
                                );
                            }
                        }
                    }
                }
                if let ExprKind::InterpolatedString(slot) = &mut expr.kind {
                    *slot = parts;
                }
                Some(Type::STRING)
            }

            ExprKind::Name(name) => {
                let name = name.clone();
                if self.destroyed.contains(&name) {
                    self.reporter.emit_error(
                        codes::CE2024,
                        format!("`{}` was destroyed and cannot be used", name),
                        span.clone(),
                    );
                    return None;
                }
                if let Some(ty) = self.lookup_var(&name) {
                    Some(ty.clone())
                } else if let Some(info) = self.ctx.constants.get(&name) {
                    Some(resolve_type(self.ctx, &info.ty))
                } else {
                    let candidates = self.visible_names();
                    let mut diag = sushi_diagnostics::Diagnostic::error(
                        codes::CE2008,
                        format!("cannot find `{}` in this scope", name),
                        span.clone(),
                    );
                    let suggestions = fuzzy::suggest(&name, &candidates);
                    if !suggestions.is_empty() {
                        diag = diag
                            .with_help(format!("did you mean `{}`?", suggestions.join("`, `")));
                    }
                    self.reporter.emit(diag);
                    return None;
                }
            }

            ExprKind::Binary { .. } => self.validate_binary(expr)?.into(),
            ExprKind::Unary { .. } => {
                let ExprKind::Unary { op, expr: inner } = &mut expr.kind else {
                    unreachable!()
                };
                let op = *op;
                let inner_ty = self.validate_expression(inner, expected)?;
                match op {
                    UnaryOp::Neg => {
                        if !inner_ty.is_numeric() {
                            self.reporter.emit_error(
                                codes::CE2006,
                                format!("cannot negate `{}`", inner_ty),
                                span.clone(),
                            );
                            return None;
                        }
                        Some(inner_ty)
                    }
                    UnaryOp::Not => {
                        if !inner_ty.is_bool() {
                            self.reporter.emit_error(
                                codes::CE2006,
                                format!("`not` needs a `bool`, found `{}`", inner_ty),
                                span.clone(),
                            );
                            return None;
                        }
                        Some(Type::BOOL)
                    }
                }
            }

            ExprKind::Call { .. } => self.validate_call(expr, expected)?.into(),
            ExprKind::DotCall { .. } => {
                self.rewrite_dot_call(expr);
                // Rewriting produced a constructor or a method call; fall
                // through to those paths unless it failed.
                if matches!(expr.kind, ExprKind::DotCall { .. }) {
                    return None;
                }
                return self.validate_expression(expr, expected);
            }
            ExprKind::MethodCall { .. } => self.validate_method_call(expr)?.into(),
            ExprKind::EnumConstructor { .. } => {
                self.validate_enum_constructor(expr, expected)?.into()
            }
            ExprKind::StructConstructor { .. } => {
                self.validate_struct_constructor(expr, expected)?.into()
            }

            ExprKind::MemberAccess { object, field } => {
                let field = field.clone();
                let object_ty = self.validate_expression(object, None)?;
                let Some(struct_ty) = object_ty.as_struct() else {
                    self.reporter.emit_error(
                        codes::CE2008,
                        format!("`{}` has no fields", object_ty),
                        span.clone(),
                    );
                    return None;
                };
                let Some(field_ty) = struct_ty.field_type(&field) else {
                    self.reporter.emit_error(
                        codes::CE2008,
                        format!("no field `{}` on `{}`", field, struct_ty.name),
                        span.clone(),
                    );
                    return None;
                };
                Some(resolve_type(self.ctx, field_ty))
            }

            ExprKind::IndexAccess { object, index } => {
                let object_ty = self.validate_expression(object, None)?;
                let index_ty = self.validate_expression(index, Some(&Type::I32));
                if let Some(index_ty) = index_ty {
                    if !index_ty.is_integer() {
                        self.reporter.emit_error(
                            codes::CE2006,
                            format!("array index must be an integer, found `{}`", index_ty),
                            span.clone(),
                        );
                    }
                }
                match object_ty.unwrap_reference() {
                    Type::Array { base, .. } | Type::DynArray { base } => {
                        Some(resolve_type(self.ctx, base))
                    }
                    Type::Builtin(BuiltinKind::String) => Some(Type::STRING),
                    other => {
                        self.reporter.emit_error(
                            codes::CE2006,
                            format!("`{}` cannot be indexed", other),
                            span.clone(),
                        );
                        return None;
                    }
                }
            }

            ExprKind::ArrayLiteral(items) => {
                let mut items = std::mem::take(items);
                let expected_base = match expected {
                    Some(Type::Array { base, size }) => {
                        if *size as usize != items.len() {
                            self.reporter.emit_error(
                                codes::CE2011,
                                format!(
                                    "array literal has {} elements but the type wants {}",
                                    items.len(),
                                    size
                                ),
                                span.clone(),
                            );
                        }
                        Some((**base).clone())
                    }
                    _ => None,
                };
                let mut element_ty = expected_base;
                for item in &mut items {
                    let item_ty = self.validate_expression(item, element_ty.as_ref());
                    if element_ty.is_none() {
                        element_ty = item_ty;
                    } else if let (Some(found), Some(want)) = (&item_ty, &element_ty) {
                        if !compatible(self.ctx, found, want) {
                            self.reporter.emit_error(
                                codes::CE2006,
                                format!(
                                    "array elements must all be `{}`, found `{}`",
                                    want, found
                                ),
                                item.span.clone(),
                            );
                        }
                    }
                }
                let len = items.len() as u32;
                if let ExprKind::ArrayLiteral(slot) = &mut expr.kind {
                    *slot = items;
                }
                element_ty.map(|t| Type::array(t, len))
            }

            ExprKind::DynArrayFrom(items) => {
                let mut items = std::mem::take(items);
                let expected_base = match expected {
                    Some(Type::DynArray { base }) => Some((**base).clone()),
                    _ => None,
                };
                let mut element_ty = expected_base;
                for item in &mut items {
                    let item_ty = self.validate_expression(item, element_ty.as_ref());
                    if element_ty.is_none() {
                        element_ty = item_ty;
                    } else if let (Some(found), Some(want)) = (&item_ty, &element_ty) {
                        if !compatible(self.ctx, found, want) {
                            self.reporter.emit_error(
                                codes::CE2006,
                                format!(
                                    "array elements must all be `{}`, found `{}`",
                                    want, found
                                ),
                                item.span.clone(),
                            );
                        }
                    }
                }
                if let ExprKind::DynArrayFrom(slot) = &mut expr.kind {
                    *slot = items;
                }
                element_ty.map(Type::dyn_array)
            }

            ExprKind::DynArrayNew { element_type } => {
                let element_type = element_type.clone();
                resolve_or_report(self.ctx, self.reporter, &element_type, &span)
                    .map(Type::dyn_array)
            }

            ExprKind::Cast { .. } => {
                let ExprKind::Cast { expr: inner, target } = &mut expr.kind else {
                    unreachable!()
                };
                let target = target.clone();
                let inner_ty = self.validate_expression(inner, None)?;
                let target = resolve_or_report(self.ctx, self.reporter, &target, &span)?;
                let both_numeric = inner_ty.is_numeric() && target.is_numeric();
                if !both_numeric && inner_ty != target {
                    self.reporter.emit_error(
                        codes::CE2015,
                        format!("cannot cast `{}` to `{}`", inner_ty, target),
                        span.clone(),
                    );
                    return None;
                }
                Some(target)
            }

            ExprKind::Range { start, end, .. } => {
                for bound in [start, end] {
                    if let Some(bound_ty) = self.validate_expression(bound, Some(&Type::I32)) {
                        if !bound_ty.is_integer() {
                            self.reporter.emit_error(
                                codes::CE2006,
                                format!("range bounds must be integers, found `{}`", bound_ty),
                                bound.span.clone(),
                            );
                        }
                    }
                }
                Some(Type::iterator(Type::I32))
            }

            ExprKind::Try { .. } => self.validate_try(expr)?.into(),

            ExprKind::Borrow { .. } => {
                let ExprKind::Borrow { mode, expr: inner } = &mut expr.kind else {
                    unreachable!()
                };
                let mode = *mode;
                let inner_ty = self.validate_expression(inner, None)?;
                Some(Type::reference(inner_ty, mode))
            }
        };

        let ty = ty?;
        expr.ty = Some(ty.clone());
        Some(ty)
    }

    fn validate_binary(&mut self, expr: &mut Expression) -> Option<Type> {
        let span = expr.span.clone();
        let ExprKind::Binary { op, lhs, rhs } = &mut expr.kind else {
            unreachable!()
        };
        let op = *op;

        let lhs_ty = self.validate_expression(lhs, None);
        // Right side sees the left side's type so integer literals adopt it.
        let rhs_ty = self.validate_expression(rhs, lhs_ty.as_ref());
        let (lhs_ty, rhs_ty) = (lhs_ty?, rhs_ty?);

        if op.is_arithmetic() {
            if lhs_ty.is_string() || rhs_ty.is_string() {
                if op == BinaryOp::Add {
                    self.reporter.emit_error(
                        codes::CE2509,
                        "`+` is not defined for strings; use interpolation instead".to_string(),
                        span,
                    );
                } else {
                    self.reporter.emit_error(
                        codes::CE2006,
                        format!("`{}` is not defined for strings", op.symbol()),
                        span,
                    );
                }
                return None;
            }
            if !lhs_ty.is_numeric() || !rhs_ty.is_numeric() {
                self.reporter.emit_error(
                    codes::CE2006,
                    format!(
                        "`{}` needs numeric operands, found `{}` and `{}`",
                        op.symbol(),
                        lhs_ty,
                        rhs_ty
                    ),
                    span,
                );
                return None;
            }
            if lhs_ty != rhs_ty {
                self.reporter.emit_error(
                    codes::CE2510,
                    format!(
                        "mixed numeric types `{}` and `{}`; cast one side explicitly",
                        lhs_ty, rhs_ty
                    ),
                    span,
                );
                return None;
            }
            return Some(lhs_ty);
        }

        if op.is_comparison() {
            // Comparisons are defined for numbers, strings and bools; enum
            // and struct equality goes through match or derived hashing.
            let primitive = lhs_ty.is_numeric() || lhs_ty.is_string() || lhs_ty.is_bool();
            if !primitive {
                self.reporter.emit_error(
                    codes::CE2006,
                    format!("`{}` cannot be compared with `{}`", lhs_ty, op.symbol()),
                    span,
                );
                return None;
            }
            let comparable = compatible(self.ctx, &lhs_ty, &rhs_ty)
                || compatible(self.ctx, &rhs_ty, &lhs_ty);
            if !comparable {
                self.reporter.emit_error(
                    codes::CE2006,
                    format!("cannot compare `{}` with `{}`", lhs_ty, rhs_ty),
                    span,
                );
                return None;
            }
            if lhs_ty.is_numeric() && lhs_ty != rhs_ty {
                self.reporter.emit_error(
                    codes::CE2510,
                    format!(
                        "mixed numeric types `{}` and `{}`; cast one side explicitly",
                        lhs_ty, rhs_ty
                    ),
                    span,
                );
                return None;
            }
            return Some(Type::BOOL);
        }

        if op.is_logical() {
            if !lhs_ty.is_bool() || !rhs_ty.is_bool() {
                self.reporter.emit_error(
                    codes::CE2006,
                    format!(
                        "`{}` needs `bool` operands, found `{}` and `{}`",
                        op.symbol(),
                        lhs_ty,
                        rhs_ty
                    ),
                    span,
                );
                return None;
            }
            return Some(Type::BOOL);
        }

        // Bitwise and shifts.
        if !lhs_ty.is_integer() || !rhs_ty.is_integer() {
            self.reporter.emit_error(
                codes::CE2006,
                format!(
                    "`{}` needs integer operands, found `{}` and `{}`",
                    op.symbol(),
                    lhs_ty,
                    rhs_ty
                ),
                span,
            );
            return None;
        }
        let is_shift = matches!(op, BinaryOp::Shl | BinaryOp::Shr);
        if !is_shift && lhs_ty != rhs_ty {
            self.reporter.emit_error(
                codes::CE2510,
                format!(
                    "mixed integer types `{}` and `{}`; cast one side explicitly",
                    lhs_ty, rhs_ty
                ),
                span,
            );
            return None;
        }
        Some(lhs_ty)
    }

    /// `expr??` — the inner must be Result- or Maybe-shaped; the enclosing
    /// function's return must be able to carry the early error. Everything
    /// the lowering needs is recorded on the node.
    fn validate_try(&mut self, expr: &mut Expression) -> Option<Type> {
        let span = expr.span.clone();
        let ExprKind::Try { inner, .. } = &mut expr.kind else {
            unreachable!()
        };
        let inner_ty = self.validate_expression(inner, None)?;

        let Some(inner_enum) = inner_ty.as_enum().cloned() else {
            self.reporter.emit_error(
                codes::CE2505,
                format!("`??` needs a Result or Maybe value, found `{}`", inner_ty),
                span,
            );
            return None;
        };

        let (success_variant, unwrapped, error_ty) = if inner_enum.is_result_shaped() {
            let unwrapped = inner_enum.variants[0]
                .associated_types
                .first()
                .cloned()
                .unwrap_or(Type::BLANK);
            let error_ty = inner_enum.variants[1]
                .associated_types
                .first()
                .cloned()
                .unwrap_or(Type::BLANK);
            (0u32, unwrapped, error_ty)
        } else if inner_enum.is_maybe_shaped() {
            let unwrapped = inner_enum.variants[0]
                .associated_types
                .first()
                .cloned()
                .unwrap_or(Type::BLANK);
            (0u32, unwrapped, Type::BLANK)
        } else {
            self.reporter.emit_error(
                codes::CE2505,
                format!(
                    "`??` needs a Result- or Maybe-shaped enum, found `{}`",
                    inner_enum.name
                ),
                span,
            );
            return None;
        };

        let Some(return_enum) = self.current_return.clone() else {
            return None;
        };

        // The early error must project into the enclosing return type. A
        // Maybe-shaped inner requires the default StdError error.
        let fn_err_ty = return_enum.variants[1]
            .associated_types
            .first()
            .cloned()
            .unwrap_or(Type::BLANK);
        if inner_enum.is_result_shaped() {
            let resolved_err = resolve_type(self.ctx, &error_ty);
            let resolved_fn_err = resolve_type(self.ctx, &fn_err_ty);
            if !compatible(self.ctx, &resolved_err, &resolved_fn_err) {
                self.reporter.emit_error(
                    codes::CE2003,
                    format!(
                        "`??` would propagate `{}` but this function's error type is `{}`",
                        resolved_err, resolved_fn_err
                    ),
                    span,
                );
                return None;
            }
        } else {
            let resolved_fn_err = resolve_type(self.ctx, &fn_err_ty);
            let is_std_error =
                matches!(&resolved_fn_err, Type::Enum(e) if e.name == "StdError");
            if !is_std_error {
                self.reporter.emit_error(
                    codes::CE2003,
                    format!(
                        "`??` on a Maybe needs an enclosing `StdError` error type, found `{}`",
                        resolved_fn_err
                    ),
                    span,
                );
                return None;
            }
        }

        let unwrapped = resolve_type(self.ctx, &unwrapped);
        if let ExprKind::Try {
            inferred_inner_type,
            inferred_unwrapped_type,
            inferred_success_tag,
            inferred_error_type,
            inferred_func_return_type,
            ..
        } = &mut expr.kind
        {
            *inferred_inner_type = Some(Type::Enum(inner_enum));
            *inferred_unwrapped_type = Some(unwrapped.clone());
            *inferred_success_tag = Some(success_variant);
            *inferred_error_type = Some(resolve_type(self.ctx, &error_ty));
            *inferred_func_return_type = Some(Type::Enum(return_enum));
        }
        Some(unwrapped)
    }
}
