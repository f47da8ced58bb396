//! Statement validation.

use super::TypeValidator;
use crate::semantics::resolve::{resolve_or_report, resolve_type};
use crate::semantics::typecheck::compat::compatible;
use sushi_ast::{
    Block, ExprKind, Expression, ForeachStmt, IfStmt, LetStmt, MatchStmt, PrintStmt, RebindStmt,
    ReturnStmt, Statement, Type, WhileStmt,
};
use sushi_diagnostics::{codes, Span};

impl TypeValidator<'_> {
    pub(crate) fn validate_block(&mut self, block: &mut Block) {
        self.push_scope();
        for stmt in &mut block.statements {
            self.validate_statement(stmt);
        }
        self.pop_scope();
    }

    fn validate_statement(&mut self, stmt: &mut Statement) {
        match stmt {
            Statement::Let(s) => self.validate_let(s),
            Statement::Rebind(s) => self.validate_rebind(s),
            Statement::Return(s) => self.validate_return(s),
            Statement::If(s) => self.validate_if(s),
            Statement::While(s) => self.validate_while(s),
            Statement::Foreach(s) => self.validate_foreach(s),
            Statement::Match(s) => self.validate_match(s),
            Statement::Print(s) => self.validate_print(s),
            Statement::Expr(s) => {
                let ty = self.validate_expression(&mut s.expr, None);
                // Invariant: a statement-level Result must be consumed.
                if let Some(ty) = ty {
                    if self.is_result_shaped(&ty) && !is_result_consumer(&s.expr) {
                        self.reporter.emit_warning(
                            codes::CW2001,
                            "Result value is never used; bind it, propagate with `??`, or \
                             unwrap it"
                                .to_string(),
                            s.span.clone(),
                        );
                    }
                }
            }
            Statement::Break(_) | Statement::Continue(_) => {}
        }
    }

    fn validate_let(&mut self, s: &mut LetStmt) {
        // A parser placeholder means the annotation was omitted entirely.
        if matches!(&s.declared_type, Type::Unknown(name) if name.is_empty()) {
            self.reporter.emit_error(
                codes::CE2007,
                format!("`let {}` needs a type annotation", s.name),
                s.span.clone(),
            );
            return;
        }

        self.reject_zero_size_arrays(&s.declared_type, &s.span);

        let Some(declared) =
            resolve_or_report(self.ctx, self.reporter, &s.declared_type, &s.span)
        else {
            // Still register the name so later uses don't cascade.
            self.declare_var(&s.name, Type::Unknown(s.name.clone()));
            return;
        };

        if declared.is_blank() {
            self.reporter.emit_error(
                codes::CE2032,
                "`~` is not a usable variable type".to_string(),
                s.span.clone(),
            );
            return;
        }

        if let Some(init) = &mut s.init {
            // Expected-type propagation happens BEFORE the constructor is
            // validated, so generic constructors know their monomorph.
            self.propagate_expected(init, &declared);
            if let Some(actual) = self.validate_expression(init, Some(&declared)) {
                if self.is_result_shaped(&actual) && !self.is_result_shaped(&declared) {
                    self.reporter.emit_error(
                        codes::CE2505,
                        format!(
                            "`{}` returns a Result; bind it as Result, propagate with `??`, \
                             or unwrap it",
                            describe_expr(init)
                        ),
                        s.span.clone(),
                    );
                } else if !compatible(self.ctx, &actual, &declared) {
                    self.reporter.emit_error(
                        codes::CE2002,
                        format!("expected `{}`, found `{}`", declared, actual),
                        s.span.clone(),
                    );
                }
            }
        }

        self.declare_var(&s.name, declared);
    }

    fn validate_rebind(&mut self, s: &mut RebindStmt) {
        let Some(target_ty) = self.validate_expression(&mut s.target, None) else {
            self.validate_expression(&mut s.value, None);
            return;
        };
        // Writing through a reference rebinds the pointee.
        let target_ty = target_ty.unwrap_reference().clone();

        if let ExprKind::Name(name) = &s.target.kind {
            if self.destroyed.contains(name) {
                self.reporter.emit_error(
                    codes::CE2024,
                    format!("`{}` was destroyed and cannot be assigned", name),
                    s.span.clone(),
                );
            }
        }

        self.propagate_expected(&mut s.value, &target_ty);
        if let Some(value_ty) = self.validate_expression(&mut s.value, Some(&target_ty)) {
            if !compatible(self.ctx, &value_ty, &target_ty) {
                self.reporter.emit_error(
                    codes::CE2002,
                    format!("expected `{}`, found `{}`", target_ty, value_ty),
                    s.span.clone(),
                );
            }
        }
    }

    fn validate_return(&mut self, s: &mut ReturnStmt) {
        let Some(return_enum) = self.current_return.clone() else {
            return;
        };

        let Some(value) = &mut s.value else {
            self.reporter.emit_error(
                codes::CE2030,
                "return must use `Result.Ok(value)` or `Result.Err(error)`".to_string(),
                s.span.clone(),
            );
            return;
        };

        // Rewrite the ambiguous dot form first so the shape check below
        // sees an enum constructor.
        if let ExprKind::DotCall { .. } = &value.kind {
            self.rewrite_dot_call(value);
        }

        let is_result_ctor = matches!(
            &value.kind,
            ExprKind::EnumConstructor { enum_name, variant, .. }
                if enum_name == "Result" && (variant == "Ok" || variant == "Err")
        );
        if !is_result_ctor {
            self.reporter.emit_error(
                codes::CE2030,
                "return must use `Result.Ok(value)` or `Result.Err(error)`".to_string(),
                s.span.clone(),
            );
            return;
        }

        if let ExprKind::EnumConstructor {
            resolved_enum_type, ..
        } = &mut value.kind
        {
            *resolved_enum_type = Some(return_enum.clone());
        }

        let expected = Type::Enum(return_enum);
        if let Some(actual) = self.validate_expression(value, Some(&expected)) {
            if !compatible(self.ctx, &actual, &expected) {
                self.reporter.emit_error(
                    codes::CE2003,
                    format!("return type mismatch: expected `{}`, found `{}`", expected, actual),
                    s.span.clone(),
                );
            }
        }
    }

    fn validate_if(&mut self, s: &mut IfStmt) {
        self.check_bool_condition(&mut s.condition, &s.span);
        self.validate_block(&mut s.then_block);
        if let Some(else_block) = &mut s.else_block {
            self.validate_block(else_block);
        }
    }

    fn validate_while(&mut self, s: &mut WhileStmt) {
        self.check_bool_condition(&mut s.condition, &s.span);
        self.validate_block(&mut s.body);
    }

    fn check_bool_condition(&mut self, condition: &mut Expression, span: &Span) {
        if let Some(ty) = self.validate_expression(condition, Some(&Type::BOOL)) {
            if !ty.is_bool() {
                self.reporter.emit_error(
                    codes::CE2005,
                    format!("condition must be `bool`, found `{}`", ty),
                    span.clone(),
                );
            }
        }
    }

    fn validate_foreach(&mut self, s: &mut ForeachStmt) {
        let iterable_ty = self.validate_expression(&mut s.iterable, None);

        let element = match iterable_ty {
            Some(Type::Iterator { element }) => Some(*element),
            Some(other) => {
                self.reporter.emit_error(
                    codes::CE2006,
                    format!("foreach needs an `Iterator`, found `{}`", other),
                    s.span.clone(),
                );
                None
            }
            None => None,
        };

        let item_ty = match (&s.declared_item_type, element) {
            (Some(declared), Some(element)) => {
                let resolved =
                    resolve_or_report(self.ctx, self.reporter, declared, &s.span);
                if let Some(resolved) = &resolved {
                    if !compatible(self.ctx, &element, resolved) {
                        self.reporter.emit_error(
                            codes::CE2002,
                            format!(
                                "loop item declared `{}` but the iterator yields `{}`",
                                resolved, element
                            ),
                            s.span.clone(),
                        );
                    }
                }
                // Prefer the declared resolution when it checks out.
                resolved.or(Some(element))
            }
            (Some(declared), None) => resolve_or_report(self.ctx, self.reporter, declared, &s.span),
            (None, element) => element,
        };

        s.item_type = item_ty.clone();

        self.push_scope();
        if let Some(item_ty) = item_ty {
            self.declare_var(&s.item, item_ty);
        }
        self.validate_block(&mut s.body);
        self.pop_scope();
    }

    fn validate_match(&mut self, s: &mut MatchStmt) {
        // C8 lives in matching.rs.
        self.check_match(s);
    }

    fn validate_print(&mut self, s: &mut PrintStmt) {
        let Some(ty) = self.validate_expression(&mut s.value, None) else {
            return;
        };
        if self.is_result_shaped(&ty) {
            self.reporter.emit_error(
                codes::CE2037,
                "cannot print a `Result` directly; unwrap it first".to_string(),
                s.span.clone(),
            );
        } else if !self.is_stringifiable(&ty) {
            self.reporter.emit_error(
                codes::CE2055,
                format!("`{}` cannot be printed; only numbers, bool and string can", ty),
                s.span.clone(),
            );
        }
    }

    /// CE2010: a fixed array must have at least one element.
    fn reject_zero_size_arrays(&mut self, ty: &Type, span: &Span) {
        match ty {
            Type::Array { base, size } => {
                if *size == 0 {
                    self.reporter.emit_error(
                        codes::CE2010,
                        "fixed arrays must have a size greater than zero".to_string(),
                        span.clone(),
                    );
                }
                self.reject_zero_size_arrays(base, span);
            }
            Type::DynArray { base } => self.reject_zero_size_arrays(base, span),
            Type::Reference { inner, .. } => self.reject_zero_size_arrays(inner, span),
            Type::GenericRef { args, .. } => {
                for arg in args {
                    self.reject_zero_size_arrays(arg, span);
                }
            }
            _ => {}
        }
    }

    /// Push the expected type into constructor nodes before validation.
    pub(crate) fn propagate_expected(&mut self, expr: &mut Expression, expected: &Type) {
        let expected = resolve_type(self.ctx, expected);

        // The ambiguous dot form rewrites first so propagation reaches the
        // constructor it becomes.
        if let ExprKind::DotCall { target, .. } = &expr.kind {
            let is_constructor_target = self.ctx.enums.contains_key(target.as_str())
                || self.ctx.generic_enums.contains_key(target.as_str())
                || self.ctx.generic_structs.contains_key(target.as_str());
            if is_constructor_target {
                self.rewrite_dot_call(expr);
            } else {
                return;
            }
        }

        match &mut expr.kind {
            ExprKind::EnumConstructor {
                enum_name,
                resolved_enum_type,
                ..
            } => {
                if let Some(e) = expected.as_enum() {
                    if e.name == *enum_name || e.is_monomorph_of(enum_name) {
                        *resolved_enum_type = Some(e.clone());
                    }
                } else if let Some(e) = self.result_enum_of(&expected) {
                    if enum_name == "Result" {
                        *resolved_enum_type = Some(e);
                    }
                }
            }
            ExprKind::StructConstructor {
                name,
                resolved_struct_type,
                ..
            } => {
                if let Some(s) = expected.as_struct() {
                    if s.name == *name || s.is_monomorph_of(name) {
                        *resolved_struct_type = Some(s.clone());
                    }
                }
            }
            _ => {}
        }
    }
}

/// Expressions that consume the Result they produce at statement level.
fn is_result_consumer(expr: &Expression) -> bool {
    matches!(&expr.kind, ExprKind::Try { .. })
}

fn describe_expr(expr: &Expression) -> String {
    match &expr.kind {
        ExprKind::Call { callee, .. } => format!("{}()", callee),
        ExprKind::MethodCall { method, .. } => format!(".{}()", method),
        _ => "expression".to_string(),
    }
}
