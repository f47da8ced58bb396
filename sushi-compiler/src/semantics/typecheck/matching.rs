//! Pattern-match checking: scrutinee shape, per-arm validation,
//! duplicate-arm signatures, exhaustiveness, and binding registration.

use super::TypeValidator;
use crate::semantics::resolve::resolve_type;
use sushi_ast::{
    EnumPattern, EnumType, MatchStmt, Pattern, PatternBinding, Type,
};
use sushi_diagnostics::codes;
use std::collections::HashSet;

impl TypeValidator<'_> {
    pub(crate) fn check_match(&mut self, s: &mut MatchStmt) {
        let scrutinee_ty = self.validate_expression(&mut s.scrutinee, None);

        // The scrutinee must be an enum, possibly through Own<enum> when the
        // arm patterns unwrap ownership.
        let enum_ty: Option<EnumType> = match scrutinee_ty.as_ref().map(|t| t.unwrap_reference()) {
            Some(Type::Enum(e)) => Some(e.clone()),
            Some(Type::Struct(st)) if st.is_monomorph_of("Own") => {
                let inner = st
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .map(|t| resolve_type(self.ctx, t));
                match inner {
                    Some(Type::Enum(e)) => Some(e),
                    _ => None,
                }
            }
            _ => None,
        };

        if enum_ty.is_none() {
            if let Some(ty) = &scrutinee_ty {
                self.reporter.emit_error(
                    codes::CE2048,
                    format!("match needs an enum scrutinee, found `{}`", ty),
                    s.span.clone(),
                );
            }
            // Bodies still validate so their errors surface.
            for arm in &mut s.arms {
                self.validate_block(&mut arm.body);
            }
            return;
        }
        let enum_ty = enum_ty.unwrap();

        let mut seen_signatures: HashSet<String> = HashSet::new();
        let mut covered_variants: HashSet<String> = HashSet::new();
        let mut has_wildcard = false;
        let arm_count = s.arms.len();

        for (index, arm) in s.arms.iter_mut().enumerate() {
            if matches!(arm.pattern, Pattern::Wildcard(_)) {
                has_wildcard = true;
                if index + 1 != arm_count {
                    self.reporter.emit_error(
                        codes::CE2041,
                        "`_` must be the last arm of a match".to_string(),
                        arm.span.clone(),
                    );
                }
                self.validate_block(&mut arm.body);
                continue;
            }

            let Some(checked) = self.check_pattern(&arm.pattern, &enum_ty) else {
                self.validate_block(&mut arm.body);
                continue;
            };

            if !seen_signatures.insert(checked.signature.clone()) {
                self.reporter.emit_error(
                    codes::CE2041,
                    format!("duplicate match arm `{}`", checked.signature),
                    arm.span.clone(),
                );
            }
            covered_variants.insert(checked.outer_variant.clone());

            self.push_scope();
            for (name, ty) in checked.bindings {
                self.declare_var(&name, ty);
            }
            self.validate_block(&mut arm.body);
            self.pop_scope();
        }

        if !has_wildcard {
            let all: HashSet<String> =
                enum_ty.variants.iter().map(|v| v.name.clone()).collect();
            let missing: Vec<String> = enum_ty
                .variants
                .iter()
                .map(|v| v.name.clone())
                .filter(|name| !covered_variants.contains(name))
                .collect();
            if covered_variants != all {
                self.reporter.emit_error(
                    codes::CE2040,
                    format!(
                        "match on `{}` is not exhaustive; missing {}",
                        enum_ty.name,
                        missing
                            .iter()
                            .map(|m| format!("`{}`", m))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    s.span.clone(),
                );
            }
        }
    }

    fn check_pattern(&mut self, pattern: &Pattern, enum_ty: &EnumType) -> Option<CheckedArm> {
        match pattern {
            Pattern::Wildcard(_) => None,
            Pattern::Enum(ep) => self.check_enum_pattern(ep, enum_ty),
            Pattern::Own(inner, span) => {
                // Own at the top level unwraps an Own<enum> scrutinee.
                let checked = self.check_pattern(inner, enum_ty)?;
                let _ = span;
                Some(CheckedArm {
                    signature: format!("Own({})", checked.signature),
                    outer_variant: checked.outer_variant,
                    bindings: checked.bindings,
                })
            }
        }
    }

    fn check_enum_pattern(&mut self, ep: &EnumPattern, enum_ty: &EnumType) -> Option<CheckedArm> {
        let name_matches = ep.enum_name == enum_ty.name
            || enum_ty.is_monomorph_of(&ep.enum_name);
        if !name_matches {
            self.reporter.emit_error(
                codes::CE2048,
                format!(
                    "pattern `{}.{}` does not match scrutinee enum `{}`",
                    ep.enum_name, ep.variant, enum_ty.name
                ),
                ep.span.clone(),
            );
            return None;
        }

        let Some(variant) = enum_ty.variant(&ep.variant).cloned() else {
            self.reporter.emit_error(
                codes::CE2045,
                format!("enum `{}` has no variant `{}`", enum_ty.name, ep.variant),
                ep.span.clone(),
            );
            return None;
        };

        if ep.bindings.len() != variant.associated_types.len() {
            self.reporter.emit_error(
                codes::CE2044,
                format!(
                    "variant `{}.{}` carries {} value{} but the pattern binds {}",
                    enum_ty.name,
                    ep.variant,
                    variant.associated_types.len(),
                    if variant.associated_types.len() == 1 { "" } else { "s" },
                    ep.bindings.len()
                ),
                ep.span.clone(),
            );
            return None;
        }

        let mut bindings: Vec<(String, Type)> = Vec::new();
        let mut slot_signatures: Vec<String> = Vec::new();
        for (binding, slot_ty) in ep.bindings.iter().zip(&variant.associated_types) {
            let slot_ty = resolve_type(self.ctx, slot_ty);
            let sig = self.check_binding(ep, binding, &slot_ty, &mut bindings)?;
            slot_signatures.push(sig);
        }

        let signature = if slot_signatures.is_empty() {
            ep.variant.clone()
        } else {
            format!("{}({})", ep.variant, slot_signatures.join(", "))
        };
        Some(CheckedArm {
            signature,
            outer_variant: ep.variant.clone(),
            bindings,
        })
    }

    /// Validate one binding slot; returns its canonical signature piece and
    /// appends captured names to `bindings`.
    fn check_binding(
        &mut self,
        ep: &EnumPattern,
        binding: &PatternBinding,
        slot_ty: &Type,
        bindings: &mut Vec<(String, Type)>,
    ) -> Option<String> {
        match binding {
            PatternBinding::Name(name) => {
                bindings.push((name.clone(), slot_ty.clone()));
                Some("_".to_string())
            }
            PatternBinding::Discard => Some("_".to_string()),
            PatternBinding::Enum(nested) => {
                let Type::Enum(nested_enum) = slot_ty else {
                    self.reporter.emit_error(
                        codes::CE2044,
                        format!(
                            "nested pattern `{}.{}` needs an enum slot, found `{}`",
                            nested.enum_name, nested.variant, slot_ty
                        ),
                        nested.span.clone(),
                    );
                    return None;
                };
                let checked = self.check_enum_pattern(nested, nested_enum)?;
                bindings.extend(checked.bindings);
                Some(checked.signature)
            }
            PatternBinding::Own(inner) => {
                let Type::Struct(st) = slot_ty else {
                    self.reporter.emit_error(
                        codes::CE2044,
                        format!("`Own` pattern needs an `Own` slot, found `{}`", slot_ty),
                        ep.span.clone(),
                    );
                    return None;
                };
                if !st.is_monomorph_of("Own") {
                    self.reporter.emit_error(
                        codes::CE2044,
                        format!("`Own` pattern needs an `Own` slot, found `{}`", st.name),
                        ep.span.clone(),
                    );
                    return None;
                }
                let inner_ty = st
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .map(|t| resolve_type(self.ctx, t))
                    .unwrap_or(Type::BLANK);
                let sig = self.check_binding(ep, inner, &inner_ty, bindings)?;
                Some(format!("Own({})", sig))
            }
        }
    }
}

struct CheckedArm {
    signature: String,
    outer_variant: String,
    bindings: Vec<(String, Type)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;
    use crate::semantics::collect::Collector;
    use sushi_ast::{
        Block, EnumPattern, Expression, LetStmt, MatchArm, Program, Statement,
    };
    use sushi_diagnostics::{DiagnosticEngine, Span};

    fn color_enum() -> EnumType {
        EnumType::new(
            "Color",
            vec![
                sushi_ast::EnumVariant::unit("Red"),
                sushi_ast::EnumVariant::unit("Green"),
                sushi_ast::EnumVariant::new("Custom", vec![Type::I32]),
            ],
        )
    }

    fn prepared() -> (CompilerContext, DiagnosticEngine) {
        let mut ctx = CompilerContext::new();
        let mut reporter = DiagnosticEngine::new("t.sushi");
        Collector::new(&mut ctx, &mut reporter).run(&Program::new("main"));
        ctx.install_enum(color_enum());
        (ctx, reporter)
    }

    fn arm(enum_name: &str, variant: &str, bindings: Vec<PatternBinding>) -> MatchArm {
        MatchArm {
            pattern: Pattern::Enum(EnumPattern {
                enum_name: enum_name.to_string(),
                variant: variant.to_string(),
                bindings,
                span: Span::synthetic(),
            }),
            body: Block::default(),
            span: Span::synthetic(),
        }
    }

    fn wildcard_arm() -> MatchArm {
        MatchArm {
            pattern: Pattern::Wildcard(Span::synthetic()),
            body: Block::default(),
            span: Span::synthetic(),
        }
    }

    fn match_on_color(arms: Vec<MatchArm>) -> (Vec<Statement>, MatchStmt) {
        let let_stmt = Statement::Let(LetStmt {
            name: "c".to_string(),
            declared_type: Type::Unknown("Color".to_string()),
            init: Some(Expression::enum_constructor("Color", "Red", vec![])),
            span: Span::synthetic(),
        });
        let match_stmt = MatchStmt {
            scrutinee: Expression::name("c"),
            arms,
            span: Span::synthetic(),
        };
        (vec![let_stmt], match_stmt)
    }

    fn run_match(arms: Vec<MatchArm>) -> DiagnosticEngine {
        let (mut ctx, mut reporter) = prepared();
        let mut validator = TypeValidator::new(&mut ctx, &mut reporter);
        validator.push_scope();
        let (setup, mut match_stmt) = match_on_color(arms);
        let mut block = Block::new(setup);
        validator.validate_block(&mut block);
        // `c` was declared inside the block; redeclare at the outer level
        // so the match scrutinee resolves.
        validator.declare_var("c", Type::Enum(color_enum()));
        validator.check_match(&mut match_stmt);
        drop(validator);
        reporter
    }

    #[test]
    fn exhaustive_match_passes() {
        let reporter = run_match(vec![
            arm("Color", "Red", vec![]),
            arm("Color", "Green", vec![]),
            arm("Color", "Custom", vec![PatternBinding::Name("v".into())]),
        ]);
        assert!(!reporter.has_errors());
    }

    #[test]
    fn missing_variant_is_rejected() {
        let reporter = run_match(vec![
            arm("Color", "Red", vec![]),
            arm("Color", "Custom", vec![PatternBinding::Discard]),
        ]);
        assert!(reporter.has_code(codes::CE2040));
    }

    #[test]
    fn wildcard_covers_the_rest() {
        let reporter = run_match(vec![arm("Color", "Red", vec![]), wildcard_arm()]);
        assert!(!reporter.has_errors());
    }

    #[test]
    fn duplicate_arm_is_rejected() {
        let reporter = run_match(vec![
            arm("Color", "Red", vec![]),
            arm("Color", "Red", vec![]),
            wildcard_arm(),
        ]);
        assert!(reporter.has_code(codes::CE2041));
    }

    #[test]
    fn binding_arity_is_checked() {
        let reporter = run_match(vec![
            arm("Color", "Custom", vec![]),
            wildcard_arm(),
        ]);
        assert!(reporter.has_code(codes::CE2044));
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let reporter = run_match(vec![arm("Color", "Blue", vec![]), wildcard_arm()]);
        assert!(reporter.has_code(codes::CE2045));
    }

    #[test]
    fn wildcard_must_be_last() {
        let reporter = run_match(vec![wildcard_arm(), arm("Color", "Red", vec![])]);
        assert!(reporter.has_code(codes::CE2041));
    }
}
