//! Compile-time evaluation of `const` initializers: a closed sub-language
//! of literals, previously defined constants, and integer/boolean
//! operators. Integer arithmetic folds with overflow checking; float
//! arithmetic is deliberately NOT folded (float constants must be plain
//! literals).

use crate::context::CompilerContext;
use sushi_ast::{BinaryOp, BuiltinKind, ExprKind, Expression, Type, UnaryOp};
use sushi_diagnostics::{codes, DiagnosticEngine, Span};

/// A folded constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl ConstValue {
    fn to_expression(&self, span: Span) -> Expression {
        let kind = match self {
            ConstValue::Int(v) => ExprKind::IntLiteral(*v),
            ConstValue::Float(v) => ExprKind::FloatLiteral(*v),
            ConstValue::Bool(v) => ExprKind::BoolLiteral(*v),
            ConstValue::Str(v) => ExprKind::StringLiteral(v.clone()),
        };
        Expression::new(kind, span)
    }
}

/// Does `value` fit the integer kind? Used for every integer literal the
/// compiler type-checks, not just constants.
pub fn int_fits(value: i128, kind: BuiltinKind) -> bool {
    match kind {
        BuiltinKind::I8 => value >= i8::MIN as i128 && value <= i8::MAX as i128,
        BuiltinKind::I16 => value >= i16::MIN as i128 && value <= i16::MAX as i128,
        BuiltinKind::I32 => value >= i32::MIN as i128 && value <= i32::MAX as i128,
        BuiltinKind::I64 => value >= i64::MIN as i128 && value <= i64::MAX as i128,
        BuiltinKind::U8 => value >= 0 && value <= u8::MAX as i128,
        BuiltinKind::U16 => value >= 0 && value <= u16::MAX as i128,
        BuiltinKind::U32 => value >= 0 && value <= u32::MAX as i128,
        BuiltinKind::U64 => value >= 0 && value <= u64::MAX as i128,
        _ => false,
    }
}

/// Fold every registered constant initializer in place.
pub fn run(ctx: &mut CompilerContext, reporter: &mut DiagnosticEngine) {
    let names: Vec<String> = ctx.constants.keys().cloned().collect();
    for name in names {
        let info = ctx.constants[&name].clone();
        match evaluate(ctx, &info.value) {
            Ok(value) => {
                if let (ConstValue::Int(v), Some(kind)) = (&value, info.ty.builtin()) {
                    if kind.is_integer() && !int_fits(*v, kind) {
                        reporter.emit_error(
                            codes::CE2012,
                            format!("integer literal `{}` does not fit in `{}`", v, kind),
                            info.span.clone(),
                        );
                        continue;
                    }
                }
                let entry = ctx.constants.get_mut(&name).expect("constant present");
                entry.value = value.to_expression(info.span.clone());
            }
            Err(message) => {
                reporter.emit_error(codes::CE2060, message, info.span.clone());
            }
        }
    }
}

/// Evaluate an expression from the const sub-language.
pub fn evaluate(ctx: &CompilerContext, expr: &Expression) -> Result<ConstValue, String> {
    match &expr.kind {
        ExprKind::IntLiteral(v) => Ok(ConstValue::Int(*v)),
        ExprKind::FloatLiteral(v) => Ok(ConstValue::Float(*v)),
        ExprKind::BoolLiteral(v) => Ok(ConstValue::Bool(*v)),
        ExprKind::StringLiteral(v) => Ok(ConstValue::Str(v.clone())),
        ExprKind::Name(name) => {
            let info = ctx
                .constants
                .get(name)
                .ok_or_else(|| format!("`{}` is not a constant", name))?;
            evaluate(ctx, &info.value)
        }
        ExprKind::Unary { op, expr: inner } => {
            let value = evaluate(ctx, inner)?;
            match (op, value) {
                (UnaryOp::Neg, ConstValue::Int(v)) => v
                    .checked_neg()
                    .map(ConstValue::Int)
                    .ok_or_else(|| "integer overflow in constant expression".to_string()),
                (UnaryOp::Not, ConstValue::Bool(v)) => Ok(ConstValue::Bool(!v)),
                (UnaryOp::Neg, ConstValue::Float(_)) => {
                    Err("float arithmetic is not folded in constants".to_string())
                }
                _ => Err("invalid operand in constant expression".to_string()),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let left = evaluate(ctx, lhs)?;
            let right = evaluate(ctx, rhs)?;
            fold_binary(*op, left, right)
        }
        _ => Err("expression is not valid in a constant initializer".to_string()),
    }
}

fn fold_binary(op: BinaryOp, left: ConstValue, right: ConstValue) -> Result<ConstValue, String> {
    use ConstValue::*;
    match (left, right) {
        (Int(a), Int(b)) => fold_ints(op, a, b),
        (Bool(a), Bool(b)) => match op {
            BinaryOp::And => Ok(Bool(a && b)),
            BinaryOp::Or => Ok(Bool(a || b)),
            BinaryOp::Xor => Ok(Bool(a ^ b)),
            BinaryOp::Eq => Ok(Bool(a == b)),
            BinaryOp::Ne => Ok(Bool(a != b)),
            _ => Err("invalid boolean operator in constant expression".to_string()),
        },
        (Float(_), _) | (_, Float(_)) => {
            Err("float arithmetic is not folded in constants".to_string())
        }
        (Str(_), _) | (_, Str(_)) => {
            Err("string operators are not valid in constant expressions".to_string())
        }
        _ => Err("mismatched operand kinds in constant expression".to_string()),
    }
}

fn fold_ints(op: BinaryOp, a: i128, b: i128) -> Result<ConstValue, String> {
    use ConstValue::*;
    let overflow = || "integer overflow in constant expression".to_string();
    Ok(match op {
        BinaryOp::Add => Int(a.checked_add(b).ok_or_else(overflow)?),
        BinaryOp::Sub => Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinaryOp::Mul => Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinaryOp::Div => {
            if b == 0 {
                return Err("division by zero in constant expression".to_string());
            }
            Int(a.checked_div(b).ok_or_else(overflow)?)
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err("division by zero in constant expression".to_string());
            }
            Int(a.checked_rem(b).ok_or_else(overflow)?)
        }
        BinaryOp::BitAnd => Int(a & b),
        BinaryOp::BitOr => Int(a | b),
        BinaryOp::BitXor => Int(a ^ b),
        BinaryOp::Shl => {
            let shift = u32::try_from(b).map_err(|_| "invalid shift amount".to_string())?;
            Int(a.checked_shl(shift).ok_or_else(overflow)?)
        }
        BinaryOp::Shr => {
            let shift = u32::try_from(b).map_err(|_| "invalid shift amount".to_string())?;
            Int(a.checked_shr(shift).ok_or_else(overflow)?)
        }
        BinaryOp::Eq => Bool(a == b),
        BinaryOp::Ne => Bool(a != b),
        BinaryOp::Lt => Bool(a < b),
        BinaryOp::Le => Bool(a <= b),
        BinaryOp::Gt => Bool(a > b),
        BinaryOp::Ge => Bool(a >= b),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
            return Err("logical operator on integers in constant expression".to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConstInfo;
    use sushi_ast::BinaryOp;

    fn ctx_with_const(name: &str, ty: Type, value: Expression) -> CompilerContext {
        let mut ctx = CompilerContext::new();
        ctx.constants.insert(
            name.to_string(),
            ConstInfo {
                ty,
                value,
                span: Span::synthetic(),
            },
        );
        ctx
    }

    #[test]
    fn folds_integer_arithmetic() {
        let expr = Expression::binary(
            BinaryOp::Add,
            Expression::int(40),
            Expression::binary(BinaryOp::Mul, Expression::int(2), Expression::int(1)),
        );
        let ctx = CompilerContext::new();
        assert_eq!(evaluate(&ctx, &expr), Ok(ConstValue::Int(42)));
    }

    #[test]
    fn references_other_constants() {
        let ctx = ctx_with_const("BASE", Type::I32, Expression::int(100));
        let expr = Expression::binary(BinaryOp::Sub, Expression::name("BASE"), Expression::int(1));
        assert_eq!(evaluate(&ctx, &expr), Ok(ConstValue::Int(99)));
    }

    #[test]
    fn float_arithmetic_is_not_folded() {
        let ctx = CompilerContext::new();
        let expr = Expression::binary(BinaryOp::Add, Expression::float(1.5), Expression::float(2.5));
        assert!(evaluate(&ctx, &expr).is_err());
        // Plain float literals are fine.
        assert_eq!(
            evaluate(&ctx, &Expression::float(3.25)),
            Ok(ConstValue::Float(3.25))
        );
    }

    #[test]
    fn division_by_zero_is_rejected() {
        let ctx = CompilerContext::new();
        let expr = Expression::binary(BinaryOp::Div, Expression::int(1), Expression::int(0));
        assert!(evaluate(&ctx, &expr).is_err());
    }

    #[test]
    fn literal_range_checks() {
        assert!(int_fits(2147483647, BuiltinKind::I32));
        assert!(!int_fits(2147483648, BuiltinKind::I32));
        assert!(!int_fits(-1, BuiltinKind::U8));
        assert!(int_fits(255, BuiltinKind::U8));
        assert!(!int_fits(256, BuiltinKind::U8));
    }

    #[test]
    fn run_rewrites_initializers_and_checks_ranges() {
        let mut ctx = ctx_with_const(
            "ANSWER",
            Type::I32,
            Expression::binary(BinaryOp::Mul, Expression::int(6), Expression::int(7)),
        );
        let mut reporter = DiagnosticEngine::new("t.sushi");
        run(&mut ctx, &mut reporter);
        assert!(!reporter.has_errors());
        assert!(matches!(
            ctx.constants["ANSWER"].value.kind,
            ExprKind::IntLiteral(42)
        ));

        let mut ctx = ctx_with_const("BIG", Type::I32, Expression::int(2147483648));
        let mut reporter = DiagnosticEngine::new("t.sushi");
        run(&mut ctx, &mut reporter);
        assert!(reporter.has_code(codes::CE2012));
    }

    #[test]
    fn logical_ops_fold_on_bools() {
        let ctx = CompilerContext::new();
        let expr = Expression::binary(
            BinaryOp::Xor,
            Expression::boolean(true),
            Expression::boolean(true),
        );
        assert_eq!(evaluate(&ctx, &expr), Ok(ConstValue::Bool(false)));
    }
}
