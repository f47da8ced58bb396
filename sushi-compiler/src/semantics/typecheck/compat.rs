//! Type compatibility (`compat(actual, expected)`). Exact equality first;
//! references allow Poke where Peek is expected; Result sugar, generic
//! refs and unknown names resolve before comparison; containers compare by
//! containment.

use crate::context::CompilerContext;
use crate::semantics::resolve::resolve_type;
use sushi_ast::{mangle_generic_name, RefMode, Type};

pub fn compatible(ctx: &CompilerContext, actual: &Type, expected: &Type) -> bool {
    if actual == expected {
        return true;
    }

    match (actual, expected) {
        // Poke passes where Peek is expected, never the reverse.
        (
            Type::Reference {
                inner: a,
                mode: am,
            },
            Type::Reference {
                inner: e,
                mode: em,
            },
        ) => {
            let mode_ok = am == em || (*am == RefMode::Poke && *em == RefMode::Peek);
            mode_ok && compatible(ctx, a, e)
        }

        // Result sugar vs its concrete enum (either direction).
        (Type::Result { ok, err }, Type::Enum(e)) | (Type::Enum(e), Type::Result { ok, err }) => {
            if !e.is_result_shaped() {
                return false;
            }
            let mangled = mangle_generic_name(
                "Result",
                &[resolve_type(ctx, ok), resolve_type(ctx, err)],
            );
            e.name == mangled
        }
        (Type::Result { ok: a_ok, err: a_err }, Type::Result { ok: e_ok, err: e_err }) => {
            compatible(ctx, a_ok, e_ok) && compatible(ctx, a_err, e_err)
        }

        // Unresolved spellings on either side: resolve, then retry once.
        (Type::GenericRef { .. }, _) | (Type::Unknown(_), _) => {
            let resolved = resolve_type(ctx, actual);
            resolved != *actual && compatible(ctx, &resolved, expected)
        }
        (_, Type::GenericRef { .. }) | (_, Type::Unknown(_)) => {
            let resolved = resolve_type(ctx, expected);
            resolved != *expected && compatible(ctx, actual, &resolved)
        }

        // Containers compare by containment.
        (
            Type::Array { base: a, size: an },
            Type::Array { base: e, size: en },
        ) => an == en && compatible(ctx, a, e),
        (Type::DynArray { base: a }, Type::DynArray { base: e }) => compatible(ctx, a, e),
        (Type::Pointer { pointee: a }, Type::Pointer { pointee: e }) => compatible(ctx, a, e),
        (Type::Iterator { element: a }, Type::Iterator { element: e }) => compatible(ctx, a, e),

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;
    use sushi_ast::{EnumType, EnumVariant};

    fn ctx_with_result() -> CompilerContext {
        let mut ctx = CompilerContext::new();
        ctx.install_enum(EnumType::new(
            "StdError",
            vec![EnumVariant::unit("Unknown")],
        ));
        let mut result = EnumType::new(
            "Result<i32, StdError>",
            vec![
                EnumVariant::new("Ok", vec![Type::I32]),
                EnumVariant::new("Err", vec![Type::Unknown("StdError".to_string())]),
            ],
        );
        result.generic_base = Some("Result".to_string());
        result.generic_args = Some(vec![Type::I32, Type::Unknown("StdError".to_string())]);
        ctx.install_enum(result);
        ctx
    }

    #[test]
    fn exact_equality() {
        let ctx = CompilerContext::new();
        assert!(compatible(&ctx, &Type::I32, &Type::I32));
        assert!(!compatible(&ctx, &Type::I32, &Type::I64));
    }

    #[test]
    fn poke_passes_as_peek() {
        let ctx = CompilerContext::new();
        let peek = Type::reference(Type::I32, RefMode::Peek);
        let poke = Type::reference(Type::I32, RefMode::Poke);
        assert!(compatible(&ctx, &poke, &peek));
        assert!(!compatible(&ctx, &peek, &poke));
    }

    #[test]
    fn result_sugar_matches_concrete_enum() {
        let ctx = ctx_with_result();
        let sugar = Type::result(Type::I32, Type::Unknown("StdError".to_string()));
        let concrete = ctx.named_type("Result<i32, StdError>").unwrap();
        assert!(compatible(&ctx, &sugar, &concrete));
        assert!(compatible(&ctx, &concrete, &sugar));
    }

    #[test]
    fn arrays_compare_by_size_and_base() {
        let ctx = CompilerContext::new();
        assert!(compatible(
            &ctx,
            &Type::array(Type::I32, 3),
            &Type::array(Type::I32, 3)
        ));
        assert!(!compatible(
            &ctx,
            &Type::array(Type::I32, 3),
            &Type::array(Type::I32, 4)
        ));
        assert!(compatible(
            &ctx,
            &Type::dyn_array(Type::STRING),
            &Type::dyn_array(Type::STRING)
        ));
    }

    #[test]
    fn unknown_resolves_before_comparison() {
        let ctx = ctx_with_result();
        let unknown = Type::Unknown("StdError".to_string());
        let concrete = ctx.named_type("StdError").unwrap();
        assert!(compatible(&ctx, &unknown, &concrete));
        assert!(compatible(&ctx, &concrete, &unknown));
        // Unresolvable names never become compatible.
        assert!(!compatible(
            &ctx,
            &Type::Unknown("Ghost".to_string()),
            &concrete
        ));
    }
}
