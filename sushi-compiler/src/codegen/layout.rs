//! Size and alignment computation, x86-64 ABI: each field padded up to its
//! alignment, the whole aggregate padded to its max alignment. The enum
//! tag (i32) aligns every enum to 4 bytes; enum payload bytes are the
//! maximum over variants of the sum of the payload type sizes.

use crate::context::CompilerContext;
use sushi_ast::{BuiltinKind, Type};

const POINTER_SIZE: u64 = 8;

pub fn align_to(offset: u64, align: u64) -> u64 {
    if align == 0 {
        return offset;
    }
    offset.div_ceil(align) * align
}

pub fn size_of(sem: &CompilerContext, ty: &Type) -> u64 {
    match ty {
        Type::Builtin(kind) => builtin_size(*kind),
        Type::Array { base, size } => size_of(sem, base) * (*size as u64),
        // { i32 len, i32 cap, T* data }
        Type::DynArray { .. } => 16,
        // { i32 current, i32 length, T* data }
        Type::Iterator { .. } => 16,
        Type::Reference { .. } | Type::Pointer { .. } => POINTER_SIZE,
        Type::Struct(s) => {
            let mut offset = 0u64;
            let mut max_align = 1u64;
            for (_, field_ty) in &s.fields {
                let align = align_of(sem, field_ty);
                max_align = max_align.max(align);
                offset = align_to(offset, align);
                offset += size_of(sem, field_ty);
            }
            align_to(offset.max(1), max_align)
        }
        Type::Enum(e) => {
            let payload = enum_payload_size(sem, e);
            align_to(4 + payload, 4)
        }
        Type::Result { .. } | Type::Unknown(_) => {
            let resolved = crate::semantics::resolve::resolve_type(sem, ty);
            if resolved == *ty {
                // Unresolvable here is a compiler bug; keep a pointer-sized
                // answer rather than recursing forever.
                POINTER_SIZE
            } else {
                size_of(sem, &resolved)
            }
        }
        Type::GenericRef { .. } | Type::TypeParam(_) => POINTER_SIZE,
    }
}

pub fn align_of(sem: &CompilerContext, ty: &Type) -> u64 {
    match ty {
        Type::Builtin(kind) => builtin_align(*kind),
        Type::Array { base, .. } => align_of(sem, base),
        Type::DynArray { .. } | Type::Iterator { .. } => 8,
        Type::Reference { .. } | Type::Pointer { .. } => POINTER_SIZE,
        Type::Struct(s) => s
            .fields
            .iter()
            .map(|(_, f)| align_of(sem, f))
            .max()
            .unwrap_or(1),
        // The i32 tag fixes enum alignment.
        Type::Enum(_) => 4,
        Type::Result { .. } | Type::Unknown(_) => {
            let resolved = crate::semantics::resolve::resolve_type(sem, ty);
            if resolved == *ty {
                POINTER_SIZE
            } else {
                align_of(sem, &resolved)
            }
        }
        Type::GenericRef { .. } | Type::TypeParam(_) => POINTER_SIZE,
    }
}

/// Max over variants of the summed payload sizes; zero for payload-free
/// enums.
pub fn enum_payload_size(sem: &CompilerContext, e: &sushi_ast::EnumType) -> u64 {
    e.variants
        .iter()
        .map(|v| {
            v.associated_types
                .iter()
                .map(|t| size_of(sem, t))
                .sum::<u64>()
        })
        .max()
        .unwrap_or(0)
}

fn builtin_size(kind: BuiltinKind) -> u64 {
    match kind {
        BuiltinKind::I8 | BuiltinKind::U8 | BuiltinKind::Bool => 1,
        BuiltinKind::I16 | BuiltinKind::U16 => 2,
        BuiltinKind::I32 | BuiltinKind::U32 | BuiltinKind::F32 => 4,
        BuiltinKind::I64 | BuiltinKind::U64 | BuiltinKind::F64 => 8,
        // { i8* data, i32 size } padded to pointer alignment
        BuiltinKind::String => 16,
        BuiltinKind::Blank => 1,
        BuiltinKind::Stdin | BuiltinKind::Stdout | BuiltinKind::Stderr | BuiltinKind::File => {
            POINTER_SIZE
        }
    }
}

fn builtin_align(kind: BuiltinKind) -> u64 {
    match kind {
        BuiltinKind::I8 | BuiltinKind::U8 | BuiltinKind::Bool | BuiltinKind::Blank => 1,
        BuiltinKind::I16 | BuiltinKind::U16 => 2,
        BuiltinKind::I32 | BuiltinKind::U32 | BuiltinKind::F32 => 4,
        BuiltinKind::I64 | BuiltinKind::U64 | BuiltinKind::F64 => 8,
        BuiltinKind::String => 8,
        BuiltinKind::Stdin | BuiltinKind::Stdout | BuiltinKind::Stderr | BuiltinKind::File => {
            POINTER_SIZE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sushi_ast::{EnumType, EnumVariant, StructType};

    fn sem() -> CompilerContext {
        CompilerContext::new()
    }

    #[test]
    fn scalar_sizes() {
        let sem = sem();
        assert_eq!(size_of(&sem, &Type::I32), 4);
        assert_eq!(size_of(&sem, &Type::F64), 8);
        assert_eq!(size_of(&sem, &Type::BOOL), 1);
        assert_eq!(size_of(&sem, &Type::STRING), 16);
    }

    #[test]
    fn struct_layout_pads_fields() {
        let sem = sem();
        // { i8, i64 } -> i64 at offset 8, total 16
        let s = StructType::new(
            "Padded",
            vec![
                ("a".into(), Type::Builtin(BuiltinKind::I8)),
                ("b".into(), Type::I64),
            ],
        );
        assert_eq!(size_of(&sem, &Type::Struct(s)), 16);
    }

    #[test]
    fn hashmap_layout_is_32_bytes() {
        let sem = sem();
        // { {i32,i32,ptr}, i32, i32, i32 } -> 16 + 12 pad to 8-align = 32
        let s = StructType::new(
            "HashMap<string, i32>",
            vec![
                ("buckets".into(), Type::dyn_array(Type::I32)),
                ("size".into(), Type::I32),
                ("capacity".into(), Type::I32),
                ("tombstones".into(), Type::I32),
            ],
        );
        assert_eq!(size_of(&sem, &Type::Struct(s)), 32);
    }

    #[test]
    fn enum_payload_is_max_variant_sum() {
        let sem = sem();
        let e = EnumType::new(
            "Shape",
            vec![
                EnumVariant::unit("Empty"),
                EnumVariant::new("Pair", vec![Type::I32, Type::I32]),
                EnumVariant::new("Wide", vec![Type::F64, Type::I32]),
            ],
        );
        assert_eq!(enum_payload_size(&sem, &e), 12);
        // tag + payload, padded to 4
        assert_eq!(size_of(&sem, &Type::Enum(e)), 16);
    }

    #[test]
    fn payload_free_enum_is_just_the_tag() {
        let sem = sem();
        let e = EnumType::new(
            "Mode",
            vec![EnumVariant::unit("A"), EnumVariant::unit("B")],
        );
        assert_eq!(enum_payload_size(&sem, &e), 0);
        assert_eq!(size_of(&sem, &Type::Enum(e)), 4);
        assert_eq!(align_of(&sem, &Type::Enum(e)), 4);
    }

    #[test]
    fn arrays_multiply_element_size() {
        let sem = sem();
        assert_eq!(size_of(&sem, &Type::array(Type::I32, 5)), 20);
        assert_eq!(size_of(&sem, &Type::dyn_array(Type::STRING)), 16);
    }
}
