//! Semantic type → LLVM type. Named types are cached; creation
//! forward-declares an opaque struct under the name and populates the body
//! afterwards, which breaks recursive-type cycles.

use super::Emitter;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, StructType};
use inkwell::AddressSpace;
use sushi_ast::{BuiltinKind, Type};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn ptr_ty(&self) -> inkwell::types::PointerType<'ctx> {
        self.context.i8_type().ptr_type(AddressSpace::default())
    }

    /// Fat pointer string: { i8* data, i32 size_bytes }.
    pub(crate) fn string_type(&self) -> StructType<'ctx> {
        self.context.struct_type(
            &[self.ptr_ty().into(), self.context.i32_type().into()],
            false,
        )
    }

    /// { i32 len, i32 cap, T* data } — dynamic arrays; the same shape
    /// serves iterators as { i32 current, i32 length, T* data }.
    pub(crate) fn dyn_array_type(&self) -> StructType<'ctx> {
        self.context.struct_type(
            &[
                self.context.i32_type().into(),
                self.context.i32_type().into(),
                self.ptr_ty().into(),
            ],
            false,
        )
    }

    /// HashMap bucket entry: { K, V, i8 state }.
    pub(crate) fn entry_type(
        &mut self,
        key: &Type,
        value: &Type,
    ) -> Result<StructType<'ctx>, String> {
        let key_ty = self.lower(key)?;
        let value_ty = self.lower(value)?;
        Ok(self.context.struct_type(
            &[key_ty, value_ty, self.context.i8_type().into()],
            false,
        ))
    }

    /// Lower a semantic type to its LLVM representation.
    pub(crate) fn lower(&mut self, ty: &Type) -> Result<BasicTypeEnum<'ctx>, String> {
        Ok(match ty {
            Type::Builtin(kind) => match kind {
                BuiltinKind::I8 | BuiltinKind::U8 => self.context.i8_type().into(),
                BuiltinKind::I16 | BuiltinKind::U16 => self.context.i16_type().into(),
                BuiltinKind::I32 | BuiltinKind::U32 => self.context.i32_type().into(),
                BuiltinKind::I64 | BuiltinKind::U64 => self.context.i64_type().into(),
                BuiltinKind::F32 => self.context.f32_type().into(),
                BuiltinKind::F64 => self.context.f64_type().into(),
                // bool is i8 in memory; comparisons produce i1 and coerce.
                BuiltinKind::Bool => self.context.i8_type().into(),
                BuiltinKind::String => self.string_type().into(),
                BuiltinKind::Blank => self.context.i8_type().into(),
                BuiltinKind::Stdin
                | BuiltinKind::Stdout
                | BuiltinKind::Stderr
                | BuiltinKind::File => self.ptr_ty().into(),
            },
            Type::Array { base, size } => {
                let elem = self.lower(base)?;
                elem.array_type(*size).into()
            }
            Type::DynArray { .. } | Type::Iterator { .. } => self.dyn_array_type().into(),
            Type::Reference { .. } | Type::Pointer { .. } => self.ptr_ty().into(),
            Type::Struct(s) => self.lower_named_struct(s)?.into(),
            Type::Enum(e) => self.lower_named_enum(e)?.into(),
            Type::Result { .. } => {
                let resolved = self.resolve(ty);
                match resolved {
                    Type::Enum(e) => self.lower_named_enum(&e)?.into(),
                    other => {
                        return Err(format!(
                            "internal: Result `{}` has no concrete enum",
                            other
                        ))
                    }
                }
            }
            Type::Unknown(name) => {
                // Interned nominal reference (pointee position); resolve
                // through the sealed tables.
                let resolved = self.resolve(ty);
                if resolved == *ty {
                    return Err(format!("internal: unresolved type `{}` in emission", name));
                }
                self.lower(&resolved)?
            }
            Type::GenericRef { .. } | Type::TypeParam(_) => {
                return Err(format!(
                    "internal: unmonomorphized type `{}` reached the emitter",
                    ty
                ))
            }
        })
    }

    /// Named struct with cached identity. HashMap monomorphs get their
    /// special bucket layout; Own and List lower from their
    /// fields like any other struct.
    fn lower_named_struct(
        &mut self,
        s: &sushi_ast::StructType,
    ) -> Result<StructType<'ctx>, String> {
        if let Some(cached) = self.named_types.get(&s.name) {
            return Ok(*cached);
        }
        let opaque = self.context.opaque_struct_type(&s.name);
        self.named_types.insert(s.name.clone(), opaque);

        let field_types: Vec<BasicTypeEnum> = if s.is_monomorph_of("HashMap") {
            // { { i32, i32, Entry* } buckets, i32 size, i32 capacity,
            //   i32 tombstones }
            vec![
                self.dyn_array_type().into(),
                self.context.i32_type().into(),
                self.context.i32_type().into(),
                self.context.i32_type().into(),
            ]
        } else {
            let mut lowered = Vec::with_capacity(s.fields.len());
            for (_, field_ty) in &s.fields {
                lowered.push(self.lower(field_ty)?);
            }
            lowered
        };
        opaque.set_body(&field_types, false);
        Ok(opaque)
    }

    /// Named enum: { i32 tag, [payload × i8] }; payload may be zero bytes.
    fn lower_named_enum(&mut self, e: &sushi_ast::EnumType) -> Result<StructType<'ctx>, String> {
        if let Some(cached) = self.named_types.get(&e.name) {
            return Ok(*cached);
        }
        let opaque = self.context.opaque_struct_type(&e.name);
        self.named_types.insert(e.name.clone(), opaque);

        let payload = super::layout::enum_payload_size(self.sem, e) as u32;
        let data = self.context.i8_type().array_type(payload);
        opaque.set_body(
            &[self.context.i32_type().into(), data.into()],
            false,
        );
        Ok(opaque)
    }

    /// The LLVM payload tuple type of one enum variant, used to read and
    /// write the data area through an opaque pointer.
    pub(crate) fn variant_payload_type(
        &mut self,
        variant: &sushi_ast::EnumVariant,
    ) -> Result<StructType<'ctx>, String> {
        let mut fields = Vec::with_capacity(variant.associated_types.len());
        for ty in &variant.associated_types {
            fields.push(self.lower(ty)?);
        }
        Ok(self.context.struct_type(&fields, true))
    }

    /// The LLVM function type for a Sushi signature: declared parameter
    /// types in order, returning the wrapped Result enum by value.
    pub(crate) fn function_type(
        &mut self,
        params: &[sushi_ast::Param],
        return_type: &Type,
    ) -> Result<inkwell::types::FunctionType<'ctx>, String> {
        let mut param_types: Vec<BasicMetadataTypeEnum> = Vec::with_capacity(params.len());
        for param in params {
            let resolved = self.resolve(&param.ty);
            param_types.push(self.lower(&resolved)?.into());
        }
        let ret = self.lower(return_type)?;
        Ok(match ret {
            BasicTypeEnum::IntType(t) => t.fn_type(&param_types, false),
            BasicTypeEnum::FloatType(t) => t.fn_type(&param_types, false),
            BasicTypeEnum::ArrayType(t) => t.fn_type(&param_types, false),
            BasicTypeEnum::StructType(t) => t.fn_type(&param_types, false),
            BasicTypeEnum::PointerType(t) => t.fn_type(&param_types, false),
            BasicTypeEnum::VectorType(t) => t.fn_type(&param_types, false),
            BasicTypeEnum::ScalableVectorType(t) => t.fn_type(&param_types, false),
        })
    }
}
