//! Auto-derived hashing: FNV-1a, 64-bit. Strings hash byte-by-byte;
//! scalars fold their widened value in; structs combine field hashes in
//! declaration order; enums hash the tag first, then the live variant's
//! payload fields.

use crate::codegen::Emitter;
use inkwell::values::{BasicValueEnum, IntValue};
use sushi_ast::{BuiltinKind, Type};

pub(crate) const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
pub(crate) const FNV_PRIME: u64 = 1099511628211;

impl<'ctx> Emitter<'ctx, '_> {
    /// Hash a value of any Hashable type into a u64.
    pub(crate) fn emit_hash_value(
        &mut self,
        value: BasicValueEnum<'ctx>,
        ty: &Type,
    ) -> Result<IntValue<'ctx>, String> {
        let i64t = self.context.i64_type();
        let offset = i64t.const_int(FNV_OFFSET_BASIS, false);
        self.fold_hash(offset, value, ty)
    }

    /// `h = (h ^ contribution(value)) * PRIME`, recursing into aggregates.
    fn fold_hash(
        &mut self,
        hash: IntValue<'ctx>,
        value: BasicValueEnum<'ctx>,
        ty: &Type,
    ) -> Result<IntValue<'ctx>, String> {
        let ty = self.resolve(ty);
        match &ty {
            Type::Builtin(BuiltinKind::String) => self.fold_string_hash(hash, value),
            Type::Builtin(kind) if kind.is_integer() || *kind == BuiltinKind::Bool => {
                let wide = if kind.is_signed_integer() {
                    self.builder
                        .build_int_s_extend_or_bit_cast(
                            value.into_int_value(),
                            self.context.i64_type(),
                            "hash_word",
                        )
                        .map_err(|e| e.to_string())?
                } else {
                    self.builder
                        .build_int_z_extend_or_bit_cast(
                            value.into_int_value(),
                            self.context.i64_type(),
                            "hash_word",
                        )
                        .map_err(|e| e.to_string())?
                };
                self.mix(hash, wide)
            }
            Type::Struct(s) => {
                let mut hash = hash;
                for (index, (field_name, field_ty)) in s.fields.iter().enumerate() {
                    let field = self
                        .builder
                        .build_extract_value(value.into_struct_value(), index as u32, field_name)
                        .map_err(|e| e.to_string())?;
                    hash = self.fold_hash(hash, field, field_ty)?;
                }
                Ok(hash)
            }
            Type::Enum(e) => {
                // Tag first.
                let tag = self.extract_enum_tag(value.into_struct_value())?;
                let tag_wide = self
                    .builder
                    .build_int_z_extend(tag, self.context.i64_type(), "tag_wide")
                    .map_err(|er| er.to_string())?;
                let tagged = self.mix(hash, tag_wide)?;

                let has_payload = e.variants.iter().any(|v| !v.associated_types.is_empty());
                if !has_payload {
                    return Ok(tagged);
                }

                // Then the live variant's payload, merged through a phi.
                let merge = self.append_block("hash_merge")?;
                let mut incoming: Vec<(
                    IntValue<'ctx>,
                    inkwell::basic_block::BasicBlock<'ctx>,
                )> = Vec::new();
                let mut cases = Vec::new();
                let default_block = self.append_block("hash_default")?;
                for (index, variant) in e.variants.iter().enumerate() {
                    if variant.associated_types.is_empty() {
                        continue;
                    }
                    let block = self.append_block(&format!("hash_{}", variant.name))?;
                    cases.push((
                        self.context.i32_type().const_int(index as u64, false),
                        block,
                    ));
                }
                self.builder
                    .build_switch(tag, default_block, &cases)
                    .map_err(|er| er.to_string())?;

                let mut case_index = 0usize;
                for (index, variant) in e.variants.iter().enumerate() {
                    if variant.associated_types.is_empty() {
                        continue;
                    }
                    let block = cases[case_index].1;
                    case_index += 1;
                    self.builder.position_at_end(block);
                    let mut variant_hash = tagged;
                    for (slot, slot_ty) in variant.associated_types.iter().enumerate() {
                        let payload = self.extract_enum_payload(
                            value.into_struct_value(),
                            e,
                            index,
                            slot,
                        )?;
                        variant_hash = self.fold_hash(variant_hash, payload, slot_ty)?;
                    }
                    let end = self.builder.get_insert_block().ok_or("no block")?;
                    incoming.push((variant_hash, end));
                    self.builder
                        .build_unconditional_branch(merge)
                        .map_err(|er| er.to_string())?;
                }

                self.builder.position_at_end(default_block);
                incoming.push((tagged, default_block));
                self.builder
                    .build_unconditional_branch(merge)
                    .map_err(|er| er.to_string())?;

                self.builder.position_at_end(merge);
                let phi = self
                    .builder
                    .build_phi(self.context.i64_type(), "hash_value")
                    .map_err(|er| er.to_string())?;
                for (value, block) in &incoming {
                    phi.add_incoming(&[(value, *block)]);
                }
                Ok(phi.as_basic_value().into_int_value())
            }
            other => Err(format!("internal: `{}` is not hashable", other)),
        }
    }

    fn mix(
        &mut self,
        hash: IntValue<'ctx>,
        word: IntValue<'ctx>,
    ) -> Result<IntValue<'ctx>, String> {
        let xored = self
            .builder
            .build_xor(hash, word, "hash_xor")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_int_mul(
                xored,
                self.context.i64_type().const_int(FNV_PRIME, false),
                "hash_mul",
            )
            .map_err(|e| e.to_string())
    }

    fn fold_string_hash(
        &mut self,
        hash: IntValue<'ctx>,
        value: BasicValueEnum<'ctx>,
    ) -> Result<IntValue<'ctx>, String> {
        let data = self
            .builder
            .build_extract_value(value.into_struct_value(), 0, "hash_data")
            .map_err(|e| e.to_string())?
            .into_pointer_value();
        let size = self
            .builder
            .build_extract_value(value.into_struct_value(), 1, "hash_size")
            .map_err(|e| e.to_string())?
            .into_int_value();

        let hash_slot = self
            .builder
            .build_alloca(self.context.i64_type(), "hash_acc")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(hash_slot, hash)
            .map_err(|e| e.to_string())?;

        self.emit_index_loop(size, |em, index| {
            let byte_ptr = unsafe {
                em.builder
                    .build_in_bounds_gep(data, &[index], "hash_byte_ptr")
                    .map_err(|e| e.to_string())?
            };
            let byte = em
                .builder
                .build_load(byte_ptr, "hash_byte")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let wide = em
                .builder
                .build_int_z_extend(byte, em.context.i64_type(), "byte_wide")
                .map_err(|e| e.to_string())?;
            let current = em
                .builder
                .build_load(hash_slot, "hash_cur")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let mixed = em.mix(current, wide)?;
            em.builder
                .build_store(hash_slot, mixed)
                .map_err(|e| e.to_string())?;
            Ok(())
        })?;

        Ok(self
            .builder
            .build_load(hash_slot, "hash_final")
            .map_err(|e| e.to_string())?
            .into_int_value())
    }
}

#[cfg(test)]
mod tests {
    use super::{FNV_OFFSET_BASIS, FNV_PRIME};

    // Reference implementation the emitted IR mirrors.
    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        for b in bytes {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    #[test]
    fn fnv_constants_are_the_64_bit_pair() {
        assert_eq!(FNV_OFFSET_BASIS, 14695981039346656037);
        assert_eq!(FNV_PRIME, 1099511628211);
    }

    #[test]
    fn fnv_reference_values() {
        // Known FNV-1a vectors.
        assert_eq!(fnv1a(b""), 14695981039346656037);
        assert_eq!(fnv1a(b"a"), 12638187200555641996);
    }
}
