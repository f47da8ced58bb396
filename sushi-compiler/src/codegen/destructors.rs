//! Destructor engine: recursive cleanup IR for scope exit, early
//! return, explicit destroy, and the deep copies that keep constructor
//! arguments from sharing heap buffers. All descent is gated on
//! `needs_cleanup` so value types cost nothing.

use super::Emitter;
use crate::context::CompilerContext;
use inkwell::values::{BasicValueEnum, IntValue, PointerValue};
use inkwell::IntPredicate;
use std::collections::HashSet;
use sushi_ast::Type;

/// Like `Type::needs_cleanup`, but resolves interned nominal names through
/// the tables, cycle-safe. The only legal cycle edge (Own's pointer)
/// already answers true by itself.
pub(crate) fn needs_cleanup(sem: &CompilerContext, ty: &Type) -> bool {
    fn walk(sem: &CompilerContext, ty: &Type, visited: &mut HashSet<String>) -> bool {
        match ty {
            Type::DynArray { .. } | Type::Pointer { .. } => true,
            Type::Struct(s) => {
                if s.is_monomorph_of("Own")
                    || s.is_monomorph_of("HashMap")
                    || s.is_monomorph_of("List")
                {
                    return true;
                }
                if !visited.insert(s.name.clone()) {
                    return false;
                }
                s.fields.iter().any(|(_, f)| walk(sem, f, visited))
            }
            Type::Enum(e) => {
                if !visited.insert(e.name.clone()) {
                    return false;
                }
                e.variants
                    .iter()
                    .any(|v| v.associated_types.iter().any(|t| walk(sem, t, visited)))
            }
            Type::Array { base, .. } => walk(sem, base, visited),
            Type::Unknown(_) | Type::Result { .. } => {
                let resolved = crate::semantics::resolve::resolve_type(sem, ty);
                resolved != *ty && walk(sem, &resolved, visited)
            }
            _ => false,
        }
    }
    walk(sem, ty, &mut HashSet::new())
}

impl<'ctx> Emitter<'ctx, '_> {
    /// Cleanup for the innermost scope; call when a block ends normally.
    pub(crate) fn emit_scope_exit(&mut self) -> Result<(), String> {
        let names = self.scopes.leave();
        self.emit_cleanup_of(&names)
    }

    /// Cleanup for every open scope; call before an early return.
    pub(crate) fn emit_cleanup_all_scopes(&mut self) -> Result<(), String> {
        let names = self.scopes.all_live();
        self.emit_cleanup_of(&names)
    }

    fn emit_cleanup_of(&mut self, names: &[String]) -> Result<(), String> {
        for name in names {
            let Some((ptr, ty)) = self.variables.get(name).cloned() else {
                continue;
            };
            if needs_cleanup(self.sem, &ty) {
                self.emit_destructor(ptr, &ty)?;
            }
        }
        Ok(())
    }

    /// Recursive destruction of the value behind `ptr`.
    pub(crate) fn emit_destructor(
        &mut self,
        ptr: PointerValue<'ctx>,
        ty: &Type,
    ) -> Result<(), String> {
        let ty = self.resolve(ty);
        if !needs_cleanup(self.sem, &ty) {
            return Ok(());
        }
        match &ty {
            Type::DynArray { base } => self.destroy_buffer(ptr, base),
            Type::Struct(s) if s.is_monomorph_of("List") => {
                let base = s
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(Type::BLANK);
                self.destroy_buffer(ptr, &base)
            }
            Type::Struct(s) if s.is_monomorph_of("Own") => {
                let inner = s
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(Type::BLANK);
                let own_llvm = self.lower(&ty)?.into_struct_type();
                let slot = self
                    .builder
                    .build_struct_gep(ptr, 0, "own_slot")
                    .map_err(|e| e.to_string())?;
                let heap = self
                    .builder
                    .build_load("own_ptr")
                    .map_err(|e| e.to_string())?
                    .into_pointer_value();
                self.if_non_null(heap, |em, heap| {
                    let inner = em.resolve(&inner);
                    if needs_cleanup(em.sem, &inner) {
                        em.emit_destructor(heap, &inner)?;
                    }
                    let free = em.extern_fn("free")?;
                    em.builder
                        .build_call(free, &[heap.into()], "own_free")
                        .map_err(|e| e.to_string())?;
                    Ok(())
                })
            }
            Type::Struct(s) if s.is_monomorph_of("HashMap") => self.destroy_hashmap(ptr, s),
            Type::Struct(s) => {
                let llvm = self.lower(&ty)?.into_struct_type();
                for (index, (field_name, field_ty)) in s.fields.iter().enumerate() {
                    let field_ty = self.resolve(field_ty);
                    if !needs_cleanup(self.sem, &field_ty) {
                        continue;
                    }
                    let field_ptr = self
                        .builder
                        .build_struct_gep(ptr, index as u32, field_name)
                        .map_err(|e| e.to_string())?;
                    self.emit_destructor(field_ptr, &field_ty)?;
                }
                Ok(())
            }
            Type::Enum(e) => {
                let llvm = self.lower(&ty)?.into_struct_type();
                let tag_ptr = self
                    .builder
                    .build_struct_gep(ptr, 0, "tag_ptr")
                    .map_err(|e| e.to_string())?;
                let tag = self
                    .builder
                    .build_load("tag")
                    .map_err(|e| e.to_string())?
                    .into_int_value();

                let merge = self.append_block("enum_drop_done")?;
                let mut cases = Vec::new();
                let mut arms = Vec::new();
                for (index, variant) in e.variants.iter().enumerate() {
                    let variant_needs = variant
                        .associated_types
                        .iter()
                        .any(|t| needs_cleanup(self.sem, &self.resolve(t)));
                    if !variant_needs {
                        continue;
                    }
                    let block = self.append_block(&format!("drop_{}", variant.name))?;
                    cases.push((
                        self.context.i32_type().const_int(index as u64, false),
                        block,
                    ));
                    arms.push((index, variant.clone(), block));
                }
                self.builder
                    .build_switch(tag, merge, &cases)
                    .map_err(|e| e.to_string())?;

                for (_index, variant, block) in arms {
                    self.builder.position_at_end(block);
                    let payload_ty = self.variant_payload_type(&variant)?;
                    let data_ptr = self
                        .builder
                        .build_struct_gep(ptr, 1, "data_ptr")
                        .map_err(|e| e.to_string())?;
                    for (slot, slot_ty) in variant.associated_types.iter().enumerate() {
                        let slot_ty = self.resolve(slot_ty);
                        if !needs_cleanup(self.sem, &slot_ty) {
                            continue;
                        }
                        let slot_ptr = self
                            .builder
                            .build_struct_gep(data_ptr, slot as u32, "drop_slot")
                            .map_err(|e| e.to_string())?;
                        self.emit_destructor(slot_ptr, &slot_ty)?;
                    }
                    self.builder
                        .build_unconditional_branch(merge)
                        .map_err(|e| e.to_string())?;
                }
                self.builder.position_at_end(merge);
                Ok(())
            }
            Type::Array { base, size } => {
                let base = self.resolve(base);
                if !needs_cleanup(self.sem, &base) {
                    return Ok(());
                }
                let llvm = self.lower(&ty)?;
                for index in 0..*size {
                    let zero = self.context.i32_type().const_zero();
                    let idx = self.context.i32_type().const_int(index as u64, false);
                    let elem_ptr = unsafe {
                        self.builder
                            .build_in_bounds_gep(&[zero, idx], "arr_drop")
                            .map_err(|e| e.to_string())?
                    };
                    self.emit_destructor(elem_ptr, &base)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// { len, cap, data } cleanup shared by DynArray and List.
    fn destroy_buffer(&mut self, ptr: PointerValue<'ctx>, base: &Type) -> Result<(), String> {
        let triple = self.dyn_array_type();
        let data_slot = self
            .builder
            .build_struct_gep(ptr, 2, "data_slot")
            .map_err(|e| e.to_string())?;
        let data = self
            .builder
            .build_load("data")
            .map_err(|e| e.to_string())?
            .into_pointer_value();
        let len_slot = self
            .builder
            .build_struct_gep(ptr, 0, "len_slot")
            .map_err(|e| e.to_string())?;
        let len = self
            .builder
            .build_load("len")
            .map_err(|e| e.to_string())?
            .into_int_value();

        let base = self.resolve(base);
        self.if_non_null(data, |em, data| {
            if needs_cleanup(em.sem, &base) {
                let elem_llvm = em.lower(&base)?;
                em.emit_index_loop(len, |em, index| {
                    let elem_ptr = unsafe {
                        em.builder
                            .build_in_bounds_gep(&[index], "elem_drop")
                            .map_err(|e| e.to_string())?
                    };
                    em.emit_destructor(elem_ptr, &base)
                })?;
            }
            let free = em.extern_fn("free")?;
            em.builder
                .build_call(free, &[data.into()], "buf_free")
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    fn destroy_hashmap(
        &mut self,
        ptr: PointerValue<'ctx>,
        s: &sushi_ast::StructType,
    ) -> Result<(), String> {
        let args = s.generic_args.clone().unwrap_or_default();
        let key_ty = self.resolve(args.first().unwrap_or(&Type::I32));
        let value_ty = self.resolve(args.get(1).unwrap_or(&Type::I32));

        let map_llvm = self.lower(&Type::Struct(s.clone()))?.into_struct_type();
        let buckets_ptr = self
            .builder
            .build_struct_gep(ptr, 0, "buckets_ptr")
            .map_err(|e| e.to_string())?;
        let triple = self.dyn_array_type();
        let data_slot = self
            .builder
            .build_struct_gep(buckets_ptr, 2, "entries_slot")
            .map_err(|e| e.to_string())?;
        let entries = self
            .builder
            .build_load("entries")
            .map_err(|e| e.to_string())?
            .into_pointer_value();

        let capacity = self.hashmap_capacity(ptr, map_llvm)?;
        let entry_llvm = self.entry_type(&key_ty, &value_ty)?;
        let key_needs = needs_cleanup(self.sem, &key_ty);
        let value_needs = needs_cleanup(self.sem, &value_ty);

        self.if_non_null(entries, |em, entries| {
            if key_needs || value_needs {
                em.emit_index_loop(capacity, |em, index| {
                    let entry_ptr = unsafe {
                        em.builder
                            .build_in_bounds_gep(&[index], "entry")
                            .map_err(|e| e.to_string())?
                    };
                    let state_ptr = em
                        .builder
                        .build_struct_gep(entry_ptr, 2, "state_ptr")
                        .map_err(|e| e.to_string())?;
                    let state = em
                        .builder
                        .build_load("state")
                        .map_err(|e| e.to_string())?
                        .into_int_value();
                    let occupied = em
                        .builder
                        .build_int_compare(
                            IntPredicate::EQ,
                            state,
                            em.context.i8_type().const_int(1, false),
                            "occupied",
                        )
                        .map_err(|e| e.to_string())?;
                    let drop_block = em.append_block("entry_drop")?;
                    let next_block = em.append_block("entry_next")?;
                    em.builder
                        .build_conditional_branch(occupied, drop_block, next_block)
                        .map_err(|e| e.to_string())?;
                    em.builder.position_at_end(drop_block);
                    if key_needs {
                        let key_ptr = em
                            .builder
                            .build_struct_gep(entry_ptr, 0, "key_ptr")
                            .map_err(|e| e.to_string())?;
                        em.emit_destructor(key_ptr, &key_ty)?;
                    }
                    if value_needs {
                        let value_ptr = em
                            .builder
                            .build_struct_gep(entry_ptr, 1, "value_ptr")
                            .map_err(|e| e.to_string())?;
                        em.emit_destructor(value_ptr, &value_ty)?;
                    }
                    em.builder
                        .build_unconditional_branch(next_block)
                        .map_err(|e| e.to_string())?;
                    em.builder.position_at_end(next_block);
                    Ok(())
                })?;
            }
            let free = em.extern_fn("free")?;
            em.builder
                .build_call(free, &[entries.into()], "entries_free")
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// Load the capacity field, masking off the three reserved flag bits.
    pub(crate) fn hashmap_capacity(
        &mut self,
        map_ptr: PointerValue<'ctx>,
        map_llvm: inkwell::types::StructType<'ctx>,
    ) -> Result<IntValue<'ctx>, String> {
        let cap_ptr = self
            .builder
            .build_struct_gep(map_ptr, 2, "cap_ptr")
            .map_err(|e| e.to_string())?;
        let raw = self
            .builder
            .build_load("cap_raw")
            .map_err(|e| e.to_string())?
            .into_int_value();
        self.builder
            .build_and(
                raw,
                self.context.i32_type().const_int(0x1FFF_FFFF, false),
                "cap",
            )
            .map_err(|e| e.to_string())
    }

    /// Emit `if (ptr != null) { body }`.
    pub(crate) fn if_non_null<F>(&mut self, ptr: PointerValue<'ctx>, body: F) -> Result<(), String>
    where
        F: FnOnce(&mut Self, PointerValue<'ctx>) -> Result<(), String>,
    {
        let is_null = self
            .builder
            .build_is_null(ptr, "is_null")
            .map_err(|e| e.to_string())?;
        let then_block = self.append_block("non_null")?;
        let merge = self.append_block("null_merge")?;
        self.builder
            .build_conditional_branch(is_null, merge, then_block)
            .map_err(|e| e.to_string())?;
        self.builder.position_at_end(then_block);
        body(self, ptr)?;
        if !self.block_terminated() {
            self.builder
                .build_unconditional_branch(merge)
                .map_err(|e| e.to_string())?;
        }
        self.builder.position_at_end(merge);
        Ok(())
    }

    /// Emit `for (i = 0; i < count; i++) { body(i) }`.
    pub(crate) fn emit_index_loop<F>(
        &mut self,
        count: IntValue<'ctx>,
        body: F,
    ) -> Result<(), String>
    where
        F: FnOnce(&mut Self, IntValue<'ctx>) -> Result<(), String>,
    {
        let i32t = self.context.i32_type();
        let index_slot = self
            .builder
            .build_alloca(i32t, "loop_i")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(index_slot, i32t.const_zero())
            .map_err(|e| e.to_string())?;

        let header = self.append_block("idx_header")?;
        let body_block = self.append_block("idx_body")?;
        let exit = self.append_block("idx_exit")?;
        self.builder
            .build_unconditional_branch(header)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(header);
        let index = self
            .builder
            .build_load("i")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let in_range = self
            .builder
            .build_int_compare(IntPredicate::SLT, index, count, "i_lt")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_conditional_branch(in_range, body_block, exit)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(body_block);
        body(self, index)?;
        let next = self
            .builder
            .build_int_add(index, i32t.const_int(1, false), "i_next")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(index_slot, next)
            .map_err(|e| e.to_string())?;
        self.builder
            .build_unconditional_branch(header)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(exit);
        Ok(())
    }

    /// Deep copy a value so the receiver owns independent heap memory.
    pub(crate) fn emit_deep_copy(
        &mut self,
        value: BasicValueEnum<'ctx>,
        ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let ty = self.resolve(ty);
        if !needs_cleanup(self.sem, &ty) {
            return Ok(value);
        }
        match &ty {
            Type::DynArray { base } => {
                let base = self.resolve(base);
                let triple_value = value.into_struct_value();
                let len = self
                    .builder
                    .build_extract_value(triple_value, 0, "len")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let data = self
                    .builder
                    .build_extract_value(triple_value, 2, "data")
                    .map_err(|e| e.to_string())?
                    .into_pointer_value();

                let elem_size = super::layout::size_of(self.sem, &base);
                let len64 = self
                    .builder
                    .build_int_s_extend(len, self.context.i64_type(), "len64")
                    .map_err(|e| e.to_string())?;
                let bytes = self
                    .builder
                    .build_int_mul(
                        len64,
                        self.context.i64_type().const_int(elem_size, false),
                        "bytes",
                    )
                    .map_err(|e| e.to_string())?;
                let fresh = self.checked_malloc(bytes)?;

                if needs_cleanup(self.sem, &base) {
                    let elem_llvm = self.lower(&base)?;
                    let base_inner = base.clone();
                    self.emit_index_loop(len, |em, index| {
                        let src = unsafe {
                            em.builder
                                .build_in_bounds_gep(&[index], "src")
                                .map_err(|e| e.to_string())?
                        };
                        let dst = unsafe {
                            em.builder
                                .build_in_bounds_gep(&[index], "dst")
                                .map_err(|e| e.to_string())?
                        };
                        let elem = em
                            .builder
                            .build_load("elem")
                            .map_err(|e| e.to_string())?;
                        let copied = em.emit_deep_copy(elem, &base_inner)?;
                        em.builder
                            .build_store(dst, copied)
                            .map_err(|e| e.to_string())?;
                        Ok(())
                    })?;
                } else {
                    let memcpy = self.extern_fn("memcpy")?;
                    self.builder
                        .build_call(
                            memcpy,
                            &[fresh.into(), data.into(), bytes.into()],
                            "deep_cp",
                        )
                        .map_err(|e| e.to_string())?;
                }

                let undef = self.dyn_array_type().get_undef();
                let a = self
                    .builder
                    .build_insert_value(undef, len, 0, "cp_len")
                    .map_err(|e| e.to_string())?;
                let b = self
                    .builder
                    .build_insert_value(a, len, 1, "cp_cap")
                    .map_err(|e| e.to_string())?;
                let c = self
                    .builder
                    .build_insert_value(b, fresh, 2, "cp_data")
                    .map_err(|e| e.to_string())?;
                Ok(c.into_struct_value().into())
            }
            Type::Struct(s) if s.is_monomorph_of("Own") => {
                let inner = s
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .cloned()
                    .unwrap_or(Type::BLANK);
                let inner = self.resolve(&inner);
                let heap = self
                    .builder
                    .build_extract_value(value.into_struct_value(), 0, "own_ptr")
                    .map_err(|e| e.to_string())?
                    .into_pointer_value();
                let inner_llvm = self.lower(&inner)?;
                let pointee = self
                    .builder
                    .build_load("own_val")
                    .map_err(|e| e.to_string())?;
                let copied = self.emit_deep_copy(pointee, &inner)?;
                let size = super::layout::size_of(self.sem, &inner);
                let fresh = self
                    .checked_malloc(self.context.i64_type().const_int(size, false))?;
                self.builder
                    .build_store(fresh, copied)
                    .map_err(|e| e.to_string())?;
                let own_llvm = self.lower(&ty)?.into_struct_type();
                let built = self
                    .builder
                    .build_insert_value(own_llvm.get_undef(), fresh, 0, "own_cp")
                    .map_err(|e| e.to_string())?;
                Ok(built.into_struct_value().into())
            }
            Type::Struct(s) => {
                let mut out = value.into_struct_value();
                for (index, (field_name, field_ty)) in s.fields.iter().enumerate() {
                    let field_ty = self.resolve(field_ty);
                    if !needs_cleanup(self.sem, &field_ty) {
                        continue;
                    }
                    let field = self
                        .builder
                        .build_extract_value(out, index as u32, field_name)
                        .map_err(|e| e.to_string())?;
                    let copied = self.emit_deep_copy(field, &field_ty)?;
                    out = self
                        .builder
                        .build_insert_value(out, copied, index as u32, field_name)
                        .map_err(|e| e.to_string())?
                        .into_struct_value();
                }
                Ok(out.into())
            }
            // Enum payload sharing is broken up at construction sites; a
            // whole-enum deep copy is not needed by any current caller.
            _ => Ok(value),
        }
    }
}
