//! HashMap<K, V> runtime: open addressing with linear probing and
//! tombstones over Entry { K, V, i8 state } buckets (0 empty, 1 occupied,
//! 2 tombstone). First growth allocates 8 buckets; later growths go to the
//! next prime ≥ 2× capacity once load factor (size + tombstones) / capacity
//! exceeds 0.75. Keys hash through the derived FNV-1a path. The capacity
//! word keeps its top three reserved flag bits; reads mask, writes
//! preserve.
//!
//! The probe/insert/grow bodies are emitted once per monomorph as internal
//! helper functions and called from every use site.

use crate::codegen::destructors::needs_cleanup;
use crate::codegen::Emitter;
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue};
use inkwell::IntPredicate;
use sushi_ast::{BuiltinKind, Expression, StructType, Type};

const CAPACITY_MASK: u64 = 0x1FFF_FFFF;

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_hashmap_method(
        &mut self,
        receiver: &Expression,
        map_ty: &StructType,
        method: &str,
        args: &[Expression],
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let generic_args = map_ty
            .generic_args
            .clone()
            .ok_or("internal: HashMap without arguments")?;
        let key_ty = self.resolve(&generic_args[0]);
        let value_ty = self.resolve(&generic_args[1]);
        let (map_ptr, _) = self.emit_place(receiver)?;
        let map_llvm = self.lower(&Type::Struct(map_ty.clone()))?.into_struct_type();

        match method {
            "insert" => {
                let key = self.emit_expression(&args[0])?;
                let value = self.emit_expression(&args[1])?;
                let insert = self.hashmap_insert_helper(map_ty, &key_ty, &value_ty)?;
                self.builder
                    .build_call(
                        insert,
                        &[map_ptr.into(), key.into(), value.into()],
                        "map_insert",
                    )
                    .map_err(|e| e.to_string())?;
                Ok(self.unit_value())
            }
            "get" => {
                let key = self.emit_expression(&args[0])?;
                let lookup = self.hashmap_lookup_helper(map_ty, &key_ty, &value_ty)?;
                let index = self
                    .builder
                    .build_call(lookup, &[map_ptr.into(), key.into()], "map_slot")
                    .map_err(|e| e.to_string())?
                    .try_as_basic_value()
                    .basic()
                    .ok_or("lookup returned no value")?
                    .into_int_value();

                let Type::Enum(maybe_enum) = self.resolve(return_ty) else {
                    return Err("internal: get without Maybe return".to_string());
                };
                let found = self
                    .builder
                    .build_int_compare(
                        IntPredicate::SGE,
                        index,
                        self.context.i32_type().const_zero(),
                        "found",
                    )
                    .map_err(|e| e.to_string())?;

                let some_block = self.append_block("map_get_some")?;
                let none_block = self.append_block("map_get_none")?;
                let merge = self.append_block("map_get_merge")?;
                self.builder
                    .build_conditional_branch(found, some_block, none_block)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(some_block);
                let entries = self.map_entries(map_ptr, map_llvm)?;
                let entry_llvm = self.entry_type(&key_ty, &value_ty)?;
                let entry_ptr = unsafe {
                    self.builder
                        .build_in_bounds_gep(&[index], "hit_entry")
                        .map_err(|e| e.to_string())?
                };
                let value_ptr = self
                    .builder
                    .build_struct_gep(entry_ptr, 1, "hit_value_ptr")
                    .map_err(|e| e.to_string())?;
                let value_llvm = self.lower(&value_ty)?;
                let value = self
                    .builder
                    .build_load("hit_value")
                    .map_err(|e| e.to_string())?;
                let some = self.emit_enum_value(&maybe_enum, 0, &[value])?;
                let some_end = self.builder.get_insert_block().ok_or("no block")?;
                self.builder
                    .build_unconditional_branch(merge)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(none_block);
                let none = self.emit_enum_value(&maybe_enum, 1, &[])?;
                let none_end = self.builder.get_insert_block().ok_or("no block")?;
                self.builder
                    .build_unconditional_branch(merge)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(merge);
                let llvm = self.lower(&Type::Enum(maybe_enum))?;
                let phi = self
                    .builder
                    .build_phi(llvm, "map_get")
                    .map_err(|e| e.to_string())?;
                phi.add_incoming(&[(&some, some_end), (&none, none_end)]);
                Ok(phi.as_basic_value())
            }
            "remove" => {
                let key = self.emit_expression(&args[0])?;
                let lookup = self.hashmap_lookup_helper(map_ty, &key_ty, &value_ty)?;
                let index = self
                    .builder
                    .build_call(lookup, &[map_ptr.into(), key.into()], "rm_slot")
                    .map_err(|e| e.to_string())?
                    .try_as_basic_value()
                    .basic()
                    .ok_or("lookup returned no value")?
                    .into_int_value();
                let found = self
                    .builder
                    .build_int_compare(
                        IntPredicate::SGE,
                        index,
                        self.context.i32_type().const_zero(),
                        "rm_found",
                    )
                    .map_err(|e| e.to_string())?;

                let hit = self.append_block("rm_hit")?;
                let done = self.append_block("rm_done")?;
                self.builder
                    .build_conditional_branch(found, hit, done)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(hit);
                let entries = self.map_entries(map_ptr, map_llvm)?;
                let entry_llvm = self.entry_type(&key_ty, &value_ty)?;
                let entry_ptr = unsafe {
                    self.builder
                        .build_in_bounds_gep(&[index], "rm_entry")
                        .map_err(|e| e.to_string())?
                };
                let state_ptr = self
                    .builder
                    .build_struct_gep(entry_ptr, 2, "rm_state")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_store(state_ptr, self.context.i8_type().const_int(2, false))
                    .map_err(|e| e.to_string())?;
                self.bump_map_counter(map_ptr, map_llvm, 1, -1)?;
                self.bump_map_counter(map_ptr, map_llvm, 3, 1)?;
                self.builder
                    .build_unconditional_branch(done)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(done);
                Ok(self.unit_value())
            }
            "size" => {
                let size_ptr = self
                    .builder
                    .build_struct_gep(map_ptr, 1, "size_ptr")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_load("size")
                    .map_err(|e| e.to_string())
            }
            "clear" => {
                let entries = self.map_entries(map_ptr, map_llvm)?;
                let capacity = self.hashmap_capacity(map_ptr, map_llvm)?;
                let entry_llvm = self.entry_type(&key_ty, &value_ty)?;
                let key_needs = needs_cleanup(self.sem, &key_ty);
                let value_needs = needs_cleanup(self.sem, &value_ty);
                let key_ty = key_ty.clone();
                let value_ty = value_ty.clone();
                self.if_non_null(entries, |em, entries| {
                    em.emit_index_loop(capacity, |em, index| {
                        let entry_ptr = unsafe {
                            em.builder
                                .build_in_bounds_gep(&[index], "clr_entry")
                                .map_err(|e| e.to_string())?
                        };
                        if key_needs || value_needs {
                            let state_ptr = em
                                .builder
                                .build_struct_gep(entry_ptr, 2, "clr_state")
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
                                    "clr_occ",
                                )
                                .map_err(|e| e.to_string())?;
                            let drop_block = em.append_block("clr_drop")?;
                            let next = em.append_block("clr_next")?;
                            em.builder
                                .build_conditional_branch(occupied, drop_block, next)
                                .map_err(|e| e.to_string())?;
                            em.builder.position_at_end(drop_block);
                            if key_needs {
                                let key_ptr = em
                                    .builder
                                    .build_struct_gep(entry_ptr, 0, "clr_key")
                                    .map_err(|e| e.to_string())?;
                                em.emit_destructor(key_ptr, &key_ty)?;
                            }
                            if value_needs {
                                let value_ptr = em
                                    .builder
                                    .build_struct_gep(entry_ptr, 1, "clr_val")
                                    .map_err(|e| e.to_string())?;
                                em.emit_destructor(value_ptr, &value_ty)?;
                            }
                            em.builder
                                .build_unconditional_branch(next)
                                .map_err(|e| e.to_string())?;
                            em.builder.position_at_end(next);
                        }
                        let state_ptr = em
                            .builder
                            .build_struct_gep(entry_ptr, 2, "reset_state")
                            .map_err(|e| e.to_string())?;
                        em.builder
                            .build_store(state_ptr, em.context.i8_type().const_zero())
                            .map_err(|e| e.to_string())?;
                        Ok(())
                    })
                })?;
                self.store_map_counter(map_ptr, map_llvm, 1, 0)?;
                self.store_map_counter(map_ptr, map_llvm, 3, 0)?;
                Ok(self.unit_value())
            }
            "keys" | "values" | "entries" => {
                // Iterator over the bucket array; foreach skips
                // non-occupied states.
                let entries = self.map_entries(map_ptr, map_llvm)?;
                let capacity = self.hashmap_capacity(map_ptr, map_llvm)?;
                let undef = self.dyn_array_type().get_undef();
                let a = self
                    .builder
                    .build_insert_value(
                        undef,
                        self.context.i32_type().const_zero(),
                        0,
                        "it_cur",
                    )
                    .map_err(|e| e.to_string())?;
                let b = self
                    .builder
                    .build_insert_value(a, capacity, 1, "it_len")
                    .map_err(|e| e.to_string())?;
                let c = self
                    .builder
                    .build_insert_value(b, entries, 2, "it_data")
                    .map_err(|e| e.to_string())?;
                Ok(c.into_struct_value().into())
            }
            "destroy" => {
                let (ptr, ty) = self.emit_place(receiver)?;
                self.emit_destructor(ptr, &ty)?;
                let zero = map_llvm.const_zero();
                self.builder
                    .build_store(ptr, zero)
                    .map_err(|e| e.to_string())?;
                self.note_destroyed(receiver);
                Ok(self.unit_value())
            }
            other => Err(format!("internal: unknown HashMap method `{}`", other)),
        }
    }

    fn map_entries(
        &mut self,
        map_ptr: PointerValue<'ctx>,
        map_llvm: inkwell::types::StructType<'ctx>,
    ) -> Result<PointerValue<'ctx>, String> {
        let buckets_ptr = self
            .builder
            .build_struct_gep(map_ptr, 0, "buckets")
            .map_err(|e| e.to_string())?;
        let data_slot = self
            .builder
            .build_struct_gep(buckets_ptr, 2, "entries_slot")
            .map_err(|e| e.to_string())?;
        Ok(self
            .builder
            .build_load("entries")
            .map_err(|e| e.to_string())?
            .into_pointer_value())
    }

    fn bump_map_counter(
        &mut self,
        map_ptr: PointerValue<'ctx>,
        map_llvm: inkwell::types::StructType<'ctx>,
        field: u32,
        delta: i64,
    ) -> Result<(), String> {
        let slot = self
            .builder
            .build_struct_gep(map_ptr, field, "counter")
            .map_err(|e| e.to_string())?;
        let current = self
            .builder
            .build_load("counter_cur")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let next = self
            .builder
            .build_int_add(
                current,
                self.context.i32_type().const_int(delta as u64, true),
                "counter_next",
            )
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(slot, next)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn store_map_counter(
        &mut self,
        map_ptr: PointerValue<'ctx>,
        map_llvm: inkwell::types::StructType<'ctx>,
        field: u32,
        value: u64,
    ) -> Result<(), String> {
        let slot = self
            .builder
            .build_struct_gep(map_ptr, field, "counter")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(slot, self.context.i32_type().const_int(value, false))
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Key equality inside the probe loop: genuine structural equality.
    fn emit_keys_equal(
        &mut self,
        left: BasicValueEnum<'ctx>,
        right: BasicValueEnum<'ctx>,
        key_ty: &Type,
    ) -> Result<IntValue<'ctx>, String> {
        self.emit_value_equality(left, right, key_ty)
    }

    /// Structural equality of two values of the same type, as an i1.
    /// Scalars compare directly (ordered compare for floats), strings go
    /// through strcmp, structs compare field by field, enums compare the
    /// tag and then the live variant's payload, arrays compare element by
    /// element.
    pub(crate) fn emit_value_equality(
        &mut self,
        left: BasicValueEnum<'ctx>,
        right: BasicValueEnum<'ctx>,
        ty: &Type,
    ) -> Result<IntValue<'ctx>, String> {
        let ty = self.resolve(ty);
        match &ty {
            Type::Builtin(BuiltinKind::String) => {
                let cmp =
                    self.emit_string_cmp(left.into_struct_value(), right.into_struct_value())?;
                self.builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        cmp,
                        self.context.i32_type().const_zero(),
                        "keys_equal",
                    )
                    .map_err(|e| e.to_string())
            }
            Type::Builtin(kind) if kind.is_integer() || *kind == BuiltinKind::Bool => self
                .builder
                .build_int_compare(
                    IntPredicate::EQ,
                    left.into_int_value(),
                    right.into_int_value(),
                    "keys_equal",
                )
                .map_err(|e| e.to_string()),
            Type::Builtin(kind) if kind.is_float() => self
                .builder
                .build_float_compare(
                    inkwell::FloatPredicate::OEQ,
                    left.into_float_value(),
                    right.into_float_value(),
                    "keys_equal",
                )
                .map_err(|e| e.to_string()),
            Type::Reference { .. } | Type::Pointer { .. } => {
                let i64t = self.context.i64_type();
                let l = self
                    .builder
                    .build_ptr_to_int(left.into_pointer_value(), i64t, "l_addr")
                    .map_err(|e| e.to_string())?;
                let r = self
                    .builder
                    .build_ptr_to_int(right.into_pointer_value(), i64t, "r_addr")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_int_compare(IntPredicate::EQ, l, r, "keys_equal")
                    .map_err(|e| e.to_string())
            }
            Type::Struct(s) => {
                let mut result = self.context.bool_type().const_int(1, false);
                for (index, (field_name, field_ty)) in s.fields.iter().enumerate() {
                    let l = self
                        .builder
                        .build_extract_value(
                            left.into_struct_value(),
                            index as u32,
                            &format!("{}_l", field_name),
                        )
                        .map_err(|e| e.to_string())?;
                    let r = self
                        .builder
                        .build_extract_value(
                            right.into_struct_value(),
                            index as u32,
                            &format!("{}_r", field_name),
                        )
                        .map_err(|e| e.to_string())?;
                    let field_equal = self.emit_value_equality(l, r, field_ty)?;
                    result = self
                        .builder
                        .build_and(result, field_equal, &format!("eq_with_{}", field_name))
                        .map_err(|e| e.to_string())?;
                }
                Ok(result)
            }
            Type::Enum(e) => self.emit_enum_equality(left, right, e),
            Type::Array { base, size } => {
                let mut result = self.context.bool_type().const_int(1, false);
                for index in 0..*size {
                    let l = self
                        .builder
                        .build_extract_value(left.into_array_value(), index, "elem_l")
                        .map_err(|e| e.to_string())?;
                    let r = self
                        .builder
                        .build_extract_value(right.into_array_value(), index, "elem_r")
                        .map_err(|e| e.to_string())?;
                    let elem_equal = self.emit_value_equality(l, r, base)?;
                    result = self
                        .builder
                        .build_and(result, elem_equal, "eq_with_elem")
                        .map_err(|e| e.to_string())?;
                }
                Ok(result)
            }
            Type::DynArray { base } => self.emit_dyn_array_equality(left, right, base),
            other => Err(format!("internal: no equality for `{}`", other)),
        }
    }

    /// Tags equal AND, when tags match, the live variant's payload slots
    /// equal. The payload check switches on the left tag; with unequal
    /// tags its result is masked off by the tag comparison.
    fn emit_enum_equality(
        &mut self,
        left: BasicValueEnum<'ctx>,
        right: BasicValueEnum<'ctx>,
        e: &sushi_ast::EnumType,
    ) -> Result<IntValue<'ctx>, String> {
        let left_value = left.into_struct_value();
        let right_value = right.into_struct_value();
        let tag_l = self.extract_enum_tag(left_value)?;
        let tag_r = self.extract_enum_tag(right_value)?;
        let tags_equal = self
            .builder
            .build_int_compare(IntPredicate::EQ, tag_l, tag_r, "tags_equal")
            .map_err(|er| er.to_string())?;

        let has_payload = e.variants.iter().any(|v| !v.associated_types.is_empty());
        if !has_payload {
            return Ok(tags_equal);
        }

        let merge = self.append_block("enum_eq_merge")?;
        let default_block = self.append_block("enum_eq_default")?;
        let mut cases = Vec::new();
        for (index, variant) in e.variants.iter().enumerate() {
            if variant.associated_types.is_empty() {
                continue;
            }
            let block = self.append_block(&format!("eq_{}", variant.name))?;
            cases.push((
                self.context.i32_type().const_int(index as u64, false),
                block,
            ));
        }
        self.builder
            .build_switch(tag_l, default_block, &cases)
            .map_err(|er| er.to_string())?;

        let mut incoming: Vec<(IntValue<'ctx>, inkwell::basic_block::BasicBlock<'ctx>)> =
            Vec::new();
        let mut case_index = 0usize;
        for (index, variant) in e.variants.iter().enumerate() {
            if variant.associated_types.is_empty() {
                continue;
            }
            let block = cases[case_index].1;
            case_index += 1;
            self.builder.position_at_end(block);
            let mut payload_equal = self.context.bool_type().const_int(1, false);
            for (slot, slot_ty) in variant.associated_types.iter().enumerate() {
                let l = self.extract_enum_payload(left_value, e, index, slot)?;
                let r = self.extract_enum_payload(right_value, e, index, slot)?;
                let slot_equal = self.emit_value_equality(l, r, slot_ty)?;
                payload_equal = self
                    .builder
                    .build_and(payload_equal, slot_equal, "payload_eq")
                    .map_err(|er| er.to_string())?;
            }
            let end = self.builder.get_insert_block().ok_or("no block")?;
            incoming.push((payload_equal, end));
            self.builder
                .build_unconditional_branch(merge)
                .map_err(|er| er.to_string())?;
        }

        // Unit variants carry nothing; tags matching is enough.
        self.builder.position_at_end(default_block);
        incoming.push((
            self.context.bool_type().const_int(1, false),
            default_block,
        ));
        self.builder
            .build_unconditional_branch(merge)
            .map_err(|er| er.to_string())?;

        self.builder.position_at_end(merge);
        let phi = self
            .builder
            .build_phi(self.context.bool_type(), "payload_equal")
            .map_err(|er| er.to_string())?;
        for (value, block) in &incoming {
            phi.add_incoming(&[(value, *block)]);
        }
        self.builder
            .build_and(
                tags_equal,
                phi.as_basic_value().into_int_value(),
                "enum_equal",
            )
            .map_err(|er| er.to_string())
    }

    /// Lengths equal AND, when they are, every element pair equal.
    fn emit_dyn_array_equality(
        &mut self,
        left: BasicValueEnum<'ctx>,
        right: BasicValueEnum<'ctx>,
        base: &Type,
    ) -> Result<IntValue<'ctx>, String> {
        let base = self.resolve(base);
        let len_l = self
            .builder
            .build_extract_value(left.into_struct_value(), 0, "len_l")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let len_r = self
            .builder
            .build_extract_value(right.into_struct_value(), 0, "len_r")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let data_l = self
            .builder
            .build_extract_value(left.into_struct_value(), 2, "data_l")
            .map_err(|e| e.to_string())?
            .into_pointer_value();
        let data_r = self
            .builder
            .build_extract_value(right.into_struct_value(), 2, "data_r")
            .map_err(|e| e.to_string())?
            .into_pointer_value();

        let lens_equal = self
            .builder
            .build_int_compare(IntPredicate::EQ, len_l, len_r, "lens_equal")
            .map_err(|e| e.to_string())?;
        let acc = self
            .builder
            .build_alloca(self.context.bool_type(), "arr_eq")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(acc, lens_equal)
            .map_err(|e| e.to_string())?;

        let compare_block = self.append_block("arr_eq_elems")?;
        let merge = self.append_block("arr_eq_merge")?;
        self.builder
            .build_conditional_branch(lens_equal, compare_block, merge)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(compare_block);
        let elem_llvm = self.lower(&base)?;
        let base_inner = base.clone();
        self.emit_index_loop(len_l, |em, index| {
            let l_ptr = unsafe {
                em.builder
                    .build_in_bounds_gep(&[index], "eq_l_ptr")
                    .map_err(|e| e.to_string())?
            };
            let r_ptr = unsafe {
                em.builder
                    .build_in_bounds_gep(&[index], "eq_r_ptr")
                    .map_err(|e| e.to_string())?
            };
            let l = em
                .builder
                .build_load("eq_l")
                .map_err(|e| e.to_string())?;
            let r = em
                .builder
                .build_load("eq_r")
                .map_err(|e| e.to_string())?;
            let elem_equal = em.emit_value_equality(l, r, &base_inner)?;
            let current = em
                .builder
                .build_load("arr_eq_cur")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let next = em
                .builder
                .build_and(current, elem_equal, "arr_eq_next")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(acc, next)
                .map_err(|e| e.to_string())?;
            Ok(())
        })?;
        self.builder
            .build_unconditional_branch(merge)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(merge);
        Ok(self
            .builder
            .build_load("arr_eq_final")
            .map_err(|e| e.to_string())?
            .into_int_value())
    }

    /// `__sushi_next_prime(n)`: the smallest prime ≥ n (trial division).
    fn next_prime_helper(&mut self) -> Result<FunctionValue<'ctx>, String> {
        let i32t = self.context.i32_type();
        let fn_type = i32t.fn_type(&[i32t.into()], false);
        self.define_helper("__sushi_next_prime", fn_type, |em, f| {
            let i32t = em.context.i32_type();
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let n = f.get_nth_param(0).ok_or("missing param")?.into_int_value();

            let candidate_slot = em
                .builder
                .build_alloca(i32t, "candidate")
                .map_err(|e| e.to_string())?;
            let lt2 = em
                .builder
                .build_int_compare(IntPredicate::SLT, n, i32t.const_int(2, false), "lt2")
                .map_err(|e| e.to_string())?;
            let start = em
                .builder
                .build_select(lt2, i32t.const_int(2, false), n, "start")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(candidate_slot, start)
                .map_err(|e| e.to_string())?;

            let outer = em.context.append_basic_block(f, "outer");
            let inner_init = em.context.append_basic_block(f, "inner_init");
            let inner_test = em.context.append_basic_block(f, "inner_test");
            let inner_check = em.context.append_basic_block(f, "inner_check");
            let inner_step = em.context.append_basic_block(f, "inner_step");
            let composite = em.context.append_basic_block(f, "composite");
            let prime = em.context.append_basic_block(f, "prime");

            em.builder
                .build_unconditional_branch(outer)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(outer);
            em.builder
                .build_unconditional_branch(inner_init)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(inner_init);
            let divisor_slot = em
                .builder
                .build_alloca(i32t, "divisor")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(divisor_slot, i32t.const_int(2, false))
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(inner_test)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(inner_test);
            let candidate = em
                .builder
                .build_load("cand")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let divisor = em
                .builder
                .build_load("div")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let square = em
                .builder
                .build_int_mul(divisor, divisor, "div_sq")
                .map_err(|e| e.to_string())?;
            let keep_testing = em
                .builder
                .build_int_compare(IntPredicate::SLE, square, candidate, "keep_testing")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_conditional_branch(keep_testing, inner_check, prime)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(inner_check);
            let remainder = em
                .builder
                .build_int_signed_rem(candidate, divisor, "rem")
                .map_err(|e| e.to_string())?;
            let divides = em
                .builder
                .build_int_compare(IntPredicate::EQ, remainder, i32t.const_zero(), "divides")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_conditional_branch(divides, composite, inner_step)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(inner_step);
            let next_divisor = em
                .builder
                .build_int_add(divisor, i32t.const_int(1, false), "div_next")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(divisor_slot, next_divisor)
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(inner_test)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(composite);
            let bumped = em
                .builder
                .build_int_add(candidate, i32t.const_int(1, false), "cand_next")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(candidate_slot, bumped)
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(outer)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(prime);
            em.builder
                .build_return(Some(&candidate))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// `{Map}__lookup(map*, K) -> i32`: probe for an occupied entry with an
    /// equal key; -1 when absent. Probing is linear and bounded by one full
    /// sweep of the table.
    fn hashmap_lookup_helper(
        &mut self,
        map_ty: &StructType,
        key_ty: &Type,
        value_ty: &Type,
    ) -> Result<FunctionValue<'ctx>, String> {
        let name = format!(
            "{}__lookup",
            crate::context::sanitize_type_key(&map_ty.name)
        );
        if let Some(f) = self.helpers.get(&name) {
            return Ok(*f);
        }
        let i32t = self.context.i32_type();
        let key_llvm = self.lower(key_ty)?;
        let fn_type = i32t.fn_type(&[self.ptr_ty().into(), key_llvm.into()], false);
        let map_llvm = self.lower(&Type::Struct(map_ty.clone()))?.into_struct_type();
        let entry_llvm = self.entry_type(key_ty, value_ty)?;
        let key_ty = key_ty.clone();

        self.define_helper(&name, fn_type, move |em, f| {
            let i32t = em.context.i32_type();
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let map_ptr = f.get_nth_param(0).ok_or("missing param")?.into_pointer_value();
            let key = f.get_nth_param(1).ok_or("missing param")?;

            let capacity = em.hashmap_capacity(map_ptr, map_llvm)?;
            let empty_map = em
                .builder
                .build_int_compare(IntPredicate::SLE, capacity, i32t.const_zero(), "no_cap")
                .map_err(|e| e.to_string())?;
            let miss = em.context.append_basic_block(f, "miss");
            let probe_init = em.context.append_basic_block(f, "probe_init");
            em.builder
                .build_conditional_branch(empty_map, miss, probe_init)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(probe_init);
            let entries = em.map_entries(map_ptr, map_llvm)?;
            let hash = em.emit_hash_value(key, &key_ty)?;
            let cap64 = em
                .builder
                .build_int_z_extend(capacity, em.context.i64_type(), "cap64")
                .map_err(|e| e.to_string())?;
            let start64 = em
                .builder
                .build_int_unsigned_rem(hash, cap64, "start64")
                .map_err(|e| e.to_string())?;
            let start = em
                .builder
                .build_int_truncate(start64, i32t, "start")
                .map_err(|e| e.to_string())?;

            let index_slot = em
                .builder
                .build_alloca(i32t, "probe_idx")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(index_slot, start)
                .map_err(|e| e.to_string())?;
            let steps_slot = em
                .builder
                .build_alloca(i32t, "probe_steps")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(steps_slot, i32t.const_zero())
                .map_err(|e| e.to_string())?;

            let probe = em.context.append_basic_block(f, "probe");
            let check_state = em.context.append_basic_block(f, "check_state");
            let compare_key = em.context.append_basic_block(f, "compare_key");
            let advance = em.context.append_basic_block(f, "advance");
            let hit = em.context.append_basic_block(f, "hit");
            em.builder
                .build_unconditional_branch(probe)
                .map_err(|e| e.to_string())?;

            // One full sweep at most.
            em.builder.position_at_end(probe);
            let steps = em
                .builder
                .build_load("steps")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let swept = em
                .builder
                .build_int_compare(IntPredicate::SGE, steps, capacity, "swept")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_conditional_branch(swept, miss, check_state)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(check_state);
            let index = em
                .builder
                .build_load("idx")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let entry_ptr = unsafe {
                em.builder
                    .build_in_bounds_gep(&[index], "probe_entry")
                    .map_err(|e| e.to_string())?
            };
            let state_ptr = em
                .builder
                .build_struct_gep(entry_ptr, 2, "probe_state")
                .map_err(|e| e.to_string())?;
            let state = em
                .builder
                .build_load("state")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let is_empty = em
                .builder
                .build_int_compare(
                    IntPredicate::EQ,
                    state,
                    em.context.i8_type().const_zero(),
                    "probe_empty",
                )
                .map_err(|e| e.to_string())?;
            let occupied_or_tomb = em.context.append_basic_block(f, "occ_or_tomb");
            em.builder
                .build_conditional_branch(is_empty, miss, occupied_or_tomb)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(occupied_or_tomb);
            let is_occupied = em
                .builder
                .build_int_compare(
                    IntPredicate::EQ,
                    state,
                    em.context.i8_type().const_int(1, false),
                    "probe_occ",
                )
                .map_err(|e| e.to_string())?;
            em.builder
                .build_conditional_branch(is_occupied, compare_key, advance)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(compare_key);
            let key_llvm = em.lower(&key_ty)?;
            let key_ptr = em
                .builder
                .build_struct_gep(entry_ptr, 0, "probe_key_ptr")
                .map_err(|e| e.to_string())?;
            let stored = em
                .builder
                .build_load("probe_key")
                .map_err(|e| e.to_string())?;
            let equal = em.emit_keys_equal(stored, key, &key_ty)?;
            em.builder
                .build_conditional_branch(equal, hit, advance)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(advance);
            let plus_one = em
                .builder
                .build_int_add(index, i32t.const_int(1, false), "idx_plus")
                .map_err(|e| e.to_string())?;
            let wrapped = em
                .builder
                .build_int_signed_rem(plus_one, capacity, "idx_wrap")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(index_slot, wrapped)
                .map_err(|e| e.to_string())?;
            let stepped = em
                .builder
                .build_int_add(steps, i32t.const_int(1, false), "steps_plus")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(steps_slot, stepped)
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(probe)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(hit);
            em.builder
                .build_return(Some(&index))
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(miss);
            em.builder
                .build_return(Some(&i32t.const_all_ones()))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// `{Map}__insert(map*, K, V)`: update in place on key equality,
    /// otherwise claim the first free slot, growing first when the load
    /// factor crosses 0.75.
    fn hashmap_insert_helper(
        &mut self,
        map_ty: &StructType,
        key_ty: &Type,
        value_ty: &Type,
    ) -> Result<FunctionValue<'ctx>, String> {
        let name = format!(
            "{}__insert",
            crate::context::sanitize_type_key(&map_ty.name)
        );
        if let Some(f) = self.helpers.get(&name) {
            return Ok(*f);
        }
        let key_llvm = self.lower(key_ty)?;
        let value_llvm = self.lower(value_ty)?;
        let fn_type = self.context.void_type().fn_type(
            &[self.ptr_ty().into(), key_llvm.into(), value_llvm.into()],
            false,
        );
        let map_llvm = self.lower(&Type::Struct(map_ty.clone()))?.into_struct_type();
        let entry_llvm = self.entry_type(key_ty, value_ty)?;
        let grow = self.hashmap_grow_helper(map_ty, key_ty, value_ty)?;
        let key_ty = key_ty.clone();

        self.define_helper(&name, fn_type, move |em, f| {
            let i32t = em.context.i32_type();
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let map_ptr = f.get_nth_param(0).ok_or("missing param")?.into_pointer_value();
            let key = f.get_nth_param(1).ok_or("missing param")?;
            let value = f.get_nth_param(2).ok_or("missing param")?;

            // Grow when capacity is zero or (size + tombstones + 1) would
            // push the load factor past 3/4.
            let capacity = em.hashmap_capacity(map_ptr, map_llvm)?;
            let size_ptr = em
                .builder
                .build_struct_gep(map_ptr, 1, "size_ptr")
                .map_err(|e| e.to_string())?;
            let size = em
                .builder
                .build_load("size")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let tomb_ptr = em
                .builder
                .build_struct_gep(map_ptr, 3, "tomb_ptr")
                .map_err(|e| e.to_string())?;
            let tombstones = em
                .builder
                .build_load("tombs")
                .map_err(|e| e.to_string())?
                .into_int_value();

            let no_capacity = em
                .builder
                .build_int_compare(IntPredicate::SLE, capacity, i32t.const_zero(), "cap0")
                .map_err(|e| e.to_string())?;
            let used = em
                .builder
                .build_int_add(size, tombstones, "used")
                .map_err(|e| e.to_string())?;
            let used_next = em
                .builder
                .build_int_add(used, i32t.const_int(1, false), "used_next")
                .map_err(|e| e.to_string())?;
            let lhs = em
                .builder
                .build_int_mul(used_next, i32t.const_int(4, false), "used4")
                .map_err(|e| e.to_string())?;
            let rhs = em
                .builder
                .build_int_mul(capacity, i32t.const_int(3, false), "cap3")
                .map_err(|e| e.to_string())?;
            let over_load = em
                .builder
                .build_int_compare(IntPredicate::SGT, lhs, rhs, "over_load")
                .map_err(|e| e.to_string())?;
            let must_grow = em
                .builder
                .build_or(no_capacity, over_load, "must_grow")
                .map_err(|e| e.to_string())?;

            let grow_block = em.context.append_basic_block(f, "grow");
            let probe_init = em.context.append_basic_block(f, "probe_init");
            em.builder
                .build_conditional_branch(must_grow, grow_block, probe_init)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(grow_block);
            em.builder
                .build_call(grow, &[map_ptr.into()], "grow_call")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(probe_init)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(probe_init);
            let capacity = em.hashmap_capacity(map_ptr, map_llvm)?;
            let entries = em.map_entries(map_ptr, map_llvm)?;
            let hash = em.emit_hash_value(key, &key_ty)?;
            let cap64 = em
                .builder
                .build_int_z_extend(capacity, em.context.i64_type(), "cap64")
                .map_err(|e| e.to_string())?;
            let start64 = em
                .builder
                .build_int_unsigned_rem(hash, cap64, "start64")
                .map_err(|e| e.to_string())?;
            let start = em
                .builder
                .build_int_truncate(start64, i32t, "start")
                .map_err(|e| e.to_string())?;
            let index_slot = em
                .builder
                .build_alloca(i32t, "ins_idx")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(index_slot, start)
                .map_err(|e| e.to_string())?;

            let probe = em.context.append_basic_block(f, "probe");
            let occupied_case = em.context.append_basic_block(f, "occupied");
            let update = em.context.append_basic_block(f, "update");
            let advance = em.context.append_basic_block(f, "advance");
            let claim = em.context.append_basic_block(f, "claim");
            let done = em.context.append_basic_block(f, "done");
            em.builder
                .build_unconditional_branch(probe)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(probe);
            let index = em
                .builder
                .build_load("idx")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let entry_ptr = unsafe {
                em.builder
                    .build_in_bounds_gep(&[index], "ins_entry")
                    .map_err(|e| e.to_string())?
            };
            let state_ptr = em
                .builder
                .build_struct_gep(entry_ptr, 2, "ins_state")
                .map_err(|e| e.to_string())?;
            let state = em
                .builder
                .build_load("state")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let is_occupied = em
                .builder
                .build_int_compare(
                    IntPredicate::EQ,
                    state,
                    em.context.i8_type().const_int(1, false),
                    "is_occ",
                )
                .map_err(|e| e.to_string())?;
            em.builder
                .build_conditional_branch(is_occupied, occupied_case, claim)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(occupied_case);
            let key_ptr = em
                .builder
                .build_struct_gep(entry_ptr, 0, "ins_key_ptr")
                .map_err(|e| e.to_string())?;
            let key_llvm = em.lower(&key_ty)?;
            let stored = em
                .builder
                .build_load("ins_key")
                .map_err(|e| e.to_string())?;
            let equal = em.emit_keys_equal(stored, key, &key_ty)?;
            em.builder
                .build_conditional_branch(equal, update, advance)
                .map_err(|e| e.to_string())?;

            // Same key: update in place, size unchanged.
            em.builder.position_at_end(update);
            let value_ptr = em
                .builder
                .build_struct_gep(entry_ptr, 1, "upd_value")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(value_ptr, value)
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(done)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(advance);
            let plus_one = em
                .builder
                .build_int_add(index, i32t.const_int(1, false), "idx_plus")
                .map_err(|e| e.to_string())?;
            let wrapped = em
                .builder
                .build_int_signed_rem(plus_one, capacity, "idx_wrap")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(index_slot, wrapped)
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(probe)
                .map_err(|e| e.to_string())?;

            // Empty or tombstone slot: claim it.
            em.builder.position_at_end(claim);
            let was_tomb = em
                .builder
                .build_int_compare(
                    IntPredicate::EQ,
                    state,
                    em.context.i8_type().const_int(2, false),
                    "was_tomb",
                )
                .map_err(|e| e.to_string())?;
            let new_key_ptr = key_ptr_or(em, entry_llvm, entry_ptr)?;
            em.builder
                .build_store(new_key_ptr, key)
                .map_err(|e| e.to_string())?;
            let value_slot = em
                .builder
                .build_struct_gep(entry_ptr, 1, "new_value")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(value_slot, value)
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(state_ptr, em.context.i8_type().const_int(1, false))
                .map_err(|e| e.to_string())?;
            em.bump_map_counter(map_ptr, map_llvm, 1, 1)?;
            // Claiming a tombstone retires it.
            let tomb_delta = em
                .builder
                .build_select(
                    was_tomb,
                    i32t.const_int(u64::MAX, true),
                    i32t.const_zero(),
                    "tomb_delta",
                )
                .map_err(|e| e.to_string())?
                .into_int_value();
            let tomb_ptr = em
                .builder
                .build_struct_gep(map_ptr, 3, "tomb_ptr2")
                .map_err(|e| e.to_string())?;
            let tombs = em
                .builder
                .build_load("tombs2")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let new_tombs = em
                .builder
                .build_int_add(tombs, tomb_delta, "tombs_new")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(tomb_ptr, new_tombs)
                .map_err(|e| e.to_string())?;
            em.builder
                .build_unconditional_branch(done)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(done);
            em.builder.build_return(None).map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// `{Map}__grow(map*)`: allocate the next-prime table (8 first), zero
    /// its states, re-insert every occupied entry, free the old buckets.
    fn hashmap_grow_helper(
        &mut self,
        map_ty: &StructType,
        key_ty: &Type,
        value_ty: &Type,
    ) -> Result<FunctionValue<'ctx>, String> {
        let name = format!("{}__grow", crate::context::sanitize_type_key(&map_ty.name));
        if let Some(f) = self.helpers.get(&name) {
            return Ok(*f);
        }
        let fn_type = self
            .context
            .void_type()
            .fn_type(&[self.ptr_ty().into()], false);
        let map_llvm = self.lower(&Type::Struct(map_ty.clone()))?.into_struct_type();
        let entry_llvm = self.entry_type(key_ty, value_ty)?;
        let entry_size = {
            // { K, V, i8 } padded like any struct.
            let entry_struct = sushi_ast::StructType::new(
                "entry",
                vec![
                    ("key".to_string(), key_ty.clone()),
                    ("value".to_string(), value_ty.clone()),
                    ("state".to_string(), Type::Builtin(BuiltinKind::U8)),
                ],
            );
            crate::codegen::layout::size_of(self.sem, &Type::Struct(entry_struct))
        };
        let next_prime = self.next_prime_helper()?;
        let key_ty = key_ty.clone();

        self.define_helper(&name, fn_type, move |em, f| {
            let i32t = em.context.i32_type();
            let i64t = em.context.i64_type();
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let map_ptr = f.get_nth_param(0).ok_or("missing param")?.into_pointer_value();

            let old_capacity = em.hashmap_capacity(map_ptr, map_llvm)?;
            let old_entries = em.map_entries(map_ptr, map_llvm)?;

            // new_cap = old == 0 ? 8 : next_prime(2 * old)
            let doubled = em
                .builder
                .build_int_mul(old_capacity, i32t.const_int(2, false), "doubled")
                .map_err(|e| e.to_string())?;
            let primed = em
                .builder
                .build_call(next_prime, &[doubled.into()], "primed")
                .map_err(|e| e.to_string())?
                .try_as_basic_value()
                .basic()
                .ok_or("next_prime returned no value")?
                .into_int_value();
            let was_empty = em
                .builder
                .build_int_compare(
                    IntPredicate::SLE,
                    old_capacity,
                    i32t.const_zero(),
                    "was_empty",
                )
                .map_err(|e| e.to_string())?;
            let new_capacity = em
                .builder
                .build_select(was_empty, i32t.const_int(8, false), primed, "new_cap")
                .map_err(|e| e.to_string())?
                .into_int_value();

            let cap64 = em
                .builder
                .build_int_s_extend(new_capacity, i64t, "cap64")
                .map_err(|e| e.to_string())?;
            let bytes = em
                .builder
                .build_int_mul(cap64, i64t.const_int(entry_size, false), "bytes")
                .map_err(|e| e.to_string())?;
            let fresh = em.checked_malloc(bytes)?;

            // All states start empty.
            em.emit_index_loop(new_capacity, |em, index| {
                let entry_ptr = unsafe {
                    em.builder
                        .build_in_bounds_gep(&[index], "zero_entry")
                        .map_err(|e| e.to_string())?
                };
                let state_ptr = em
                    .builder
                    .build_struct_gep(entry_ptr, 2, "zero_state")
                    .map_err(|e| e.to_string())?;
                em.builder
                    .build_store(state_ptr, em.context.i8_type().const_zero())
                    .map_err(|e| e.to_string())?;
                Ok(())
            })?;

            // Install the new table before rehashing into it.
            let buckets_ptr = em
                .builder
                .build_struct_gep(map_ptr, 0, "buckets")
                .map_err(|e| e.to_string())?;
            let data_slot = em
                .builder
                .build_struct_gep(buckets_ptr, 2, "bk_data")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(data_slot, fresh)
                .map_err(|e| e.to_string())?;
            let len_slot = em
                .builder
                .build_struct_gep(buckets_ptr, 0, "bk_len")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(len_slot, new_capacity)
                .map_err(|e| e.to_string())?;
            // Preserve the reserved flag bits of the capacity word.
            let cap_ptr = em
                .builder
                .build_struct_gep(map_ptr, 2, "cap_ptr")
                .map_err(|e| e.to_string())?;
            let raw = em
                .builder
                .build_load("cap_raw")
                .map_err(|e| e.to_string())?
                .into_int_value();
            let flags = em
                .builder
                .build_and(
                    raw,
                    i32t.const_int(!CAPACITY_MASK & 0xFFFF_FFFF, false),
                    "cap_flags",
                )
                .map_err(|e| e.to_string())?;
            let combined = em
                .builder
                .build_or(flags, new_capacity, "cap_combined")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(cap_ptr, combined)
                .map_err(|e| e.to_string())?;
            em.store_map_counter(map_ptr, map_llvm, 3, 0)?;

            // Rehash occupied entries from the old table.
            em.if_non_null(old_entries, |em, old_entries| {
                em.emit_index_loop(old_capacity, |em, index| {
                    let entry_ptr = unsafe {
                        em.builder
                            .build_in_bounds_gep(&[index], "old_entry")
                            .map_err(|e| e.to_string())?
                    };
                    let state_ptr = em
                        .builder
                        .build_struct_gep(entry_ptr, 2, "old_state")
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
                            "old_occ",
                        )
                        .map_err(|e| e.to_string())?;
                    let rehash = em.append_block("rehash")?;
                    let next = em.append_block("rehash_next")?;
                    em.builder
                        .build_conditional_branch(occupied, rehash, next)
                        .map_err(|e| e.to_string())?;

                    em.builder.position_at_end(rehash);
                    let key_llvm = em.lower(&key_ty)?;
                    let key_ptr = em
                        .builder
                        .build_struct_gep(entry_ptr, 0, "old_key_ptr")
                        .map_err(|e| e.to_string())?;
                    let key = em
                        .builder
                        .build_load("old_key")
                        .map_err(|e| e.to_string())?;

                    // Probe the fresh table for the first empty slot.
                    let hash = em.emit_hash_value(key, &key_ty)?;
                    let cap64 = em
                        .builder
                        .build_int_z_extend(new_capacity, em.context.i64_type(), "ncap64")
                        .map_err(|e| e.to_string())?;
                    let start64 = em
                        .builder
                        .build_int_unsigned_rem(hash, cap64, "nstart64")
                        .map_err(|e| e.to_string())?;
                    let start = em
                        .builder
                        .build_int_truncate(start64, em.context.i32_type(), "nstart")
                        .map_err(|e| e.to_string())?;
                    let slot_idx = em
                        .builder
                        .build_alloca(em.context.i32_type(), "nidx")
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_store(slot_idx, start)
                        .map_err(|e| e.to_string())?;

                    let nprobe = em.append_block("nprobe")?;
                    let nclaim = em.append_block("nclaim")?;
                    let nadvance = em.append_block("nadvance")?;
                    em.builder
                        .build_unconditional_branch(nprobe)
                        .map_err(|e| e.to_string())?;

                    em.builder.position_at_end(nprobe);
                    let idx = em
                        .builder
                        .build_load("nidx_cur")
                        .map_err(|e| e.to_string())?
                        .into_int_value();
                    let fresh_entry = unsafe {
                        em.builder
                            .build_in_bounds_gep(&[idx], "fresh_entry")
                            .map_err(|e| e.to_string())?
                    };
                    let fresh_state_ptr = em
                        .builder
                        .build_struct_gep(fresh_entry, 2, "fresh_state")
                        .map_err(|e| e.to_string())?;
                    let fresh_state = em
                        .builder
                        .build_load("fstate")
                        .map_err(|e| e.to_string())?
                        .into_int_value();
                    let slot_free = em
                        .builder
                        .build_int_compare(
                            IntPredicate::EQ,
                            fresh_state,
                            em.context.i8_type().const_zero(),
                            "slot_free",
                        )
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_conditional_branch(slot_free, nclaim, nadvance)
                        .map_err(|e| e.to_string())?;

                    em.builder.position_at_end(nadvance);
                    let plus = em
                        .builder
                        .build_int_add(
                            idx,
                            em.context.i32_type().const_int(1, false),
                            "nplus",
                        )
                        .map_err(|e| e.to_string())?;
                    let wrapped = em
                        .builder
                        .build_int_signed_rem(plus, new_capacity, "nwrap")
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_store(slot_idx, wrapped)
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_unconditional_branch(nprobe)
                        .map_err(|e| e.to_string())?;

                    em.builder.position_at_end(nclaim);
                    let value_llvm_ty = em
                        .builder
                        .build_struct_gep(entry_ptr, 1, "old_value_ptr")
                        .map_err(|e| e.to_string())?;
                    let entry_value_ty = entry_llvm.get_field_type_at_index(1)
                        .ok_or("entry value type missing")?;
                    let value = em
                        .builder
                        .build_load("old_value")
                        .map_err(|e| e.to_string())?;
                    let fresh_key_ptr = em
                        .builder
                        .build_struct_gep(fresh_entry, 0, "fresh_key")
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_store(fresh_key_ptr, key)
                        .map_err(|e| e.to_string())?;
                    let fresh_value_ptr = em
                        .builder
                        .build_struct_gep(fresh_entry, 1, "fresh_value")
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_store(fresh_value_ptr, value)
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_store(
                            fresh_state_ptr,
                            em.context.i8_type().const_int(1, false),
                        )
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_unconditional_branch(next)
                        .map_err(|e| e.to_string())?;

                    em.builder.position_at_end(next);
                    Ok(())
                })?;
                let free = em.extern_fn("free")?;
                em.builder
                    .build_call(free, &[old_entries.into()], "old_free")
                    .map_err(|e| e.to_string())?;
                Ok(())
            })?;

            em.builder.build_return(None).map_err(|e| e.to_string())?;
            Ok(())
        })
    }
}

fn key_ptr_or<'ctx>(
    em: &mut Emitter<'ctx, '_>,
    entry_llvm: inkwell::types::StructType<'ctx>,
    entry_ptr: PointerValue<'ctx>,
) -> Result<PointerValue<'ctx>, String> {
    em.builder
        .build_struct_gep(entry_ptr, 0, "new_key")
        .map_err(|e| e.to_string())
}
