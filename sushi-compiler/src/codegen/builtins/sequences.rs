//! Methods on fixed arrays, dynamic arrays, and List<T>. Dynamic arrays
//! and List share the { i32 len, i32 cap, T* data } layout, so one set of
//! emitters serves both. Capacity reads mask the three reserved flag bits;
//! writes preserve them.

use crate::codegen::destructors::needs_cleanup;
use crate::codegen::Emitter;
use inkwell::values::{BasicValueEnum, IntValue, PointerValue};
use inkwell::IntPredicate;
use sushi_ast::{Expression, Type};

const CAPACITY_MASK: u64 = 0x1FFF_FFFF;

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_sequence_method(
        &mut self,
        receiver: &Expression,
        receiver_ty: &Type,
        method: &str,
        args: &[Expression],
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        // Fixed arrays have their own small set.
        if let Type::Array { base, size } = receiver_ty {
            let base = self.resolve(base);
            return self.emit_fixed_array_method(receiver, &base, *size, method, args, return_ty);
        }

        let element = match receiver_ty {
            Type::DynArray { base } => self.resolve(base),
            Type::Struct(s) if s.is_monomorph_of("List") => {
                let inner = s
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .ok_or("internal: List without argument")?;
                self.resolve(inner)
            }
            other => return Err(format!("internal: sequence method on `{}`", other)),
        };

        let (ptr, _) = self.emit_place(receiver)?;
        match method {
            "len" => Ok(self.buffer_len(ptr)?.into()),
            "push" => {
                let value =
                    self.emit_expression(args.first().ok_or("internal: push without value")?)?;
                self.emit_push(ptr, &element, value)?;
                Ok(self.unit_value())
            }
            "pop" => self.emit_pop(ptr, &element, return_ty),
            "get" => {
                let index = self
                    .emit_expression(args.first().ok_or("internal: get without index")?)?
                    .into_int_value();
                let index = self.coerce_to_i32(index)?;
                self.emit_safe_get(ptr, &element, index, return_ty)
            }
            "iter" => {
                let len = self.buffer_len(ptr)?;
                let data = self.buffer_data(ptr)?;
                self.make_iterator(len, data)
            }
            "fill" => {
                let value =
                    self.emit_expression(args.first().ok_or("internal: fill without value")?)?;
                let len = self.buffer_len(ptr)?;
                let data = self.buffer_data(ptr)?;
                let elem_llvm = self.lower(&element)?;
                self.emit_index_loop(len, |em, index| {
                    let slot = unsafe {
                        em.builder
                            .build_in_bounds_gep(&[index], "fill_slot")
                            .map_err(|e| e.to_string())?
                    };
                    em.builder
                        .build_store(slot, value)
                        .map_err(|e| e.to_string())?;
                    Ok(())
                })?;
                Ok(self.unit_value())
            }
            "reverse" => {
                self.emit_reverse(ptr, &element)?;
                Ok(self.unit_value())
            }
            "clear" => {
                // Elements that own memory are destructed before the length
                // resets.
                if needs_cleanup(self.sem, &element) {
                    let len = self.buffer_len(ptr)?;
                    let data = self.buffer_data(ptr)?;
                    let elem_llvm = self.lower(&element)?;
                    let element = element.clone();
                    self.emit_index_loop(len, |em, index| {
                        let slot = unsafe {
                            em.builder
                                .build_in_bounds_gep(&[index], "clear_slot")
                                .map_err(|e| e.to_string())?
                        };
                        em.emit_destructor(slot, &element)
                    })?;
                }
                let len_ptr = self.buffer_field(ptr, 0, "len_ptr")?;
                self.builder
                    .build_store(len_ptr, self.context.i32_type().const_zero())
                    .map_err(|e| e.to_string())?;
                Ok(self.unit_value())
            }
            "reserve" => {
                let wanted = self
                    .emit_expression(args.first().ok_or("internal: reserve without count")?)?
                    .into_int_value();
                let wanted = self.coerce_to_i32(wanted)?;
                self.ensure_capacity(ptr, &element, wanted)?;
                Ok(self.unit_value())
            }
            "shrink_to_fit" => {
                let len = self.buffer_len(ptr)?;
                self.reallocate_buffer(ptr, &element, len)?;
                Ok(self.unit_value())
            }
            "destroy" => {
                let (ptr, ty) = self.emit_place(receiver)?;
                self.emit_destructor(ptr, &ty)?;
                // The triple zeroes so a later destructor pass sees null.
                let zero = self.dyn_array_type().const_zero();
                self.builder
                    .build_store(ptr, zero)
                    .map_err(|e| e.to_string())?;
                self.note_destroyed(receiver);
                Ok(self.unit_value())
            }
            other => Err(format!("internal: unknown sequence method `{}`", other)),
        }
    }

    fn emit_fixed_array_method(
        &mut self,
        receiver: &Expression,
        base: &Type,
        size: u32,
        method: &str,
        args: &[Expression],
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let (ptr, _) = self.emit_place(receiver)?;
        let array_llvm = self.lower(&Type::Array {
            base: Box::new(base.clone()),
            size,
        })?;
        let zero = self.context.i32_type().const_zero();
        let data = unsafe {
            self.builder
                .build_in_bounds_gep(&[zero, zero], "arr_data")
                .map_err(|e| e.to_string())?
        };
        let len = self.context.i32_type().const_int(size as u64, false);

        match method {
            "len" => Ok(len.into()),
            "iter" => self.make_iterator(len, data),
            "get" => {
                let index = self
                    .emit_expression(args.first().ok_or("internal: get without index")?)?
                    .into_int_value();
                let index = self.coerce_to_i32(index)?;
                self.emit_safe_get_raw(data, len, base, index, return_ty)
            }
            "fill" => {
                let value =
                    self.emit_expression(args.first().ok_or("internal: fill without value")?)?;
                let elem_llvm = self.lower(base)?;
                self.emit_index_loop(len, |em, index| {
                    let slot = unsafe {
                        em.builder
                            .build_in_bounds_gep(&[index], "fill_slot")
                            .map_err(|e| e.to_string())?
                    };
                    em.builder
                        .build_store(slot, value)
                        .map_err(|e| e.to_string())?;
                    Ok(())
                })?;
                Ok(self.unit_value())
            }
            "reverse" => {
                self.emit_reverse_raw(data, len, base)?;
                Ok(self.unit_value())
            }
            other => Err(format!("internal: unknown array method `{}`", other)),
        }
    }

    // -----------------------------------------------------------
    // Triple access
    // -----------------------------------------------------------

    fn buffer_field(
        &mut self,
        ptr: PointerValue<'ctx>,
        index: u32,
        name: &str,
    ) -> Result<PointerValue<'ctx>, String> {
        self.builder
            .build_struct_gep(ptr, index, name)
            .map_err(|e| e.to_string())
    }

    pub(crate) fn buffer_len(&mut self, ptr: PointerValue<'ctx>) -> Result<IntValue<'ctx>, String> {
        let len_ptr = self.buffer_field(ptr, 0, "len_ptr")?;
        Ok(self
            .builder
            .build_load("len")
            .map_err(|e| e.to_string())?
            .into_int_value())
    }

    pub(crate) fn buffer_data(
        &mut self,
        ptr: PointerValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, String> {
        let data_ptr = self.buffer_field(ptr, 2, "data_slot")?;
        Ok(self
            .builder
            .build_load("data")
            .map_err(|e| e.to_string())?
            .into_pointer_value())
    }

    /// Capacity with the reserved flag bits masked off.
    fn buffer_capacity(&mut self, ptr: PointerValue<'ctx>) -> Result<IntValue<'ctx>, String> {
        let cap_ptr = self.buffer_field(ptr, 1, "cap_ptr")?;
        let raw = self
            .builder
            .build_load("cap_raw")
            .map_err(|e| e.to_string())?
            .into_int_value();
        self.builder
            .build_and(
                raw,
                self.context.i32_type().const_int(CAPACITY_MASK, false),
                "cap",
            )
            .map_err(|e| e.to_string())
    }

    /// Store a new capacity, preserving the flag bits.
    fn store_capacity(
        &mut self,
        ptr: PointerValue<'ctx>,
        new_capacity: IntValue<'ctx>,
    ) -> Result<(), String> {
        let cap_ptr = self.buffer_field(ptr, 1, "cap_ptr")?;
        let raw = self
            .builder
            .build_load("cap_raw")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let flags = self
            .builder
            .build_and(
                raw,
                self.context.i32_type().const_int(!CAPACITY_MASK & 0xFFFF_FFFF, false),
                "cap_flags",
            )
            .map_err(|e| e.to_string())?;
        let combined = self
            .builder
            .build_or(flags, new_capacity, "cap_new")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(cap_ptr, combined)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn make_iterator(
        &mut self,
        len: IntValue<'ctx>,
        data: PointerValue<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let undef = self.dyn_array_type().get_undef();
        let a = self
            .builder
            .build_insert_value(undef, self.context.i32_type().const_zero(), 0, "iter_cur")
            .map_err(|e| e.to_string())?;
        let b = self
            .builder
            .build_insert_value(a, len, 1, "iter_len")
            .map_err(|e| e.to_string())?;
        let c = self
            .builder
            .build_insert_value(b, data, 2, "iter_data")
            .map_err(|e| e.to_string())?;
        Ok(c.into_struct_value().into())
    }

    // -----------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------

    fn ensure_capacity(
        &mut self,
        ptr: PointerValue<'ctx>,
        element: &Type,
        needed: IntValue<'ctx>,
    ) -> Result<(), String> {
        let i32t = self.context.i32_type();
        let capacity = self.buffer_capacity(ptr)?;
        let enough = self
            .builder
            .build_int_compare(IntPredicate::SLE, needed, capacity, "cap_enough")
            .map_err(|e| e.to_string())?;

        let grow_block = self.append_block("grow")?;
        let done = self.append_block("grow_done")?;
        self.builder
            .build_conditional_branch(enough, done, grow_block)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(grow_block);
        // Double, floor 8, and never less than requested.
        let doubled = self
            .builder
            .build_int_mul(capacity, i32t.const_int(2, false), "doubled")
            .map_err(|e| e.to_string())?;
        let at_least_8 = self
            .builder
            .build_int_compare(
                IntPredicate::SLT,
                doubled,
                i32t.const_int(8, false),
                "lt8",
            )
            .map_err(|e| e.to_string())?;
        let floored = self
            .builder
            .build_select(at_least_8, i32t.const_int(8, false), doubled, "floored")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let too_small = self
            .builder
            .build_int_compare(IntPredicate::SLT, floored, needed, "still_small")
            .map_err(|e| e.to_string())?;
        let target = self
            .builder
            .build_select(too_small, needed, floored, "target_cap")
            .map_err(|e| e.to_string())?
            .into_int_value();
        self.reallocate_buffer(ptr, element, target)?;
        self.builder
            .build_unconditional_branch(done)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(done);
        Ok(())
    }

    fn reallocate_buffer(
        &mut self,
        ptr: PointerValue<'ctx>,
        element: &Type,
        new_capacity: IntValue<'ctx>,
    ) -> Result<(), String> {
        let elem_size = crate::codegen::layout::size_of(self.sem, element);
        let i64t = self.context.i64_type();
        let cap64 = self
            .builder
            .build_int_s_extend(new_capacity, i64t, "cap64")
            .map_err(|e| e.to_string())?;
        let bytes = self
            .builder
            .build_int_mul(cap64, i64t.const_int(elem_size, false), "bytes")
            .map_err(|e| e.to_string())?;

        let data = self.buffer_data(ptr)?;
        let realloc = self.extern_fn("realloc")?;
        let fresh = self
            .builder
            .build_call(realloc, &[data.into(), bytes.into()], "regrown")
            .map_err(|e| e.to_string())?
            .try_as_basic_value()
            .basic()
            .ok_or("realloc returned no value")?
            .into_pointer_value();

        // RE2021 on allocation failure.
        let is_null = self
            .builder
            .build_is_null(fresh, "regrow_null")
            .map_err(|e| e.to_string())?;
        let fail = self.append_block("regrow_fail")?;
        let ok = self.append_block("regrow_ok")?;
        self.builder
            .build_conditional_branch(is_null, fail, ok)
            .map_err(|e| e.to_string())?;
        self.builder.position_at_end(fail);
        self.emit_runtime_abort("RE2021: allocation failure\n", 2021)?;
        self.builder.position_at_end(ok);

        let data_slot = self.buffer_field(ptr, 2, "data_slot")?;
        self.builder
            .build_store(data_slot, fresh)
            .map_err(|e| e.to_string())?;
        self.store_capacity(ptr, new_capacity)?;
        Ok(())
    }

    fn emit_push(
        &mut self,
        ptr: PointerValue<'ctx>,
        element: &Type,
        value: BasicValueEnum<'ctx>,
    ) -> Result<(), String> {
        let i32t = self.context.i32_type();
        let len = self.buffer_len(ptr)?;
        let needed = self
            .builder
            .build_int_add(len, i32t.const_int(1, false), "needed")
            .map_err(|e| e.to_string())?;
        self.ensure_capacity(ptr, element, needed)?;

        let data = self.buffer_data(ptr)?;
        let elem_llvm = self.lower(element)?;
        let slot = unsafe {
            self.builder
                .build_in_bounds_gep(&[len], "push_slot")
                .map_err(|e| e.to_string())?
        };
        self.builder
            .build_store(slot, value)
            .map_err(|e| e.to_string())?;

        let len_ptr = self.buffer_field(ptr, 0, "len_ptr")?;
        self.builder
            .build_store(len_ptr, needed)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn emit_pop(
        &mut self,
        ptr: PointerValue<'ctx>,
        element: &Type,
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let Type::Enum(maybe_enum) = self.resolve(return_ty) else {
            return Err("internal: pop without Maybe return".to_string());
        };
        let i32t = self.context.i32_type();
        let len = self.buffer_len(ptr)?;
        let empty = self
            .builder
            .build_int_compare(IntPredicate::SLE, len, i32t.const_zero(), "pop_empty")
            .map_err(|e| e.to_string())?;

        let none_block = self.append_block("pop_none")?;
        let some_block = self.append_block("pop_some")?;
        let merge = self.append_block("pop_merge")?;
        self.builder
            .build_conditional_branch(empty, none_block, some_block)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(some_block);
        let last = self
            .builder
            .build_int_sub(len, i32t.const_int(1, false), "last")
            .map_err(|e| e.to_string())?;
        let data = self.buffer_data(ptr)?;
        let elem_llvm = self.lower(element)?;
        let slot = unsafe {
            self.builder
                .build_in_bounds_gep(&[last], "pop_slot")
                .map_err(|e| e.to_string())?
        };
        let value = self
            .builder
            .build_load("popped")
            .map_err(|e| e.to_string())?;
        let len_ptr = self.buffer_field(ptr, 0, "len_ptr")?;
        self.builder
            .build_store(len_ptr, last)
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
            .build_phi(llvm, "pop_result")
            .map_err(|e| e.to_string())?;
        phi.add_incoming(&[(&some, some_end), (&none, none_end)]);
        Ok(phi.as_basic_value())
    }

    /// `.get(i)` — the safe path: Maybe.Some on hit, Maybe.None out of
    /// bounds (direct `arr[i]` traps instead).
    fn emit_safe_get(
        &mut self,
        ptr: PointerValue<'ctx>,
        element: &Type,
        index: IntValue<'ctx>,
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let len = self.buffer_len(ptr)?;
        let data = self.buffer_data(ptr)?;
        self.emit_safe_get_raw(data, len, element, index, return_ty)
    }

    fn emit_safe_get_raw(
        &mut self,
        data: PointerValue<'ctx>,
        len: IntValue<'ctx>,
        element: &Type,
        index: IntValue<'ctx>,
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let Type::Enum(maybe_enum) = self.resolve(return_ty) else {
            return Err("internal: get without Maybe return".to_string());
        };
        let i32t = self.context.i32_type();
        let non_negative = self
            .builder
            .build_int_compare(IntPredicate::SGE, index, i32t.const_zero(), "ge0")
            .map_err(|e| e.to_string())?;
        let below = self
            .builder
            .build_int_compare(IntPredicate::SLT, index, len, "lt_len")
            .map_err(|e| e.to_string())?;
        let in_range = self
            .builder
            .build_and(non_negative, below, "in_range")
            .map_err(|e| e.to_string())?;

        let some_block = self.append_block("get_some")?;
        let none_block = self.append_block("get_none")?;
        let merge = self.append_block("get_merge")?;
        self.builder
            .build_conditional_branch(in_range, some_block, none_block)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(some_block);
        let elem_llvm = self.lower(element)?;
        let slot = unsafe {
            self.builder
                .build_in_bounds_gep(&[index], "get_slot")
                .map_err(|e| e.to_string())?
        };
        let value = self
            .builder
            .build_load("got")
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
            .build_phi(llvm, "get_result")
            .map_err(|e| e.to_string())?;
        phi.add_incoming(&[(&some, some_end), (&none, none_end)]);
        Ok(phi.as_basic_value())
    }

    fn emit_reverse(
        &mut self,
        ptr: PointerValue<'ctx>,
        element: &Type,
    ) -> Result<(), String> {
        let len = self.buffer_len(ptr)?;
        let data = self.buffer_data(ptr)?;
        self.emit_reverse_raw(data, len, element)
    }

    fn emit_reverse_raw(
        &mut self,
        data: PointerValue<'ctx>,
        len: IntValue<'ctx>,
        element: &Type,
    ) -> Result<(), String> {
        let i32t = self.context.i32_type();
        let elem_llvm = self.lower(element)?;
        let half = self
            .builder
            .build_int_signed_div(len, i32t.const_int(2, false), "half")
            .map_err(|e| e.to_string())?;
        let last = self
            .builder
            .build_int_sub(len, i32t.const_int(1, false), "last")
            .map_err(|e| e.to_string())?;
        self.emit_index_loop(half, |em, index| {
            let mirror = em
                .builder
                .build_int_sub(last, index, "mirror")
                .map_err(|e| e.to_string())?;
            let front = unsafe {
                em.builder
                    .build_in_bounds_gep(&[index], "front")
                    .map_err(|e| e.to_string())?
            };
            let back = unsafe {
                em.builder
                    .build_in_bounds_gep(&[mirror], "back")
                    .map_err(|e| e.to_string())?
            };
            let a = em
                .builder
                .build_load("swap_a")
                .map_err(|e| e.to_string())?;
            let b = em
                .builder
                .build_load("swap_b")
                .map_err(|e| e.to_string())?;
            em.builder.build_store(front, b).map_err(|e| e.to_string())?;
            em.builder.build_store(back, a).map_err(|e| e.to_string())?;
            Ok(())
        })
    }
}
