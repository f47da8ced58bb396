//! String methods on the fat-pointer representation. `.size()` is the
//! byte count from the header; `.len()` counts UTF-8 characters by
//! skipping continuation bytes.

use crate::codegen::Emitter;
use inkwell::values::{BasicValueEnum, FunctionValue};
use inkwell::IntPredicate;
use sushi_ast::{Expression, Type};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_string_method(
        &mut self,
        receiver: &Expression,
        method: &str,
        args: &[Expression],
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let value = self.emit_expression(receiver)?.into_struct_value();
        let data = self
            .builder
            .build_extract_value(value, 0, "str_data")
            .map_err(|e| e.to_string())?
            .into_pointer_value();
        let size = self
            .builder
            .build_extract_value(value, 1, "str_size")
            .map_err(|e| e.to_string())?
            .into_int_value();

        match method {
            "size" => Ok(size.into()),
            "is_empty" => {
                let empty = self
                    .builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        size,
                        self.context.i32_type().const_zero(),
                        "is_empty",
                    )
                    .map_err(|e| e.to_string())?;
                Ok(self.bool_value(empty)?.into())
            }
            "len" => {
                let helper = self.utf8_len_helper()?;
                Ok(self
                    .builder
                    .build_call(helper, &[data.into(), size.into()], "utf8_len")
                    .map_err(|e| e.to_string())?
                    .try_as_basic_value()
                    .basic()
                    .ok_or("utf8_len returned no value")?)
            }
            "find" => {
                let needle = self.emit_expression(&args[0])?.into_struct_value();
                let n_data = self
                    .builder
                    .build_extract_value(needle, 0, "needle_data")
                    .map_err(|e| e.to_string())?;
                let n_size = self
                    .builder
                    .build_extract_value(needle, 1, "needle_size")
                    .map_err(|e| e.to_string())?;
                let helper = self.str_find_helper()?;
                let index = self
                    .builder
                    .build_call(
                        helper,
                        &[data.into(), size.into(), n_data.into(), n_size.into()],
                        "find_idx",
                    )
                    .map_err(|e| e.to_string())?
                    .try_as_basic_value()
                    .basic()
                    .ok_or("find returned no value")?
                    .into_int_value();

                let Type::Enum(maybe_enum) = self.resolve(return_ty) else {
                    return Err("internal: find without Maybe return".to_string());
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

                let some_block = self.append_block("find_some")?;
                let none_block = self.append_block("find_none")?;
                let merge = self.append_block("find_merge")?;
                self.builder
                    .build_conditional_branch(found, some_block, none_block)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(some_block);
                let some = self.emit_enum_value(&maybe_enum, 0, &[index.into()])?;
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
                    .build_phi(llvm, "find_result")
                    .map_err(|e| e.to_string())?;
                phi.add_incoming(&[(&some, some_end), (&none, none_end)]);
                Ok(phi.as_basic_value())
            }
            "substring" => {
                let from = self.emit_expression(&args[0])?.into_int_value();
                let from = self.coerce_to_i32(from)?;
                let to = self.emit_expression(&args[1])?.into_int_value();
                let to = self.coerce_to_i32(to)?;
                let i32t = self.context.i32_type();

                // Clamp 0 <= from <= to <= size.
                let from_neg = self
                    .builder
                    .build_int_compare(IntPredicate::SLT, from, i32t.const_zero(), "from_neg")
                    .map_err(|e| e.to_string())?;
                let from = self
                    .builder
                    .build_select(from_neg, i32t.const_zero(), from, "from_clamped")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let to_over = self
                    .builder
                    .build_int_compare(IntPredicate::SGT, to, size, "to_over")
                    .map_err(|e| e.to_string())?;
                let to = self
                    .builder
                    .build_select(to_over, size, to, "to_clamped")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let inverted = self
                    .builder
                    .build_int_compare(IntPredicate::SGT, from, to, "inverted")
                    .map_err(|e| e.to_string())?;
                let from = self
                    .builder
                    .build_select(inverted, to, from, "from_final")
                    .map_err(|e| e.to_string())?
                    .into_int_value();

                let length = self
                    .builder
                    .build_int_sub(to, from, "sub_len")
                    .map_err(|e| e.to_string())?;
                let length64 = self
                    .builder
                    .build_int_s_extend(length, self.context.i64_type(), "sub_len64")
                    .map_err(|e| e.to_string())?;
                // Zero-length substrings still get a 1-byte allocation so
                // the data pointer stays valid.
                let alloc = self
                    .builder
                    .build_int_add(
                        length64,
                        self.context.i64_type().const_int(1, false),
                        "sub_alloc",
                    )
                    .map_err(|e| e.to_string())?;
                let buffer = self.checked_malloc(alloc)?;
                let from64 = self
                    .builder
                    .build_int_s_extend(from, self.context.i64_type(), "from64")
                    .map_err(|e| e.to_string())?;
                let src = unsafe {
                    self.builder
                        .build_in_bounds_gep(data, &[from64], "sub_src")
                        .map_err(|e| e.to_string())?
                };
                let memcpy = self.extern_fn("memcpy")?;
                self.builder
                    .build_call(
                        memcpy,
                        &[buffer.into(), src.into(), length64.into()],
                        "sub_cp",
                    )
                    .map_err(|e| e.to_string())?;
                Ok(self.fat_string(buffer, length)?.into())
            }
            other => Err(format!("internal: unknown string method `{}`", other)),
        }
    }

    /// `__sushi_utf8_len(data, size)` — bytes that are not UTF-8
    /// continuation bytes ((b & 0xC0) != 0x80).
    fn utf8_len_helper(&mut self) -> Result<FunctionValue<'ctx>, String> {
        let i32t = self.context.i32_type();
        let fn_type = i32t.fn_type(&[self.ptr_ty().into(), i32t.into()], false);
        self.define_helper("__sushi_utf8_len", fn_type, |em, f| {
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let data = f.get_nth_param(0).ok_or("missing param")?.into_pointer_value();
            let size = f.get_nth_param(1).ok_or("missing param")?.into_int_value();

            let i32t = em.context.i32_type();
            let count_slot = em
                .builder
                .build_alloca(i32t, "count")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(count_slot, i32t.const_zero())
                .map_err(|e| e.to_string())?;

            em.emit_index_loop(size, |em, index| {
                let byte_ptr = unsafe {
                    em.builder
                        .build_in_bounds_gep(data, &[index], "byte_ptr")
                        .map_err(|e| e.to_string())?
                };
                let byte = em
                    .builder
                    .build_load(byte_ptr, "byte")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let masked = em
                    .builder
                    .build_and(
                        byte,
                        em.context.i8_type().const_int(0xC0, false),
                        "masked",
                    )
                    .map_err(|e| e.to_string())?;
                let is_start = em
                    .builder
                    .build_int_compare(
                        IntPredicate::NE,
                        masked,
                        em.context.i8_type().const_int(0x80, false),
                        "is_start",
                    )
                    .map_err(|e| e.to_string())?;
                let bump = em
                    .builder
                    .build_int_z_extend(is_start, em.context.i32_type(), "bump")
                    .map_err(|e| e.to_string())?;
                let current = em
                    .builder
                    .build_load(count_slot, "count_cur")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let next = em
                    .builder
                    .build_int_add(current, bump, "count_next")
                    .map_err(|e| e.to_string())?;
                em.builder
                    .build_store(count_slot, next)
                    .map_err(|e| e.to_string())?;
                Ok(())
            })?;

            let count = em
                .builder
                .build_load(count_slot, "count_final")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_return(Some(&count))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// `__sushi_str_find(hay, hay_len, needle, needle_len)` — first byte
    /// index of the needle, -1 when absent, 0 for an empty needle.
    fn str_find_helper(&mut self) -> Result<FunctionValue<'ctx>, String> {
        let i32t = self.context.i32_type();
        let ptr = self.ptr_ty();
        let fn_type = i32t.fn_type(
            &[ptr.into(), i32t.into(), ptr.into(), i32t.into()],
            false,
        );
        self.define_helper("__sushi_str_find", fn_type, |em, f| {
            let i32t = em.context.i32_type();
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let hay = f.get_nth_param(0).ok_or("missing param")?.into_pointer_value();
            let hay_len = f.get_nth_param(1).ok_or("missing param")?.into_int_value();
            let needle = f.get_nth_param(2).ok_or("missing param")?.into_pointer_value();
            let needle_len = f.get_nth_param(3).ok_or("missing param")?.into_int_value();

            let ret_zero = em.context.append_basic_block(f, "empty_needle");
            let search = em.context.append_basic_block(f, "search");
            let miss = em.context.append_basic_block(f, "miss");

            let empty = em
                .builder
                .build_int_compare(
                    IntPredicate::SLE,
                    needle_len,
                    i32t.const_zero(),
                    "needle_empty",
                )
                .map_err(|e| e.to_string())?;
            em.builder
                .build_conditional_branch(empty, ret_zero, search)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(ret_zero);
            em.builder
                .build_return(Some(&i32t.const_zero()))
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(search);
            // last candidate start: hay_len - needle_len (inclusive)
            let last_start = em
                .builder
                .build_int_sub(hay_len, needle_len, "last_start")
                .map_err(|e| e.to_string())?;
            let candidates = em
                .builder
                .build_int_add(last_start, i32t.const_int(1, false), "candidates")
                .map_err(|e| e.to_string())?;
            let any = em
                .builder
                .build_int_compare(
                    IntPredicate::SGT,
                    candidates,
                    i32t.const_zero(),
                    "any_candidates",
                )
                .map_err(|e| e.to_string())?;
            let scan = em.context.append_basic_block(f, "scan");
            em.builder
                .build_conditional_branch(any, scan, miss)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(scan);
            let found_slot = em
                .builder
                .build_alloca(i32t, "found")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_store(found_slot, i32t.const_all_ones())
                .map_err(|e| e.to_string())?;

            em.emit_index_loop(candidates, |em, start| {
                // Skip further comparisons once a hit is recorded.
                let found = em
                    .builder
                    .build_load(found_slot, "found_cur")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let already = em
                    .builder
                    .build_int_compare(
                        IntPredicate::SGE,
                        found,
                        i32t.const_zero(),
                        "already",
                    )
                    .map_err(|e| e.to_string())?;
                let compare = em.append_block("compare")?;
                let after = em.append_block("after")?;
                em.builder
                    .build_conditional_branch(already, after, compare)
                    .map_err(|e| e.to_string())?;

                em.builder.position_at_end(compare);
                let match_slot = em
                    .builder
                    .build_alloca(em.context.bool_type(), "matches")
                    .map_err(|e| e.to_string())?;
                em.builder
                    .build_store(match_slot, em.context.bool_type().const_int(1, false))
                    .map_err(|e| e.to_string())?;
                em.emit_index_loop(needle_len, |em, offset| {
                    let hay_index = em
                        .builder
                        .build_int_add(start, offset, "hay_index")
                        .map_err(|e| e.to_string())?;
                    let hay_ptr = unsafe {
                        em.builder
                            .build_in_bounds_gep(hay,
                                &[hay_index],
                                "hay_ptr",
                            )
                            .map_err(|e| e.to_string())?
                    };
                    let needle_ptr = unsafe {
                        em.builder
                            .build_in_bounds_gep(needle,
                                &[offset],
                                "needle_ptr",
                            )
                            .map_err(|e| e.to_string())?
                    };
                    let a = em
                        .builder
                        .build_load(hay_ptr, "hay_byte")
                        .map_err(|e| e.to_string())?
                        .into_int_value();
                    let b = em
                        .builder
                        .build_load(needle_ptr, "needle_byte")
                        .map_err(|e| e.to_string())?
                        .into_int_value();
                    let same = em
                        .builder
                        .build_int_compare(IntPredicate::EQ, a, b, "same")
                        .map_err(|e| e.to_string())?;
                    let current = em
                        .builder
                        .build_load(match_slot, "match_cur")
                        .map_err(|e| e.to_string())?
                        .into_int_value();
                    let still = em
                        .builder
                        .build_and(current, same, "still")
                        .map_err(|e| e.to_string())?;
                    em.builder
                        .build_store(match_slot, still)
                        .map_err(|e| e.to_string())?;
                    Ok(())
                })?;
                let matched = em
                    .builder
                    .build_load(match_slot, "matched")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let record = em
                    .builder
                    .build_select(matched, start, found, "record")
                    .map_err(|e| e.to_string())?;
                em.builder
                    .build_store(found_slot, record)
                    .map_err(|e| e.to_string())?;
                em.builder
                    .build_unconditional_branch(after)
                    .map_err(|e| e.to_string())?;
                em.builder.position_at_end(after);
                Ok(())
            })?;

            let found = em
                .builder
                .build_load(found_slot, "found_final")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_return(Some(&found))
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(miss);
            em.builder
                .build_return(Some(&i32t.const_all_ones()))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }
}
