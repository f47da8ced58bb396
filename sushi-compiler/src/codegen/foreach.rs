//! Foreach lowering. Three compiled forms, chosen statically: direct
//! counting loops for ranges, a getline-driven loop for stream iterators
//! (stdin / file lines), and an indexed loop for array- and
//! HashMap-backed iterators (the latter skips non-occupied buckets).

use super::Emitter;
use inkwell::values::IntValue;
use inkwell::IntPredicate;
use sushi_ast::{BuiltinKind, ExprKind, ForeachStmt, Type};

enum HashMapYield {
    Keys,
    Values,
    Entries,
}

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_foreach(&mut self, s: &ForeachStmt) -> Result<(), String> {
        if matches!(s.iterable.kind, ExprKind::Range { .. }) {
            return self.emit_range_loop(s);
        }
        if let Some(()) = self.stream_source(s) {
            return self.emit_stream_loop(s);
        }
        self.emit_indexed_loop(s)
    }

    fn stream_source(&self, s: &ForeachStmt) -> Option<()> {
        let ExprKind::MethodCall {
            receiver, method, ..
        } = &s.iterable.kind
        else {
            return None;
        };
        if method != "lines" {
            return None;
        }
        match receiver.ty.as_ref()?.unwrap_reference() {
            Type::Builtin(BuiltinKind::Stdin) | Type::Builtin(BuiltinKind::File) => Some(()),
            _ => None,
        }
    }

    fn hashmap_source(&self, s: &ForeachStmt) -> Option<(HashMapYield, Type, Type)> {
        let ExprKind::MethodCall {
            receiver, method, ..
        } = &s.iterable.kind
        else {
            return None;
        };
        let receiver_ty = receiver.ty.as_ref()?.unwrap_reference();
        let Type::Struct(st) = receiver_ty else {
            return None;
        };
        if !st.is_monomorph_of("HashMap") {
            return None;
        }
        let args = st.generic_args.clone()?;
        let yield_kind = match method.as_str() {
            "keys" => HashMapYield::Keys,
            "values" => HashMapYield::Values,
            "entries" => HashMapYield::Entries,
            _ => return None,
        };
        Some((
            yield_kind,
            self.resolve(&args[0]),
            self.resolve(&args[1]),
        ))
    }

    /// Range loops count directly; a runtime check picks ascending or
    /// descending stepping, and no iterator is allocated.
    fn emit_range_loop(&mut self, s: &ForeachStmt) -> Result<(), String> {
        let ExprKind::Range {
            start,
            end,
            inclusive,
        } = &s.iterable.kind
        else {
            unreachable!()
        };
        let inclusive = *inclusive;
        let i32t = self.context.i32_type();

        let start_value = self.emit_expression(start)?.into_int_value();
        let start_value = self.coerce_to_i32(start_value)?;
        let end_value = self.emit_expression(end)?.into_int_value();
        let end_value = self.coerce_to_i32(end_value)?;

        let item_slot = self
            .builder
            .build_alloca(i32t, &s.item)
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(item_slot, start_value)
            .map_err(|e| e.to_string())?;
        self.variables
            .insert(s.item.clone(), (item_slot, Type::I32));

        let ascending = self
            .builder
            .build_int_compare(IntPredicate::SLE, start_value, end_value, "ascending")
            .map_err(|e| e.to_string())?;

        let header = self.append_block("range_header")?;
        let body = self.append_block("range_body")?;
        let step_block = self.append_block("range_step")?;
        let exit = self.append_block("range_exit")?;

        self.builder
            .build_unconditional_branch(header)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(header);
        let current = self
            .builder
            .build_load("current")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let (asc_pred, desc_pred) = if inclusive {
            (IntPredicate::SLE, IntPredicate::SGE)
        } else {
            (IntPredicate::SLT, IntPredicate::SGT)
        };
        let asc_cond = self
            .builder
            .build_int_compare(asc_pred, current, end_value, "asc_cond")
            .map_err(|e| e.to_string())?;
        let desc_cond = self
            .builder
            .build_int_compare(desc_pred, current, end_value, "desc_cond")
            .map_err(|e| e.to_string())?;
        let in_range = self
            .builder
            .build_select(ascending, asc_cond, desc_cond, "in_range")
            .map_err(|e| e.to_string())?
            .into_int_value();
        self.builder
            .build_conditional_branch(in_range, body, exit)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(body);
        self.loop_stack.push(super::LoopContext {
            continue_block: step_block,
            break_block: exit,
        });
        self.emit_block(&s.body)?;
        self.loop_stack.pop();
        if !self.block_terminated() {
            self.builder
                .build_unconditional_branch(step_block)
                .map_err(|e| e.to_string())?;
        }

        self.builder.position_at_end(step_block);
        let current = self
            .builder
            .build_load("step_cur")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let up = self
            .builder
            .build_int_add(current, i32t.const_int(1, false), "inc")
            .map_err(|e| e.to_string())?;
        let down = self
            .builder
            .build_int_sub(current, i32t.const_int(1, false), "dec")
            .map_err(|e| e.to_string())?;
        let next = self
            .builder
            .build_select(ascending, up, down, "next")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(item_slot, next)
            .map_err(|e| e.to_string())?;
        self.builder
            .build_unconditional_branch(header)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(exit);
        Ok(())
    }

    /// Stream loop: one getline per iteration, break on EOF, trailing
    /// `\r?\n` stripped before the body sees the line.
    fn emit_stream_loop(&mut self, s: &ForeachStmt) -> Result<(), String> {
        let iterator = self.emit_expression(&s.iterable)?.into_struct_value();
        let handle = self
            .builder
            .build_extract_value(iterator, 2, "stream_handle")
            .map_err(|e| e.to_string())?
            .into_pointer_value();

        let i64t = self.context.i64_type();
        let line_slot = self
            .builder
            .build_alloca(self.ptr_ty(), "line_ptr")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(line_slot, self.ptr_ty().const_null())
            .map_err(|e| e.to_string())?;
        let cap_slot = self
            .builder
            .build_alloca(i64t, "line_cap")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(cap_slot, i64t.const_zero())
            .map_err(|e| e.to_string())?;

        let item_slot = self
            .builder
            .build_alloca(self.string_type(), &s.item)
            .map_err(|e| e.to_string())?;
        self.variables
            .insert(s.item.clone(), (item_slot, Type::STRING));

        let header = self.append_block("stream_header")?;
        let body = self.append_block("stream_body")?;
        let exit = self.append_block("stream_exit")?;

        self.builder
            .build_unconditional_branch(header)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(header);
        let getline = self.extern_fn("getline")?;
        let nread = self
            .builder
            .build_call(
                getline,
                &[line_slot.into(), cap_slot.into(), handle.into()],
                "nread",
            )
            .map_err(|e| e.to_string())?
            .try_as_basic_value()
            .basic()
            .ok_or("getline returned no value")?
            .into_int_value();
        let got_line = self
            .builder
            .build_int_compare(IntPredicate::SGE, nread, i64t.const_zero(), "got_line")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_conditional_branch(got_line, body, exit)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(body);
        let data = self
            .builder
            .build_load(line_slot, "line_data")
            .map_err(|e| e.to_string())?
            .into_pointer_value();
        let len32 = self
            .builder
            .build_int_truncate(nread, self.context.i32_type(), "len32")
            .map_err(|e| e.to_string())?;
        let len32 = self.strip_line_ending(data, len32, b'\n')?;
        let len32 = self.strip_line_ending(data, len32, b'\r')?;
        let line = self.fat_string(data, len32)?;
        self.builder
            .build_store(item_slot, line)
            .map_err(|e| e.to_string())?;

        self.loop_stack.push(super::LoopContext {
            continue_block: header,
            break_block: exit,
        });
        self.emit_block(&s.body)?;
        self.loop_stack.pop();
        if !self.block_terminated() {
            self.builder
                .build_unconditional_branch(header)
                .map_err(|e| e.to_string())?;
        }

        self.builder.position_at_end(exit);
        // getline's buffer is reused between iterations; release it once.
        let buffer = self
            .builder
            .build_load(line_slot, "final_buf")
            .map_err(|e| e.to_string())?
            .into_pointer_value();
        self.if_non_null(buffer, |em, buffer| {
            let free = em.extern_fn("free")?;
            em.builder
                .build_call(free, &[buffer.into()], "line_free")
                .map_err(|e| e.to_string())?;
            Ok(())
        })?;
        Ok(())
    }

    /// `if (len > 0 && data[len-1] == byte) len -= 1`.
    fn strip_line_ending(
        &mut self,
        data: inkwell::values::PointerValue<'ctx>,
        len: IntValue<'ctx>,
        byte: u8,
    ) -> Result<IntValue<'ctx>, String> {
        let i32t = self.context.i32_type();
        let positive = self
            .builder
            .build_int_compare(IntPredicate::SGT, len, i32t.const_zero(), "len_pos")
            .map_err(|e| e.to_string())?;
        let last_index = self
            .builder
            .build_int_sub(len, i32t.const_int(1, false), "last_idx")
            .map_err(|e| e.to_string())?;
        // Clamp the index so the load stays in bounds when len == 0.
        let safe_index = self
            .builder
            .build_select(positive, last_index, i32t.const_zero(), "safe_idx")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let last_ptr = unsafe {
            self.builder
                .build_in_bounds_gep(data, &[safe_index], "last_ptr")
                .map_err(|e| e.to_string())?
        };
        let last = self
            .builder
            .build_load(last_ptr, "last_byte")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let matches = self
            .builder
            .build_int_compare(
                IntPredicate::EQ,
                last,
                self.context.i8_type().const_int(byte as u64, false),
                "ending_match",
            )
            .map_err(|e| e.to_string())?;
        let strip = self
            .builder
            .build_and(positive, matches, "strip")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_select(strip, last_index, len, "stripped_len")
            .map(|v| v.into_int_value())
            .map_err(|e| e.to_string())
    }

    /// Indexed loop over an iterator triple { current, length, data }.
    /// HashMap-backed iterators walk the bucket array and skip entries
    /// whose state is not occupied.
    fn emit_indexed_loop(&mut self, s: &ForeachStmt) -> Result<(), String> {
        let hashmap_mode = self.hashmap_source(s);
        let element_ty = s
            .item_type
            .clone()
            .ok_or("internal: foreach without item type")?;
        let element_ty = self.resolve(&element_ty);

        let iterator = self.emit_expression(&s.iterable)?.into_struct_value();
        let length = self
            .builder
            .build_extract_value(iterator, 1, "iter_len")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let data = self
            .builder
            .build_extract_value(iterator, 2, "iter_data")
            .map_err(|e| e.to_string())?
            .into_pointer_value();

        let item_llvm = self.lower(&element_ty)?;
        let item_slot = self
            .builder
            .build_alloca(item_llvm, &s.item)
            .map_err(|e| e.to_string())?;
        self.variables
            .insert(s.item.clone(), (item_slot, element_ty.clone()));

        let i32t = self.context.i32_type();
        let index_slot = self
            .builder
            .build_alloca(i32t, "iter_idx")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(index_slot, i32t.const_zero())
            .map_err(|e| e.to_string())?;

        let header = self.append_block("iter_header")?;
        let body = self.append_block("iter_body")?;
        let step = self.append_block("iter_step")?;
        let exit = self.append_block("iter_exit")?;

        self.builder
            .build_unconditional_branch(header)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(header);
        let index = self
            .builder
            .build_load(index_slot, "idx")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let in_range = self
            .builder
            .build_int_compare(IntPredicate::SLT, index, length, "idx_lt")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_conditional_branch(in_range, body, exit)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(body);
        match &hashmap_mode {
            None => {
                let elem_ptr = unsafe {
                    self.builder
                        .build_in_bounds_gep(data, &[index], "elem_ptr")
                        .map_err(|e| e.to_string())?
                };
                let element = self
                    .builder
                    .build_load(elem_ptr, "element")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_store(item_slot, element)
                    .map_err(|e| e.to_string())?;
            }
            Some((yield_kind, key_ty, value_ty)) => {
                let entry_llvm = self.entry_type(key_ty, value_ty)?;
                let entry_ptr = unsafe {
                    self.builder
                        .build_in_bounds_gep(data, &[index], "entry_ptr")
                        .map_err(|e| e.to_string())?
                };
                let state_ptr = self
                    .builder
                    .build_struct_gep(2, "state_ptr")
                    .map_err(|e| e.to_string())?;
                let state = self
                    .builder
                    .build_load(state_ptr, "state")
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let occupied = self
                    .builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        state,
                        self.context.i8_type().const_int(1, false),
                        "occupied",
                    )
                    .map_err(|e| e.to_string())?;
                let yield_block = self.append_block("entry_yield")?;
                self.builder
                    .build_conditional_branch(occupied, yield_block, step)
                    .map_err(|e| e.to_string())?;
                self.builder.position_at_end(yield_block);

                let key_llvm = self.lower(key_ty)?;
                let value_llvm = self.lower(value_ty)?;
                match yield_kind {
                    HashMapYield::Keys => {
                        let key_ptr = self
                            .builder
                            .build_struct_gep(0, "key_ptr")
                            .map_err(|e| e.to_string())?;
                        let key = self
                            .builder
                            .build_load(key_ptr, "key")
                            .map_err(|e| e.to_string())?;
                        self.builder
                            .build_store(item_slot, key)
                            .map_err(|e| e.to_string())?;
                    }
                    HashMapYield::Values => {
                        let value_ptr = self
                            .builder
                            .build_struct_gep(1, "value_ptr")
                            .map_err(|e| e.to_string())?;
                        let value = self
                            .builder
                            .build_load(value_ptr, "value")
                            .map_err(|e| e.to_string())?;
                        self.builder
                            .build_store(item_slot, value)
                            .map_err(|e| e.to_string())?;
                    }
                    HashMapYield::Entries => {
                        let key_ptr = self
                            .builder
                            .build_struct_gep(0, "key_ptr")
                            .map_err(|e| e.to_string())?;
                        let key = self
                            .builder
                            .build_load(key_ptr, "key")
                            .map_err(|e| e.to_string())?;
                        let value_ptr = self
                            .builder
                            .build_struct_gep(1, "value_ptr")
                            .map_err(|e| e.to_string())?;
                        let value = self
                            .builder
                            .build_load(value_ptr, "value")
                            .map_err(|e| e.to_string())?;
                        let pair_llvm = item_llvm.into_struct_type();
                        let with_key = self
                            .builder
                            .build_insert_value(pair_llvm.get_undef(), key, 0, "pair_key")
                            .map_err(|e| e.to_string())?;
                        let pair = self
                            .builder
                            .build_insert_value(with_key, value, 1, "pair")
                            .map_err(|e| e.to_string())?;
                        self.builder
                            .build_store(item_slot, pair.into_struct_value())
                            .map_err(|e| e.to_string())?;
                    }
                }
            }
        }

        self.loop_stack.push(super::LoopContext {
            continue_block: step,
            break_block: exit,
        });
        self.emit_block(&s.body)?;
        self.loop_stack.pop();
        if !self.block_terminated() {
            self.builder
                .build_unconditional_branch(step)
                .map_err(|e| e.to_string())?;
        }

        self.builder.position_at_end(step);
        let index = self
            .builder
            .build_load(index_slot, "step_idx")
            .map_err(|e| e.to_string())?
            .into_int_value();
        let next = self
            .builder
            .build_int_add(index, i32t.const_int(1, false), "next_idx")
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
}
