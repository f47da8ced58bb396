//! String runtime: deduplicated literal globals, fat-pointer construction,
//! concatenation, number-to-string conversion, and C-string bridging.
//! Helpers are emitted once per module with internal linkage; the builder
//! position is saved and restored around helper emission.

use super::Emitter;
use inkwell::module::Linkage;
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue, StructValue};
use inkwell::IntPredicate;
use sushi_ast::{BuiltinKind, Type};

impl<'ctx> Emitter<'ctx, '_> {
    /// A deduplicated global for a literal; returns the data pointer.
    pub(crate) fn literal_global(&mut self, text: &str) -> Result<PointerValue<'ctx>, String> {
        if let Some(global) = self.string_globals.get(text) {
            return Ok(global.as_pointer_value());
        }
        let global = self
            .builder
            .build_global_string_ptr(text, "str")
            .map_err(|e| format!("failed to create string global: {}", e))?;
        self.string_globals.insert(text.to_string(), global);
        Ok(global.as_pointer_value())
    }

    /// Build a fat-pointer string value { data, size } from parts.
    pub(crate) fn fat_string(
        &mut self,
        data: PointerValue<'ctx>,
        size: IntValue<'ctx>,
    ) -> Result<StructValue<'ctx>, String> {
        let undef = self.string_type().get_undef();
        let with_data = self
            .builder
            .build_insert_value(undef, data, 0, "str_data")
            .map_err(|e| format!("failed to build string: {}", e))?;
        let full = self
            .builder
            .build_insert_value(with_data, size, 1, "str_size")
            .map_err(|e| format!("failed to build string: {}", e))?;
        Ok(full.into_struct_value())
    }

    /// A literal as a fat-pointer value.
    pub(crate) fn literal_string(&mut self, text: &str) -> Result<StructValue<'ctx>, String> {
        let data = self.literal_global(text)?;
        let size = self.context.i32_type().const_int(text.len() as u64, false);
        self.fat_string(data, size)
    }

    fn with_helper<F>(
        &mut self,
        name: &str,
        build: F,
    ) -> Result<FunctionValue<'ctx>, String>
    where
        F: FnOnce(&mut Self, FunctionValue<'ctx>) -> Result<(), String>,
    {
        if let Some(f) = self.helpers.get(name) {
            return Ok(*f);
        }
        let saved_block = self.builder.get_insert_block();
        let saved_fn = self.current_function;

        let fn_type = self.helper_signature(name)?;
        let function = self
            .module
            .add_function(name, fn_type, Some(Linkage::Internal));
        self.helpers.insert(name.to_string(), function);
        self.current_function = Some(function);
        build(self, function)?;

        self.current_function = saved_fn;
        if let Some(block) = saved_block {
            self.builder.position_at_end(block);
        }
        Ok(function)
    }

    fn helper_signature(
        &mut self,
        name: &str,
    ) -> Result<inkwell::types::FunctionType<'ctx>, String> {
        let ptr = self.ptr_ty();
        let i32t = self.context.i32_type();
        let i64t = self.context.i64_type();
        let f64t = self.context.f64_type();
        let string = self.string_type();
        Ok(match name {
            "__sushi_concat" => string.fn_type(
                &[ptr.into(), i32t.into(), ptr.into(), i32t.into()],
                false,
            ),
            "__sushi_cstr" => ptr.fn_type(&[ptr.into(), i32t.into()], false),
            "__sushi_string_cmp" => i32t.fn_type(
                &[ptr.into(), i32t.into(), ptr.into(), i32t.into()],
                false,
            ),
            "__sushi_i64_to_string" => string.fn_type(&[i64t.into()], false),
            "__sushi_u64_to_string" => string.fn_type(&[i64t.into()], false),
            "__sushi_f64_to_string" => string.fn_type(&[f64t.into()], false),
            "__sushi_bool_to_string" => string.fn_type(&[self.context.i8_type().into()], false),
            other => return Err(format!("internal: unknown helper `{}`", other)),
        })
    }

    /// malloc with the RE2021 allocation-failure trap.
    pub(crate) fn checked_malloc(
        &mut self,
        size: IntValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, String> {
        let malloc = self.extern_fn("malloc")?;
        let raw = self
            .builder
            .build_call(malloc, &[size.into()], "alloc")
            .map_err(|e| format!("failed to call malloc: {}", e))?
            .try_as_basic_value()
            .basic()
            .ok_or("malloc returned no value")?
            .into_pointer_value();

        let is_null = self
            .builder
            .build_is_null(raw, "alloc_is_null")
            .map_err(|e| format!("failed null check: {}", e))?;
        let fail = self.append_block("alloc_fail")?;
        let ok = self.append_block("alloc_ok")?;
        self.builder
            .build_conditional_branch(is_null, fail, ok)
            .map_err(|e| format!("failed branch: {}", e))?;

        self.builder.position_at_end(fail);
        self.emit_runtime_abort("RE2021: allocation failure\n", 2021)?;
        self.builder.position_at_end(ok);
        Ok(raw)
    }

    /// Print a runtime-error message to stderr and exit with `code`.
    pub(crate) fn emit_runtime_abort(&mut self, message: &str, code: i32) -> Result<(), String> {
        let fprintf = self.extern_fn("fprintf")?;
        let stderr = self.stdio_handle(super::runtime::StdioHandle::Err)?;
        let text = self.literal_global(message)?;
        self.builder
            .build_call(fprintf, &[stderr.into(), text.into()], "re_msg")
            .map_err(|e| format!("failed to call fprintf: {}", e))?;
        let exit = self.extern_fn("exit")?;
        let code = self.context.i32_type().const_int(code as u64, true);
        self.builder
            .build_call(exit, &[code.into()], "re_exit")
            .map_err(|e| format!("failed to call exit: {}", e))?;
        self.builder
            .build_unreachable()
            .map_err(|e| format!("failed unreachable: {}", e))?;
        Ok(())
    }

    /// `__sushi_concat(a_data, a_size, b_data, b_size)` — heap-allocates
    /// the joined string.
    pub(crate) fn concat_helper(&mut self) -> Result<FunctionValue<'ctx>, String> {
        self.with_helper("__sushi_concat", |em, f| {
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let a_data = f.get_nth_param(0).ok_or("missing param")?.into_pointer_value();
            let a_size = f.get_nth_param(1).ok_or("missing param")?.into_int_value();
            let b_data = f.get_nth_param(2).ok_or("missing param")?.into_pointer_value();
            let b_size = f.get_nth_param(3).ok_or("missing param")?.into_int_value();

            let i64t = em.context.i64_type();
            let total32 = em
                .builder
                .build_int_add(a_size, b_size, "total")
                .map_err(|e| e.to_string())?;
            let total = em
                .builder
                .build_int_s_extend(total32, i64t, "total64")
                .map_err(|e| e.to_string())?;
            let buffer = em.checked_malloc(total)?;

            let memcpy = em.extern_fn("memcpy")?;
            let a_size64 = em
                .builder
                .build_int_s_extend(a_size, i64t, "a64")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_call(memcpy, &[buffer.into(), a_data.into(), a_size64.into()], "cp_a")
                .map_err(|e| e.to_string())?;
            let tail = unsafe {
                em.builder
                    .build_in_bounds_gep(buffer, &[a_size64], "tail")
                    .map_err(|e| e.to_string())?
            };
            let b_size64 = em
                .builder
                .build_int_s_extend(b_size, i64t, "b64")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_call(memcpy, &[tail.into(), b_data.into(), b_size64.into()], "cp_b")
                .map_err(|e| e.to_string())?;

            let result = em.fat_string(buffer, total32)?;
            em.builder
                .build_return(Some(&result))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// `__sushi_cstr(data, size)` — copy into a fresh null-terminated
    /// buffer (fat-pointer data is not guaranteed terminated).
    pub(crate) fn cstr_helper(&mut self) -> Result<FunctionValue<'ctx>, String> {
        self.with_helper("__sushi_cstr", |em, f| {
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let data = f.get_nth_param(0).ok_or("missing param")?.into_pointer_value();
            let size = f.get_nth_param(1).ok_or("missing param")?.into_int_value();

            let i64t = em.context.i64_type();
            let size64 = em
                .builder
                .build_int_s_extend(size, i64t, "size64")
                .map_err(|e| e.to_string())?;
            let with_nul = em
                .builder
                .build_int_add(size64, i64t.const_int(1, false), "with_nul")
                .map_err(|e| e.to_string())?;
            let buffer = em.checked_malloc(with_nul)?;

            let memcpy = em.extern_fn("memcpy")?;
            em.builder
                .build_call(memcpy, &[buffer.into(), data.into(), size64.into()], "cp")
                .map_err(|e| e.to_string())?;
            let end = unsafe {
                em.builder
                    .build_in_bounds_gep(buffer, &[size64], "end")
                    .map_err(|e| e.to_string())?
            };
            em.builder
                .build_store(end, em.context.i8_type().const_zero())
                .map_err(|e| e.to_string())?;
            em.builder
                .build_return(Some(&buffer))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// `__sushi_string_cmp` — strcmp over temporary C strings of both fat
    /// pointers; frees the temporaries.
    pub(crate) fn string_cmp_helper(&mut self) -> Result<FunctionValue<'ctx>, String> {
        let cstr = self.cstr_helper()?;
        self.with_helper("__sushi_string_cmp", move |em, f| {
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let a_data = f.get_nth_param(0).ok_or("missing param")?;
            let a_size = f.get_nth_param(1).ok_or("missing param")?;
            let b_data = f.get_nth_param(2).ok_or("missing param")?;
            let b_size = f.get_nth_param(3).ok_or("missing param")?;

            let a_c = em
                .builder
                .build_call(cstr, &[a_data.into(), a_size.into()], "a_c")
                .map_err(|e| e.to_string())?
                .try_as_basic_value()
                .basic()
                .ok_or("no value")?
                .into_pointer_value();
            let b_c = em
                .builder
                .build_call(cstr, &[b_data.into(), b_size.into()], "b_c")
                .map_err(|e| e.to_string())?
                .try_as_basic_value()
                .basic()
                .ok_or("no value")?
                .into_pointer_value();

            let strcmp = em.extern_fn("strcmp")?;
            let cmp = em
                .builder
                .build_call(strcmp, &[a_c.into(), b_c.into()], "cmp")
                .map_err(|e| e.to_string())?
                .try_as_basic_value()
                .basic()
                .ok_or("no value")?
                .into_int_value();

            let free = em.extern_fn("free")?;
            em.builder
                .build_call(free, &[a_c.into()], "free_a")
                .map_err(|e| e.to_string())?;
            em.builder
                .build_call(free, &[b_c.into()], "free_b")
                .map_err(|e| e.to_string())?;

            em.builder
                .build_return(Some(&cmp))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    fn number_to_string_helper(
        &mut self,
        name: &'static str,
        format: &'static str,
    ) -> Result<FunctionValue<'ctx>, String> {
        self.with_helper(name, move |em, f| {
            let entry = em.context.append_basic_block(f, "entry");
            em.builder.position_at_end(entry);
            let value = f.get_nth_param(0).ok_or("missing param")?;

            // 32 bytes cover i64/u64 decimal and %g doubles.
            let i64t = em.context.i64_type();
            let capacity = i64t.const_int(32, false);
            let buffer = em.checked_malloc(capacity)?;

            let snprintf = em.extern_fn("snprintf")?;
            let fmt = em.literal_global(format)?;
            let written = em
                .builder
                .build_call(
                    snprintf,
                    &[buffer.into(), capacity.into(), fmt.into(), value.into()],
                    "written",
                )
                .map_err(|e| e.to_string())?
                .try_as_basic_value()
                .basic()
                .ok_or("no value")?
                .into_int_value();

            let result = em.fat_string(buffer, written)?;
            em.builder
                .build_return(Some(&result))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    fn bool_to_string_helper(&mut self) -> Result<FunctionValue<'ctx>, String> {
        self.with_helper("__sushi_bool_to_string", |em, f| {
            let entry = em.context.append_basic_block(f, "entry");
            let true_block = em.context.append_basic_block(f, "is_true");
            let false_block = em.context.append_basic_block(f, "is_false");
            em.builder.position_at_end(entry);
            let value = f.get_nth_param(0).ok_or("missing param")?.into_int_value();
            let cond = em
                .builder
                .build_int_compare(
                    IntPredicate::NE,
                    value,
                    em.context.i8_type().const_zero(),
                    "as_i1",
                )
                .map_err(|e| e.to_string())?;
            em.builder
                .build_conditional_branch(cond, true_block, false_block)
                .map_err(|e| e.to_string())?;

            em.builder.position_at_end(true_block);
            let t = em.literal_string("true")?;
            em.builder.build_return(Some(&t)).map_err(|e| e.to_string())?;

            em.builder.position_at_end(false_block);
            let f_str = em.literal_string("false")?;
            em.builder
                .build_return(Some(&f_str))
                .map_err(|e| e.to_string())?;
            Ok(())
        })
    }

    /// Convert a value of a stringifiable type into a fat-pointer string.
    pub(crate) fn emit_to_string(
        &mut self,
        value: BasicValueEnum<'ctx>,
        ty: &Type,
    ) -> Result<StructValue<'ctx>, String> {
        let kind = ty
            .builtin()
            .ok_or_else(|| format!("internal: `{}` is not stringifiable", ty))?;
        match kind {
            BuiltinKind::String => Ok(value.into_struct_value()),
            BuiltinKind::Bool => {
                let helper = self.bool_to_string_helper()?;
                self.call_string_helper(helper, value)
            }
            BuiltinKind::F32 | BuiltinKind::F64 => {
                let helper = self.number_to_string_helper("__sushi_f64_to_string", "%g")?;
                let double = if kind == BuiltinKind::F32 {
                    self.builder
                        .build_float_ext(
                            value.into_float_value(),
                            self.context.f64_type(),
                            "as_f64",
                        )
                        .map_err(|e| e.to_string())?
                        .into()
                } else {
                    value
                };
                self.call_string_helper(helper, double)
            }
            k if k.is_unsigned_integer() => {
                let helper = self.number_to_string_helper("__sushi_u64_to_string", "%llu")?;
                let wide = self
                    .builder
                    .build_int_z_extend(
                        value.into_int_value(),
                        self.context.i64_type(),
                        "as_u64",
                    )
                    .map_err(|e| e.to_string())?;
                self.call_string_helper(helper, wide.into())
            }
            k if k.is_signed_integer() => {
                let helper = self.number_to_string_helper("__sushi_i64_to_string", "%lld")?;
                let wide = self
                    .builder
                    .build_int_s_extend(
                        value.into_int_value(),
                        self.context.i64_type(),
                        "as_i64",
                    )
                    .map_err(|e| e.to_string())?;
                self.call_string_helper(helper, wide.into())
            }
            other => Err(format!("internal: `{}` is not stringifiable", other.token())),
        }
    }

    fn call_string_helper(
        &mut self,
        helper: FunctionValue<'ctx>,
        value: BasicValueEnum<'ctx>,
    ) -> Result<StructValue<'ctx>, String> {
        Ok(self
            .builder
            .build_call(helper, &[value.into()], "to_str")
            .map_err(|e| e.to_string())?
            .try_as_basic_value()
            .basic()
            .ok_or("helper returned no value")?
            .into_struct_value())
    }

    /// Concatenate two fat strings.
    pub(crate) fn emit_concat(
        &mut self,
        left: StructValue<'ctx>,
        right: StructValue<'ctx>,
    ) -> Result<StructValue<'ctx>, String> {
        let helper = self.concat_helper()?;
        let l_data = self
            .builder
            .build_extract_value(left, 0, "l_data")
            .map_err(|e| e.to_string())?;
        let l_size = self
            .builder
            .build_extract_value(left, 1, "l_size")
            .map_err(|e| e.to_string())?;
        let r_data = self
            .builder
            .build_extract_value(right, 0, "r_data")
            .map_err(|e| e.to_string())?;
        let r_size = self
            .builder
            .build_extract_value(right, 1, "r_size")
            .map_err(|e| e.to_string())?;
        Ok(self
            .builder
            .build_call(
                helper,
                &[l_data.into(), l_size.into(), r_data.into(), r_size.into()],
                "concat",
            )
            .map_err(|e| e.to_string())?
            .try_as_basic_value()
            .basic()
            .ok_or("concat returned no value")?
            .into_struct_value())
    }

    /// Compare two fat strings; returns the strcmp result as i32.
    pub(crate) fn emit_string_cmp(
        &mut self,
        left: StructValue<'ctx>,
        right: StructValue<'ctx>,
    ) -> Result<IntValue<'ctx>, String> {
        let helper = self.string_cmp_helper()?;
        let l_data = self
            .builder
            .build_extract_value(left, 0, "l_data")
            .map_err(|e| e.to_string())?;
        let l_size = self
            .builder
            .build_extract_value(left, 1, "l_size")
            .map_err(|e| e.to_string())?;
        let r_data = self
            .builder
            .build_extract_value(right, 0, "r_data")
            .map_err(|e| e.to_string())?;
        let r_size = self
            .builder
            .build_extract_value(right, 1, "r_size")
            .map_err(|e| e.to_string())?;
        Ok(self
            .builder
            .build_call(
                helper,
                &[l_data.into(), l_size.into(), r_data.into(), r_size.into()],
                "str_cmp",
            )
            .map_err(|e| e.to_string())?
            .try_as_basic_value()
            .basic()
            .ok_or("string_cmp returned no value")?
            .into_int_value())
    }
}
