//! Methods on the stdio handles and file values. Handles lower to FILE*
//! pointers; stream iteration hands a { 0, -1, FILE* } iterator to
//! foreach, which drives getline (foreach.rs).

use crate::codegen::runtime::StdioHandle;
use crate::codegen::Emitter;
use inkwell::values::{BasicValueEnum, PointerValue};
use inkwell::IntPredicate;
use sushi_ast::{BuiltinKind, Expression, Type};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_io_method(
        &mut self,
        receiver: &Expression,
        receiver_ty: &Type,
        method: &str,
        args: &[Expression],
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let handle = self.io_handle(receiver, receiver_ty)?;

        match method {
            "lines" => {
                // Stream iterator: length -1 marks it; data carries FILE*.
                let undef = self.dyn_array_type().get_undef();
                let a = self
                    .builder
                    .build_insert_value(
                        undef,
                        self.context.i32_type().const_zero(),
                        0,
                        "stream_cur",
                    )
                    .map_err(|e| e.to_string())?;
                let b = self
                    .builder
                    .build_insert_value(
                        a,
                        self.context.i32_type().const_all_ones(),
                        1,
                        "stream_len",
                    )
                    .map_err(|e| e.to_string())?;
                let c = self
                    .builder
                    .build_insert_value(b, handle, 2, "stream_handle")
                    .map_err(|e| e.to_string())?;
                Ok(c.into_struct_value().into())
            }
            "read_line" => {
                let line_slot = self
                    .builder
                    .build_alloca(self.ptr_ty(), "rl_line")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_store(line_slot, self.ptr_ty().const_null())
                    .map_err(|e| e.to_string())?;
                let cap_slot = self
                    .builder
                    .build_alloca(self.context.i64_type(), "rl_cap")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_store(cap_slot, self.context.i64_type().const_zero())
                    .map_err(|e| e.to_string())?;

                let getline = self.extern_fn("getline")?;
                let nread = self
                    .builder
                    .build_call(
                        getline,
                        &[line_slot.into(), cap_slot.into(), handle.into()],
                        "rl_nread",
                    )
                    .map_err(|e| e.to_string())?
                    .try_as_basic_value()
                    .basic()
                    .ok_or("getline returned no value")?
                    .into_int_value();

                // EOF reads as an empty string.
                let failed = self
                    .builder
                    .build_int_compare(
                        IntPredicate::SLT,
                        nread,
                        self.context.i64_type().const_zero(),
                        "rl_eof",
                    )
                    .map_err(|e| e.to_string())?;
                let nread32 = self
                    .builder
                    .build_int_truncate(nread, self.context.i32_type(), "rl_len")
                    .map_err(|e| e.to_string())?;
                let len = self
                    .builder
                    .build_select(
                        failed,
                        self.context.i32_type().const_zero(),
                        nread32,
                        "rl_len_safe",
                    )
                    .map_err(|e| e.to_string())?
                    .into_int_value();
                let data = self
                    .builder
                    .build_load(line_slot, "rl_data")
                    .map_err(|e| e.to_string())?
                    .into_pointer_value();
                Ok(self.fat_string(data, len)?.into())
            }
            "write" => {
                let text = self.emit_expression(&args[0])?.into_struct_value();
                let data = self
                    .builder
                    .build_extract_value(text, 0, "w_data")
                    .map_err(|e| e.to_string())?;
                let size = self
                    .builder
                    .build_extract_value(text, 1, "w_size")
                    .map_err(|e| e.to_string())?;
                let fprintf = self.extern_fn("fprintf")?;
                let format = self.literal_global("%.*s")?;
                self.builder
                    .build_call(
                        fprintf,
                        &[handle.into(), format.into(), size.into(), data.into()],
                        "w_call",
                    )
                    .map_err(|e| e.to_string())?;
                Ok(self.unit_value())
            }
            "close" => {
                let fclose = self.extern_fn("fclose")?;
                self.builder
                    .build_call(fclose, &[handle.into()], "close_call")
                    .map_err(|e| e.to_string())?;
                Ok(self.unit_value())
            }
            "seek" => {
                // SeekFrom's declaration order matches SEEK_SET/CUR/END.
                let whence_enum = self.emit_expression(&args[0])?.into_struct_value();
                let whence = self.extract_enum_tag(whence_enum)?;
                let offset = self.emit_expression(&args[1])?.into_int_value();
                let offset = self
                    .builder
                    .build_int_s_extend_or_bit_cast(
                        offset,
                        self.context.i64_type(),
                        "seek_off",
                    )
                    .map_err(|e| e.to_string())?;
                let fseek = self.extern_fn("fseek")?;
                self.builder
                    .build_call(
                        fseek,
                        &[handle.into(), offset.into(), whence.into()],
                        "seek_call",
                    )
                    .map_err(|e| e.to_string())?;
                Ok(self.unit_value())
            }
            "read_all" => {
                // Size via fseek/ftell, then one fread.
                let fseek = self.extern_fn("fseek")?;
                let ftell = self.extern_fn("ftell")?;
                let i64t = self.context.i64_type();
                let i32t = self.context.i32_type();
                let seek_end = i32t.const_int(2, false);
                let seek_set = i32t.const_zero();
                self.builder
                    .build_call(
                        fseek,
                        &[handle.into(), i64t.const_zero().into(), seek_end.into()],
                        "ra_seek_end",
                    )
                    .map_err(|e| e.to_string())?;
                let total = self
                    .builder
                    .build_call(ftell, &[handle.into()], "ra_size")
                    .map_err(|e| e.to_string())?
                    .try_as_basic_value()
                    .basic()
                    .ok_or("ftell returned no value")?
                    .into_int_value();
                self.builder
                    .build_call(
                        fseek,
                        &[handle.into(), i64t.const_zero().into(), seek_set.into()],
                        "ra_rewind",
                    )
                    .map_err(|e| e.to_string())?;

                let alloc = self
                    .builder
                    .build_int_add(total, i64t.const_int(1, false), "ra_alloc")
                    .map_err(|e| e.to_string())?;
                let buffer = self.checked_malloc(alloc)?;
                let fread = self.extern_fn("fread")?;
                self.builder
                    .build_call(
                        fread,
                        &[
                            buffer.into(),
                            i64t.const_int(1, false).into(),
                            total.into(),
                            handle.into(),
                        ],
                        "ra_read",
                    )
                    .map_err(|e| e.to_string())?;
                let size = self
                    .builder
                    .build_int_truncate(total, i32t, "ra_size32")
                    .map_err(|e| e.to_string())?;
                Ok(self.fat_string(buffer, size)?.into())
            }
            other => Err(format!("internal: unknown io method `{}`", other)),
        }
    }

    fn io_handle(
        &mut self,
        receiver: &Expression,
        receiver_ty: &Type,
    ) -> Result<PointerValue<'ctx>, String> {
        match receiver_ty {
            Type::Builtin(BuiltinKind::Stdin) => self.stdio_handle(StdioHandle::In),
            Type::Builtin(BuiltinKind::Stdout) => self.stdio_handle(StdioHandle::Out),
            Type::Builtin(BuiltinKind::Stderr) => self.stdio_handle(StdioHandle::Err),
            Type::Builtin(BuiltinKind::File) => {
                Ok(self.emit_expression(receiver)?.into_pointer_value())
            }
            other => Err(format!("internal: `{}` is not an io handle", other)),
        }
    }
}
