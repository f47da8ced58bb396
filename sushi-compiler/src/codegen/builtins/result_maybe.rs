//! Inline IR for the Result / Maybe method families. Both are two-variant
//! enums with the success variant at tag 0, so one emitter serves both.

use crate::codegen::Emitter;
use inkwell::values::BasicValueEnum;
use inkwell::IntPredicate;
use sushi_ast::{EnumType, Expression, Type};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_result_maybe_method(
        &mut self,
        receiver: &Expression,
        enum_ty: &EnumType,
        method: &str,
        args: &[Expression],
        return_ty: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let value = self.emit_expression(receiver)?.into_struct_value();
        let tag = self.extract_enum_tag(value)?;

        match method {
            "is_ok" | "is_some" => {
                let ok = self
                    .builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        tag,
                        self.context.i32_type().const_zero(),
                        method,
                    )
                    .map_err(|e| e.to_string())?;
                Ok(self.bool_value(ok)?.into())
            }
            "is_err" | "is_none" => {
                let err = self
                    .builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        tag,
                        self.context.i32_type().const_int(1, false),
                        method,
                    )
                    .map_err(|e| e.to_string())?;
                Ok(self.bool_value(err)?.into())
            }
            // realise(default): the success payload, or the default.
            "realise" => {
                let default = self.emit_expression(
                    args.first().ok_or("internal: realise without default")?,
                )?;
                let is_success = self
                    .builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        tag,
                        self.context.i32_type().const_zero(),
                        "realise_ok",
                    )
                    .map_err(|e| e.to_string())?;

                let success_block = self.append_block("realise_success")?;
                let default_block = self.append_block("realise_default")?;
                let merge = self.append_block("realise_merge")?;
                self.builder
                    .build_conditional_branch(is_success, success_block, default_block)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(success_block);
                let payload = self.extract_enum_payload(value, enum_ty, 0, 0)?;
                let success_end = self.builder.get_insert_block().ok_or("no block")?;
                self.builder
                    .build_unconditional_branch(merge)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(default_block);
                let default_end = self.builder.get_insert_block().ok_or("no block")?;
                self.builder
                    .build_unconditional_branch(merge)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(merge);
                let llvm = self.lower(return_ty)?;
                let phi = self
                    .builder
                    .build_phi(llvm, "realised")
                    .map_err(|e| e.to_string())?;
                phi.add_incoming(&[(&payload, success_end), (&default, default_end)]);
                Ok(phi.as_basic_value())
            }
            // expect(message): the success payload, or print-and-abort.
            "expect" => {
                let message = self.emit_expression(
                    args.first().ok_or("internal: expect without message")?,
                )?;
                let is_success = self
                    .builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        tag,
                        self.context.i32_type().const_zero(),
                        "expect_ok",
                    )
                    .map_err(|e| e.to_string())?;

                let fail_block = self.append_block("expect_fail")?;
                let ok_block = self.append_block("expect_ok")?;
                self.builder
                    .build_conditional_branch(is_success, ok_block, fail_block)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(fail_block);
                self.emit_print_string(message.into_struct_value(), true)?;
                let abort = self.extern_fn("abort")?;
                self.builder
                    .build_call(abort, &[], "expect_abort")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_unreachable()
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(ok_block);
                self.extract_enum_payload(value, enum_ty, 0, 0)
            }
            // err(): the error as Maybe<E>.
            "err" => {
                let Type::Enum(maybe_enum) = self.resolve(return_ty) else {
                    return Err("internal: err() without Maybe return".to_string());
                };
                let is_err = self
                    .builder
                    .build_int_compare(
                        IntPredicate::EQ,
                        tag,
                        self.context.i32_type().const_int(1, false),
                        "has_err",
                    )
                    .map_err(|e| e.to_string())?;

                let some_block = self.append_block("err_some")?;
                let none_block = self.append_block("err_none")?;
                let merge = self.append_block("err_merge")?;
                self.builder
                    .build_conditional_branch(is_err, some_block, none_block)
                    .map_err(|e| e.to_string())?;

                self.builder.position_at_end(some_block);
                let payload = self.extract_enum_payload(value, enum_ty, 1, 0)?;
                let some = self.emit_enum_value(&maybe_enum, 0, &[payload])?;
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
                    .build_phi(llvm, "maybe_err")
                    .map_err(|e| e.to_string())?;
                phi.add_incoming(&[(&some, some_end), (&none, none_end)]);
                Ok(phi.as_basic_value())
            }
            other => Err(format!("internal: unknown Result/Maybe method `{}`", other)),
        }
    }
}
