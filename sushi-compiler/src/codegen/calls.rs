//! Call-shaped lowering: function calls, struct and enum constructors, and
//! the try operator. Enum values are built and unpacked through a stack
//! slot so the byte-array payload area can be addressed with the variant's
//! packed tuple type.

use super::Emitter;
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, IntValue, StructValue};
use inkwell::IntPredicate;
use sushi_ast::{ConstructorArg, EnumType, ExprKind, Expression, Type};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_call_like(
        &mut self,
        expr: &Expression,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        match &expr.kind {
            ExprKind::Call { callee, args } => self.emit_function_call(callee, args),
            ExprKind::StructConstructor {
                name,
                args,
                resolved_struct_type,
            } => {
                let struct_ty = resolved_struct_type
                    .clone()
                    .ok_or("internal: unresolved struct constructor")?;
                self.emit_struct_constructor(name, &struct_ty, args)
            }
            ExprKind::EnumConstructor {
                variant,
                args,
                resolved_enum_type,
                ..
            } => {
                let enum_ty = resolved_enum_type
                    .clone()
                    .ok_or("internal: unresolved enum constructor")?;
                let tag = enum_ty
                    .variant_index(variant)
                    .ok_or_else(|| format!("internal: variant `{}` missing", variant))?;
                let mut payload = Vec::with_capacity(args.len());
                for arg in args {
                    payload.push(self.emit_expression(arg)?);
                }
                Ok(self.emit_enum_value(&enum_ty, tag as u32, &payload)?.into())
            }
            ExprKind::Try { .. } => self.emit_try(expr),
            _ => unreachable!(),
        }
    }

    fn emit_function_call(
        &mut self,
        callee: &str,
        args: &[Expression],
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let function = self.lookup_function(callee)?;
        let mut arg_values: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.emit_expression(arg)?.into());
        }
        let call = self
            .builder
            .build_call(function, &arg_values, &format!("{}_call", callee))
            .map_err(|e| format!("failed to call `{}`: {}", callee, e))?;
        call.try_as_basic_value()
            .basic()
            .ok_or_else(|| format!("internal: `{}` returned void", callee))
    }

    fn emit_struct_constructor(
        &mut self,
        name: &str,
        struct_ty: &sushi_ast::StructType,
        args: &[ConstructorArg],
    ) -> Result<BasicValueEnum<'ctx>, String> {
        match struct_ty.generic_base.as_deref() {
            Some("Own") => {
                let inner = struct_ty
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .cloned()
                    .ok_or("internal: Own without argument")?;
                let value = self
                    .emit_expression(&args.first().ok_or("internal: Own.new without value")?.value)?;
                let size = super::layout::size_of(self.sem, &inner);
                let size = self.context.i64_type().const_int(size, false);
                let slot = self.checked_malloc(size)?;
                self.builder
                    .build_store(slot, value)
                    .map_err(|e| e.to_string())?;

                let own_llvm = self.lower(&Type::Struct(struct_ty.clone()))?.into_struct_type();
                let built = self
                    .builder
                    .build_insert_value(own_llvm.get_undef(), slot, 0, "own")
                    .map_err(|e| e.to_string())?;
                Ok(built.into_struct_value().into())
            }
            // Empty heap containers start zeroed; growth is lazy.
            Some("HashMap") | Some("List") => {
                let llvm = self.lower(&Type::Struct(struct_ty.clone()))?.into_struct_type();
                Ok(llvm.const_zero().into())
            }
            _ => {
                let llvm = self.lower(&Type::Struct(struct_ty.clone()))?.into_struct_type();
                let mut value = llvm.get_undef();
                for (index, (field_name, field_ty)) in struct_ty.fields.iter().enumerate() {
                    let arg = args
                        .iter()
                        .enumerate()
                        .find(|(arg_index, arg)| match &arg.name {
                            Some(n) => n == field_name,
                            None => *arg_index == index,
                        })
                        .map(|(_, arg)| arg)
                        .ok_or_else(|| {
                            format!("internal: `{}` missing field `{}`", name, field_name)
                        })?;
                    let mut field_value = self.emit_expression(&arg.value)?;
                    // Heap-owning values passed from an existing binding are
                    // deep-copied so the new struct owns independent memory
                    // and no buffer is freed twice.
                    let field_ty = self.resolve(field_ty);
                    if field_ty.needs_cleanup()
                        && matches!(
                            arg.value.kind,
                            ExprKind::Name(_)
                                | ExprKind::MemberAccess { .. }
                                | ExprKind::IndexAccess { .. }
                        )
                    {
                        field_value = self.emit_deep_copy(field_value, &field_ty)?;
                    }
                    value = self
                        .builder
                        .build_insert_value(value, field_value, index as u32, field_name)
                        .map_err(|e| e.to_string())?
                        .into_struct_value();
                }
                Ok(value.into())
            }
        }
    }

    /// Build an enum value: store the tag, pack the payload into the data
    /// area through the variant's packed tuple type, load the whole value.
    pub(crate) fn emit_enum_value(
        &mut self,
        enum_ty: &EnumType,
        tag: u32,
        payload: &[BasicValueEnum<'ctx>],
    ) -> Result<StructValue<'ctx>, String> {
        let llvm = self.lower(&Type::Enum(enum_ty.clone()))?.into_struct_type();
        let slot = self
            .builder
            .build_alloca(llvm, &format!("{}_val", enum_ty.name))
            .map_err(|e| e.to_string())?;

        let tag_ptr = self
            .builder
            .build_struct_gep(slot, 0, "tag_ptr")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(tag_ptr, self.context.i32_type().const_int(tag as u64, false))
            .map_err(|e| e.to_string())?;

        if !payload.is_empty() {
            let variant = enum_ty
                .variants
                .get(tag as usize)
                .ok_or("internal: bad variant tag")?
                .clone();
            let payload_ty = self.variant_payload_type(&variant)?;
            let data_ptr = self
                .builder
                .build_struct_gep(slot, 1, "data_ptr")
                .map_err(|e| e.to_string())?;
            for (index, value) in payload.iter().enumerate() {
                let field_ptr = self
                    .builder
                    .build_struct_gep(data_ptr, index as u32, "payload_slot")
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_store(field_ptr, *value)
                    .map_err(|e| e.to_string())?;
            }
        }

        Ok(self
            .builder
            .build_load(&format!("{}_loaded", enum_ty.name))
            .map_err(|e| e.to_string())?
            .into_struct_value())
    }

    /// The tag of an enum value.
    pub(crate) fn extract_enum_tag(
        &mut self,
        value: StructValue<'ctx>,
    ) -> Result<IntValue<'ctx>, String> {
        Ok(self
            .builder
            .build_extract_value(value, 0, "tag")
            .map_err(|e| e.to_string())?
            .into_int_value())
    }

    /// One payload slot of an enum value, read through a stack slot.
    pub(crate) fn extract_enum_payload(
        &mut self,
        value: StructValue<'ctx>,
        enum_ty: &EnumType,
        variant_index: usize,
        slot_index: usize,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let llvm = self.lower(&Type::Enum(enum_ty.clone()))?.into_struct_type();
        let temp = self
            .builder
            .build_alloca(llvm, "payload_tmp")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_store(temp, value)
            .map_err(|e| e.to_string())?;
        self.extract_enum_payload_from_ptr(temp, enum_ty, variant_index, slot_index)
    }

    pub(crate) fn extract_enum_payload_from_ptr(
        &mut self,
        enum_ptr: inkwell::values::PointerValue<'ctx>,
        enum_ty: &EnumType,
        variant_index: usize,
        slot_index: usize,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let llvm = self.lower(&Type::Enum(enum_ty.clone()))?.into_struct_type();
        let variant = enum_ty
            .variants
            .get(variant_index)
            .ok_or("internal: bad variant index")?
            .clone();
        let payload_ty = self.variant_payload_type(&variant)?;
        let data_ptr = self
            .builder
            .build_struct_gep(enum_ptr, 1, "data_ptr")
            .map_err(|e| e.to_string())?;
        let slot_ptr = self
            .builder
            .build_struct_gep(data_ptr, slot_index as u32, "slot_ptr")
            .map_err(|e| e.to_string())?;
        let slot_ty = variant
            .associated_types
            .get(slot_index)
            .ok_or("internal: bad payload slot")?;
        let slot_ty = self.resolve(slot_ty);
        let slot_llvm = self.lower(&slot_ty)?;
        self.builder
            .build_load("payload")
            .map_err(|e| e.to_string())
    }

    /// `inner??`: extract the tag; on the failure tag run every enclosing
    /// scope's cleanup (moved locals excluded) and return the enclosing
    /// function's Err; on success continue with the unwrapped payload.
    fn emit_try(&mut self, expr: &Expression) -> Result<BasicValueEnum<'ctx>, String> {
        let ExprKind::Try {
            inner,
            inferred_inner_type,
            inferred_success_tag,
            inferred_func_return_type,
            ..
        } = &expr.kind
        else {
            unreachable!()
        };
        let inner_enum = match inferred_inner_type {
            Some(Type::Enum(e)) => e.clone(),
            _ => return Err("internal: try without inner enum annotation".to_string()),
        };
        let success_tag = inferred_success_tag.ok_or("internal: try without success tag")?;
        let return_enum = match inferred_func_return_type {
            Some(Type::Enum(e)) => e.clone(),
            _ => return Err("internal: try without return annotation".to_string()),
        };

        let inner_value = self.emit_expression(inner)?.into_struct_value();
        let tag = self.extract_enum_tag(inner_value)?;
        let is_success = self
            .builder
            .build_int_compare(
                IntPredicate::EQ,
                tag,
                self.context.i32_type().const_int(success_tag as u64, false),
                "try_ok",
            )
            .map_err(|e| e.to_string())?;

        let fail_block = self.append_block("try_fail")?;
        let ok_block = self.append_block("try_ok")?;
        self.builder
            .build_conditional_branch(is_success, ok_block, fail_block)
            .map_err(|e| e.to_string())?;

        // Failure: project the error into the function's Err and return.
        self.builder.position_at_end(fail_block);
        let err_payload: Vec<BasicValueEnum> = if inner_enum.is_result_shaped()
            && !inner_enum.variants[1].associated_types.is_empty()
        {
            vec![self.extract_enum_payload(inner_value, &inner_enum, 1, 0)?]
        } else {
            // Maybe-shaped: None projects to StdError.NotFound.
            let err_ty = return_enum.variants[1]
                .associated_types
                .first()
                .map(|t| self.resolve(t));
            match err_ty {
                Some(Type::Enum(std_error)) => {
                    let not_found = std_error
                        .variant_index("NotFound")
                        .unwrap_or_default();
                    vec![self
                        .emit_enum_value(&std_error, not_found as u32, &[])?
                        .into()]
                }
                _ => Vec::new(),
            }
        };
        let err_tag = 1u32;
        let err_value = self.emit_enum_value(&return_enum, err_tag, &err_payload)?;
        self.emit_cleanup_all_scopes()?;
        self.builder
            .build_return(Some(&err_value))
            .map_err(|e| e.to_string())?;

        // Success: unwrap the payload (blank-payload successes yield a unit
        // byte).
        self.builder.position_at_end(ok_block);
        if inner_enum.variants[success_tag as usize]
            .associated_types
            .is_empty()
        {
            Ok(self.context.i8_type().const_zero().into())
        } else {
            self.extract_enum_payload(inner_value, &inner_enum, success_tag as usize, 0)
        }
    }
}
