//! Expression lowering: literals, names, operators, member/index access,
//! borrows, casts, and string interpolation. Calls, constructors and the
//! try operator live in calls.rs; method dispatch in builtins/.

use super::Emitter;
use inkwell::values::{BasicValueEnum, IntValue, PointerValue};
use inkwell::{FloatPredicate, IntPredicate};
use sushi_ast::{
    BinaryOp, BuiltinKind, ExprKind, Expression, InterpolationPart, Type, UnaryOp,
};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_expression(
        &mut self,
        expr: &Expression,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        match &expr.kind {
            ExprKind::IntLiteral(value) => {
                let ty = self.expr_type(expr)?;
                let kind = ty.builtin().unwrap_or(BuiltinKind::I32);
                let width = self.lower(&Type::Builtin(kind))?.into_int_type();
                Ok(width.const_int(*value as u64, kind.is_signed_integer()).into())
            }
            ExprKind::FloatLiteral(value) => {
                let ty = self.expr_type(expr)?;
                let kind = ty.builtin().unwrap_or(BuiltinKind::F64);
                let float = self.lower(&Type::Builtin(kind))?.into_float_type();
                Ok(float.const_float(*value).into())
            }
            ExprKind::BoolLiteral(value) => Ok(self
                .context
                .i8_type()
                .const_int(u64::from(*value), false)
                .into()),
            ExprKind::StringLiteral(text) => Ok(self.literal_string(text)?.into()),

            ExprKind::InterpolatedString(parts) => self.emit_interpolation(parts),

            ExprKind::Name(name) => {
                if let Some((ptr, ty)) = self.variables.get(name).cloned() {
                    let llvm_ty = self.lower(&ty)?;
                    return self
                        .builder
                        .build_load(name)
                        .map_err(|e| format!("failed to load `{}`: {}", name, e));
                }
                if let Some((global, ty)) = self.globals.get(name).cloned() {
                    let llvm_ty = self.lower(&ty)?;
                    return self
                        .builder
                        .build_load(name)
                        .map_err(|e| format!("failed to load `{}`: {}", name, e));
                }
                Err(format!("internal: `{}` has no storage", name))
            }

            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),

            ExprKind::Unary { op, expr: inner } => {
                let value = self.emit_expression(inner)?;
                match op {
                    UnaryOp::Neg => {
                        if value.is_float_value() {
                            self.builder
                                .build_float_neg(value.into_float_value(), "neg")
                                .map(Into::into)
                                .map_err(|e| format!("failed neg: {}", e))
                        } else {
                            self.builder
                                .build_int_neg(value.into_int_value(), "neg")
                                .map(Into::into)
                                .map_err(|e| format!("failed neg: {}", e))
                        }
                    }
                    UnaryOp::Not => {
                        let as_i1 = self.to_i1(value.into_int_value())?;
                        let flipped = self
                            .builder
                            .build_not(as_i1, "not")
                            .map_err(|e| format!("failed not: {}", e))?;
                        Ok(self.bool_value(flipped)?.into())
                    }
                }
            }

            ExprKind::Call { .. }
            | ExprKind::StructConstructor { .. }
            | ExprKind::EnumConstructor { .. }
            | ExprKind::Try { .. } => self.emit_call_like(expr),

            ExprKind::MethodCall { .. } => self.emit_method_call(expr),

            ExprKind::MemberAccess { .. } | ExprKind::IndexAccess { .. } => {
                let (ptr, ty) = self.emit_place(expr)?;
                let llvm_ty = self.lower(&ty)?;
                self.builder
                    .build_load("load")
                    .map_err(|e| format!("failed load: {}", e))
            }

            ExprKind::ArrayLiteral(items) => {
                let ty = self.expr_type(expr)?;
                let Type::Array { base, .. } = &ty else {
                    return Err("internal: array literal without array type".to_string());
                };
                let elem_ty = self.lower(base)?;
                let mut value = elem_ty.array_type(items.len() as u32).get_undef();
                for (index, item) in items.iter().enumerate() {
                    let item_value = self.emit_expression(item)?;
                    value = self
                        .builder
                        .build_insert_value(value, item_value, index as u32, "arr_elem")
                        .map_err(|e| format!("failed insert: {}", e))?
                        .into_array_value();
                }
                Ok(value.into())
            }

            ExprKind::DynArrayFrom(items) => self.emit_dyn_array_from(expr, items),
            ExprKind::DynArrayNew { .. } => {
                // Zeroed triple: len 0, cap 0, data null.
                Ok(self.dyn_array_type().const_zero().into())
            }

            ExprKind::Cast { expr: inner, target } => self.emit_cast(inner, target),

            ExprKind::Borrow { expr: inner, .. } => {
                let (ptr, _) = self.emit_place(inner)?;
                Ok(ptr.into())
            }

            ExprKind::Range { .. } => {
                Err("internal: range expression outside foreach".to_string())
            }
            ExprKind::DotCall { .. } => {
                Err("internal: unresolved dot-call reached the emitter".to_string())
            }
        }
    }

    /// Lvalue emission: the address and semantic type of a place.
    /// References auto-dereference on the way.
    pub(crate) fn emit_place(
        &mut self,
        expr: &Expression,
    ) -> Result<(PointerValue<'ctx>, Type), String> {
        match &expr.kind {
            ExprKind::Name(name) => {
                let (ptr, ty) = self
                    .variables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("internal: `{}` has no storage", name))?;
                self.deref_place(ptr, ty)
            }
            ExprKind::MemberAccess { object, field } => {
                let (object_ptr, object_ty) = self.emit_place(object)?;
                let resolved = self.resolve(&object_ty);
                let Type::Struct(struct_ty) = &resolved else {
                    return Err(format!("internal: member access on `{}`", resolved));
                };
                let index = struct_ty
                    .field_index(field)
                    .ok_or_else(|| format!("internal: no field `{}`", field))?;
                let llvm_struct = self.lower(&resolved)?.into_struct_type();
                let field_ptr = self
                    .builder
                    .build_struct_gep(object_ptr, index as u32, field)
                    .map_err(|e| format!("failed gep: {}", e))?;
                let field_ty = self.resolve(&struct_ty.fields[index].1);
                Ok((field_ptr, field_ty))
            }
            ExprKind::IndexAccess { object, index } => {
                let (object_ptr, object_ty) = self.emit_place(object)?;
                let index_value = self.emit_expression(index)?.into_int_value();
                let index_value = self.coerce_to_i32(index_value)?;
                match self.resolve(&object_ty) {
                    Type::Array { base, size } => {
                        let bound = self.context.i32_type().const_int(size as u64, false);
                        self.emit_bounds_check(index_value, bound)?;
                        let llvm_array = self.lower(&Type::Array {
                            base: base.clone(),
                            size,
                        })?;
                        let zero = self.context.i32_type().const_zero();
                        let elem_ptr = unsafe {
                            self.builder
                                .build_in_bounds_gep(&[zero, index_value],
                                    "elem",
                                )
                                .map_err(|e| format!("failed gep: {}", e))?
                        };
                        Ok((elem_ptr, self.resolve(&base)))
                    }
                    Type::DynArray { base } => {
                        let triple = self.dyn_array_type();
                        let len_ptr = self
                            .builder
                            .build_struct_gep(object_ptr, 0, "len_ptr")
                            .map_err(|e| format!("failed gep: {}", e))?;
                        let len = self
                            .builder
                            .build_load("len")
                            .map_err(|e| format!("failed load: {}", e))?
                            .into_int_value();
                        self.emit_bounds_check(index_value, len)?;
                        let data_ptr_slot = self
                            .builder
                            .build_struct_gep(object_ptr, 2, "data_slot")
                            .map_err(|e| format!("failed gep: {}", e))?;
                        let data = self
                            .builder
                            .build_load("data")
                            .map_err(|e| format!("failed load: {}", e))?
                            .into_pointer_value();
                        let elem_llvm = self.lower(&base)?;
                        let elem_ptr = unsafe {
                            self.builder
                                .build_in_bounds_gep(&[index_value], "elem")
                                .map_err(|e| format!("failed gep: {}", e))?
                        };
                        Ok((elem_ptr, self.resolve(&base)))
                    }
                    other => Err(format!("internal: indexing `{}`", other)),
                }
            }
            // Materialize any other rvalue into a temporary slot.
            _ => {
                let value = self.emit_expression(expr)?;
                let ty = self.expr_type(expr)?;
                let slot = self
                    .builder
                    .build_alloca(self.lower(&ty)?, "tmp_place")
                    .map_err(|e| format!("failed alloca: {}", e))?;
                self.builder
                    .build_store(slot, value)
                    .map_err(|e| format!("failed store: {}", e))?;
                self.deref_place(slot, ty)
            }
        }
    }

    /// Chase reference layers: a slot holding `&peek T` yields the pointee
    /// address typed `T`.
    fn deref_place(
        &mut self,
        mut ptr: PointerValue<'ctx>,
        mut ty: Type,
    ) -> Result<(PointerValue<'ctx>, Type), String> {
        while let Type::Reference { inner, .. } = ty {
            ptr = self
                .builder
                .build_load("deref")
                .map_err(|e| format!("failed deref: {}", e))?
                .into_pointer_value();
            ty = *inner;
        }
        Ok((ptr, ty))
    }

    /// RE2020: index out of bounds. `0 <= index < bound` or print + exit.
    pub(crate) fn emit_bounds_check(
        &mut self,
        index: IntValue<'ctx>,
        bound: IntValue<'ctx>,
    ) -> Result<(), String> {
        let below = self
            .builder
            .build_int_compare(
                IntPredicate::SLT,
                index,
                self.context.i32_type().const_zero(),
                "idx_below",
            )
            .map_err(|e| e.to_string())?;
        let above = self
            .builder
            .build_int_compare(IntPredicate::SGE, index, bound, "idx_above")
            .map_err(|e| e.to_string())?;
        let out = self
            .builder
            .build_or(below, above, "idx_oob")
            .map_err(|e| e.to_string())?;

        let trap = self.append_block("oob_trap")?;
        let ok = self.append_block("oob_ok")?;
        self.builder
            .build_conditional_branch(out, trap, ok)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(trap);
        let fprintf = self.extern_fn("fprintf")?;
        let stderr = self.stdio_handle(super::runtime::StdioHandle::Err)?;
        let message =
            self.literal_global("array index %d out of bounds for array of size %d\n")?;
        self.builder
            .build_call(
                fprintf,
                &[stderr.into(), message.into(), index.into(), bound.into()],
                "oob_msg",
            )
            .map_err(|e| e.to_string())?;
        let exit = self.extern_fn("exit")?;
        let code = self.context.i32_type().const_int(2020, false);
        self.builder
            .build_call(exit, &[code.into()], "oob_exit")
            .map_err(|e| e.to_string())?;
        self.builder
            .build_unreachable()
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(ok);
        Ok(())
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        // Logical and/or short-circuit; everything else evaluates both.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.emit_short_circuit(op, lhs, rhs);
        }

        let lhs_ty = self.expr_type(lhs)?;
        let left = self.emit_expression(lhs)?;
        let right = self.emit_expression(rhs)?;

        if op == BinaryOp::Xor {
            let l = self.to_i1(left.into_int_value())?;
            let r = self.to_i1(right.into_int_value())?;
            let x = self
                .builder
                .build_xor(l, r, "xor")
                .map_err(|e| e.to_string())?;
            return Ok(self.bool_value(x)?.into());
        }

        if op.is_comparison() {
            return self.emit_comparison(op, &lhs_ty, left, right);
        }

        if lhs_ty.is_float() {
            let l = left.into_float_value();
            let r = right.into_float_value();
            let result = match op {
                BinaryOp::Add => self.builder.build_float_add(l, r, "fadd"),
                BinaryOp::Sub => self.builder.build_float_sub(l, r, "fsub"),
                BinaryOp::Mul => self.builder.build_float_mul(l, r, "fmul"),
                BinaryOp::Div => self.builder.build_float_div(l, r, "fdiv"),
                BinaryOp::Rem => self.builder.build_float_rem(l, r, "frem"),
                other => return Err(format!("internal: `{}` on floats", other.symbol())),
            };
            return result.map(Into::into).map_err(|e| e.to_string());
        }

        let l = left.into_int_value();
        let mut r = right.into_int_value();
        let unsigned = lhs_ty.is_unsigned_integer();

        // Shift amounts coerce to the left operand's width.
        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            r = self.coerce_int_width(r, l.get_type())?;
        }

        let result = match op {
            BinaryOp::Add => self.builder.build_int_add(l, r, "add"),
            BinaryOp::Sub => self.builder.build_int_sub(l, r, "sub"),
            BinaryOp::Mul => self.builder.build_int_mul(l, r, "mul"),
            // Division and remainder are signed ops.
            BinaryOp::Div => self.builder.build_int_signed_div(l, r, "div"),
            BinaryOp::Rem => self.builder.build_int_signed_rem(l, r, "rem"),
            BinaryOp::BitAnd => self.builder.build_and(l, r, "and"),
            BinaryOp::BitOr => self.builder.build_or(l, r, "or"),
            BinaryOp::BitXor => self.builder.build_xor(l, r, "bxor"),
            BinaryOp::Shl => self.builder.build_left_shift(l, r, "shl"),
            BinaryOp::Shr => {
                if unsigned {
                    self.builder.build_right_shift(l, r, false, "lshr")
                } else {
                    self.builder.build_right_shift(l, r, true, "ashr")
                }
            }
            other => return Err(format!("internal: unexpected operator `{}`", other.symbol())),
        };
        result.map(Into::into).map_err(|e| e.to_string())
    }

    fn emit_comparison(
        &mut self,
        op: BinaryOp,
        operand_ty: &Type,
        left: BasicValueEnum<'ctx>,
        right: BasicValueEnum<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        if operand_ty.is_string() {
            let cmp = self.emit_string_cmp(left.into_struct_value(), right.into_struct_value())?;
            let predicate = int_predicate(op, true);
            let result = self
                .builder
                .build_int_compare(
                    predicate,
                    cmp,
                    self.context.i32_type().const_zero(),
                    "str_rel",
                )
                .map_err(|e| e.to_string())?;
            return Ok(self.bool_value(result)?.into());
        }

        if operand_ty.is_float() {
            let predicate = match op {
                BinaryOp::Eq => FloatPredicate::OEQ,
                BinaryOp::Ne => FloatPredicate::ONE,
                BinaryOp::Lt => FloatPredicate::OLT,
                BinaryOp::Le => FloatPredicate::OLE,
                BinaryOp::Gt => FloatPredicate::OGT,
                BinaryOp::Ge => FloatPredicate::OGE,
                _ => unreachable!(),
            };
            let result = self
                .builder
                .build_float_compare(
                    predicate,
                    left.into_float_value(),
                    right.into_float_value(),
                    "fcmp",
                )
                .map_err(|e| e.to_string())?;
            return Ok(self.bool_value(result)?.into());
        }

        let signed = !operand_ty.is_unsigned_integer();
        let predicate = int_predicate(op, signed);
        let result = self
            .builder
            .build_int_compare(
                predicate,
                left.into_int_value(),
                right.into_int_value(),
                "cmp",
            )
            .map_err(|e| e.to_string())?;
        Ok(self.bool_value(result)?.into())
    }

    fn emit_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let left = self.emit_expression(lhs)?.into_int_value();
        let left_i1 = self.to_i1(left)?;
        let entry = self
            .builder
            .get_insert_block()
            .ok_or("no insert block")?;

        let rhs_block = self.append_block("sc_rhs")?;
        let merge = self.append_block("sc_merge")?;
        match op {
            BinaryOp::And => self
                .builder
                .build_conditional_branch(left_i1, rhs_block, merge)
                .map_err(|e| e.to_string())?,
            BinaryOp::Or => self
                .builder
                .build_conditional_branch(left_i1, merge, rhs_block)
                .map_err(|e| e.to_string())?,
            _ => unreachable!(),
        };

        self.builder.position_at_end(rhs_block);
        let right = self.emit_expression(rhs)?.into_int_value();
        let right_i1 = self.to_i1(right)?;
        let rhs_end = self
            .builder
            .get_insert_block()
            .ok_or("no insert block")?;
        self.builder
            .build_unconditional_branch(merge)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(merge);
        let phi = self
            .builder
            .build_phi(self.context.bool_type(), "sc")
            .map_err(|e| e.to_string())?;
        let short_value = self
            .context
            .bool_type()
            .const_int(u64::from(op == BinaryOp::Or), false);
        phi.add_incoming(&[(&short_value, entry), (&right_i1, rhs_end)]);
        Ok(self
            .bool_value(phi.as_basic_value().into_int_value())?
            .into())
    }

    fn emit_cast(
        &mut self,
        inner: &Expression,
        target: &Type,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let source_ty = self.expr_type(inner)?;
        let target = self.resolve(target);
        let value = self.emit_expression(inner)?;
        if source_ty == target {
            return Ok(value);
        }

        let target_llvm = self.lower(&target)?;
        match (source_ty.is_float(), target.is_float()) {
            (false, false) => {
                let from = value.into_int_value();
                let to = target_llvm.into_int_type();
                let from_width = from.get_type().get_bit_width();
                let to_width = to.get_bit_width();
                let result = if to_width < from_width {
                    self.builder.build_int_truncate(from, to, "trunc")
                } else {
                    // Widening defaults to sign extension.
                    self.builder.build_int_s_extend(from, to, "sext")
                };
                result.map(Into::into).map_err(|e| e.to_string())
            }
            (false, true) => self
                .builder
                .build_signed_int_to_float(
                    value.into_int_value(),
                    target_llvm.into_float_type(),
                    "sitofp",
                )
                .map(Into::into)
                .map_err(|e| e.to_string()),
            (true, false) => self
                .builder
                .build_float_to_signed_int(
                    value.into_float_value(),
                    target_llvm.into_int_type(),
                    "fptosi",
                )
                .map(Into::into)
                .map_err(|e| e.to_string()),
            (true, true) => {
                let from = value.into_float_value();
                let to = target_llvm.into_float_type();
                let widening = source_ty.builtin() == Some(BuiltinKind::F32);
                let result = if widening {
                    self.builder.build_float_ext(from, to, "fpext")
                } else {
                    self.builder.build_float_trunc(from, to, "fptrunc")
                };
                result.map(Into::into).map_err(|e| e.to_string())
            }
        }
    }

    fn emit_interpolation(
        &mut self,
        parts: &[InterpolationPart],
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let mut accumulated: Option<inkwell::values::StructValue<'ctx>> = None;
        for part in parts {
            let piece = match part {
                InterpolationPart::Literal(text) => self.literal_string(text)?,
                InterpolationPart::Expr(e) => {
                    let ty = self.expr_type(e)?;
                    let value = self.emit_expression(e)?;
                    self.emit_to_string(value, &ty)?
                }
            };
            accumulated = Some(match accumulated {
                None => piece,
                Some(prefix) => self.emit_concat(prefix, piece)?,
            });
        }
        match accumulated {
            Some(value) => Ok(value.into()),
            None => Ok(self.literal_string("")?.into()),
        }
    }

    fn emit_dyn_array_from(
        &mut self,
        expr: &Expression,
        items: &[Expression],
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let ty = self.expr_type(expr)?;
        let Type::DynArray { base } = &ty else {
            return Err("internal: from() without dynamic array type".to_string());
        };
        let elem_llvm = self.lower(base)?;
        let elem_size = super::layout::size_of(self.sem, base);
        let count = items.len() as u64;

        let total = self
            .context
            .i64_type()
            .const_int(elem_size * count.max(1), false);
        let data = self.checked_malloc(total)?;

        for (index, item) in items.iter().enumerate() {
            let value = self.emit_expression(item)?;
            let offset = self.context.i32_type().const_int(index as u64, false);
            let slot = unsafe {
                self.builder
                    .build_in_bounds_gep(&[offset], "init_slot")
                    .map_err(|e| e.to_string())?
            };
            self.builder
                .build_store(slot, value)
                .map_err(|e| e.to_string())?;
        }

        let len = self.context.i32_type().const_int(count, false);
        let triple = self.dyn_array_type().get_undef();
        let with_len = self
            .builder
            .build_insert_value(triple, len, 0, "arr_len")
            .map_err(|e| e.to_string())?;
        let with_cap = self
            .builder
            .build_insert_value(with_len, len, 1, "arr_cap")
            .map_err(|e| e.to_string())?;
        let full = self
            .builder
            .build_insert_value(with_cap, data, 2, "arr_data")
            .map_err(|e| e.to_string())?;
        Ok(full.into_struct_value().into())
    }

    // -----------------------------------------------------------
    // Small coercions
    // -----------------------------------------------------------

    /// bool values live as i8; branches need i1.
    pub(crate) fn to_i1(&mut self, value: IntValue<'ctx>) -> Result<IntValue<'ctx>, String> {
        if value.get_type().get_bit_width() == 1 {
            return Ok(value);
        }
        self.builder
            .build_int_compare(
                IntPredicate::NE,
                value,
                value.get_type().const_zero(),
                "to_i1",
            )
            .map_err(|e| e.to_string())
    }

    /// An i1 back into the i8 bool representation.
    pub(crate) fn bool_value(&mut self, value: IntValue<'ctx>) -> Result<IntValue<'ctx>, String> {
        if value.get_type().get_bit_width() == 8 {
            return Ok(value);
        }
        self.builder
            .build_int_z_extend(value, self.context.i8_type(), "as_bool")
            .map_err(|e| e.to_string())
    }

    pub(crate) fn coerce_to_i32(
        &mut self,
        value: IntValue<'ctx>,
    ) -> Result<IntValue<'ctx>, String> {
        self.coerce_int_width(value, self.context.i32_type())
    }

    pub(crate) fn coerce_int_width(
        &mut self,
        value: IntValue<'ctx>,
        target: inkwell::types::IntType<'ctx>,
    ) -> Result<IntValue<'ctx>, String> {
        let from = value.get_type().get_bit_width();
        let to = target.get_bit_width();
        if from == to {
            Ok(value)
        } else if from > to {
            self.builder
                .build_int_truncate(value, target, "coerce_trunc")
                .map_err(|e| e.to_string())
        } else {
            self.builder
                .build_int_s_extend(value, target, "coerce_sext")
                .map_err(|e| e.to_string())
        }
    }
}

fn int_predicate(op: BinaryOp, signed: bool) -> IntPredicate {
    match (op, signed) {
        (BinaryOp::Eq, _) => IntPredicate::EQ,
        (BinaryOp::Ne, _) => IntPredicate::NE,
        (BinaryOp::Lt, true) => IntPredicate::SLT,
        (BinaryOp::Le, true) => IntPredicate::SLE,
        (BinaryOp::Gt, true) => IntPredicate::SGT,
        (BinaryOp::Ge, true) => IntPredicate::SGE,
        (BinaryOp::Lt, false) => IntPredicate::ULT,
        (BinaryOp::Le, false) => IntPredicate::ULE,
        (BinaryOp::Gt, false) => IntPredicate::UGT,
        (BinaryOp::Ge, false) => IntPredicate::UGE,
        _ => unreachable!(),
    }
}
