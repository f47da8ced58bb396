//! Match lowering: a sequential chain of pattern-test blocks. Each arm
//! tests the outer tag (and any nested tags) and falls through to the next
//! arm on mismatch; the checker already guaranteed exhaustiveness, so the
//! final fallthrough is unreachable unless a wildcard consumed it.

use super::Emitter;
use inkwell::values::{BasicValueEnum, StructValue};
use inkwell::IntPredicate;
use sushi_ast::{EnumPattern, EnumType, MatchStmt, Pattern, PatternBinding, Type};

type Bindings<'ctx> = Vec<(String, BasicValueEnum<'ctx>, Type)>;

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_match(&mut self, s: &MatchStmt) -> Result<(), String> {
        let scrutinee_ty = self.expr_type(&s.scrutinee)?;
        let scrutinee_value = self.emit_expression(&s.scrutinee)?;

        // Unwrap Own<enum> scrutinees once, up front.
        let (enum_value, enum_ty) = match self.resolve(&scrutinee_ty) {
            Type::Enum(e) => (scrutinee_value.into_struct_value(), e),
            Type::Struct(st) if st.is_monomorph_of("Own") => {
                let inner = st
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .map(|t| self.resolve(t))
                    .ok_or("internal: Own scrutinee without argument")?;
                let Type::Enum(e) = inner else {
                    return Err("internal: match scrutinee is not an enum".to_string());
                };
                let heap = self
                    .builder
                    .build_extract_value(scrutinee_value.into_struct_value(), 0, "own_ptr")
                    .map_err(|er| er.to_string())?
                    .into_pointer_value();
                let llvm = self.lower(&Type::Enum(e.clone()))?;
                let loaded = self
                    .builder
                    .build_load(heap, "own_enum")
                    .map_err(|er| er.to_string())?
                    .into_struct_value();
                (loaded, e)
            }
            other => return Err(format!("internal: match scrutinee `{}`", other)),
        };

        let merge = self.append_block("match_merge")?;
        let mut next_test = self.append_block("arm_test")?;
        self.builder
            .build_unconditional_branch(next_test)
            .map_err(|e| e.to_string())?;

        for (index, arm) in s.arms.iter().enumerate() {
            self.builder.position_at_end(next_test);
            let is_last = index + 1 == s.arms.len();
            let fail_block = if is_last {
                // Exhaustiveness holds; a fall-off is dead.
                let dead = self.append_block("match_dead")?;
                dead
            } else {
                self.append_block("arm_test")?
            };

            let bindings =
                self.emit_pattern_test(&arm.pattern, enum_value, &enum_ty, fail_block)?;

            // Pattern matched: bind captures and run the body.
            for (name, value, ty) in &bindings {
                let llvm = self.lower(ty)?;
                let slot = self
                    .builder
                    .build_alloca(llvm, name)
                    .map_err(|e| e.to_string())?;
                self.builder
                    .build_store(slot, *value)
                    .map_err(|e| e.to_string())?;
                // Captures alias the scrutinee's payload; they are not
                // tracked for cleanup, the scrutinee's owner is.
                self.variables.insert(name.clone(), (slot, ty.clone()));
            }
            self.emit_block(&arm.body)?;
            if !self.block_terminated() {
                self.builder
                    .build_unconditional_branch(merge)
                    .map_err(|e| e.to_string())?;
            }

            if is_last {
                self.builder.position_at_end(fail_block);
                self.builder
                    .build_unreachable()
                    .map_err(|e| e.to_string())?;
            } else {
                next_test = fail_block;
            }
        }

        self.builder.position_at_end(merge);
        Ok(())
    }

    /// Emit the tests for one pattern in the current block, branching to
    /// `fail_block` on mismatch. On the fallthrough path the pattern has
    /// matched and the returned captures are valid.
    fn emit_pattern_test(
        &mut self,
        pattern: &Pattern,
        enum_value: StructValue<'ctx>,
        enum_ty: &EnumType,
        fail_block: inkwell::basic_block::BasicBlock<'ctx>,
    ) -> Result<Bindings<'ctx>, String> {
        match pattern {
            Pattern::Wildcard(_) => Ok(Vec::new()),
            Pattern::Own(inner, _) => {
                self.emit_pattern_test(inner, enum_value, enum_ty, fail_block)
            }
            Pattern::Enum(ep) => self.emit_enum_pattern_test(ep, enum_value, enum_ty, fail_block),
        }
    }

    fn emit_enum_pattern_test(
        &mut self,
        ep: &EnumPattern,
        enum_value: StructValue<'ctx>,
        enum_ty: &EnumType,
        fail_block: inkwell::basic_block::BasicBlock<'ctx>,
    ) -> Result<Bindings<'ctx>, String> {
        let variant_index = enum_ty
            .variant_index(&ep.variant)
            .ok_or_else(|| format!("internal: variant `{}` missing", ep.variant))?;
        let variant = enum_ty.variants[variant_index].clone();

        let tag = self.extract_enum_tag(enum_value)?;
        let expected = self
            .context
            .i32_type()
            .const_int(variant_index as u64, false);
        let matches = self
            .builder
            .build_int_compare(IntPredicate::EQ, tag, expected, "tag_match")
            .map_err(|e| e.to_string())?;
        let continue_block = self.append_block(&format!("arm_{}", ep.variant))?;
        self.builder
            .build_conditional_branch(matches, continue_block, fail_block)
            .map_err(|e| e.to_string())?;
        self.builder.position_at_end(continue_block);

        let mut bindings = Vec::new();
        for (slot_index, (binding, slot_ty)) in ep
            .bindings
            .iter()
            .zip(&variant.associated_types)
            .enumerate()
        {
            let slot_ty = self.resolve(slot_ty);
            let value =
                self.extract_enum_payload(enum_value, enum_ty, variant_index, slot_index)?;
            self.emit_binding_test(binding, value, &slot_ty, fail_block, &mut bindings)?;
        }
        Ok(bindings)
    }

    fn emit_binding_test(
        &mut self,
        binding: &PatternBinding,
        value: BasicValueEnum<'ctx>,
        ty: &Type,
        fail_block: inkwell::basic_block::BasicBlock<'ctx>,
        bindings: &mut Bindings<'ctx>,
    ) -> Result<(), String> {
        match binding {
            PatternBinding::Name(name) => {
                bindings.push((name.clone(), value, ty.clone()));
                Ok(())
            }
            PatternBinding::Discard => Ok(()),
            PatternBinding::Enum(nested) => {
                let Type::Enum(nested_enum) = ty else {
                    return Err(format!("internal: nested pattern on `{}`", ty));
                };
                let nested_bindings = self.emit_enum_pattern_test(
                    nested,
                    value.into_struct_value(),
                    nested_enum,
                    fail_block,
                )?;
                bindings.extend(nested_bindings);
                Ok(())
            }
            PatternBinding::Own(inner) => {
                let Type::Struct(st) = ty else {
                    return Err(format!("internal: Own pattern on `{}`", ty));
                };
                let inner_ty = st
                    .generic_args
                    .as_ref()
                    .and_then(|a| a.first())
                    .map(|t| self.resolve(t))
                    .ok_or("internal: Own slot without argument")?;
                let heap = self
                    .builder
                    .build_extract_value(value.into_struct_value(), 0, "own_slot_ptr")
                    .map_err(|e| e.to_string())?
                    .into_pointer_value();
                let llvm = self.lower(&inner_ty)?;
                let pointee = self
                    .builder
                    .build_load(heap, "own_slot_val")
                    .map_err(|e| e.to_string())?;
                self.emit_binding_test(inner, pointee, &inner_ty, fail_block, bindings)
            }
        }
    }
}
