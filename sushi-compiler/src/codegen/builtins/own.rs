//! Own<T> methods: deref and explicit destruction. Allocation happens in
//! the constructor path (calls.rs).

use crate::codegen::Emitter;
use inkwell::values::BasicValueEnum;
use sushi_ast::{Expression, StructType};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_own_method(
        &mut self,
        receiver: &Expression,
        own_ty: &StructType,
        method: &str,
    ) -> Result<BasicValueEnum<'ctx>, String> {
        let inner = own_ty
            .generic_args
            .as_ref()
            .and_then(|a| a.first())
            .map(|t| self.resolve(t))
            .ok_or("internal: Own without argument")?;

        match method {
            "get" => {
                let value = self.emit_expression(receiver)?.into_struct_value();
                let heap = self
                    .builder
                    .build_extract_value(value, 0, "own_ptr")
                    .map_err(|e| e.to_string())?
                    .into_pointer_value();
                let llvm = self.lower(&inner)?;
                self.builder
                    .build_load(heap, "own_value")
                    .map_err(|e| e.to_string())
            }
            "destroy" => {
                let (ptr, ty) = self.emit_place(receiver)?;
                self.emit_destructor(ptr, &ty)?;
                self.note_destroyed(receiver);
                Ok(self.unit_value())
            }
            other => Err(format!("internal: unknown Own method `{}`", other)),
        }
    }
}
