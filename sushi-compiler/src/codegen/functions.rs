//! Function declaration and body emission. Every Sushi function returns
//! its wrapped Result enum by value; the source-level `main` compiles as
//! `sushi_main`, with a C-ABI wrapper exported separately (program.rs).

use super::destructors::needs_cleanup;
use super::Emitter;
use crate::context::FunctionSig;
use crate::semantics::wrapped_return_type;
use inkwell::values::FunctionValue;
use sushi_ast::{FunctionDecl, Type};

/// The exported symbol for a Sushi-level function name.
pub(crate) fn symbol_for(name: &str) -> &str {
    if name == "main" {
        "sushi_main"
    } else {
        name
    }
}

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn declare_function(
        &mut self,
        sig: &FunctionSig,
    ) -> Result<FunctionValue<'ctx>, String> {
        let symbol = symbol_for(&sig.name).to_string();
        if let Some(existing) = self.functions.get(sig.name.as_str()) {
            return Ok(*existing);
        }
        let return_ty = self.resolve(&sig.return_type);
        let fn_type = self.function_type(&sig.params, &return_ty)?;
        let function = self.module.add_function(&symbol, fn_type, None);
        self.functions.insert(sig.name.clone(), function);
        Ok(function)
    }

    pub(crate) fn emit_function_body(&mut self, decl: &FunctionDecl) -> Result<(), String> {
        let function = self.lookup_function(&decl.name)?;
        self.current_function = Some(function);
        self.current_return = Some(self.resolve(&wrapped_return_type(decl)));
        self.variables.clear();
        self.scopes.clear();
        self.scopes.enter();

        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);

        // Parameters land in stack slots like any other local.
        for (index, param) in decl.params.iter().enumerate() {
            let param_ty = self.resolve(&param.ty);
            let llvm = self.lower(&param_ty)?;
            let slot = self
                .builder
                .build_alloca(llvm, &param.name)
                .map_err(|e| format!("failed alloca for `{}`: {}", param.name, e))?;
            let value = function
                .get_nth_param(index as u32)
                .ok_or_else(|| format!("internal: missing parameter {}", index))?;
            self.builder
                .build_store(slot, value)
                .map_err(|e| format!("failed store for `{}`: {}", param.name, e))?;
            self.variables
                .insert(param.name.clone(), (slot, param_ty.clone()));
            // A by-value heap-owning parameter is owned by this frame.
            if needs_cleanup(self.sem, &param_ty) {
                self.scopes.track(&param.name);
            }
        }

        self.emit_block(&decl.body)?;

        // A body that falls off its end returns Ok(~) when the success
        // type is blank; anything else was rejected earlier, so the edge
        // is dead.
        if !self.block_terminated() {
            let return_ty = self
                .current_return
                .clone()
                .ok_or("internal: no return type")?;
            if let Type::Enum(return_enum) = &return_ty {
                let ok_is_blank = return_enum.variants[0]
                    .associated_types
                    .first()
                    .map(|t| self.resolve(t).is_blank())
                    .unwrap_or(true);
                if ok_is_blank {
                    let unit = self.context.i8_type().const_zero();
                    let ok = self.emit_enum_value(return_enum, 0, &[unit.into()])?;
                    self.emit_cleanup_all_scopes()?;
                    self.builder
                        .build_return(Some(&ok))
                        .map_err(|e| e.to_string())?;
                } else {
                    self.builder
                        .build_unreachable()
                        .map_err(|e| e.to_string())?;
                }
            } else {
                self.builder
                    .build_unreachable()
                    .map_err(|e| e.to_string())?;
            }
        }

        let _ = self.scopes.leave();
        self.current_function = None;
        self.current_return = None;
        Ok(())
    }
}
