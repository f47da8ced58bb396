//! Whole-module emission: constants, then prototypes, then bodies, then
//! the C-ABI main wrapper, so forward references always resolve. Also the
//! object-file and IR outputs the driver consumes.

use super::Emitter;
use crate::error::CodegenError;
use inkwell::values::BasicValue;
use inkwell::IntPredicate;
use inkwell::OptimizationLevel;
use log::debug;
use std::path::Path;
use sushi_ast::{ExprKind, Type};

impl<'ctx> Emitter<'ctx, '_> {
    /// Emit the whole unit. The context must be sealed and error-free.
    pub fn emit_program(&mut self) -> Result<(), CodegenError> {
        self.emit_constants()?;

        // Prototypes before bodies.
        let mut sigs: Vec<_> = self.sem.functions.values().cloned().collect();
        sigs.sort_by(|a, b| a.name.cmp(&b.name));
        for sig in &sigs {
            self.declare_function(sig)?;
        }

        let mut body_names: Vec<_> = self.sem.function_bodies.keys().cloned().collect();
        body_names.sort();
        for name in &body_names {
            let decl = self.sem.function_bodies[name].clone();
            debug!("emit fn {}", name);
            self.emit_function_body(&decl)?;
        }

        if self.sem.function_bodies.contains_key("main") {
            self.emit_main_wrapper()?;
        }
        Ok(())
    }

    fn emit_constants(&mut self) -> Result<(), String> {
        let mut names: Vec<_> = self.sem.constants.keys().cloned().collect();
        names.sort();
        for name in names {
            let info = self.sem.constants[&name].clone();
            let ty = self.resolve(&info.ty);
            let llvm = self.lower(&ty)?;
            let global = self.module.add_global(llvm, None, &name);
            global.set_constant(true);

            let initializer: inkwell::values::BasicValueEnum = match &info.value.kind {
                ExprKind::IntLiteral(v) => {
                    let int_ty = llvm.into_int_type();
                    int_ty.const_int(*v as u64, true).into()
                }
                ExprKind::FloatLiteral(v) => llvm.into_float_type().const_float(*v).into(),
                ExprKind::BoolLiteral(v) => self
                    .context
                    .i8_type()
                    .const_int(u64::from(*v), false)
                    .into(),
                ExprKind::StringLiteral(text) => {
                    let data = self
                        .module
                        .add_global(
                            self.context.i8_type().array_type(text.len() as u32 + 1),
                            None,
                            &format!("{}__data", name),
                        );
                    data.set_constant(true);
                    data.set_initializer(&self.context.const_string(text.as_bytes(), true));
                    let size = self.context.i32_type().const_int(text.len() as u64, false);
                    self.context
                        .const_struct(
                            &[data.as_pointer_value().into(), size.into()],
                            false,
                        )
                        .into()
                }
                _ => {
                    return Err(format!(
                        "internal: constant `{}` was not folded to a literal",
                        name
                    ))
                }
            };
            global.set_initializer(&initializer);
            self.globals.insert(name, (global, ty));
        }
        Ok(())
    }

    /// The exported C entry point: `i32 main(i32, i8**)`. Calls the Sushi
    /// main, maps Ok(integer) to its value, Ok(anything else) to 0, and
    /// Err to a non-zero exit code.
    fn emit_main_wrapper(&mut self) -> Result<(), String> {
        let sushi_main = self.lookup_function("main")?;
        let sig = self
            .sem
            .functions
            .get("main")
            .ok_or("internal: main signature missing")?
            .clone();
        let return_enum = match self.resolve(&sig.return_type) {
            Type::Enum(e) => e,
            other => return Err(format!("internal: main returns `{}`", other)),
        };
        let ok_payload = return_enum.variants[0]
            .associated_types
            .first()
            .map(|t| self.resolve(t));

        let i32t = self.context.i32_type();
        let main_type = i32t.fn_type(&[i32t.into(), self.ptr_ty().into()], false);
        let c_main = self.module.add_function("main", main_type, None);
        let entry = self.context.append_basic_block(c_main, "entry");
        self.current_function = Some(c_main);
        self.builder.position_at_end(entry);

        let result = self
            .builder
            .build_call(sushi_main, &[], "sushi_main_result")
            .map_err(|e| e.to_string())?
            .try_as_basic_value()
            .basic()
            .ok_or("sushi main returned void")?
            .into_struct_value();

        let tag = self.extract_enum_tag(result)?;
        let is_ok = self
            .builder
            .build_int_compare(IntPredicate::EQ, tag, i32t.const_zero(), "is_ok")
            .map_err(|e| e.to_string())?;

        let ok_block = self.context.append_basic_block(c_main, "exit_ok");
        let err_block = self.context.append_basic_block(c_main, "exit_err");
        self.builder
            .build_conditional_branch(is_ok, ok_block, err_block)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(ok_block);
        let exit_code: inkwell::values::IntValue = match &ok_payload {
            Some(ty) if ty.is_integer() => {
                let payload = self.extract_enum_payload(result, &return_enum, 0, 0)?;
                self.coerce_to_i32(payload.into_int_value())?
            }
            _ => i32t.const_zero(),
        };
        self.builder
            .build_return(Some(&exit_code.as_basic_value_enum()))
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(err_block);
        self.builder
            .build_return(Some(&i32t.const_int(1, false)))
            .map_err(|e| e.to_string())?;

        self.current_function = None;
        Ok(())
    }

    /// LLVM's own verifier over the finished module.
    pub fn verify(&self) -> Result<(), CodegenError> {
        self.module
            .verify()
            .map_err(|e| CodegenError::Verify(e.to_string()))
    }

    pub fn ir_string(&self) -> String {
        self.module.print_to_string().to_string()
    }

    /// Native object-file output through the host target machine.
    pub fn write_object(
        &self,
        output_path: &Path,
        opt_level: OptimizationLevel,
    ) -> Result<(), CodegenError> {
        use inkwell::targets::{
            CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
        };

        Target::initialize_native(&InitializationConfig::default())
            .map_err(|e| CodegenError::Target(format!("failed to initialize target: {}", e)))?;

        let triple = TargetMachine::get_default_triple();
        let target = Target::from_triple(&triple)
            .map_err(|e| CodegenError::Target(format!("failed to get target: {}", e)))?;
        let machine = target
            .create_target_machine(
                &triple,
                "generic",
                "",
                opt_level,
                RelocMode::PIC,
                CodeModel::Default,
            )
            .ok_or_else(|| CodegenError::Target("failed to create target machine".to_string()))?;

        machine
            .write_to_file(&self.module, FileType::Object, output_path)
            .map_err(|e| CodegenError::Target(format!("failed to write object file: {}", e)))
    }

    /// Bitcode output for `--lib` builds.
    pub fn write_bitcode(&self, output_path: &Path) -> bool {
        self.module.write_bitcode_to_path(output_path)
    }
}
