//! Statement lowering: blocks with RAII scope exits, let/rebind, returns
//! with move suppression, if/while control flow, and print.

use super::destructors::needs_cleanup;
use super::Emitter;
use inkwell::values::BasicValueEnum;
use sushi_ast::{
    Block, ExprKind, IfStmt, LetStmt, PrintStmt, RebindStmt, ReturnStmt, Statement, WhileStmt,
};

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn emit_block(&mut self, block: &Block) -> Result<(), String> {
        self.scopes.enter();
        for stmt in &block.statements {
            if self.block_terminated() {
                break;
            }
            self.emit_statement(stmt)?;
        }
        if self.block_terminated() {
            // A return/break already ran the cleanup it needed.
            let _ = self.scopes.leave();
        } else {
            self.emit_scope_exit()?;
        }
        Ok(())
    }

    fn emit_statement(&mut self, stmt: &Statement) -> Result<(), String> {
        match stmt {
            Statement::Let(s) => self.emit_let(s),
            Statement::Rebind(s) => self.emit_rebind(s),
            Statement::Return(s) => self.emit_return(s),
            Statement::If(s) => self.emit_if(s),
            Statement::While(s) => self.emit_while(s),
            Statement::Foreach(s) => self.emit_foreach(s),
            Statement::Match(s) => self.emit_match(s),
            Statement::Print(s) => self.emit_print(s),
            Statement::Expr(s) => {
                self.emit_expression(&s.expr)?;
                Ok(())
            }
            Statement::Break(_) => {
                let target = self
                    .loop_stack
                    .last()
                    .ok_or("internal: break outside loop")?
                    .break_block;
                self.builder
                    .build_unconditional_branch(target)
                    .map_err(|e| e.to_string())?;
                Ok(())
            }
            Statement::Continue(_) => {
                let target = self
                    .loop_stack
                    .last()
                    .ok_or("internal: continue outside loop")?
                    .continue_block;
                self.builder
                    .build_unconditional_branch(target)
                    .map_err(|e| e.to_string())?;
                Ok(())
            }
        }
    }

    fn emit_let(&mut self, s: &LetStmt) -> Result<(), String> {
        let ty = self.resolve(&s.declared_type);
        let llvm = self.lower(&ty)?;
        let slot = self
            .builder
            .build_alloca(llvm, &s.name)
            .map_err(|e| format!("failed alloca for `{}`: {}", s.name, e))?;

        if let Some(init) = &s.init {
            let value = self.emit_expression(init)?;
            self.builder
                .build_store(slot, value)
                .map_err(|e| format!("failed store for `{}`: {}", s.name, e))?;
        }

        self.variables.insert(s.name.clone(), (slot, ty.clone()));
        if needs_cleanup(self.sem, &ty) {
            self.scopes.track(&s.name);
        }
        Ok(())
    }

    fn emit_rebind(&mut self, s: &RebindStmt) -> Result<(), String> {
        let (ptr, _) = self.emit_place(&s.target)?;
        let value = self.emit_expression(&s.value)?;
        self.builder
            .build_store(ptr, value)
            .map_err(|e| format!("failed rebind store: {}", e))?;
        Ok(())
    }

    /// Emit the return value, suppress destructors for locals moved into
    /// it, run cleanup for every enclosing scope, and ret.
    fn emit_return(&mut self, s: &ReturnStmt) -> Result<(), String> {
        let value_expr = s
            .value
            .as_ref()
            .ok_or("internal: bare return survived validation")?;

        // Moved locals first, so the value they flow into stays alive.
        if let ExprKind::EnumConstructor { args, .. } = &value_expr.kind {
            for arg in args {
                if let ExprKind::Name(name) = &arg.kind {
                    self.scopes.mark_moved(name);
                }
            }
        }

        let value = self.emit_expression(value_expr)?;
        self.emit_cleanup_all_scopes()?;
        self.builder
            .build_return(Some(&value))
            .map_err(|e| format!("failed return: {}", e))?;
        Ok(())
    }

    fn emit_if(&mut self, s: &IfStmt) -> Result<(), String> {
        let cond = self.emit_expression(&s.condition)?.into_int_value();
        let cond = self.to_i1(cond)?;

        let then_block = self.append_block("then")?;
        let else_block = self.append_block("else")?;
        let merge = self.append_block("if_merge")?;

        self.builder
            .build_conditional_branch(cond, then_block, else_block)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(then_block);
        self.emit_block(&s.then_block)?;
        if !self.block_terminated() {
            self.builder
                .build_unconditional_branch(merge)
                .map_err(|e| e.to_string())?;
        }

        self.builder.position_at_end(else_block);
        if let Some(else_body) = &s.else_block {
            self.emit_block(else_body)?;
        }
        if !self.block_terminated() {
            self.builder
                .build_unconditional_branch(merge)
                .map_err(|e| e.to_string())?;
        }

        self.builder.position_at_end(merge);
        Ok(())
    }

    fn emit_while(&mut self, s: &WhileStmt) -> Result<(), String> {
        let header = self.append_block("while_header")?;
        let body = self.append_block("while_body")?;
        let exit = self.append_block("while_exit")?;

        self.builder
            .build_unconditional_branch(header)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(header);
        let cond = self.emit_expression(&s.condition)?.into_int_value();
        let cond = self.to_i1(cond)?;
        self.builder
            .build_conditional_branch(cond, body, exit)
            .map_err(|e| e.to_string())?;

        self.builder.position_at_end(body);
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
        Ok(())
    }

    fn emit_print(&mut self, s: &PrintStmt) -> Result<(), String> {
        let ty = self.expr_type(&s.value)?;
        let value = self.emit_expression(&s.value)?;
        let text = self.emit_to_string(value, &ty)?;
        self.emit_print_string(text, s.newline)
    }

    /// printf("%.*s", size, data) — fat-pointer data is not
    /// null-terminated, so the precision form is required.
    pub(crate) fn emit_print_string(
        &mut self,
        text: inkwell::values::StructValue<'ctx>,
        newline: bool,
    ) -> Result<(), String> {
        let data: BasicValueEnum = self
            .builder
            .build_extract_value(text, 0, "print_data")
            .map_err(|e| e.to_string())?;
        let size: BasicValueEnum = self
            .builder
            .build_extract_value(text, 1, "print_size")
            .map_err(|e| e.to_string())?;
        let format = if newline { "%.*s\n" } else { "%.*s" };
        let format = self.literal_global(format)?;
        let printf = self.extern_fn("printf")?;
        self.builder
            .build_call(
                printf,
                &[format.into(), size.into(), data.into()],
                "print",
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
