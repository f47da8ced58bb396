//! Platform-abstraction thin layer: libc extern declarations and the
//! platform-dependent stdio handle globals. Externs declare lazily and
//! cache; generated code never calls anything not listed here.

use super::Emitter;
use inkwell::module::Linkage;
use inkwell::values::{FunctionValue, PointerValue};
use inkwell::AddressSpace;

impl<'ctx> Emitter<'ctx, '_> {
    pub(crate) fn extern_fn(&mut self, name: &'static str) -> Result<FunctionValue<'ctx>, String> {
        if let Some(f) = self.externs.get(name) {
            return Ok(*f);
        }
        let ptr = self.context.i8_type().ptr_type(AddressSpace::default());
        let i32t = self.context.i32_type();
        let i64t = self.context.i64_type();
        let void = self.context.void_type();

        let fn_type = match name {
            "malloc" => ptr.fn_type(&[i64t.into()], false),
            "realloc" => ptr.fn_type(&[ptr.into(), i64t.into()], false),
            "free" => void.fn_type(&[ptr.into()], false),
            "memcpy" => ptr.fn_type(&[ptr.into(), ptr.into(), i64t.into()], false),
            "strlen" => i64t.fn_type(&[ptr.into()], false),
            "strcmp" => i32t.fn_type(&[ptr.into(), ptr.into()], false),
            "getline" => i64t.fn_type(&[ptr.into(), ptr.into(), ptr.into()], false),
            "fgets" => ptr.fn_type(&[ptr.into(), i32t.into(), ptr.into()], false),
            "fputs" => i32t.fn_type(&[ptr.into(), ptr.into()], false),
            "printf" => i32t.fn_type(&[ptr.into()], true),
            "fprintf" => i32t.fn_type(&[ptr.into(), ptr.into()], true),
            "snprintf" => i32t.fn_type(&[ptr.into(), i64t.into(), ptr.into()], true),
            "fopen" => ptr.fn_type(&[ptr.into(), ptr.into()], false),
            "fclose" => i32t.fn_type(&[ptr.into()], false),
            "fread" => i64t.fn_type(&[ptr.into(), i64t.into(), i64t.into(), ptr.into()], false),
            "fseek" => i32t.fn_type(&[ptr.into(), i64t.into(), i32t.into()], false),
            "ftell" => i64t.fn_type(&[ptr.into()], false),
            "getenv" => ptr.fn_type(&[ptr.into()], false),
            "setenv" => i32t.fn_type(&[ptr.into(), ptr.into(), i32t.into()], false),
            "getcwd" => ptr.fn_type(&[ptr.into(), i64t.into()], false),
            "chdir" => i32t.fn_type(&[ptr.into()], false),
            "exit" => void.fn_type(&[i32t.into()], false),
            "abort" => void.fn_type(&[], false),
            "getpid" => i32t.fn_type(&[], false),
            "getuid" => i32t.fn_type(&[], false),
            "sleep" => i32t.fn_type(&[i32t.into()], false),
            _ => return Err(format!("internal: unknown extern `{}`", name)),
        };
        let f = self.module.add_function(name, fn_type, None);
        self.externs.insert(name, f);
        Ok(f)
    }

    /// The platform's stdio FILE* globals. On glibc these are plain
    /// `stdin` / `stdout` / `stderr`; Apple's libc exports `__stdinp` and
    /// friends instead.
    pub(crate) fn stdio_handle(&mut self, which: StdioHandle) -> Result<PointerValue<'ctx>, String> {
        let name = stdio_symbol(which);
        let global = match self.module.get_global(name) {
            Some(g) => g,
            None => {
                let g = self.module.add_global(
                    self.context.i8_type().ptr_type(AddressSpace::default()),
                    None,
                    name,
                );
                g.set_linkage(Linkage::External);
                g
            }
        };
        let loaded = self
            .builder
            .build_load(global.as_pointer_value(),
                &format!("{}_handle", name),
            )
            .map_err(|e| format!("failed to load {}: {}", name, e))?;
        Ok(loaded.into_pointer_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StdioHandle {
    In,
    Out,
    Err,
}

#[cfg(target_os = "macos")]
fn stdio_symbol(which: StdioHandle) -> &'static str {
    match which {
        StdioHandle::In => "__stdinp",
        StdioHandle::Out => "__stdoutp",
        StdioHandle::Err => "__stderrp",
    }
}

#[cfg(not(target_os = "macos"))]
fn stdio_symbol(which: StdioHandle) -> &'static str {
    match which {
        StdioHandle::In => "stdin",
        StdioHandle::Out => "stdout",
        StdioHandle::Err => "stderr",
    }
}
