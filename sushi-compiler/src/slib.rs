//! `.slib` library manifest: the metadata half of a compiled library. The
//! driver writes it next to the bitcode for `--lib` builds and reads it
//! back when a program links against the library.

use crate::context::CompilerContext;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use sushi_ast::Visibility;

pub const SLIB_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlibManifest {
    pub format_version: u32,
    pub name: String,
    /// Platform triple the bitcode was produced for
    pub platform: String,
    pub version: String,
    pub functions: Vec<SlibFunction>,
    pub structs: Vec<SlibStruct>,
    pub enums: Vec<SlibEnum>,
    pub dependencies: Vec<String>,
}

/// A public function signature, fully typed, using type display names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlibFunction {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub return_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlibStruct {
    pub name: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlibEnum {
    pub name: String,
    pub variants: Vec<(String, Vec<String>)>,
}

impl SlibManifest {
    /// Snapshot the public surface of a compiled unit.
    pub fn from_context(
        ctx: &CompilerContext,
        name: impl Into<String>,
        platform: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let mut functions: Vec<SlibFunction> = ctx
            .functions
            .values()
            .filter(|sig| sig.visibility == Visibility::Public && !sig.is_stdlib)
            .map(|sig| SlibFunction {
                name: sig.name.clone(),
                params: sig
                    .params
                    .iter()
                    .map(|p| (p.name.clone(), p.ty.to_string()))
                    .collect(),
                return_type: sig.return_type.to_string(),
            })
            .collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));

        let mut structs: Vec<SlibStruct> = ctx
            .structs
            .values()
            .map(|s| SlibStruct {
                name: s.name.clone(),
                fields: s
                    .fields
                    .iter()
                    .map(|(n, t)| (n.clone(), t.to_string()))
                    .collect(),
            })
            .collect();
        structs.sort_by(|a, b| a.name.cmp(&b.name));

        let mut enums: Vec<SlibEnum> = ctx
            .enums
            .values()
            .map(|e| SlibEnum {
                name: e.name.clone(),
                variants: e
                    .variants
                    .iter()
                    .map(|v| {
                        (
                            v.name.clone(),
                            v.associated_types.iter().map(|t| t.to_string()).collect(),
                        )
                    })
                    .collect(),
            })
            .collect();
        enums.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            format_version: SLIB_FORMAT_VERSION,
            name: name.into(),
            platform: platform.into(),
            version: version.into(),
            functions,
            structs,
            enums,
            dependencies: Vec::new(),
        }
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FunctionSig;
    use sushi_ast::{Param, Type};

    #[test]
    fn manifest_snapshots_public_functions_only() {
        let mut ctx = CompilerContext::new();
        ctx.install_function(
            FunctionSig {
                name: "public_fn".to_string(),
                params: vec![Param::new("x", Type::I32)],
                return_type: Type::result(Type::I32, Type::Unknown("StdError".into())),
                visibility: Visibility::Public,
                unit: "lib".to_string(),
                is_stdlib: false,
                is_library: false,
            },
            None,
        );
        ctx.install_function(
            FunctionSig {
                name: "private_fn".to_string(),
                params: vec![],
                return_type: Type::result(Type::BLANK, Type::Unknown("StdError".into())),
                visibility: Visibility::Private,
                unit: "lib".to_string(),
                is_stdlib: false,
                is_library: false,
            },
            None,
        );

        let manifest =
            SlibManifest::from_context(&ctx, "mylib", "x86_64-unknown-linux-gnu", "0.1.0");
        assert_eq!(manifest.functions.len(), 1);
        assert_eq!(manifest.functions[0].name, "public_fn");
        assert_eq!(manifest.functions[0].params[0].1, "i32");
        assert_eq!(manifest.format_version, SLIB_FORMAT_VERSION);
    }

    #[test]
    fn manifest_roundtrips_through_json() {
        let manifest = SlibManifest {
            format_version: SLIB_FORMAT_VERSION,
            name: "demo".to_string(),
            platform: "aarch64-apple-darwin".to_string(),
            version: "1.2.3".to_string(),
            functions: vec![],
            structs: vec![SlibStruct {
                name: "Point".to_string(),
                fields: vec![("x".to_string(), "i32".to_string())],
            }],
            enums: vec![],
            dependencies: vec!["core".to_string()],
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: SlibManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "demo");
        assert_eq!(back.structs[0].fields[0].0, "x");
        assert_eq!(back.dependencies, vec!["core".to_string()]);
    }
}
