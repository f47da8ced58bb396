//! Stdlib module registry. `use <module>` statements pull these signatures
//! into the function table with `is_stdlib = true`; linking
//! against the module's bitcode happens outside the core.

use crate::context::FunctionSig;
use sushi_ast::{BuiltinKind, Param, Type, Visibility};

/// A stdlib constant exposed by a module (the math module has PI, E, TAU).
pub struct StdlibConstant {
    pub name: &'static str,
    pub ty: Type,
    pub float_value: f64,
}

fn sig(module: &str, name: &str, params: Vec<Param>, ret: Type, err: Type) -> FunctionSig {
    FunctionSig {
        name: name.to_string(),
        params,
        return_type: Type::result(ret, err),
        visibility: Visibility::Public,
        unit: module.to_string(),
        is_stdlib: true,
        is_library: false,
    }
}

fn std_err() -> Type {
    Type::Unknown("StdError".to_string())
}

/// Function signatures for a stdlib module path, or None if the module is
/// not known.
pub fn module_functions(path: &str) -> Option<Vec<FunctionSig>> {
    let fns = match path {
        "io/stdio" => vec![
            // One line from stdin, trailing newline stripped.
            sig("io/stdio", "read_line", vec![], Type::STRING, std_err()),
        ],
        "io/files" => vec![
            // open() reports through the nominal FileResult enum, never a
            // Result monomorph (its variants are always written qualified).
            FunctionSig {
                name: "open".to_string(),
                params: vec![
                    Param::new("path", Type::STRING),
                    Param::new("mode", Type::Unknown("FileMode".to_string())),
                ],
                return_type: Type::Unknown("FileResult".to_string()),
                visibility: Visibility::Public,
                unit: "io/files".to_string(),
                is_stdlib: true,
                is_library: false,
            },
        ],
        "math" => vec![
            sig("math", "abs", vec![Param::new("x", Type::F64)], Type::F64, std_err()),
            sig(
                "math",
                "min",
                vec![Param::new("a", Type::F64), Param::new("b", Type::F64)],
                Type::F64,
                std_err(),
            ),
            sig(
                "math",
                "max",
                vec![Param::new("a", Type::F64), Param::new("b", Type::F64)],
                Type::F64,
                std_err(),
            ),
            sig("math", "sqrt", vec![Param::new("x", Type::F64)], Type::F64, std_err()),
            sig(
                "math",
                "pow",
                vec![Param::new("base", Type::F64), Param::new("exp", Type::F64)],
                Type::F64,
                std_err(),
            ),
            sig("math", "floor", vec![Param::new("x", Type::F64)], Type::F64, std_err()),
            sig("math", "ceil", vec![Param::new("x", Type::F64)], Type::F64, std_err()),
            sig("math", "round", vec![Param::new("x", Type::F64)], Type::F64, std_err()),
            sig("math", "trunc", vec![Param::new("x", Type::F64)], Type::F64, std_err()),
        ],
        "sys/env" => vec![
            sig(
                "sys/env",
                "getenv",
                vec![Param::new("key", Type::STRING)],
                Type::generic_ref("Maybe", vec![Type::STRING]),
                std_err(),
            ),
            sig(
                "sys/env",
                "setenv",
                vec![
                    Param::new("key", Type::STRING),
                    Param::new("value", Type::STRING),
                ],
                Type::I32,
                std_err(),
            ),
        ],
        "sys/process" => vec![
            sig("sys/process", "getcwd", vec![], Type::STRING, std_err()),
            sig(
                "sys/process",
                "chdir",
                vec![Param::new("path", Type::STRING)],
                Type::I32,
                std_err(),
            ),
            sig(
                "sys/process",
                "exit",
                vec![Param::new("code", Type::I32)],
                Type::BLANK,
                std_err(),
            ),
            sig("sys/process", "getpid", vec![], Type::I32, std_err()),
            sig("sys/process", "getuid", vec![], Type::I32, std_err()),
            sig(
                "sys/process",
                "sleep",
                vec![Param::new("seconds", Type::Builtin(BuiltinKind::U32))],
                Type::Builtin(BuiltinKind::U32),
                std_err(),
            ),
        ],
        _ => return None,
    };
    Some(fns)
}

/// Constants a stdlib module exposes.
pub fn module_constants(path: &str) -> Vec<StdlibConstant> {
    match path {
        "math" => vec![
            StdlibConstant {
                name: "PI",
                ty: Type::F64,
                float_value: std::f64::consts::PI,
            },
            StdlibConstant {
                name: "E",
                ty: Type::F64,
                float_value: std::f64::consts::E,
            },
            StdlibConstant {
                name: "TAU",
                ty: Type::F64,
                float_value: std::f64::consts::TAU,
            },
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_modules_register_functions() {
        assert!(module_functions("math").is_some());
        assert!(module_functions("sys/env").is_some());
        assert!(module_functions("no/such/module").is_none());
    }

    #[test]
    fn stdlib_sigs_are_flagged_and_wrapped() {
        let fns = module_functions("sys/process").unwrap();
        let exit = fns.iter().find(|f| f.name == "exit").unwrap();
        assert!(exit.is_stdlib);
        assert!(matches!(exit.return_type, Type::Result { .. }));
    }

    #[test]
    fn math_exposes_constants() {
        let consts = module_constants("math");
        assert_eq!(consts.len(), 3);
        assert!(consts.iter().any(|c| c.name == "PI"));
        assert!(module_constants("io/stdio").is_empty());
    }
}
