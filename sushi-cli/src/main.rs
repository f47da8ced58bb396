//! Compiler driver. The external parser hands over a serialized AST
//! (`.ast.json`); this binary runs the semantic pipeline, reports
//! diagnostics in line:col format on stderr, and emits native objects,
//! LLVM IR, or a library (`.slib` manifest + bitcode).
//!
//! Exit codes: 0 success, 1 success with warnings, 2 compile error.

use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, ValueEnum};
use inkwell::context::Context;
use inkwell::OptimizationLevel;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use sushi_compiler::{run_semantic_pipeline, CompilerContext, DiagnosticEngine, Emitter};

#[derive(Parser)]
#[command(name = "sushic")]
#[command(version = "0.4.0")]
#[command(about = "Sushi compiler backend", long_about = None)]
struct Cli {
    /// Parsed program (.ast.json from the parser front end)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Emit a library: bitcode plus a .slib manifest
    #[arg(long)]
    lib: bool,

    /// Print LLVM IR instead of writing an object file
    #[arg(long)]
    emit_ll: bool,

    /// Verbose compiler logging
    #[arg(long)]
    debug: bool,

    /// Optimization level
    #[arg(long, value_enum, default_value_t = OptLevel::O2)]
    opt: OptLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OptLevel {
    None,
    Mem2reg,
    O1,
    O2,
    O3,
}

impl OptLevel {
    fn to_llvm(self) -> OptimizationLevel {
        match self {
            OptLevel::None => OptimizationLevel::None,
            OptLevel::Mem2reg | OptLevel::O1 => OptimizationLevel::Less,
            OptLevel::O2 => OptimizationLevel::Default,
            OptLevel::O3 => OptimizationLevel::Aggressive,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    let _ = logger.try_init();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<u8> {
    let source = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("cannot read {}", cli.input.display()))?;
    let mut program: sushi_ast::Program =
        serde_json::from_str(&source).context("input is not a parsed Sushi AST")?;

    let filename = cli.input.display().to_string();
    let mut ctx = CompilerContext::new();
    let mut reporter = DiagnosticEngine::new(filename);

    run_semantic_pipeline(&mut program, &mut ctx, &mut reporter);

    reporter.print_all();
    reporter.print_summary();
    if reporter.has_errors() {
        return Ok(2);
    }

    let llvm = Context::create();
    let mut emitter = Emitter::new(&llvm, &program.unit, &ctx);
    emitter.emit_program().context("code generation failed")?;
    emitter.verify().context("module verification failed")?;

    if cli.emit_ll {
        println!("{}", emitter.ir_string());
        return Ok(exit_code(&reporter));
    }

    if cli.lib {
        let stem = output_stem(cli, "bc");
        if !emitter.write_bitcode(&stem) {
            anyhow::bail!("failed to write bitcode to {}", stem.display());
        }
        let manifest_path = stem.with_extension("slib");
        let triple = inkwell::targets::TargetMachine::get_default_triple();
        let manifest = sushi_compiler::slib::SlibManifest::from_context(
            &ctx,
            program.unit.clone(),
            triple.as_str().to_string_lossy().to_string(),
            env!("CARGO_PKG_VERSION"),
        );
        manifest
            .write(&manifest_path)
            .with_context(|| format!("cannot write {}", manifest_path.display()))?;
        log::debug!("library written to {}", stem.display());
        return Ok(exit_code(&reporter));
    }

    let object_path = output_stem(cli, "o");
    emitter
        .write_object(&object_path, cli.opt.to_llvm())
        .with_context(|| format!("cannot write {}", object_path.display()))?;
    Ok(exit_code(&reporter))
}

fn exit_code(reporter: &DiagnosticEngine) -> u8 {
    if reporter.warning_count() > 0 {
        1
    } else {
        0
    }
}

fn output_stem(cli: &Cli, extension: &str) -> PathBuf {
    match &cli.output {
        Some(path) => path.clone(),
        None => Path::new(&cli.input).with_extension(extension),
    }
}
