//! Reference driver: decode a module from disk, run its start function,
//! and optionally invoke an exported function with i32 arguments.
//!
//! ```text
//! miniwasm <file.wasm> [--invoke NAME [ARG...]]
//! ```
//!
//! A `("env", "log")` import printing its argument is registered so
//! small demo modules run out of the box. Traps exit nonzero. Set
//! `RUST_LOG=wasm.exec=trace` (or `wasm.decode`, `wasm.invoke`) for
//! execution traces.

use std::process::ExitCode;

use miniwasm::{decode, Engine, Value};

fn usage() -> ExitCode {
    eprintln!("usage: miniwasm <file.wasm> [--invoke NAME [ARG...]]");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        return usage();
    };

    let invoke = match args.next() {
        None => None,
        Some(flag) if flag == "--invoke" => {
            let Some(name) = args.next() else {
                return usage();
            };
            let mut call_args = Vec::new();
            for raw in args {
                match raw.parse::<i32>() {
                    Ok(v) => call_args.push(Value::I32(v)),
                    Err(_) => {
                        eprintln!("miniwasm: argument {raw:?} is not an i32");
                        return ExitCode::from(2);
                    }
                }
            }
            Some((name, call_args))
        }
        Some(_) => return usage(),
    };

    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("miniwasm: cannot read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let module = match decode(&bytes) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("miniwasm: decode error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = match Engine::new(&module) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("miniwasm: link error: {e}");
            return ExitCode::FAILURE;
        }
    };

    engine.register_import("env", "log", |_ctx, args| {
        let rendered: Vec<String> = args.iter().map(|v| v.as_i32().to_string()).collect();
        println!("{}", rendered.join(" "));
        Ok(None)
    });

    if let Err(trap) = engine.run_start() {
        eprintln!("miniwasm: trap in start function: {trap}");
        return ExitCode::FAILURE;
    }

    if let Some((name, call_args)) = invoke {
        match engine.call(&name, &call_args) {
            Ok(Some(v)) => println!("{}", v.as_i32()),
            Ok(None) => {}
            Err(trap) => {
                eprintln!("miniwasm: trap: {trap}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
