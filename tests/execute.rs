//! Engine integration tests: the end-to-end execution scenarios,
//! structured control flow, traps, imports, globals, and memory.

mod common;

use std::sync::{Arc, Mutex};

use common::{ModuleBuilder, I32};
use miniwasm::{decode, Engine, EngineConfig, HostError, LinkError, Trap, Value};

fn run(bytes: &[u8], export: &str, args: &[Value]) -> Result<Option<Value>, Trap> {
    let module = decode(bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    engine.call(export, args)
}

#[test]
fn adds_two_locals() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[I32, I32], &[I32]);
    b.func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B]);
    b.export_func("add", 0);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    let r = engine
        .call("add", &[Value::I32(1), Value::I32(127)])
        .unwrap();
    assert_eq!(r, Some(Value::I32(128)));

    // A second call sees a clean operand stack.
    let r = engine
        .call("add", &[Value::I32(-1), Value::I32(1)])
        .unwrap();
    assert_eq!(r, Some(Value::I32(0)));
}

#[test]
fn adds_two_constants() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    b.func(ty, &[], &[0x41, 0x0A, 0x41, 0x20, 0x6A, 0x0B]);
    b.export_func("f", 0);
    assert_eq!(run(&b.build(), "f", &[]).unwrap(), Some(Value::I32(42)));
}

#[test]
fn start_function_calls_import_through_taken_branch() {
    let mut b = ModuleBuilder::new();
    let log_ty = b.func_type(&[I32], &[]);
    let start_ty = b.func_type(&[], &[]);
    b.import_func("console", "log", log_ty);
    // i32.const 1; if; i32.const 1; call 0; else; i32.const 0; call 0; end
    b.func(
        start_ty,
        &[],
        &[
            0x41, 0x01, 0x04, 0x40, 0x41, 0x01, 0x10, 0x00, 0x05, 0x41, 0x00, 0x10, 0x00, 0x0B,
            0x0B,
        ],
    );
    b.start(1);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.register_import("console", "log", move |_ctx, args| {
        sink.lock().unwrap().push(args[0].as_i32());
        Ok(None)
    });
    engine.run_start().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[test]
fn else_branch_runs_when_condition_is_zero() {
    let mut b = ModuleBuilder::new();
    let log_ty = b.func_type(&[I32], &[]);
    let start_ty = b.func_type(&[], &[]);
    b.import_func("console", "log", log_ty);
    b.func(
        start_ty,
        &[],
        &[
            0x41, 0x00, 0x04, 0x40, 0x41, 0x01, 0x10, 0x00, 0x05, 0x41, 0x00, 0x10, 0x00, 0x0B,
            0x0B,
        ],
    );
    b.start(1);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.register_import("console", "log", move |_ctx, args| {
        sink.lock().unwrap().push(args[0].as_i32());
        Ok(None)
    });
    engine.run_start().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0]);
}

#[test]
fn counting_loop_reaches_ten() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    // loop; local.get 0; i32.const 1; i32.add; local.tee 0;
    // i32.const 10; i32.lt_s; br_if 0; end; local.get 0
    b.func(
        ty,
        &[(1, I32)],
        &[
            0x03, 0x40, 0x20, 0x00, 0x41, 0x01, 0x6A, 0x22, 0x00, 0x41, 0x0A, 0x48, 0x0D, 0x00,
            0x0B, 0x20, 0x00, 0x0B,
        ],
    );
    b.export_func("count", 0);
    assert_eq!(
        run(&b.build(), "count", &[]).unwrap(),
        Some(Value::I32(10))
    );
}

#[test]
fn data_segment_byte_is_readable() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    b.memory(1, None);
    b.data(0, &[0x41, 0x42, 0x43]);
    // i32.const 1; i32.load8_u align=0 offset=0
    b.func(ty, &[], &[0x41, 0x01, 0x2D, 0x00, 0x00, 0x0B]);
    b.export_func("peek", 0);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    // Data segments are copied before the first call.
    assert_eq!(engine.memory(0).unwrap().data()[..3], [0x41, 0x42, 0x43]);
    assert_eq!(engine.call("peek", &[]).unwrap(), Some(Value::I32(0x42)));
}

#[test]
fn host_can_peek_initialized_memory() {
    let mut b = ModuleBuilder::new();
    let peek_ty = b.func_type(&[], &[I32]);
    let main_ty = b.func_type(&[], &[I32]);
    b.import_func("env", "peek1", peek_ty);
    b.memory(1, None);
    b.data(0, &[0x41, 0x42, 0x43]);
    b.func(main_ty, &[], &[0x10, 0x00, 0x0B]);
    b.export_func("main", 1);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    engine.register_import("env", "peek1", |ctx, _args| {
        let mem = ctx.memory(0).ok_or_else(|| HostError::new("no memory"))?;
        let byte = mem.load_u8(1).map_err(|_| HostError::new("oob"))?;
        Ok(Some(Value::I32(byte as i32)))
    });
    assert_eq!(
        engine.call("main", &[]).unwrap(),
        Some(Value::I32(0x42))
    );
}

#[test]
fn unreachable_traps_without_side_effects() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[]);
    b.func(ty, &[], &[0x00, 0x0B]);
    b.export_func("boom", 0);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    assert!(matches!(
        engine.call("boom", &[]).unwrap_err(),
        Trap::Unreachable
    ));
    // The trap unwound the operand stack; further calls still work.
    assert!(matches!(
        engine.call("boom", &[]).unwrap_err(),
        Trap::Unreachable
    ));
}

#[test]
fn br_zero_exits_a_block() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    // block; br 0; unreachable; end; i32.const 7
    b.func(
        ty,
        &[],
        &[0x02, 0x40, 0x0C, 0x00, 0x00, 0x0B, 0x41, 0x07, 0x0B],
    );
    b.export_func("f", 0);
    assert_eq!(run(&b.build(), "f", &[]).unwrap(), Some(Value::I32(7)));
}

#[test]
fn br_skips_ends_inside_const_immediates() {
    // The branch target scan must not stop at the 0x0B byte inside
    // i32.const 11.
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    // block; br 0; i32.const 11; drop; end; i32.const 7
    b.func(
        ty,
        &[],
        &[0x02, 0x40, 0x0C, 0x00, 0x41, 0x0B, 0x1A, 0x0B, 0x41, 0x07, 0x0B],
    );
    b.export_func("f", 0);
    assert_eq!(run(&b.build(), "f", &[]).unwrap(), Some(Value::I32(7)));
}

#[test]
fn br_depth_one_exits_nested_blocks() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    // block; block; br 1; end; unreachable; end; i32.const 42
    b.func(
        ty,
        &[],
        &[
            0x02, 0x40, 0x02, 0x40, 0x0C, 0x01, 0x0B, 0x00, 0x0B, 0x41, 0x2A, 0x0B,
        ],
    );
    b.export_func("f", 0);
    assert_eq!(run(&b.build(), "f", &[]).unwrap(), Some(Value::I32(42)));
}

#[test]
fn int32_min_condition_is_taken() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    // i32.const INT32_MIN; if; i32.const 1; return; end; i32.const 0
    let mut body = vec![0x41];
    body.extend(common::sleb(i32::MIN));
    body.extend([0x04, 0x40, 0x41, 0x01, 0x0F, 0x0B, 0x41, 0x00, 0x0B]);
    b.func(ty, &[], &body);
    b.export_func("f", 0);
    assert_eq!(run(&b.build(), "f", &[]).unwrap(), Some(Value::I32(1)));
}

#[test]
fn arithmetic_wraps_modulo_two_pow_32() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[I32, I32], &[I32]);
    b.func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B]);
    b.export_func("add", 0);
    let bytes = b.build();
    assert_eq!(
        run(&bytes, "add", &[Value::I32(i32::MAX), Value::I32(1)]).unwrap(),
        Some(Value::I32(i32::MIN))
    );

    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[I32, I32], &[I32]);
    b.func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6C, 0x0B]);
    b.export_func("mul", 0);
    assert_eq!(
        run(
            &b.build(),
            "mul",
            &[Value::I32(0x4000_0000), Value::I32(4)]
        )
        .unwrap(),
        Some(Value::I32(0))
    );
}

#[test]
fn division_traps() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[I32, I32], &[I32]);
    b.func(ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6D, 0x0B]);
    b.export_func("div", 0);
    let bytes = b.build();

    assert!(matches!(
        run(&bytes, "div", &[Value::I32(1), Value::I32(0)]).unwrap_err(),
        Trap::DivideByZero
    ));
    assert!(matches!(
        run(&bytes, "div", &[Value::I32(i32::MIN), Value::I32(-1)]).unwrap_err(),
        Trap::IntegerOverflow
    ));
    assert_eq!(
        run(&bytes, "div", &[Value::I32(-7), Value::I32(2)]).unwrap(),
        Some(Value::I32(-3))
    );
}

#[test]
fn drop_on_empty_stack_underflows() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[]);
    b.func(ty, &[], &[0x1A, 0x0B]);
    b.export_func("f", 0);
    assert!(matches!(
        run(&b.build(), "f", &[]).unwrap_err(),
        Trap::StackUnderflow
    ));
}

#[test]
fn unknown_opcode_traps() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[]);
    b.func(ty, &[], &[0xC0, 0x0B]);
    b.export_func("f", 0);
    assert!(matches!(
        run(&b.build(), "f", &[]).unwrap_err(),
        Trap::UnknownOpcode { opcode: 0xC0, .. }
    ));
}

#[test]
fn missing_import_traps_only_when_called() {
    let mut b = ModuleBuilder::new();
    let log_ty = b.func_type(&[I32], &[]);
    let main_ty = b.func_type(&[], &[]);
    b.import_func("env", "log", log_ty);
    b.func(main_ty, &[], &[0x41, 0x05, 0x10, 0x00, 0x0B]);
    b.export_func("main", 1);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    // Instantiation succeeds with nothing registered.
    let mut engine = Engine::new(&module).unwrap();
    match engine.call("main", &[]).unwrap_err() {
        Trap::MissingImport { module, name } => {
            assert_eq!(module, "env");
            assert_eq!(name, "log");
        }
        other => panic!("expected MissingImport, got {other:?}"),
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.register_import("env", "log", move |_ctx, args| {
        sink.lock().unwrap().push(args[0].as_i32());
        Ok(None)
    });
    engine.call("main", &[]).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![5]);
}

#[test]
fn host_errors_surface_as_traps() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[]);
    let main_ty = b.func_type(&[], &[]);
    b.import_func("env", "fail", ty);
    b.func(main_ty, &[], &[0x10, 0x00, 0x0B]);
    b.export_func("main", 1);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    engine.register_import("env", "fail", |_ctx, _args| {
        Err(HostError::new("backend refused"))
    });
    match engine.call("main", &[]).unwrap_err() {
        Trap::Host(e) => assert_eq!(e.message, "backend refused"),
        other => panic!("expected Host trap, got {other:?}"),
    }
}

#[test]
fn host_arguments_arrive_in_source_order() {
    let mut b = ModuleBuilder::new();
    let take3 = b.func_type(&[I32, I32, I32], &[]);
    let main_ty = b.func_type(&[], &[]);
    b.import_func("env", "take3", take3);
    b.func(
        main_ty,
        &[],
        &[0x41, 0x01, 0x41, 0x02, 0x41, 0x03, 0x10, 0x00, 0x0B],
    );
    b.export_func("main", 1);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.register_import("env", "take3", move |_ctx, args| {
        sink.lock()
            .unwrap()
            .extend(args.iter().map(|v| v.as_i32()));
        Ok(None)
    });
    engine.call("main", &[]).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn globals_initialize_and_mutate() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    b.global(I32, true, &[0x41, 0x05, 0x0B]);
    // Second global initialized from the first.
    b.global(I32, false, &[0x23, 0x00, 0x0B]);
    // global.get 0; i32.const 1; i32.add; global.set 0;
    // global.get 0; global.get 1; i32.add
    b.func(
        ty,
        &[],
        &[
            0x23, 0x00, 0x41, 0x01, 0x6A, 0x24, 0x00, 0x23, 0x00, 0x23, 0x01, 0x6A, 0x0B,
        ],
    );
    b.export_func("bump", 0);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    assert_eq!(engine.global(0), Some(Value::I32(5)));
    assert_eq!(engine.global(1), Some(Value::I32(5)));
    assert_eq!(engine.call("bump", &[]).unwrap(), Some(Value::I32(11)));
    assert_eq!(engine.global(0), Some(Value::I32(6)));
}

#[test]
fn host_can_write_a_mutable_global() {
    let mut b = ModuleBuilder::new();
    let poke_ty = b.func_type(&[], &[]);
    let main_ty = b.func_type(&[], &[I32]);
    b.import_func("env", "poke", poke_ty);
    b.global(I32, true, &[0x41, 0x00, 0x0B]);
    // call 0; global.get 0
    b.func(main_ty, &[], &[0x10, 0x00, 0x23, 0x00, 0x0B]);
    b.export_func("main", 1);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    engine.register_import("env", "poke", |ctx, _args| {
        ctx.set_global(0, Value::I32(99))
            .map_err(|_| HostError::new("global write refused"))?;
        Ok(None)
    });
    assert_eq!(engine.call("main", &[]).unwrap(), Some(Value::I32(99)));
}

#[test]
fn writing_an_immutable_global_traps() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[]);
    b.global(I32, false, &[0x41, 0x05, 0x0B]);
    b.func(ty, &[], &[0x41, 0x06, 0x24, 0x00, 0x0B]);
    b.export_func("f", 0);
    assert!(matches!(
        run(&b.build(), "f", &[]).unwrap_err(),
        Trap::TypeMismatch { .. }
    ));
}

#[test]
fn data_segment_out_of_bounds_fails_instantiation() {
    let mut b = ModuleBuilder::new();
    b.memory(1, None);
    b.data(65534, &[1, 2, 3, 4]);
    let module = decode(&b.build()).unwrap();
    assert!(matches!(
        Engine::new(&module).unwrap_err(),
        LinkError::DataOutOfBounds { segment: 0, .. }
    ));
}

#[test]
fn memory_size_and_grow() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    b.memory(1, Some(2));
    // memory.grow(1) returns old size 1; memory.grow(1) then fails with
    // -1; memory.size is 2. Sum: 1 + -1 + 2 = 2.
    b.func(
        ty,
        &[],
        &[
            0x41, 0x01, 0x40, 0x00, 0x41, 0x01, 0x40, 0x00, 0x6A, 0x3F, 0x00, 0x6A, 0x0B,
        ],
    );
    b.export_func("f", 0);
    assert_eq!(run(&b.build(), "f", &[]).unwrap(), Some(Value::I32(2)));
}

#[test]
fn memory_access_out_of_bounds_traps() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[I32]);
    b.memory(1, None);
    // Load 4 bytes at 65533: crosses the page end.
    let mut body = vec![0x41];
    body.extend(common::sleb(65533));
    body.extend([0x28, 0x00, 0x00, 0x0B]);
    b.func(ty, &[], &body);
    b.export_func("f", 0);
    assert!(matches!(
        run(&b.build(), "f", &[]).unwrap_err(),
        Trap::MemoryOutOfBounds { .. }
    ));
}

#[test]
fn calls_between_defined_functions() {
    let mut b = ModuleBuilder::new();
    let add_ty = b.func_type(&[I32, I32], &[I32]);
    let main_ty = b.func_type(&[], &[I32]);
    b.func(add_ty, &[], &[0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B]);
    // i32.const 20; i32.const 22; call 0
    b.func(main_ty, &[], &[0x41, 0x14, 0x41, 0x16, 0x10, 0x00, 0x0B]);
    b.export_func("main", 1);
    assert_eq!(
        run(&b.build(), "main", &[]).unwrap(),
        Some(Value::I32(42))
    );
}

#[test]
fn runaway_recursion_exhausts_the_call_stack() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[]);
    b.func(ty, &[], &[0x10, 0x00, 0x0B]); // call self
    b.export_func("f", 0);
    let bytes = b.build();

    let module = decode(&bytes).unwrap();
    let mut engine = Engine::with_config(
        &module,
        EngineConfig {
            max_call_depth: 8,
            ..EngineConfig::default()
        },
    )
    .unwrap();
    assert!(matches!(
        engine.call("f", &[]).unwrap_err(),
        Trap::CallStackExhausted
    ));
}

#[test]
fn oversized_memory_fails_instantiation() {
    let mut b = ModuleBuilder::new();
    b.memory(1024, None);
    let module = decode(&b.build()).unwrap();
    assert!(matches!(
        Engine::with_config(
            &module,
            EngineConfig {
                max_memory_pages: 16,
                ..EngineConfig::default()
            }
        )
        .unwrap_err(),
        LinkError::MemoryAllocFailed {
            pages: 1024,
            limit: 16
        }
    ));
}

#[test]
fn unknown_export_is_reported_by_name() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[], &[]);
    b.func(ty, &[], &[0x0B]);
    b.export_func("f", 0);
    let module = decode(&b.build()).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    match engine.call("g", &[]).unwrap_err() {
        Trap::UnknownExport { name } => assert_eq!(name, "g"),
        other => panic!("expected UnknownExport, got {other:?}"),
    }
}

#[test]
fn argument_count_mismatch_is_a_type_error() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[I32], &[I32]);
    b.func(ty, &[], &[0x20, 0x00, 0x0B]);
    b.export_func("id", 0);
    let module = decode(&b.build()).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    assert!(matches!(
        engine.call("id", &[]).unwrap_err(),
        Trap::TypeMismatch { .. }
    ));
}

#[test]
fn select_and_comparisons() {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[I32, I32], &[I32]);
    // local.get 0; local.get 1; local.get 0; local.get 1; i32.lt_s; select
    // -> min(a, b)
    b.func(
        ty,
        &[],
        &[
            0x20, 0x00, 0x20, 0x01, 0x20, 0x00, 0x20, 0x01, 0x48, 0x1B, 0x0B,
        ],
    );
    b.export_func("min", 0);
    let bytes = b.build();
    assert_eq!(
        run(&bytes, "min", &[Value::I32(3), Value::I32(9)]).unwrap(),
        Some(Value::I32(3))
    );
    assert_eq!(
        run(&bytes, "min", &[Value::I32(-3), Value::I32(-9)]).unwrap(),
        Some(Value::I32(-9))
    );
}
