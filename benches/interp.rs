use criterion::{black_box, criterion_group, criterion_main, Criterion};
use miniwasm::{decode, Engine, Value};

// (module
//   (func (export "count") (result i32) (local i32)
//     loop
//       local.get 0; i32.const 1; i32.add; local.tee 0
//       i32.const 1000; i32.lt_s; br_if 0
//     end
//     local.get 0))
const COUNTING_LOOP: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // \0asm v1
    0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x7F, // type () -> i32
    0x03, 0x02, 0x01, 0x00, // function 0 uses type 0
    0x07, 0x09, 0x01, 0x05, b'c', b'o', b'u', b'n', b't', 0x00, 0x00, // export
    0x0A, 0x18, 0x01, 0x16, 0x01, 0x01, 0x7F, // code: 1 local run of i32
    0x03, 0x40, 0x20, 0x00, 0x41, 0x01, 0x6A, 0x22, 0x00, 0x41, 0xE8, 0x07, 0x48, 0x0D, 0x00,
    0x0B, 0x20, 0x00, 0x0B,
];

fn bench_counting_loop(c: &mut Criterion) {
    let module = decode(COUNTING_LOOP).expect("benchmark module decodes");

    c.bench_function("counting_loop_1000", |b| {
        b.iter(|| {
            let mut engine = Engine::new(&module).unwrap();
            let r = engine.call("count", &[]).unwrap();
            assert_eq!(r, Some(Value::I32(1000)));
            black_box(r)
        })
    });

    c.bench_function("decode_counting_loop", |b| {
        b.iter(|| black_box(decode(black_box(COUNTING_LOOP)).unwrap()))
    });
}

criterion_group!(benches, bench_counting_loop);
criterion_main!(benches);
