//! Property tests: executed arithmetic agrees with two's-complement
//! wrapping semantics, and LEB128 decoding inverts encoding.

mod common;

use common::{sleb, uleb, ModuleBuilder, I32};
use miniwasm::binary::{cursor::Cursor, leb128};
use miniwasm::{decode, Engine, Value};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn binop_module(opcode: u8) -> Vec<u8> {
    let mut b = ModuleBuilder::new();
    let ty = b.func_type(&[I32, I32], &[I32]);
    b.func(ty, &[], &[0x20, 0x00, 0x20, 0x01, opcode, 0x0B]);
    b.export_func("f", 0);
    b.build()
}

fn eval_binop(bytes: &[u8], a: i32, b: i32) -> i32 {
    let module = decode(bytes).unwrap();
    let mut engine = Engine::new(&module).unwrap();
    engine
        .call("f", &[Value::I32(a), Value::I32(b)])
        .unwrap()
        .unwrap()
        .as_i32()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64, .. ProptestConfig::default()
    })]

    #[test]
    fn executed_arithmetic_wraps(a in any::<i32>(), b in any::<i32>()) {
        prop_assert_eq!(eval_binop(&binop_module(0x6A), a, b), a.wrapping_add(b));
        prop_assert_eq!(eval_binop(&binop_module(0x6B), a, b), a.wrapping_sub(b));
        prop_assert_eq!(eval_binop(&binop_module(0x6C), a, b), a.wrapping_mul(b));
    }

    #[test]
    fn uleb_decoding_inverts_encoding(v in any::<u32>()) {
        let bytes = uleb(v);
        let mut cur = Cursor::new(&bytes);
        prop_assert_eq!(leb128::read_uleb_u32(&mut cur).unwrap(), v);
        prop_assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn sleb_decoding_inverts_encoding(v in any::<i32>()) {
        let bytes = sleb(v);
        let mut cur = Cursor::new(&bytes);
        prop_assert_eq!(leb128::read_sleb_i32(&mut cur).unwrap(), v);
        prop_assert_eq!(cur.remaining(), 0);
    }
}

/// A longer randomized program: sum N random constants with a chain of
/// `i32.const`/`i32.add` and compare against the wrapping sum.
#[test]
fn random_constant_chains_sum_with_wrapping() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..16 {
        let n = rng.gen_range(1..64usize);
        let consts: Vec<i32> = (0..n).map(|_| rng.gen()).collect();

        let mut body = Vec::new();
        for (i, c) in consts.iter().enumerate() {
            body.push(0x41);
            body.extend(sleb(*c));
            if i > 0 {
                body.push(0x6A);
            }
        }
        body.push(0x0B);

        let mut b = ModuleBuilder::new();
        let ty = b.func_type(&[], &[I32]);
        b.func(ty, &[], &body);
        b.export_func("sum", 0);
        let bytes = b.build();

        let expected = consts
            .iter()
            .fold(0i32, |acc, c| acc.wrapping_add(*c));
        let module = decode(&bytes).unwrap();
        let mut engine = Engine::new(&module).unwrap();
        assert_eq!(
            engine.call("sum", &[]).unwrap(),
            Some(Value::I32(expected))
        );
    }
}
