use test_case::test_case;
use zmora_dtype::DType;
use zmora_ir::StmtVisitor;

use crate::tensor_core::matcher::{MatchFacts, MmaMatcher};
use crate::test::helpers::{GemmConfig, GemmFixture};

fn run_matcher(fixture: &GemmFixture) -> Option<MatchFacts> {
    let mut matcher = MmaMatcher::new(&fixture.extern_buffer);
    matcher.visit_stmt(&fixture.stmt);
    matcher.into_facts()
}

#[test]
fn matches_canonical_accumulation() {
    let fixture = GemmConfig::default().build();
    let facts = run_matcher(&fixture).expect("pattern should match");

    assert_eq!(facts.mma_sync.len(), 1);
    for name in ["A.local", "B.local", "C.local"] {
        assert!(facts.frag_reg.contains(name), "missing fragment {name}");
    }

    let operands = facts.mma_sync.values().next().unwrap();
    let (tensor_a, _) = operands.a.as_producer_load().unwrap();
    let (tensor_b, _) = operands.b.as_producer_load().unwrap();
    let (tensor_c, _) = operands.c.as_producer_load().unwrap();
    assert_eq!(tensor_a.name, "A.local");
    assert_eq!(tensor_b.name, "B.local");
    assert_eq!(tensor_c.name, "C.local");
    assert_eq!(facts.buf_name.get(&operands.a.id).map(String::as_str), Some("A.local"));
}

#[test]
fn no_pragma_means_no_match() {
    let fixture = GemmConfig { with_pragma: false, ..GemmConfig::default() }.build();
    assert!(run_matcher(&fixture).is_none());
}

#[test]
fn non_local_operand_defeats_the_match() {
    let fixture = GemmConfig { a_scope: "shared", ..GemmConfig::default() }.build();
    assert!(run_matcher(&fixture).is_none());
}

#[test_case(DType::Float16, DType::Float32; "f16 into f32")]
#[test_case(DType::Int8, DType::Int32; "i8 into i32")]
#[test_case(DType::UInt8, DType::Int32; "u8 into i32")]
#[test_case(DType::Int4, DType::Int32; "i4 into i32")]
#[test_case(DType::UInt4, DType::Int32; "u4 into i32")]
#[test_case(DType::Int1, DType::Int32; "i1 into i32")]
fn admissible_dtype_pairs_match(input: DType, acc: DType) {
    let fixture = GemmConfig { input_dtype: input, acc_dtype: acc, ..GemmConfig::default() }.build();
    assert!(run_matcher(&fixture).is_some());
}

#[test]
fn float32_inputs_are_rejected() {
    let fixture =
        GemmConfig { input_dtype: DType::Float32, acc_dtype: DType::Float32, ..GemmConfig::default() }
            .build();
    assert!(run_matcher(&fixture).is_none());
}

#[test]
fn narrow_accumulator_is_rejected() {
    let fixture =
        GemmConfig { input_dtype: DType::Float16, acc_dtype: DType::Float16, ..GemmConfig::default() }
            .build();
    assert!(run_matcher(&fixture).is_none());
}
