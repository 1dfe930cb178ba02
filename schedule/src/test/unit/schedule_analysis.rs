use zmora_ir::{ComputeOp, IterVar, Schedule, StmtVisitor, Var};

use crate::tensor_core::matcher::{MatchFacts, MmaMatcher};
use crate::tensor_core::schedule_analysis::identify_matrices;
use crate::tensor_core::{FragmentRole, MatrixLayout};
use crate::test::helpers::{GemmConfig, GemmFixture};

fn match_fixture(fixture: &GemmFixture) -> MatchFacts {
    let mut matcher = MmaMatcher::new(&fixture.extern_buffer);
    matcher.visit_stmt(&fixture.stmt);
    matcher.into_facts().expect("fixture should match")
}

#[test]
fn classifies_row_major_operands() {
    let fixture = GemmConfig::default().build();
    let facts = match_fixture(&fixture);
    let roles = identify_matrices(&fixture.schedule, &facts).expect("classification");

    assert_eq!(roles.roles.get("A"), Some(&FragmentRole::MatrixA));
    assert_eq!(roles.layouts.get("A"), Some(&MatrixLayout::RowMajor));
    assert_eq!(roles.roles.get("B"), Some(&FragmentRole::MatrixB));
    assert_eq!(roles.layouts.get("B"), Some(&MatrixLayout::RowMajor));
    assert_eq!(roles.roles.get("C"), Some(&FragmentRole::Accumulator));
    assert_eq!(roles.layouts.get("C"), Some(&MatrixLayout::ColMajor));
}

#[test]
fn classifies_col_major_operands_and_swaps() {
    let fixture = GemmConfig { swapped: true, ..GemmConfig::default() }.build();
    let facts = match_fixture(&fixture);
    let roles = identify_matrices(&fixture.schedule, &facts).expect("classification");

    assert_eq!(roles.roles.get("A"), Some(&FragmentRole::MatrixB));
    assert_eq!(roles.layouts.get("A"), Some(&MatrixLayout::ColMajor));
    assert_eq!(roles.roles.get("B"), Some(&FragmentRole::MatrixA));
    assert_eq!(roles.layouts.get("B"), Some(&MatrixLayout::ColMajor));

    // Canonical order puts the matrix_a operand first.
    let operands = roles.mma_sync.values().next().unwrap();
    let (tensor_a, _) = operands.a.as_producer_load().unwrap();
    let (tensor_b, _) = operands.b.as_producer_load().unwrap();
    assert_eq!(tensor_a.name, "B.local");
    assert_eq!(tensor_b.name, "A.local");
}

#[test]
fn discovery_order_is_kept_when_already_canonical() {
    let fixture = GemmConfig::default().build();
    let facts = match_fixture(&fixture);
    let roles = identify_matrices(&fixture.schedule, &facts).expect("classification");

    let operands = roles.mma_sync.values().next().unwrap();
    let (tensor_a, _) = operands.a.as_producer_load().unwrap();
    assert_eq!(tensor_a.name, "A.local");
}

#[test]
fn empty_schedule_aborts_classification() {
    let fixture = GemmConfig::default().build();
    let facts = match_fixture(&fixture);
    assert!(identify_matrices(&Schedule::default(), &facts).is_none());
}

#[test]
fn multi_axis_reductions_are_not_candidates() {
    let fixture = GemmConfig::default().build();
    let facts = match_fixture(&fixture);

    // Same body, but a second reduction axis disqualifies the compute.
    let original = &fixture.schedule.outputs[0];
    let extra = IterVar::new(Var::index("rk2"));
    let mut reduce_axis = original.reduce_axis.clone();
    reduce_axis.push(extra);
    let compute =
        ComputeOp::new("C", original.axis.clone(), reduce_axis, original.body.clone());

    assert!(identify_matrices(&Schedule::new(vec![compute]), &facts).is_none());
}
