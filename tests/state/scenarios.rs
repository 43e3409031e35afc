//! BDD scenarios for the local state store.

use rstest_bdd_macros::scenario;

use super::test_helpers::{StateContext, state_context};

#[scenario(
    path = "tests/features/state_store.feature",
    name = "Start from an empty record"
)]
fn scenario_start_empty(state_context: StateContext) {
    let _ = state_context;
}

#[scenario(
    path = "tests/features/state_store.feature",
    name = "Report a corrupt state file without discarding it"
)]
fn scenario_report_corrupt_file(state_context: StateContext) {
    let _ = state_context;
}

#[scenario(
    path = "tests/features/state_store.feature",
    name = "Round-trip saved instances and key pairs"
)]
fn scenario_round_trip(state_context: StateContext) {
    let _ = state_context;
}

#[scenario(
    path = "tests/features/state_store.feature",
    name = "Pruning with no matches leaves the file untouched"
)]
fn scenario_prune_without_matches(state_context: StateContext) {
    let _ = state_context;
}

#[scenario(
    path = "tests/features/state_store.feature",
    name = "Pruning removes instances launched from an image"
)]
fn scenario_prune_matches(state_context: StateContext) {
    let _ = state_context;
}
