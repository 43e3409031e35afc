//! BDD scenarios for key pair resolution.

use rstest_bdd_macros::scenario;

use super::test_helpers::{KeyPairContext, keypair_context};

#[scenario(
    path = "tests/features/keypair_resolution.feature",
    name = "Refuse a user-specified key pair that does not exist"
)]
fn scenario_refuse_missing_user_key(keypair_context: KeyPairContext) {
    let _ = keypair_context;
}

#[scenario(
    path = "tests/features/keypair_resolution.feature",
    name = "Use an existing user-specified key pair"
)]
fn scenario_use_existing_user_key(keypair_context: KeyPairContext) {
    let _ = keypair_context;
}

#[scenario(
    path = "tests/features/keypair_resolution.feature",
    name = "Reuse the region's default key pair"
)]
fn scenario_reuse_default_key(keypair_context: KeyPairContext) {
    let _ = keypair_context;
}

#[scenario(
    path = "tests/features/keypair_resolution.feature",
    name = "Create the default key pair when it is absent"
)]
fn scenario_create_default_key(keypair_context: KeyPairContext) {
    let _ = keypair_context;
}

#[scenario(
    path = "tests/features/keypair_resolution.feature",
    name = "Surface registry failures"
)]
fn scenario_surface_registry_failures(keypair_context: KeyPairContext) {
    let _ = keypair_context;
}
