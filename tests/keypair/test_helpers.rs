//! Shared fixtures and helpers for key pair BDD scenarios.

use labship::keypair::{KeyPairInfo, KeyPairResolver, KeyPairStrategy};
use labship::test_support::FakeKeyRegistry;
use rstest::fixture;

pub const REGION: &str = "us-west-2";
pub const PREFIX: &str = "labship";

#[derive(Clone, Debug)]
pub enum ResolveOutcome {
    Resolved(KeyPairInfo),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct KeyPairContext {
    pub registry: FakeKeyRegistry,
    pub outcome: Option<ResolveOutcome>,
}

#[fixture]
pub fn keypair_context() -> KeyPairContext {
    KeyPairContext {
        registry: FakeKeyRegistry::new(),
        outcome: None,
    }
}

pub fn strategy(user_specified: Option<&str>) -> KeyPairStrategy {
    KeyPairStrategy {
        prefer_existing: true,
        default_prefix: String::from(PREFIX),
        user_specified: user_specified.map(str::to_owned),
        region: String::from(REGION),
        force_create: false,
    }
}

pub fn resolve(context: &KeyPairContext, user_specified: Option<&str>) -> ResolveOutcome {
    match KeyPairResolver::new(context.registry.clone(), PREFIX).resolve(&strategy(user_specified))
    {
        Ok(info) => ResolveOutcome::Resolved(info),
        Err(err) => ResolveOutcome::Failed(err.to_string()),
    }
}
