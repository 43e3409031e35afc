//! BDD step definitions for key pair resolution.

use labship::keypair::{KeyPairInfo, PROVENANCE_TAG_KEY, PROVENANCE_TAG_VALUE};
use labship::test_support::RegistryOp;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{KeyPairContext, ResolveOutcome, resolve};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn resolved(context: &KeyPairContext) -> Result<&KeyPairInfo, StepError> {
    match context.outcome.as_ref() {
        Some(ResolveOutcome::Resolved(info)) => Ok(info),
        Some(ResolveOutcome::Failed(message)) => Err(StepError::Assertion(format!(
            "expected resolution to succeed, got: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn failure(context: &KeyPairContext) -> Result<&str, StepError> {
    match context.outcome.as_ref() {
        Some(ResolveOutcome::Failed(message)) => Ok(message),
        Some(ResolveOutcome::Resolved(info)) => Err(StepError::Assertion(format!(
            "expected resolution to fail, got: {info:?}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[given("a registry with no key pairs")]
fn empty_registry(keypair_context: KeyPairContext) -> KeyPairContext {
    keypair_context
}

#[given("a registry holding the key pair \"{name}\"")]
fn registry_with_key(keypair_context: KeyPairContext, name: String) -> KeyPairContext {
    keypair_context.registry.insert(name.trim(), "12:34:56");
    keypair_context
}

#[given("a registry that cannot be reached")]
fn unreachable_registry(keypair_context: KeyPairContext) -> KeyPairContext {
    for op in [
        RegistryOp::Exists,
        RegistryOp::DescribeAll,
        RegistryOp::Create,
    ] {
        keypair_context
            .registry
            .fail_on(op, "could not connect to the endpoint");
    }
    keypair_context
}

#[when("I resolve with the user key \"{name}\"")]
fn resolve_user_key(mut keypair_context: KeyPairContext, name: String) -> KeyPairContext {
    keypair_context.outcome = Some(resolve(&keypair_context, Some(name.trim())));
    keypair_context
}

#[when("I resolve the default key pair")]
fn resolve_default_key(mut keypair_context: KeyPairContext) -> KeyPairContext {
    keypair_context.outcome = Some(resolve(&keypair_context, None));
    keypair_context
}

#[then("resolution fails because \"{name}\" does not exist")]
fn fails_missing_user_key(keypair_context: &KeyPairContext, name: String) -> Result<(), StepError> {
    let message = failure(keypair_context)?;
    let expected = format!("user-specified key pair `{}` does not exist", name.trim());
    if message.contains(&expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected `{expected}`, got: {message}"
        )))
    }
}

#[then("resolution fails mentioning \"{fragment}\"")]
fn fails_mentioning(keypair_context: &KeyPairContext, fragment: String) -> Result<(), StepError> {
    let message = failure(keypair_context)?;
    if message.contains(fragment.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected error mentioning {fragment}, got: {message}"
        )))
    }
}

#[then("no key pair was created")]
fn nothing_created(keypair_context: &KeyPairContext) -> Result<(), StepError> {
    let creates = keypair_context.registry.count(RegistryOp::Create);
    if creates == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no create calls, got {creates}"
        )))
    }
}

#[then("the resolved key pair is \"{name}\" created by \"{owner}\"")]
fn resolved_key(
    keypair_context: &KeyPairContext,
    name: String,
    owner: String,
) -> Result<(), StepError> {
    let info = resolved(keypair_context)?;
    if info.name == name.trim() && info.created_by.to_string() == owner.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {name} created by {owner}, got {} created by {}",
            info.name, info.created_by
        )))
    }
}

#[then("no private key material was returned")]
fn no_material(keypair_context: &KeyPairContext) -> Result<(), StepError> {
    if resolved(keypair_context)?.private_key.is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "expected no private key for an existing key pair",
        )))
    }
}

#[then("the created key pair is tagged as managed by labship")]
fn tagged_as_managed(keypair_context: &KeyPairContext) -> Result<(), StepError> {
    let info = resolved(keypair_context)?;
    if info.private_key.is_none() {
        return Err(StepError::Assertion(String::from(
            "expected private key material for a created key pair",
        )));
    }
    let calls = keypair_context.registry.calls();
    let create = calls
        .iter()
        .find(|call| call.op == RegistryOp::Create)
        .ok_or_else(|| StepError::Assertion(String::from("missing create call")))?;
    if create.tags.get(PROVENANCE_TAG_KEY).map(String::as_str) == Some(PROVENANCE_TAG_VALUE) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected provenance tag, got {:?}",
            create.tags
        )))
    }
}
