//! BDD step definitions for the local state store.

use camino::Utf8PathBuf;
use labship::state::LocalState;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{LoadOutcome, StateContext, instance, read_file};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("no state file exists")]
fn no_state_file(state_context: StateContext) -> StateContext {
    state_context
}

#[given("a state file containing \"{contents}\"")]
fn state_file_containing(state_context: StateContext, contents: String) -> StateContext {
    std::fs::write(state_context.store.path(), contents)
        .unwrap_or_else(|err| panic!("write state file: {err}"));
    state_context
}

#[given("a saved state with {count:u32} instances launched from \"{image_id}\"")]
fn saved_state(mut state_context: StateContext, count: u32, image_id: String) -> StateContext {
    let mut state = LocalState::default();
    for index in 1..=count {
        let record = instance(index, image_id.trim());
        state.instances.insert(record.id.clone(), record);
    }
    state.key_pairs.insert(
        String::from("labship-us-west-2"),
        Utf8PathBuf::from("/home/ada/.labship/keys/labship-us-west-2.pem"),
    );
    state_context
        .store
        .save(&state)
        .unwrap_or_else(|err| panic!("save state: {err}"));
    state_context.original = Some(read_file(&state_context));
    state_context
}

#[when("I load the state")]
fn load_state(mut state_context: StateContext) -> StateContext {
    state_context.loaded = Some(match state_context.store.load() {
        Ok(state) => LoadOutcome::Loaded(state),
        Err(err) => LoadOutcome::Failed(err.to_string()),
    });
    state_context
}

#[when("I prune instances launched from \"{image_id}\"")]
fn prune_image(mut state_context: StateContext, image_id: String) -> StateContext {
    let image_id = image_id.trim().to_owned();
    let removed = state_context
        .store
        .prune_by(|record| record.image_id.as_deref() == Some(image_id.as_str()))
        .unwrap_or_else(|err| panic!("prune: {err}"));
    state_context.pruned = Some(removed);
    state_context
}

#[then("the state holds {instances:u32} instances and {keys:u32} key pairs")]
fn state_holds(
    state_context: &StateContext,
    instances: u32,
    keys: u32,
) -> Result<(), StepError> {
    let state = match state_context.loaded.clone() {
        Some(LoadOutcome::Loaded(state)) => state,
        Some(LoadOutcome::Failed(message)) => return Err(StepError::Assertion(message)),
        None => state_context
            .store
            .load()
            .map_err(|err| StepError::Assertion(err.to_string()))?,
    };
    if state.instances.len() == instances as usize && state.key_pairs.len() == keys as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {instances} instances and {keys} key pairs, got {} and {}",
            state.instances.len(),
            state.key_pairs.len()
        )))
    }
}

#[then("loading fails mentioning \"{fragment}\"")]
fn loading_fails(state_context: &StateContext, fragment: String) -> Result<(), StepError> {
    match state_context.loaded.as_ref() {
        Some(LoadOutcome::Failed(message)) if message.contains(fragment.trim()) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected load failure mentioning {fragment}, got {other:?}"
        ))),
    }
}

#[then("the state file still contains \"{contents}\"")]
fn file_still_contains(state_context: &StateContext, contents: String) -> Result<(), StepError> {
    let actual = read_file(state_context);
    if actual == contents.as_bytes() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "state file changed to {}",
            String::from_utf8_lossy(&actual)
        )))
    }
}

#[then("{count:u32} instances were pruned")]
fn pruned_count(state_context: &StateContext, count: u32) -> Result<(), StepError> {
    match state_context.pruned {
        Some(pruned) if pruned == count as usize => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {count} pruned, got {other:?}"
        ))),
    }
}

#[then("the state file is unchanged")]
fn file_unchanged(state_context: &StateContext) -> Result<(), StepError> {
    let original = state_context
        .original
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("no saved state recorded")))?;
    if &read_file(state_context) == original {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from("state file was rewritten")))
    }
}
