//! Shared fixtures and helpers for state store BDD scenarios.

use std::rc::Rc;

use camino::Utf8PathBuf;
use chrono::{TimeZone, Utc};
use labship::state::{Instance, LocalState, StateStore};
use rstest::fixture;
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub enum LoadOutcome {
    Loaded(LocalState),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct StateContext {
    pub _tmp: Rc<TempDir>,
    pub store: StateStore,
    pub original: Option<Vec<u8>>,
    pub loaded: Option<LoadOutcome>,
    pub pruned: Option<usize>,
}

#[fixture]
pub fn state_context() -> StateContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("state.json"))
        .unwrap_or_else(|path| panic!("utf8 temp path: {}", path.display()));
    StateContext {
        _tmp: Rc::new(tmp),
        store: StateStore::new(path),
        original: None,
        loaded: None,
        pruned: None,
    }
}

pub fn instance(index: u32, image_id: &str) -> Instance {
    Instance {
        id: format!("i-{index:04}"),
        environment: String::from("datascience"),
        instance_type: String::from("t3.large"),
        public_ip: None,
        key_name: String::from("labship-us-west-2"),
        launch_time: Utc
            .with_ymd_and_hms(2026, 10, 18, 12, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp")),
        idle_timeout: String::from("2h"),
        tunnel_pid: None,
        region: String::from("us-west-2"),
        security_group_id: None,
        image_id: Some(image_id.to_owned()),
    }
}

pub fn read_file(context: &StateContext) -> Vec<u8> {
    std::fs::read(context.store.path()).unwrap_or_else(|err| panic!("read state file: {err}"))
}
