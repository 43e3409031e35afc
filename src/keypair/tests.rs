//! Unit tests for key pair resolution.

use super::*;
use crate::test_support::{FakeKeyRegistry, RegistryOp};
use rstest::{fixture, rstest};

const REGION: &str = "us-west-2";
const DEFAULT_NAME: &str = "labship-us-west-2";

#[fixture]
fn registry() -> FakeKeyRegistry {
    FakeKeyRegistry::new()
}

fn strategy() -> KeyPairStrategy {
    KeyPairStrategy {
        prefer_existing: true,
        default_prefix: String::from("labship"),
        user_specified: None,
        region: String::from(REGION),
        force_create: false,
    }
}

fn resolver(registry: &FakeKeyRegistry) -> KeyPairResolver<FakeKeyRegistry> {
    KeyPairResolver::new(registry.clone(), "labship")
}

#[rstest]
fn missing_user_key_fails_without_creating(registry: FakeKeyRegistry) {
    let strategy = KeyPairStrategy {
        user_specified: Some(String::from("alice-laptop")),
        ..strategy()
    };

    let err = resolver(&registry)
        .resolve(&strategy)
        .expect_err("absent user key must fail");

    assert_eq!(
        err,
        KeyPairError::UserKeyMissing {
            name: String::from("alice-laptop"),
            region: String::from(REGION),
        }
    );
    assert!(err.to_string().contains("does not exist"));
    assert_eq!(registry.count(RegistryOp::Create), 0);
    assert!(!registry.contains("alice-laptop"));
}

#[rstest]
fn existing_user_key_is_used_as_is(registry: FakeKeyRegistry) {
    registry.insert("alice-laptop", "aa:bb");
    let strategy = KeyPairStrategy {
        user_specified: Some(String::from(" alice-laptop ")),
        ..strategy()
    };

    let info = resolver(&registry).resolve(&strategy).expect("resolve");

    assert_eq!(info.name, "alice-laptop");
    assert_eq!(info.fingerprint, "aa:bb");
    assert_eq!(info.created_by, CreatedBy::User);
    assert!(info.private_key.is_none());
    assert_eq!(registry.count(RegistryOp::Create), 0);
}

#[rstest]
fn user_key_wins_over_preferring_existing(registry: FakeKeyRegistry) {
    registry.insert(DEFAULT_NAME, "default");
    registry.insert("alice-laptop", "aa:bb");
    let strategy = KeyPairStrategy {
        user_specified: Some(String::from("alice-laptop")),
        ..strategy()
    };

    let info = resolver(&registry).resolve(&strategy).expect("resolve");
    assert_eq!(info.name, "alice-laptop");
}

#[rstest]
fn blank_user_key_falls_back_to_default(registry: FakeKeyRegistry) {
    let strategy = KeyPairStrategy {
        user_specified: Some(String::from("   ")),
        ..strategy()
    };

    let info = resolver(&registry).resolve(&strategy).expect("resolve");
    assert_eq!(info.name, DEFAULT_NAME);
    assert_eq!(info.created_by, CreatedBy::Tool);
}

#[rstest]
fn default_key_is_reused_when_present(registry: FakeKeyRegistry) {
    registry.insert(DEFAULT_NAME, "11:22");

    let info = resolver(&registry).resolve(&strategy()).expect("resolve");

    assert_eq!(
        info,
        KeyPairInfo {
            name: String::from(DEFAULT_NAME),
            fingerprint: String::from("11:22"),
            private_key: None,
            region: String::from(REGION),
            created_by: CreatedBy::Tool,
        }
    );
    assert_eq!(registry.count(RegistryOp::Create), 0);
}

#[rstest]
fn reused_key_outside_namespace_is_user_owned(registry: FakeKeyRegistry) {
    registry.insert("team-us-west-2", "33:44");
    let strategy = KeyPairStrategy {
        default_prefix: String::from("team"),
        ..strategy()
    };

    let info = resolver(&registry).resolve(&strategy).expect("resolve");
    assert_eq!(info.created_by, CreatedBy::User);
}

#[rstest]
fn absent_default_key_is_created_with_provenance(registry: FakeKeyRegistry) {
    let info = resolver(&registry).resolve(&strategy()).expect("resolve");

    assert_eq!(info.name, DEFAULT_NAME);
    assert_eq!(info.created_by, CreatedBy::Tool);
    assert_eq!(info.fingerprint, format!("fp:{DEFAULT_NAME}"));
    let key = info.private_key.expect("private key returned once");
    assert!(key.expose().contains("BEGIN RSA PRIVATE KEY"));

    let create = registry
        .calls()
        .into_iter()
        .find(|call| call.op == RegistryOp::Create)
        .expect("create called");
    assert_eq!(create.name, DEFAULT_NAME);
    assert_eq!(
        create.tags.get(PROVENANCE_TAG_KEY).map(String::as_str),
        Some(PROVENANCE_TAG_VALUE)
    );
    assert_eq!(create.tags.get("Name").map(String::as_str), Some(DEFAULT_NAME));
}

#[rstest]
fn not_preferring_existing_always_creates(registry: FakeKeyRegistry) {
    let strategy = KeyPairStrategy {
        prefer_existing: false,
        ..strategy()
    };

    let info = resolver(&registry).resolve(&strategy).expect("resolve");
    assert!(info.private_key.is_some());
    assert_eq!(registry.count(RegistryOp::Exists), 0);
    assert_eq!(registry.count(RegistryOp::Create), 1);
}

#[rstest]
fn force_create_skips_reuse(registry: FakeKeyRegistry) {
    registry.insert(DEFAULT_NAME, "old");
    let strategy = KeyPairStrategy {
        force_create: true,
        ..strategy()
    };

    let info = resolver(&registry).resolve(&strategy).expect("resolve");
    assert!(info.private_key.is_some());
    assert_eq!(registry.count(RegistryOp::Exists), 0);
    assert_eq!(registry.count(RegistryOp::Create), 1);
}

#[rstest]
fn existing_key_missing_from_listing_is_an_error(registry: FakeKeyRegistry) {
    registry.insert(DEFAULT_NAME, "11:22");
    registry.hide_from_listing(DEFAULT_NAME);

    let err = resolver(&registry)
        .resolve(&strategy())
        .expect_err("inconsistent registry must fail");
    assert_eq!(
        err,
        KeyPairError::MissingFromListing {
            name: String::from(DEFAULT_NAME),
        }
    );
    assert_eq!(registry.count(RegistryOp::Create), 0);
}

#[rstest]
#[case(RegistryOp::Exists, "check key pair `labship-us-west-2`")]
#[case(RegistryOp::Create, "create key pair `labship-us-west-2`")]
fn transport_errors_name_the_operation(
    registry: FakeKeyRegistry,
    #[case] op: RegistryOp,
    #[case] operation: &str,
) {
    registry.fail_on(op, "connection reset");

    let err = resolver(&registry)
        .resolve(&strategy())
        .expect_err("transport failure must surface");
    match &err {
        KeyPairError::Registry {
            operation: actual,
            source,
        } => {
            assert_eq!(actual, operation);
            assert_eq!(
                source,
                &RegistryError::Remote {
                    message: String::from("connection reset"),
                }
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("connection reset"));
}

#[rstest]
#[case("labship-us-west-2", "labship", true)]
#[case("labship-a", "labship", true)]
#[case("labship", "labship", false)]
#[case("labship-", "labship", false)]
#[case("labshipper-us-west-2", "labship", false)]
#[case("other-us-west-2", "labship", false)]
#[case("", "labship", false)]
#[case("-us-west-2", "", false)]
fn ownership_requires_prefix_separator_and_suffix(
    #[case] name: &str,
    #[case] prefix: &str,
    #[case] expected: bool,
) {
    assert_eq!(is_tool_owned(name, prefix), expected);
}

#[rstest]
fn listing_owned_keys_filters_by_namespace(registry: FakeKeyRegistry) {
    registry.insert("labship-us-west-2", "a");
    registry.insert("labship-eu-west-1", "b");
    registry.insert("labship", "c");
    registry.insert("alice-laptop", "d");

    let resolver = resolver(&registry);
    let owned = resolver
        .list_owned_by_tool()
        .expect("list")
        .into_iter()
        .map(|record| record.name)
        .collect::<Vec<_>>();
    assert_eq!(owned, vec!["labship-eu-west-1", "labship-us-west-2"]);
    assert_eq!(resolver.list_all().expect("list all").len(), 4);
}

#[rstest]
fn delete_refuses_foreign_keys(registry: FakeKeyRegistry) {
    registry.insert("alice-laptop", "d");

    let err = resolver(&registry)
        .delete_owned("alice-laptop")
        .expect_err("foreign key must be refused");
    assert!(matches!(err, KeyPairError::NotToolOwned { .. }));
    assert!(registry.contains("alice-laptop"));
    assert_eq!(registry.count(RegistryOp::Delete), 0);
}

#[rstest]
fn delete_removes_owned_key_and_tolerates_absence(registry: FakeKeyRegistry) {
    registry.insert(DEFAULT_NAME, "a");
    let resolver = resolver(&registry);

    assert!(resolver.delete_owned(DEFAULT_NAME).expect("delete"));
    assert!(!registry.contains(DEFAULT_NAME));
    assert!(!resolver.delete_owned(DEFAULT_NAME).expect("second delete"));
}

#[test]
fn strategy_names_default_key_from_prefix_and_region() {
    let strategy = strategy();
    assert_eq!(strategy.default_key_name(), DEFAULT_NAME);
    assert_eq!(strategy.key_name(), DEFAULT_NAME);
    assert_eq!(strategy.user_key_name(), None);
}
