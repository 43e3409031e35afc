//! Subset of `aws ec2` JSON output consumed by the adapter.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::keypair::KeyPairRecord;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct AwsTag {
    #[serde(rename = "Key")]
    pub(super) key: String,
    #[serde(rename = "Value", default)]
    pub(super) value: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct DescribeKeyPairs {
    #[serde(rename = "KeyPairs", default)]
    pub(super) key_pairs: Vec<AwsKeyPair>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct AwsKeyPair {
    #[serde(rename = "KeyName")]
    pub(super) name: String,
    #[serde(rename = "KeyFingerprint", default)]
    pub(super) fingerprint: String,
    #[serde(rename = "KeyPairId", default)]
    pub(super) key_pair_id: Option<String>,
    #[serde(rename = "Tags", default)]
    pub(super) tags: Vec<AwsTag>,
}

impl From<AwsKeyPair> for KeyPairRecord {
    fn from(value: AwsKeyPair) -> Self {
        Self {
            name: value.name,
            fingerprint: value.fingerprint,
            key_pair_id: value.key_pair_id,
            tags: value
                .tags
                .into_iter()
                .map(|tag| (tag.key, tag.value))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct CreateKeyPairOutput {
    #[serde(rename = "KeyFingerprint")]
    pub(super) fingerprint: String,
    #[serde(rename = "KeyMaterial")]
    pub(super) material: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct RunInstancesOutput {
    #[serde(rename = "Instances", default)]
    pub(super) instances: Vec<AwsInstance>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct DescribeInstances {
    #[serde(rename = "Reservations", default)]
    pub(super) reservations: Vec<Reservation>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct Reservation {
    #[serde(rename = "Instances", default)]
    pub(super) instances: Vec<AwsInstance>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct AwsInstance {
    #[serde(rename = "InstanceId")]
    pub(super) id: String,
    #[serde(rename = "PublicIpAddress", default)]
    pub(super) public_ip: Option<String>,
    #[serde(rename = "SecurityGroups", default)]
    pub(super) security_groups: Vec<SecurityGroup>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct SecurityGroup {
    #[serde(rename = "GroupId")]
    pub(super) id: String,
}
