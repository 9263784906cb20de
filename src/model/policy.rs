//! Bucket replication policy, as fetched from the source service

use serde::{Deserialize, Serialize};

/// Replication policy of one bucket
#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplicationPolicy {
	#[serde(default)]
	pub rules: Vec<PolicyRule>,
}

/// One replication rule of a bucket policy
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct PolicyRule {
	#[serde(default)]
	pub id: String,
	/// Rule applies to keys starting with this prefix
	#[serde(default)]
	pub prefix: String,
	pub enabled: bool,
	#[serde(default)]
	pub destination: String,
	#[serde(rename = "storageClass", default)]
	pub storage_class: String,
}

impl ReplicationPolicy {
	/// First rule whose prefix matches the given key
	pub fn rule_for(&self, key: &str) -> Option<&PolicyRule> {
		self.rules.iter().find(|r| key.starts_with(&r.prefix))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_rule_matching() {
		let policy = ReplicationPolicy {
			rules: vec![
				PolicyRule {
					id: "photos-rule".into(),
					prefix: "photos/".into(),
					enabled: true,
					destination: "arn:aws:s3:::dest".into(),
					storage_class: "aws-east-1".into(),
				},
				PolicyRule {
					id: "catch-all".into(),
					prefix: "".into(),
					enabled: false,
					destination: "arn:aws:s3:::dest".into(),
					storage_class: "aws-east-1".into(),
				},
			],
		};
		assert_eq!(policy.rule_for("photos/cat.jpg").unwrap().id, "photos-rule");
		assert_eq!(policy.rule_for("docs/readme.md").unwrap().id, "catch-all");
		assert!(!policy.rule_for("docs/readme.md").unwrap().enabled);
	}
}
