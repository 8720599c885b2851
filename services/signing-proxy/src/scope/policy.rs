//! Session policy document model.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Statement id of the backend invoke statement.
pub const INVOKE_STATEMENT_SID: &str = "InvokeBackend";

/// Inline session policies larger than this are refused by the authority.
pub const MAX_POLICY_BYTES: usize = 2048;

/// Condition block: operator -> key -> values.
pub type Condition = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// A single policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement id
    pub sid: String,
    /// Always `Allow`; the session policy only narrows
    pub effect: String,
    /// Allowed actions
    pub action: Vec<String>,
    /// Resources the actions apply to
    pub resource: Vec<String>,
    /// Optional condition block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Statement {
    /// An `Allow` statement without conditions.
    #[must_use]
    pub fn allow(sid: &str, action: &[&str], resource: Vec<String>) -> Self {
        Self {
            sid: sid.to_string(),
            effect: "Allow".to_string(),
            action: action.iter().map(|a| (*a).to_string()).collect(),
            resource,
            condition: None,
        }
    }

    /// Adds a condition entry.
    #[must_use]
    pub fn with_condition(mut self, operator: &str, key: &str, values: Vec<String>) -> Self {
        self.condition
            .get_or_insert_with(BTreeMap::new)
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), values);
        self
    }
}

/// Policy document as sent to the credential authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Language version
    pub version: String,
    /// Statements
    pub statement: Vec<Statement>,
}

/// A per-request, tenant-scoped session policy.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    document: PolicyDocument,
    json: String,
    fingerprint: String,
}

impl ScopePolicy {
    /// Wraps a document, serializing it once.
    pub fn new(document: PolicyDocument) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&document)?;
        let fingerprint = hex::encode(Sha256::digest(json.as_bytes()));
        Ok(Self {
            document,
            json,
            fingerprint,
        })
    }

    /// The policy document.
    #[must_use]
    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// Minified JSON form.
    #[must_use]
    pub fn to_json(&self) -> &str {
        &self.json
    }

    /// Size of the serialized policy in bytes.
    #[must_use]
    pub fn packed_len(&self) -> usize {
        self.json.len()
    }

    /// Hex SHA-256 of the serialized policy.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The backend invoke statement, if present.
    #[must_use]
    pub fn invoke_statement(&self) -> Option<&Statement> {
        self.document
            .statement
            .iter()
            .find(|s| s.sid == INVOKE_STATEMENT_SID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case_serialization() {
        let doc = PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement::allow(
                "InvokeBackend",
                &["bedrock-agentcore:InvokeAgentRuntime"],
                vec!["arn:aws:bedrock-agentcore:us-east-1:1:runtime/a".to_string()],
            )],
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["Version"], "2012-10-17");
        assert_eq!(value["Statement"][0]["Sid"], "InvokeBackend");
        assert_eq!(value["Statement"][0]["Effect"], "Allow");
        assert!(value["Statement"][0].get("Condition").is_none());
    }

    #[test]
    fn test_condition_serialization() {
        let stmt = Statement::allow("List", &["s3:ListBucket"], vec!["arn:aws:s3:::b".to_string()])
            .with_condition("StringLike", "s3:prefix", vec!["a/t/*".to_string()]);
        let value = serde_json::to_value(&stmt).unwrap();
        assert_eq!(value["Condition"]["StringLike"]["s3:prefix"][0], "a/t/*");
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let doc = |arn: &str| PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement::allow("InvokeBackend", &["x:Y"], vec![arn.to_string()])],
        };
        let a = ScopePolicy::new(doc("arn:a")).unwrap();
        let b = ScopePolicy::new(doc("arn:a")).unwrap();
        let c = ScopePolicy::new(doc("arn:b")).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
