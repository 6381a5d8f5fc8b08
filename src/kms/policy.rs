//! Key policy documents: generation for new keys, drift checks, and the narrow
//! patches applied before a key is scheduled for deletion.
//!
//! Documents cross the remote boundary as JSON text and are handled as a typed
//! [`KeyPolicy`] in between. Statement members this module does not model
//! (`Condition`, `NotPrincipal`, ...) are carried through untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::arn::{self, Arn};
use crate::error::{KmsError, KmsResult};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ROOT_SID: &str = "Root User Has All Actions";
pub const ADMIN_SID: &str = "Admin Role Has All Actions";
pub const OPERATOR_SID: &str = "Operator Role Key Access";
pub const CONSUMER_SID: &str = "Target IAM Role Has Decrypt Action";

const ALL_ACTIONS: &str = "kms:*";
const DECRYPT_ACTION: &str = "kms:Decrypt";
const SCHEDULE_DELETION_ACTION: &str = "kms:ScheduleKeyDeletion";
const CANCEL_DELETION_ACTION: &str = "kms:CancelKeyDeletion";

const OPERATOR_ACTIONS: &[&str] = &[
    "kms:CancelKeyDeletion",
    "kms:CreateAlias",
    "kms:Decrypt",
    "kms:DescribeKey",
    "kms:Encrypt",
    "kms:GenerateDataKey*",
    "kms:GetKeyPolicy",
    "kms:PutKeyPolicy",
    "kms:ReEncrypt*",
    "kms:ScheduleKeyDeletion",
];

const CONSUMER_ACTIONS: &[&str] = &["kms:Decrypt", "kms:DescribeKey"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values.as_slice(),
        };
        values.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn from_slice(values: &[&str]) -> Self {
        OneOrMany::Many(values.iter().map(|value| value.to_string()).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    Identities(PrincipalIdentities),
    Wildcard(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrincipalIdentities {
    #[serde(rename = "AWS", default, skip_serializing_if = "OneOrMany::is_empty")]
    pub aws: OneOrMany,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(rename = "Action", default, skip_serializing_if = "OneOrMany::is_empty")]
    pub action: OneOrMany,
    #[serde(rename = "Resource", default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl PolicyStatement {
    fn allow(sid: &str, principal_arn: &str, actions: &[&str]) -> Self {
        Self {
            sid: Some(sid.to_string()),
            effect: Effect::Allow,
            principal: Some(Principal::Identities(PrincipalIdentities {
                aws: OneOrMany::One(principal_arn.to_string()),
                other: Map::new(),
            })),
            action: OneOrMany::from_slice(actions),
            resource: Some(OneOrMany::One("*".to_string())),
            other: Map::new(),
        }
    }

    pub fn has_sid(&self, sid: &str) -> bool {
        self.sid.as_deref() == Some(sid)
    }

    /// True when the AWS principal list names `principal_arn` verbatim.
    pub fn names_principal(&self, principal_arn: &str) -> bool {
        match &self.principal {
            Some(Principal::Identities(identities)) => {
                identities.aws.iter().any(|value| value == principal_arn)
            }
            _ => false,
        }
    }

    pub fn grants(&self, action: &str) -> bool {
        self.effect == Effect::Allow
            && self
                .action
                .iter()
                .any(|pattern| action_matches(pattern, action))
    }
}

fn action_matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => action
            .get(..prefix.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(prefix)),
        None => pattern.eq_ignore_ascii_case(action),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPolicy {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Statement", default, deserialize_with = "one_or_many_statements")]
    pub statements: Vec<PolicyStatement>,
}

/// `Statement` may hold a single object as well as an array.
fn one_or_many_statements<'de, D>(deserializer: D) -> Result<Vec<PolicyStatement>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Statements {
        One(Box<PolicyStatement>),
        Many(Vec<PolicyStatement>),
    }

    Ok(match Statements::deserialize(deserializer)? {
        Statements::One(statement) => vec![*statement],
        Statements::Many(statements) => statements,
    })
}

impl KeyPolicy {
    pub fn parse(document: &str) -> KmsResult<Self> {
        serde_json::from_str(document)
            .map_err(|err| KmsError::InvalidPolicyShape(format!("unparseable policy: {err}")))
    }

    pub fn to_json(&self) -> KmsResult<String> {
        serde_json::to_string(self)
            .map_err(|err| KmsError::InvalidPolicyShape(format!("unserializable policy: {err}")))
    }
}

/// Builds and inspects key policies on behalf of the engine's own IAM identity.
#[derive(Clone, Debug)]
pub struct KeyPolicyService {
    operator_role_arn: String,
    admin_role_arn: Option<String>,
    root_arn: String,
}

impl KeyPolicyService {
    pub fn new(
        operator_role_arn: impl Into<String>,
        admin_role_arn: Option<String>,
    ) -> KmsResult<Self> {
        let operator_role_arn = operator_role_arn.into();
        let parsed = Arn::parse(&operator_role_arn)?;
        let root_arn = arn::account_root_arn(parsed.partition, parsed.account_id);
        Ok(Self {
            operator_role_arn,
            admin_role_arn,
            root_arn,
        })
    }

    pub fn operator_role_arn(&self) -> &str {
        &self.operator_role_arn
    }

    pub fn standard_policy(&self, principal_arn: &str) -> KeyPolicy {
        let mut statements = vec![PolicyStatement::allow(
            ROOT_SID,
            &self.root_arn,
            &[ALL_ACTIONS],
        )];
        if let Some(admin) = &self.admin_role_arn {
            statements.push(PolicyStatement::allow(ADMIN_SID, admin, &[ALL_ACTIONS]));
        }
        statements.push(self.operator_statement());
        statements.push(PolicyStatement::allow(
            CONSUMER_SID,
            principal_arn,
            CONSUMER_ACTIONS,
        ));
        KeyPolicy {
            version: POLICY_VERSION.to_string(),
            id: None,
            statements,
        }
    }

    pub fn generate_standard_policy(&self, principal_arn: &str) -> KmsResult<String> {
        self.standard_policy(principal_arn).to_json()
    }

    /// Detects policies whose consumer statement no longer references
    /// `principal_arn` verbatim, e.g. because the role was deleted and the key
    /// service rewrote the principal to the old role's unique id.
    pub fn is_policy_valid(&self, document: &str, principal_arn: &str) -> bool {
        let Ok(policy) = KeyPolicy::parse(document) else {
            return false;
        };
        policy
            .statements
            .iter()
            .any(|statement| statement.names_principal(principal_arn) && statement.grants(DECRYPT_ACTION))
    }

    pub fn has_delete_permission(&self, document: &str) -> bool {
        let Ok(policy) = KeyPolicy::parse(document) else {
            return false;
        };
        policy.statements.iter().any(|statement| {
            statement.names_principal(&self.operator_role_arn)
                && statement.grants(SCHEDULE_DELETION_ACTION)
                && statement.grants(CANCEL_DELETION_ACTION)
        })
    }

    /// Replaces the operator statement with a freshly generated one. Every other
    /// statement is left as found.
    pub fn overwrite_operator_statement(&self, document: &str) -> KmsResult<String> {
        let mut policy = KeyPolicy::parse(document)?;
        let anchor = policy
            .statements
            .iter_mut()
            .find(|statement| {
                statement.effect == Effect::Allow
                    && (statement.has_sid(OPERATOR_SID)
                        || statement.names_principal(&self.operator_role_arn))
            })
            .ok_or_else(|| {
                KmsError::InvalidPolicyShape(format!(
                    "no allow statement for operator role {}",
                    self.operator_role_arn
                ))
            })?;
        *anchor = self.operator_statement();
        policy.to_json()
    }

    pub fn strip_consumer_statement(&self, document: &str) -> KmsResult<String> {
        let mut policy = KeyPolicy::parse(document)?;
        policy
            .statements
            .retain(|statement| !statement.has_sid(CONSUMER_SID));
        policy.to_json()
    }

    fn operator_statement(&self) -> PolicyStatement {
        PolicyStatement::allow(OPERATOR_SID, &self.operator_role_arn, OPERATOR_ACTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OPERATOR: &str = "arn:aws:iam::111122223333:role/keysteward-operator";
    const CONSUMER: &str = "arn:aws:iam::444455556666:role/payments-api";

    fn service() -> KeyPolicyService {
        KeyPolicyService::new(OPERATOR, None).unwrap()
    }

    #[test]
    fn standard_policy_is_deterministic() {
        let service = service();
        assert_eq!(
            service.generate_standard_policy(CONSUMER).unwrap(),
            service.generate_standard_policy(CONSUMER).unwrap()
        );
    }

    #[test]
    fn standard_policy_grants_consumer_decrypt_and_operator_deletion() {
        let service = service();
        let document = service.generate_standard_policy(CONSUMER).unwrap();
        assert!(service.is_policy_valid(&document, CONSUMER));
        assert!(service.has_delete_permission(&document));

        let policy = KeyPolicy::parse(&document).unwrap();
        let sids: Vec<_> = policy
            .statements
            .iter()
            .filter_map(|statement| statement.sid.as_deref())
            .collect();
        assert_eq!(sids, vec![ROOT_SID, OPERATOR_SID, CONSUMER_SID]);
        assert!(policy.statements[0].names_principal("arn:aws:iam::111122223333:root"));
        let consumer = &policy.statements[2];
        assert!(!consumer.grants(SCHEDULE_DELETION_ACTION));
    }

    #[test]
    fn admin_statement_is_included_when_configured() {
        let service = KeyPolicyService::new(
            OPERATOR,
            Some("arn:aws:iam::111122223333:role/admin".to_string()),
        )
        .unwrap();
        let policy = service.standard_policy(CONSUMER);
        assert!(policy.statements.iter().any(|s| s.has_sid(ADMIN_SID)));
    }

    #[test]
    fn operator_must_be_an_arn() {
        assert!(matches!(
            KeyPolicyService::new("operator", None),
            Err(KmsError::MalformedIdentifier(_))
        ));
    }

    #[test]
    fn bare_principal_id_is_drift() {
        let service = service();
        let document = json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Sid": CONSUMER_SID,
                "Effect": "Allow",
                "Principal": {"AWS": "AROAEXAMPLEROLEID12345"},
                "Action": ["kms:Decrypt", "kms:DescribeKey"],
                "Resource": "*"
            }]
        })
        .to_string();
        assert!(!service.is_policy_valid(&document, CONSUMER));
        assert!(!service.is_policy_valid("not json", CONSUMER));
    }

    #[test]
    fn deny_statement_does_not_validate() {
        let service = service();
        let document = json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Deny",
                "Principal": {"AWS": [CONSUMER]},
                "Action": "kms:*",
                "Resource": "*"
            }]
        })
        .to_string();
        assert!(!service.is_policy_valid(&document, CONSUMER));
    }

    #[test]
    fn wildcard_actions_match_prefixes() {
        assert!(action_matches("kms:*", "kms:Decrypt"));
        assert!(action_matches("*", "kms:Decrypt"));
        assert!(action_matches("kms:decrypt", "kms:Decrypt"));
        assert!(!action_matches("kms:Encrypt", "kms:Decrypt"));
    }

    #[test]
    fn operator_without_deletion_rights_is_detected_and_patched() {
        let service = service();
        let document = json!({
            "Version": POLICY_VERSION,
            "Statement": [
                {
                    "Sid": OPERATOR_SID,
                    "Effect": "Allow",
                    "Principal": {"AWS": OPERATOR},
                    "Action": ["kms:DescribeKey", "kms:GetKeyPolicy", "kms:PutKeyPolicy"],
                    "Resource": "*"
                },
                {
                    "Sid": CONSUMER_SID,
                    "Effect": "Allow",
                    "Principal": {"AWS": CONSUMER},
                    "Action": ["kms:Decrypt"],
                    "Resource": "*",
                    "Condition": {"StringEquals": {"kms:ViaService": "s3.amazonaws.com"}}
                }
            ]
        })
        .to_string();
        assert!(!service.has_delete_permission(&document));

        let patched = service.overwrite_operator_statement(&document).unwrap();
        assert!(service.has_delete_permission(&patched));
        assert!(service.is_policy_valid(&patched, CONSUMER));

        let policy = KeyPolicy::parse(&patched).unwrap();
        assert_eq!(
            policy.statements[1].other.get("Condition"),
            Some(&json!({"StringEquals": {"kms:ViaService": "s3.amazonaws.com"}}))
        );
    }

    #[test]
    fn overwrite_without_operator_statement_is_rejected() {
        let service = service();
        let document = json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Sid": CONSUMER_SID,
                "Effect": "Allow",
                "Principal": {"AWS": CONSUMER},
                "Action": "kms:Decrypt",
                "Resource": "*"
            }]
        })
        .to_string();
        assert!(matches!(
            service.overwrite_operator_statement(&document),
            Err(KmsError::InvalidPolicyShape(_))
        ));
    }

    #[test]
    fn strip_removes_only_the_consumer_statement() {
        let service = service();
        let document = service.generate_standard_policy(CONSUMER).unwrap();
        let stripped = service.strip_consumer_statement(&document).unwrap();
        let policy = KeyPolicy::parse(&stripped).unwrap();
        assert_eq!(policy.statements.len(), 2);
        assert!(!policy.statements.iter().any(|s| s.has_sid(CONSUMER_SID)));
        assert!(service.has_delete_permission(&stripped));
    }

    #[test]
    fn wildcard_principal_survives_round_trip() {
        let document = json!({
            "Version": POLICY_VERSION,
            "Statement": [{"Effect": "Allow", "Principal": "*", "Action": "kms:Describe*"}]
        })
        .to_string();
        let policy = KeyPolicy::parse(&document).unwrap();
        assert_eq!(
            policy.statements[0].principal,
            Some(Principal::Wildcard("*".to_string()))
        );
    }

    #[test]
    fn single_statement_object_is_accepted() {
        let service = service();
        let document = json!({
            "Version": "2012-10-17",
            "Statement": {
                "Sid": OPERATOR_SID,
                "Effect": "Allow",
                "Principal": { "AWS": OPERATOR },
                "Action": "kms:DescribeKey",
                "Resource": "*"
            }
        })
        .to_string();

        let policy = KeyPolicy::parse(&document).unwrap();
        assert_eq!(policy.statements.len(), 1);
        assert!(!service.has_delete_permission(&document));

        let patched = service.overwrite_operator_statement(&document).unwrap();
        assert!(service.has_delete_permission(&patched));

        let consumer = json!({
            "Version": "2012-10-17",
            "Statement": {
                "Sid": CONSUMER_SID,
                "Effect": "Allow",
                "Principal": { "AWS": CONSUMER },
                "Action": ["kms:Decrypt", "kms:DescribeKey"],
                "Resource": "*"
            }
        })
        .to_string();
        assert!(service.is_policy_valid(&consumer, CONSUMER));
    }
}
