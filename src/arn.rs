//! Parsing and normalization of IAM principal ARNs.
//!
//! Key policies reference principals by ARN, while STS hands out session ARNs at
//! authentication time. Everything that is written into or compared against a
//! policy goes through [`to_role_arn`] first.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{KmsError, KmsResult};

static ARN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^arn:(?P<partition>aws[a-zA-Z-]*):(?P<service>[a-z0-9-]+):(?P<region>[a-z0-9-]*):(?P<account>[0-9]+):(?P<resource>.+)$",
    )
    .expect("arn pattern compiles")
});

const IAM_SERVICE: &str = "iam";
const STS_SERVICE: &str = "sts";

/// Borrowed view over the segments of a well-formed ARN.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arn<'a> {
    pub partition: &'a str,
    pub service: &'a str,
    pub region: &'a str,
    pub account_id: &'a str,
    pub resource: &'a str,
}

impl<'a> Arn<'a> {
    pub fn parse(value: &'a str) -> KmsResult<Self> {
        let captures = ARN_PATTERN
            .captures(value)
            .ok_or_else(|| KmsError::MalformedIdentifier(value.to_string()))?;
        let segment = |name: &str| captures.name(name).map_or("", |m| m.as_str());
        Ok(Self {
            partition: segment("partition"),
            service: segment("service"),
            region: segment("region"),
            account_id: segment("account"),
            resource: segment("resource"),
        })
    }

    /// Splits `role/path/to/name` into `("role", "path/to/name")`.
    pub fn resource_parts(&self) -> Option<(&'a str, &'a str)> {
        let (kind, name) = self.resource.split_once('/')?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some((kind, name))
    }
}

pub fn account_id(arn: &str) -> KmsResult<String> {
    Ok(Arn::parse(arn)?.account_id.to_string())
}

/// Everything after the resource type, including IAM path segments.
pub fn resource_name(arn: &str) -> KmsResult<String> {
    Arn::parse(arn)?
        .resource_parts()
        .map(|(_, name)| name.to_string())
        .ok_or_else(|| KmsError::MalformedIdentifier(arn.to_string()))
}

pub fn is_role_arn(arn: &str) -> bool {
    match Arn::parse(arn) {
        Ok(parsed) => {
            parsed.service == IAM_SERVICE
                && matches!(parsed.resource_parts(), Some(("role", _)))
        }
        Err(_) => false,
    }
}

/// Maps a principal ARN (assumed-role session, federated user, or role) to the
/// ARN of the underlying IAM role.
pub fn to_role_arn(principal_arn: &str) -> KmsResult<String> {
    let malformed = || KmsError::MalformedIdentifier(principal_arn.to_string());
    let parsed = Arn::parse(principal_arn)?;
    let (kind, name) = parsed.resource_parts().ok_or_else(malformed)?;

    let role_name = match (parsed.service, kind) {
        (IAM_SERVICE, "role") => name,
        (STS_SERVICE, "assumed-role") => match name.rsplit_once('/') {
            Some((role, session)) if !role.is_empty() && !session.is_empty() => role,
            _ => return Err(malformed()),
        },
        (STS_SERVICE, "federated-user") => name,
        _ => return Err(malformed()),
    };

    Ok(role_arn(parsed.partition, parsed.account_id, role_name))
}

pub fn role_arn(partition: &str, account_id: &str, role_name: &str) -> String {
    format!("arn:{partition}:iam::{account_id}:role/{role_name}")
}

pub fn account_root_arn(partition: &str, account_id: &str) -> String {
    format!("arn:{partition}:iam::{account_id}:root")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_is_extracted_from_role_arn() {
        assert_eq!(
            account_id("arn:aws:iam::1111111111:role/lamb_dev_health").unwrap(),
            "1111111111"
        );
    }

    #[test]
    fn account_id_rejects_non_arn_input() {
        let err = account_id("hullabaloo").unwrap_err();
        assert!(matches!(err, KmsError::MalformedIdentifier(value) if value == "hullabaloo"));
    }

    #[test]
    fn resource_name_keeps_path_segments() {
        assert_eq!(
            resource_name("arn:aws:iam::222222:role/my_roleName").unwrap(),
            "my_roleName"
        );
        assert_eq!(
            resource_name("arn:aws:iam::222222:role/path/to/foo").unwrap(),
            "path/to/foo"
        );
        assert!(resource_name("brouhaha").is_err());
        assert!(resource_name("arn:aws:iam::222222:root").is_err());
    }

    #[test]
    fn principals_normalize_to_role_arns() {
        let cases = [
            (
                "arn:aws:sts::1111111111:federated-user/lamb_dev_health",
                "arn:aws:iam::1111111111:role/lamb_dev_health",
            ),
            (
                "arn:aws:sts::2222222222:assumed-role/prince_role/session-name",
                "arn:aws:iam::2222222222:role/prince_role",
            ),
            (
                "arn:aws:sts::2222222222:assumed-role/sir/alfred/role/session-name",
                "arn:aws:iam::2222222222:role/sir/alfred/role",
            ),
            (
                "arn:aws:iam::3333333333:role/path/to/foo",
                "arn:aws:iam::3333333333:role/path/to/foo",
            ),
            (
                "arn:aws:iam::4444444444:role/name",
                "arn:aws:iam::4444444444:role/name",
            ),
        ];
        for (principal, expected) in cases {
            assert_eq!(to_role_arn(principal).unwrap(), expected, "{principal}");
        }
    }

    #[test]
    fn normalization_is_idempotent_on_role_arns() {
        let role = to_role_arn("arn:aws:sts::2222222222:assumed-role/sir/alfred/role/s").unwrap();
        assert_eq!(to_role_arn(&role).unwrap(), role);
    }

    #[test]
    fn partition_is_preserved() {
        assert_eq!(
            to_role_arn("arn:aws-us-gov:sts::123456789012:assumed-role/ops/s1").unwrap(),
            "arn:aws-us-gov:iam::123456789012:role/ops"
        );
    }

    #[test]
    fn normalization_rejects_groups_and_garbage() {
        for bad in [
            "foobar",
            "arn:aws:iam::1111111111:group/path/to/group",
            "arn:aws:sts::1111111111:assumed-role/blah",
            "arn:aws:iam::1111111111:user/someone",
        ] {
            assert!(
                matches!(to_role_arn(bad), Err(KmsError::MalformedIdentifier(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn only_iam_role_arns_are_role_arns() {
        assert!(is_role_arn("arn:aws:iam::2222222222:role/fancy/role/path"));
        assert!(is_role_arn("arn:aws:iam::1111111111:role/name"));
        assert!(!is_role_arn("arn:aws:iam::3333333333:assumed-role/happy/path"));
        assert!(!is_role_arn("arn:aws:sts::1111111111:federated-user/my_user"));
        assert!(!is_role_arn("arn:aws:iam::1111111111:group/path/to/group"));
        assert!(!is_role_arn("not-an-arn"));
    }
}
