pub mod iam_role_kms_keys;
pub mod iam_roles;
