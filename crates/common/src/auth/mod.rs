//! Caller identity
//!
//! Authentication happens upstream; this module only consumes the identity
//! and group claims the identity provider has already asserted:
//! - `X-Caller-Id`: opaque caller identifier
//! - `X-Caller-Groups`: comma-separated access-group claims
//! - `X-Caller-Roles`: comma-separated roles

use crate::errors::{AppError, Result};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_GROUPS_HEADER: &str = "x-caller-groups";
pub const CALLER_ROLES_HEADER: &str = "x-caller-roles";

/// Identity of the caller, as asserted by the identity provider
#[derive(Debug, Clone, Default)]
pub struct CallerIdentity {
    /// Caller ID (absent for anonymous callers)
    pub caller_id: Option<String>,

    /// Access-group claims used for fragment filtering
    pub groups: BTreeSet<String>,

    /// Roles granted to the caller
    pub roles: Vec<String>,

    /// Request ID for tracing
    pub request_id: String,
}

impl CallerIdentity {
    /// An anonymous caller with no group claims
    pub fn anonymous() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Check if the caller holds a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the caller may see the thought-process trace
    pub fn can_view_thought_process(&self, privileged_roles: &[String]) -> bool {
        privileged_roles.iter().any(|role| self.has_role(role))
    }
}

/// Split a comma-separated claim header into trimmed, non-empty values
pub fn parse_claim_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| AppError::Unauthorized {
            message: format!("Header {} is not valid UTF-8", name),
        }),
    }
}

/// Axum extractor for CallerIdentity
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        // Extract request ID
        let request_id = header_str(parts, "x-request-id")?
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let caller_id = header_str(parts, CALLER_ID_HEADER)?
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from);

        let groups = header_str(parts, CALLER_GROUPS_HEADER)?
            .map(parse_claim_list)
            .unwrap_or_default()
            .into_iter()
            .collect();

        let roles = header_str(parts, CALLER_ROLES_HEADER)?
            .map(parse_claim_list)
            .unwrap_or_default();

        Ok(CallerIdentity {
            caller_id,
            groups,
            roles,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_parse_claim_list() {
        assert_eq!(parse_claim_list("G1, G2,,  "), vec!["G1", "G2"]);
        assert!(parse_claim_list("").is_empty());
    }

    #[test]
    fn test_thought_process_requires_privileged_role() {
        let privileged = vec!["admin".to_string()];
        let caller = CallerIdentity::anonymous().with_roles(["reader"]);
        assert!(!caller.can_view_thought_process(&privileged));

        let admin = CallerIdentity::anonymous().with_roles(["reader", "admin"]);
        assert!(admin.can_view_thought_process(&privileged));
    }

    #[tokio::test]
    async fn test_extractor_reads_claims() {
        let request = Request::builder()
            .header(CALLER_ID_HEADER, "user-42")
            .header(CALLER_GROUPS_HEADER, "G1,G2")
            .header(CALLER_ROLES_HEADER, "admin")
            .header("x-request-id", "req-1")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let caller = CallerIdentity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(caller.caller_id.as_deref(), Some("user-42"));
        assert_eq!(caller.groups.len(), 2);
        assert!(caller.groups.contains("G2"));
        assert!(caller.has_role("admin"));
        assert_eq!(caller.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_extractor_defaults_to_anonymous() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let caller = CallerIdentity::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(caller.caller_id.is_none());
        assert!(caller.groups.is_empty());
        assert!(!caller.request_id.is_empty());
    }
}
