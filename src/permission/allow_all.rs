//! Permissive policy for standalone deployments.

use async_trait::async_trait;

use super::{AuthContext, AuthorizeDecision, AuthorizeRequest, PermissionError, PermissionsApi, PolicyDecision};

/// Grants every request. Used when no permission backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPermissions;

#[async_trait]
impl PermissionsApi for AllowAllPermissions {
    async fn authorize(
        &self,
        requests: &[AuthorizeRequest],
        _ctx: &AuthContext,
    ) -> Result<Vec<AuthorizeDecision>, PermissionError> {
        Ok(vec![AuthorizeDecision::Allow; requests.len()])
    }

    async fn authorize_conditional(
        &self,
        _permission: &str,
        _ctx: &AuthContext,
    ) -> Result<PolicyDecision, PermissionError> {
        Ok(PolicyDecision::Allow)
    }
}
