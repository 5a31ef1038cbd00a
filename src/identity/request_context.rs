use std::sync::Arc;

use super::resolver::Identity;
use crate::workspace::WorkspaceInstance;

/// Typed request-scoped context attached by the identity gate and read by
/// downstream handlers for the duration of one request.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub identity: Identity,
    pub instance: Arc<WorkspaceInstance>,
}

impl RequestContext {
    pub fn username(&self) -> &str {
        match &self.identity {
            Identity::Authenticated { username, .. } => username,
            Identity::ApiKey => "api_user",
            Identity::Anonymous | Identity::Rejected { .. } => "anonymous",
        }
    }

    pub fn authenticated(&self) -> bool {
        matches!(self.identity, Identity::Authenticated { .. } | Identity::ApiKey)
    }

    pub fn workspace(&self) -> &str {
        &self.instance.workspace
    }
}
