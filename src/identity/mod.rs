//! Central identity management: credential storage, signed session tokens and
//! per-request identity resolution.
//! Keep the public surface thin and split implementation across sub-modules.

mod credentials;
mod session;
mod resolver;
mod request_context;

pub use credentials::{CredentialRecord, CredentialStore, CredentialUpdate, derive_workspace};
pub use session::{SessionClaims, SessionTokenService, TokenError, DEFAULT_TOKEN_TTL_HOURS};
pub use resolver::{Identity, bearer_token, identity_gate, path_is_bypassed, resolve_identity, BYPASS_PATHS};
pub use request_context::RequestContext;
