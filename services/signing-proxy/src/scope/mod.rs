//! Tenant scope resolution.
//!
//! Synthesizes the inline session policy that narrows the assumed role to
//! one {app, tenant} namespace and the single configured backend.

mod policy;
mod resolver;

pub use policy::{
    Condition, PolicyDocument, ScopePolicy, Statement, INVOKE_STATEMENT_SID, MAX_POLICY_BYTES,
    POLICY_VERSION,
};
pub use resolver::TenantScopeResolver;
