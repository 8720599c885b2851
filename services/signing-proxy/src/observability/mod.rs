//! Observability: Prometheus metrics and per-request phase logging.

mod metrics;

pub use metrics::ProxyMetrics;

/// Per-request pipeline phase, recorded on the request span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Body accepted
    Received,
    /// Body parsed, session isolation checked
    Validated,
    /// Tenant session policy synthesized
    ScopeResolved,
    /// Signing credentials available
    CredentialsObtained,
    /// Backend request signed
    Signed,
    /// Backend answered with headers
    Dispatched,
    /// Frames are flowing
    Streaming,
    /// Terminal: stream finished with `Done`
    Completed,
    /// Terminal: request or stream failed
    Failed,
}

impl RequestPhase {
    /// Lower-case name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::ScopeResolved => "scope_resolved",
            Self::CredentialsObtained => "credentials_obtained",
            Self::Signed => "signed",
            Self::Dispatched => "dispatched",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
