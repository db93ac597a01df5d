//! Error types for the metering load generator

use thiserror::Error;

/// Result type alias for setup operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Setup errors. These stop a run before any traffic is generated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The identity registry would have no organizations or no accounts
    #[error("Identity registry is empty: {organizations} organizations x {accounts_per_org} accounts")]
    EmptyRegistry {
        organizations: usize,
        accounts_per_org: usize,
    },

    /// Host id range does not contain a single host
    #[error("Invalid host id range: [{min}, {max})")]
    InvalidHostRange { min: u64, max: u64 },

    /// Ramp-up and ramp-down do not fit into the total duration
    #[error("Ramp-up ({ramp_up}m) + ramp-down ({ramp_down}m) exceeds total duration ({duration}m)")]
    RampExceedsDuration {
        ramp_up: u64,
        ramp_down: u64,
        duration: u64,
    },

    /// Scrape interval must be at least one second
    #[error("Scrape interval must be positive")]
    ZeroScrapeInterval,

    /// Write rate must be at least one request per interval
    #[error("Write request rate must be positive")]
    ZeroWriteRate,

    /// SLA check ratio outside of [0, 1]
    #[error("SLA check rate must be within [0, 1], got {0}")]
    InvalidCheckRate(String),

    /// A derived quantity does not fit into 64 bits
    #[error("Configuration value too large: {0}")]
    Overflow(String),

    /// Remote-write URL could not be parsed
    #[error("Invalid remote write URL: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be built
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    /// Metric collectors could not be registered
    #[error("Failed to set up metrics: {0}")]
    Metrics(String),
}

/// Per-iteration write failures.
///
/// Every variant is recorded as a failed "write" check before it is
/// surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Connection, timeout or other transport level failure
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Endpoint answered with a status outside the accepted set
    #[error("Write failed. Status: {status}. Body: {body}")]
    Rejected { status: u16, body: String },

    /// Payload could not be serialized or compressed
    #[error("Failed to encode write request: {0}")]
    Encode(String),

    /// No billing identity could be assigned to the host
    #[error("No identity available for host {0}")]
    NoIdentity(u64),
}

impl WriteError {
    /// Key used when counting errors by type
    pub fn kind(&self) -> String {
        match self {
            Self::Transport(_) => "transport".to_string(),
            Self::Rejected { status, .. } => format!("status_{}", status),
            Self::Encode(_) => "encode".to_string(),
            Self::NoIdentity(_) => "identity".to_string(),
        }
    }

    /// Whether the request never produced a response
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
