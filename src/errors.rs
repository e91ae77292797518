use thiserror::Error;

/// Errors surfaced outside the dissection hot path.
///
/// Parse-local failures (truncated reads, bad labels) never cross a
/// dissector boundary: they stop the current section walk and leave, at
/// most, a risk on the flow.
#[derive(Debug, Error)]
pub enum DpiError {
    #[error("Not enough bytes in packet payload")]
    Truncated,
    #[error("Flow table is full")]
    FlowTableFull,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
