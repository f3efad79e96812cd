//! Error type shared by the network core.

/// Errors raised by the simulated network.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A transfer never completed within the configured wait bound.
    #[error("bus stall: transfer did not complete within {waited} cycles")]
    BusStall { waited: u64 },

    /// The controller tried to start a transfer while one is still pending.
    #[error("transfer already in flight")]
    TransferInFlight,

    #[error("no responder on select line {0}")]
    NoSuchResponder(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("save state: {0}")]
    SaveState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
