use thiserror::Error;

use crate::{broker::BrokerError, gateway::GatewayError, Channel};

/// Convenience result type.
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("status bus is not initialized")]
    NotInitialized,
    #[error("status bus has shut down")]
    ShutDown,
    #[error("sending is not implemented for channel {0}")]
    Unimplemented(Channel),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
