use skew_arb_core::Venue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// One venue rejected or failed an action. The other leg is not rolled back.
    #[error("{venue} leg failed: {source:#}")]
    Leg {
        venue: Venue,
        #[source]
        source: anyhow::Error,
    },
}

impl ExecutionError {
    pub fn leg(venue: Venue, source: anyhow::Error) -> Self {
        Self::Leg { venue, source }
    }

    #[must_use]
    pub const fn venue(&self) -> Venue {
        match self {
            Self::Leg { venue, .. } => *venue,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
