//! Driver error types

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a naming service
#[derive(Debug, Error)]
pub enum NamingError {
    /// Every minor in the driver's range is taken
    #[error("No free minor number ({capacity} in use)")]
    Exhausted { capacity: u32 },

    /// The minor was available but the node could not be exposed
    #[error("Failed to create device node {}: {source}", .path.display())]
    Node {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal failure of one attach attempt
///
/// The peripheral stays unclaimed and no device node exists for it.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Not able to get a minor for this device")]
    NoMinorAvailable,

    #[error("Not able to expose a device node: {0}")]
    Node(#[source] NamingError),
}

impl From<NamingError> for RegistrationError {
    fn from(err: NamingError) -> Self {
        match err {
            NamingError::Exhausted { .. } => RegistrationError::NoMinorAvailable,
            node @ NamingError::Node { .. } => RegistrationError::Node(node),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
