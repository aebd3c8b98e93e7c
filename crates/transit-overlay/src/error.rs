//! Error types for the transit overlay.

use std::fmt;

/// Result type for overlay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in overlay operations.
///
/// None of these are fatal to the overlay as a whole: they are raised at
/// per-entity or per-frame boundaries and the caller skips the offending item.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A coordinate was NaN or infinite.
    InvalidCoordinate {
        /// Where the coordinate was being used.
        context: &'static str,
        /// Longitude in degrees.
        lng: f64,
        /// Latitude in degrees.
        lat: f64,
    },
    /// A route identifier did not resolve to a known route.
    UnknownRoute {
        /// The identifier as received.
        route: String,
    },
    /// An entity record could not be turned into a usable entity.
    InvalidEntity {
        /// The entity identifier.
        id: String,
        /// Description of what was invalid.
        detail: String,
    },
    /// The host supplied an unusable projection matrix.
    InvalidMatrix {
        /// Description of what was invalid.
        detail: String,
    },
    /// A configuration value was out of range or unparseable.
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// The GPU refused to allocate a resource.
    AllocationFailed {
        /// Kind of resource requested.
        resource: &'static str,
    },
    /// The shared GPU context is lost; resources cannot be allocated.
    ContextLost,
    /// The receiving side of the entity feed has been dropped.
    FeedClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidCoordinate { context, lng, lat } => {
                write!(f, "invalid coordinate in {context}: ({lng}, {lat})")
            }
            Error::UnknownRoute { route } => write!(f, "unknown route '{route}'"),
            Error::InvalidEntity { id, detail } => write!(f, "invalid entity '{id}': {detail}"),
            Error::InvalidMatrix { detail } => write!(f, "invalid projection matrix: {detail}"),
            Error::InvalidConfig { field, detail } => {
                write!(f, "invalid config value for {field}: {detail}")
            }
            Error::AllocationFailed { resource } => write!(f, "gpu could not allocate {resource}"),
            Error::ContextLost => write!(f, "gpu context lost"),
            Error::FeedClosed => write!(f, "entity feed closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfig {
            field: "json",
            detail: e.to_string(),
        }
    }
}
