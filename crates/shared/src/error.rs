//! Error types shared by the query layer, the controller and their callers.

/// A query region that cannot be served.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundsError {
    #[error("bounds contain a non-finite coordinate")]
    NonFinite,

    #[error("south edge {south} lies above north edge {north}")]
    Inverted { south: f64, north: f64 },

    #[error("west edge {west} lies east of east edge {east}; antimeridian crossing is unsupported")]
    WrapsAntimeridian { west: f64, east: f64 },

    #[error("zoom {zoom} exceeds the maximum of {max}")]
    ZoomOutOfRange { zoom: u32, max: u32 },
}

/// Failure of a single store fetch.
///
/// Cancellation is not represented here: a superseded fetch simply completes
/// as stale and is dropped by the controller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("invalid query: {0}")]
    InvalidQuery(#[from] BoundsError),

    #[error("response does not match the {expected} query")]
    ShapeMismatch { expected: &'static str },
}

/// Input rejected by a controller transition before any query is issued.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("invalid viewport: {0}")]
    InvalidViewport(#[from] BoundsError),
}
