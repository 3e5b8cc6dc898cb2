//! Geolocation seam for location messages.
//!
//! The widget core never talks to a platform location service directly;
//! the host supplies a [`Geolocator`]. Permission and secure-context
//! failures are terminal for the attempt (resending cannot succeed without
//! user intervention), everything else degrades to a failed, resendable
//! message.

use async_trait::async_trait;
use thiserror::Error;

use palaver_shared::types::Coordinates;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location requires a secure context")]
    InsecureContext,

    #[error("Position unavailable: {0}")]
    Unavailable(String),
}

impl GeoError {
    /// Permission/environment failures cannot be fixed by retrying the
    /// send; the optimistic message is discarded instead of marked failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GeoError::PermissionDenied | GeoError::InsecureContext)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub coords: Coordinates,
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> Result<Position, GeoError>;
}

/// Default geolocator for hosts without a location service.
pub struct NoGeolocator;

#[async_trait]
impl Geolocator for NoGeolocator {
    async fn current_position(&self) -> Result<Position, GeoError> {
        Err(GeoError::Unavailable("no location provider configured".into()))
    }
}
