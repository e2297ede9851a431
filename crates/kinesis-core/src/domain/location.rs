//! Location commands and the `"lat,lon"` text format.
//!
//! The browser UI sends positions as a comma-separated decimal pair, for
//! example `"37.3349,-122.0090"`.  [`parse_location`] turns that text into
//! [`Coordinates`] and rejects anything that is not exactly two finite
//! numbers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated latitude / longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// A command applied to a device control session.  Transient; never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationCommand {
    /// Move the simulated position to these coordinates.
    Set(Coordinates),
    /// Stop simulating and return to the real position.
    Clear,
}

/// The location text could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed location '{input}': {reason}")]
pub struct MalformedLocation {
    /// The offending input, as received.
    pub input: String,
    /// Short description of what was wrong with it.
    pub reason: &'static str,
}

/// Parses `"<lat>,<lon>"` into [`Coordinates`].
///
/// Whitespace around each field is ignored.  Both fields must parse as
/// finite `f64` values (`NaN` and infinities are rejected), and there must be
/// exactly two of them.
///
/// # Errors
///
/// Returns [`MalformedLocation`] when the field count is wrong or a field is
/// not a finite decimal number.
///
/// # Example
///
/// ```rust
/// use kinesis_core::parse_location;
///
/// let c = parse_location("37.3349,-122.0090").unwrap();
/// assert_eq!(c.latitude, 37.3349);
/// assert_eq!(c.longitude, -122.0090);
/// assert!(parse_location("1.0").is_err());
/// ```
pub fn parse_location(input: &str) -> Result<Coordinates, MalformedLocation> {
    let malformed = |reason| MalformedLocation {
        input: input.to_string(),
        reason,
    };

    let mut fields = input.split(',');
    let (lat, lon) = match (fields.next(), fields.next(), fields.next()) {
        (Some(lat), Some(lon), None) => (lat, lon),
        (_, _, Some(_)) => return Err(malformed("too many comma-separated values")),
        _ => return Err(malformed("expected two comma-separated values")),
    };

    let latitude = parse_finite(lat).ok_or_else(|| malformed("latitude is not a finite number"))?;
    let longitude =
        parse_finite(lon).ok_or_else(|| malformed("longitude is not a finite number"))?;

    Ok(Coordinates {
        latitude,
        longitude,
    })
}

fn parse_finite(field: &str) -> Option<f64> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
