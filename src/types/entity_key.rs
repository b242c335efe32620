use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents a geographical coordinate using latitude and longitude.
///
/// Latitude is the first element (index 0), and longitude is the second (index 1).
///
/// # Examples
///
/// ```
/// use climate_store::LatLon;
///
/// let tokyo = LatLon(35.6812, 139.7671);
/// assert_eq!(tokyo.0, 35.6812); // Latitude
/// assert_eq!(tokyo.1, 139.7671); // Longitude
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon(pub f64, pub f64);

/// Identifies one logical time series: a rounded location or a device/station
/// stream id.
///
/// Keys double as file and directory names, so only ASCII letters, digits,
/// `.`, `_` and `-` are accepted, and a key may not start with `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Result<Self, StoreError> {
        let key = key.into();
        let reason = if key.is_empty() {
            Some("key is empty")
        } else if key.starts_with('.') {
            Some("key may not start with '.'")
        } else if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            Some("only ASCII letters, digits, '.', '_' and '-' are allowed")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(StoreError::InvalidEntityKey { key, reason }),
            None => Ok(Self(key)),
        }
    }

    /// Derives the key for a location by rounding to two decimals,
    /// e.g. `35.6812, 139.7671` becomes `"35.68_139.77"`.
    ///
    /// ```
    /// use climate_store::{EntityKey, LatLon};
    ///
    /// let key = EntityKey::from_location(LatLon(35.6812, 139.7671));
    /// assert_eq!(key.as_str(), "35.68_139.77");
    /// ```
    pub fn from_location(location: LatLon) -> Self {
        // Always valid: digits, '.', '-' and one '_'
        Self(format!("{:.2}_{:.2}", location.0, location.1))
    }

    /// Recovers the coordinates of a key built by [`EntityKey::from_location`].
    /// Stream keys yield `None`.
    pub fn location(&self) -> Option<LatLon> {
        let (lat, lon) = self.0.split_once('_')?;
        let lat: f64 = lat.parse().ok()?;
        let lon: f64 = lon.parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(LatLon(lat, lon))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityKey {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for EntityKey {
    type Error = StoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityKey> for String {
    fn from(value: EntityKey) -> Self {
        value.0
    }
}

impl AsRef<str> for EntityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
