//! Core types for the geocoding subsystem.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A point on the globe in decimal degrees.
///
/// Entities either carry a full coordinate or none at all, so optional
/// coordinates are modelled as `Option<Coordinate>` rather than two optional
/// floats. Deserialization goes through [`Coordinate::new`], so fixture files
/// and request bodies cannot smuggle in out-of-range values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.lat, raw.lng)
    }
}

impl Coordinate {
    /// Build a validated coordinate.
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !is_valid_latitude(lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !is_valid_longitude(lng) {
            return Err(CoordinateError::Longitude(lng));
        }
        Ok(Self { lat, lng })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Parse "49.07,9.79" (whitespace around either part is ignored).
impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| CoordinateError::Format(s.to_string()))?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| CoordinateError::Format(s.to_string()))?;
        let lng: f64 = lng
            .trim()
            .parse()
            .map_err(|_| CoordinateError::Format(s.to_string()))?;
        Coordinate::new(lat, lng)
    }
}

pub fn is_valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn is_valid_longitude(lng: f64) -> bool {
    lng.is_finite() && (-180.0..=180.0).contains(&lng)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside -90..90")]
    Latitude(f64),
    #[error("longitude {0} is outside -180..180")]
    Longitude(f64),
    #[error("expected 'lat,lng', got '{0}'")]
    Format(String),
}

/// How precisely a match pins down the queried address, coarsest first.
///
/// `SubLocality` covers districts and counties, i.e. administrative units
/// between a region and a single town.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyLevel {
    Country,
    Region,
    #[default]
    SubLocality,
    Locality,
    Street,
    Exact,
}

impl AccuracyLevel {
    pub const ALL: [AccuracyLevel; 6] = [
        Self::Country,
        Self::Region,
        Self::SubLocality,
        Self::Locality,
        Self::Street,
        Self::Exact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Region => "region",
            Self::SubLocality => "sub_locality",
            Self::Locality => "locality",
            Self::Street => "street",
            Self::Exact => "exact",
        }
    }
}

impl fmt::Display for AccuracyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccuracyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "country" => Ok(Self::Country),
            "region" | "state" => Ok(Self::Region),
            "sub_locality" | "sublocality" | "district" => Ok(Self::SubLocality),
            "locality" | "city" => Ok(Self::Locality),
            "street" | "route" => Ok(Self::Street),
            "exact" | "house" => Ok(Self::Exact),
            _ => Err(format!(
                "Unknown accuracy '{}'. Use one of: {}",
                s,
                Self::ALL.map(|a| a.as_str()).join(", ")
            )),
        }
    }
}

/// A single normalized provider match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeCandidate {
    pub coordinate: Coordinate,
    pub formatted_address: String,
    pub accuracy: AccuracyLevel,
    /// Component tags present in the match, e.g. "postal_code", "locality".
    #[serde(default)]
    pub address_components: BTreeSet<String>,
    #[serde(default)]
    pub is_partial_match: bool,
}

impl GeocodeCandidate {
    pub fn has_components(&self, expected: &BTreeSet<String>) -> bool {
        expected.is_subset(&self.address_components)
    }
}

/// Failures of the provider boundary. "No results" is not one of them.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("malformed query or response: {0}")]
    Malformed(String),
    #[error("geocoding request was canceled")]
    Canceled,
}

/// Why none of the provider candidates was acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionFailure {
    #[error("no match found")]
    NoMatch,
    #[error("match is not accurate enough")]
    AccuracyTooLow,
    #[error("match lacks an expected address component")]
    MissingExpectedComponent,
    #[error("match is inconclusive")]
    Inconclusive,
}

impl SelectionFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::AccuracyTooLow => "accuracy_too_low",
            Self::MissingExpectedComponent => "missing_expected_component",
            Self::Inconclusive => "inconclusive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeocodingFailure {
    #[error(transparent)]
    Selection(#[from] SelectionFailure),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GeocodingFailure {
    /// Short machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Selection(s) => s.code(),
            Self::Provider(ProviderError::Network(_)) => "provider_network",
            Self::Provider(ProviderError::QuotaExceeded(_)) => "provider_quota_exceeded",
            Self::Provider(ProviderError::Malformed(_)) => "provider_malformed",
            Self::Provider(ProviderError::Canceled) => "provider_canceled",
        }
    }

    /// Text suitable for a validation message shown next to the address form.
    pub fn user_message(&self) -> String {
        match self {
            Self::Selection(SelectionFailure::NoMatch) => {
                "The address could not be found.".to_string()
            }
            Self::Selection(SelectionFailure::AccuracyTooLow) => {
                "The address is too imprecise. Please add more details.".to_string()
            }
            Self::Selection(SelectionFailure::MissingExpectedComponent) => {
                "The address is incomplete. Please add the missing parts.".to_string()
            }
            Self::Selection(SelectionFailure::Inconclusive) => {
                "The address matches several places. Please be more specific.".to_string()
            }
            Self::Provider(e) => format!("The address could not be verified right now ({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latitude_bounds() {
        assert!(is_valid_latitude(44.0));
        assert!(is_valid_latitude(-90.0));
        assert!(!is_valid_latitude(110.0));
        assert!(!is_valid_latitude(f64::NAN));
    }

    #[test]
    fn test_longitude_bounds() {
        assert!(is_valid_longitude(150.0));
        assert!(is_valid_longitude(180.0));
        assert!(!is_valid_longitude(-190.0));
        assert!(!is_valid_longitude(190.0));
    }

    #[test]
    fn test_coordinate_new_reports_field() {
        assert!(Coordinate::new(44.0, 150.0).is_ok());
        assert_eq!(
            Coordinate::new(44.0, 190.0),
            Err(CoordinateError::Longitude(190.0))
        );
        assert_eq!(
            Coordinate::new(110.0, 10.0),
            Err(CoordinateError::Latitude(110.0))
        );
    }

    #[test]
    fn test_coordinate_parse() {
        let c: Coordinate = " 49.07 , 9.79 ".parse().unwrap();
        assert_eq!(c, Coordinate { lat: 49.07, lng: 9.79 });
        assert!("49.07".parse::<Coordinate>().is_err());
        assert!("abc,9".parse::<Coordinate>().is_err());
        assert!("91,9".parse::<Coordinate>().is_err());
    }

    #[test]
    fn test_coordinate_deserialize_validates_range() {
        let c: Coordinate = serde_json::from_str(r#"{ "lat": -33.86, "lng": 151.2 }"#).unwrap();
        assert_eq!(c, Coordinate { lat: -33.86, lng: 151.2 });

        let err = serde_json::from_str::<Coordinate>(r#"{ "lat": 123.0, "lng": 9.0 }"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("latitude 123"), "got {}", err);
        assert!(serde_json::from_str::<Coordinate>(r#"{ "lat": 9.0, "lng": -400.0 }"#).is_err());
        assert!(serde_json::from_str::<Coordinate>(r#"{ "lat": 9.0 }"#).is_err());
    }

    #[test]
    fn test_accuracy_ordering() {
        assert!(AccuracyLevel::Country < AccuracyLevel::Region);
        assert!(AccuracyLevel::SubLocality < AccuracyLevel::Locality);
        assert!(AccuracyLevel::Street < AccuracyLevel::Exact);
        assert_eq!(AccuracyLevel::default(), AccuracyLevel::SubLocality);
    }

    #[test]
    fn test_accuracy_parse() {
        assert_eq!("sub-locality".parse(), Ok(AccuracyLevel::SubLocality));
        assert_eq!("Street".parse(), Ok(AccuracyLevel::Street));
        assert!("planet".parse::<AccuracyLevel>().is_err());
    }

    #[test]
    fn test_failure_codes() {
        let f: GeocodingFailure = SelectionFailure::Inconclusive.into();
        assert_eq!(f.code(), "inconclusive");
        let f: GeocodingFailure = ProviderError::Canceled.into();
        assert_eq!(f.code(), "provider_canceled");
        assert!(f.user_message().contains("canceled"));
    }
}
