//! Geocoding subsystem.
//!
//! Turns an entity's address fields into coordinates: a provider returns
//! candidates, a policy decides which (if any) is acceptable.

pub mod coordinator;
pub mod policy;
pub mod providers;
pub mod selector;
pub mod types;

pub use coordinator::{build_address_query, geocode_entity, EntityGeocoder, Fields, GeocodedEntity};
pub use policy::{ConfigError, FieldMapping, GeocodingPolicy, Unit};
pub use providers::{FixtureProvider, GeocodeProvider, NominatimProvider};
pub use selector::select;
pub use types::{
    AccuracyLevel, Coordinate, CoordinateError, GeocodeCandidate, GeocodingFailure, ProviderError,
    SelectionFailure,
};
