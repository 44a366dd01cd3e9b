//! Entity geocoding: address assembly → provider → selection.
//!
//! The coordinator never touches persistence. It returns what should be
//! written back and leaves the write to the caller ([`EntityGeocoder::apply`]
//! does it for plain field maps).

use super::policy::GeocodingPolicy;
use super::providers::GeocodeProvider;
use super::selector;
use super::types::{Coordinate, GeocodeCandidate, GeocodingFailure};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Separator between address parts in the provider query.
pub const ADDRESS_SEPARATOR: &str = ", ";

/// An entity's in-flight attributes, keyed by field name.
pub type Fields = BTreeMap<String, String>;

/// What a successful geocoding run hands back to the entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodedEntity {
    pub coordinate: Coordinate,
    pub formatted_address: String,
    pub raw: GeocodeCandidate,
    pub query: String,
    pub provider: String,
    pub geocoded_at: DateTime<Utc>,
}

/// Join the configured source fields present in `fields`, in policy order.
/// Absent and blank values are skipped.
pub fn build_address_query(fields: &Fields, policy: &GeocodingPolicy) -> String {
    policy
        .source_fields
        .iter()
        .filter_map(|name| fields.get(name))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(ADDRESS_SEPARATOR)
}

/// Geocode one entity.
///
/// `Ok(None)` means there was nothing to geocode (no address data, or the
/// entity already holds coordinates and the policy does not overwrite).
pub fn geocode_entity(
    fields: &Fields,
    policy: &GeocodingPolicy,
    provider: &dyn GeocodeProvider,
) -> Result<Option<GeocodedEntity>, GeocodingFailure> {
    if !policy.overwrite && existing_coordinate(fields, policy).is_some() {
        log::debug!("entity already has coordinates, skipping geocoding");
        return Ok(None);
    }

    let query = build_address_query(fields, policy);
    if query.is_empty() {
        log::debug!("no address fields present, skipping geocoding");
        return Ok(None);
    }

    let start = Instant::now();
    let candidates = provider.geocode(&query).map_err(|e| {
        log::warn!("{} failed for '{}': {}", provider.name(), query, e);
        GeocodingFailure::from(e)
    })?;

    let chosen = selector::select(&candidates, policy).map_err(|reason| {
        log::warn!(
            "rejected {} candidate(s) for '{}': {}",
            candidates.len(),
            query,
            reason
        );
        GeocodingFailure::from(reason)
    })?;

    log::info!(
        "geocoded '{}' -> {} [{}] ({:.1}ms)",
        query,
        chosen.coordinate,
        chosen.accuracy,
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(Some(GeocodedEntity {
        coordinate: chosen.coordinate,
        formatted_address: chosen.formatted_address.clone(),
        raw: chosen.clone(),
        query,
        provider: provider.name().to_string(),
        geocoded_at: Utc::now(),
    }))
}

/// Read a valid, complete coordinate out of the entity's mapped fields.
pub fn existing_coordinate(fields: &Fields, policy: &GeocodingPolicy) -> Option<Coordinate> {
    let lat = fields.get(&policy.fields.lat)?.trim().parse().ok()?;
    let lng = fields.get(&policy.fields.lng)?.trim().parse().ok()?;
    Coordinate::new(lat, lng).ok()
}

/// A provider bound to one entity type's policy.
pub struct EntityGeocoder {
    provider: Arc<dyn GeocodeProvider>,
    policy: GeocodingPolicy,
}

impl EntityGeocoder {
    pub fn new(provider: Arc<dyn GeocodeProvider>, policy: GeocodingPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> &GeocodingPolicy {
        &self.policy
    }

    pub fn provider(&self) -> &dyn GeocodeProvider {
        self.provider.as_ref()
    }

    pub fn geocode(&self, fields: &Fields) -> Result<Option<GeocodedEntity>, GeocodingFailure> {
        geocode_entity(fields, &self.policy, self.provider.as_ref())
    }

    /// Write coordinates and formatted address into the mapped fields.
    pub fn apply(&self, fields: &mut Fields, geocoded: &GeocodedEntity) {
        let mapping = &self.policy.fields;
        fields.insert(mapping.lat.clone(), geocoded.coordinate.lat.to_string());
        fields.insert(mapping.lng.clone(), geocoded.coordinate.lng.to_string());
        fields.insert(
            mapping.formatted_address.clone(),
            geocoded.formatted_address.clone(),
        );
    }

    /// Geocode and, on success, write the result back in one step.
    /// On failure the entity is left exactly as it was.
    pub fn geocode_into(&self, fields: &mut Fields) -> Result<Option<GeocodedEntity>, GeocodingFailure> {
        let geocoded = self.geocode(fields)?;
        if let Some(ref g) = geocoded {
            self.apply(fields, g);
        }
        Ok(geocoded)
    }
}
