//! Geocoding providers: Nominatim over HTTP, and an in-memory fixture set.

use super::policy::ConfigError;
use super::types::{AccuracyLevel, Coordinate, GeocodeCandidate, ProviderError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// The I/O boundary of the geocoding pipeline.
///
/// Implementations return candidates ordered by relevance, most relevant
/// first. An address nobody knows is `Ok(vec![])`, never an error.
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &str;

    fn geocode(&self, query: &str) -> Result<Vec<GeocodeCandidate>, ProviderError>;
}

/// Lowercase and collapse whitespace, so lookups ignore cosmetic differences.
pub fn normalize_query(q: &str) -> String {
    q.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Nominatim provider ─────────────────────────────────────────

pub const NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = concat!("geocoder/", env!("CARGO_PKG_VERSION"));

/// The minimum importance gap between two equally precise results for the
/// top one to count as a clear winner.
pub const DISAMBIGUATION_THRESHOLD: f64 = 0.10;

#[derive(Deserialize, Debug, Clone)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default, rename = "type")]
    pub place_type: Option<String>,
    #[serde(default, rename = "class")]
    pub place_class: Option<String>,
    #[serde(default)]
    pub addresstype: Option<String>,
    #[serde(default)]
    pub address: BTreeMap<String, String>,
}

/// OpenStreetMap Nominatim search.
pub struct NominatimProvider {
    agent: ureq::Agent,
    endpoint: String,
    limit: usize,
    language: Option<String>,
}

impl NominatimProvider {
    pub fn new() -> Self {
        Self::with_endpoint(NOMINATIM_ENDPOINT)
    }

    /// Point at a self-hosted Nominatim instance.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            agent: Self::build_agent(Duration::from_secs(10)),
            endpoint: endpoint.into(),
            limit: 5,
            language: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, 50);
        self
    }

    /// Preferred language for formatted addresses (e.g. "de").
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(timeout).build()
    }
}

impl Default for NominatimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &str {
        "nominatim"
    }

    fn geocode(&self, query: &str) -> Result<Vec<GeocodeCandidate>, ProviderError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ProviderError::Malformed("empty address query".into()));
        }

        let start = Instant::now();
        let mut request = self
            .agent
            .get(&self.endpoint)
            .set("User-Agent", USER_AGENT)
            .query("q", query)
            .query("format", "json")
            .query("addressdetails", "1")
            .query("limit", &self.limit.to_string());
        if let Some(ref lang) = self.language {
            request = request.query("accept-language", lang);
        }

        let response = request.call().map_err(provider_error_from_ureq)?;
        let results: Vec<NominatimResult> = response
            .into_json()
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        log::debug!(
            "nominatim '{}' -> {} results ({:.1}ms)",
            query,
            results.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        candidates_from_results(&results)
    }
}

fn provider_error_from_ureq(e: ureq::Error) -> ProviderError {
    match e {
        ureq::Error::Status(429, r) => ProviderError::QuotaExceeded(r.status_text().to_string()),
        ureq::Error::Status(code, r) if (400..500).contains(&code) => {
            ProviderError::Malformed(format!("HTTP {} {}", code, r.status_text()))
        }
        ureq::Error::Status(code, r) => {
            ProviderError::Network(format!("HTTP {} {}", code, r.status_text()))
        }
        ureq::Error::Transport(t) => ProviderError::Network(t.to_string()),
    }
}

/// Normalize raw Nominatim results, keeping their relevance order.
///
/// Rows with unusable coordinates are skipped; the response is only
/// malformed when no row survives.
pub fn candidates_from_results(
    results: &[NominatimResult],
) -> Result<Vec<GeocodeCandidate>, ProviderError> {
    let mut scored = Vec::with_capacity(results.len());
    let mut last_error = None;
    for r in results {
        let coordinate = match coordinate_of(r) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("skipping nominatim result '{}': {}", r.display_name, e);
                last_error = Some(e);
                continue;
            }
        };

        let candidate = GeocodeCandidate {
            coordinate,
            formatted_address: r.display_name.clone(),
            accuracy: accuracy_of(r),
            address_components: components_of(&r.address),
            is_partial_match: false,
        };
        scored.push((candidate, r.importance.unwrap_or(0.0)));
    }

    if scored.is_empty() {
        if let Some(e) = last_error {
            return Err(ProviderError::Malformed(e));
        }
    }

    mark_ambiguous(&mut scored);
    Ok(scored.into_iter().map(|(c, _)| c).collect())
}

fn coordinate_of(r: &NominatimResult) -> Result<Coordinate, String> {
    let lat: f64 = r
        .lat
        .parse()
        .map_err(|_| format!("bad latitude '{}'", r.lat))?;
    let lng: f64 = r
        .lon
        .parse()
        .map_err(|_| format!("bad longitude '{}'", r.lon))?;
    Coordinate::new(lat, lng).map_err(|e| e.to_string())
}

/// Flag every result that competes with the top one at the same precision
/// without a clear importance gap (e.g. the many towns named "Neustadt").
fn mark_ambiguous(scored: &mut [(GeocodeCandidate, f64)]) {
    let Some((top, top_importance)) = scored.first().map(|(c, i)| (c.clone(), *i)) else {
        return;
    };

    let rivals: Vec<usize> = scored
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, (c, importance))| {
            c.accuracy == top.accuracy
                && c.formatted_address != top.formatted_address
                && top_importance - importance < DISAMBIGUATION_THRESHOLD
        })
        .map(|(i, _)| i)
        .collect();

    if rivals.is_empty() {
        return;
    }
    scored[0].0.is_partial_match = true;
    for i in rivals {
        scored[i].0.is_partial_match = true;
    }
}

fn accuracy_of(r: &NominatimResult) -> AccuracyLevel {
    if r.address.contains_key("house_number") {
        return AccuracyLevel::Exact;
    }

    let kind = r
        .addresstype
        .as_deref()
        .or(r.place_type.as_deref())
        .unwrap_or("");

    match kind {
        "house" | "building" | "house_number" => AccuracyLevel::Exact,
        "road" | "street" | "pedestrian" | "residential" | "footway" => AccuracyLevel::Street,
        "city" | "town" | "village" | "hamlet" | "suburb" | "neighbourhood" | "quarter"
        | "city_district" | "isolated_dwelling" | "locality" | "postcode" => {
            AccuracyLevel::Locality
        }
        "county" | "district" | "state_district" | "municipality" => AccuracyLevel::SubLocality,
        "state" | "region" | "province" => AccuracyLevel::Region,
        "country" => AccuracyLevel::Country,
        _ => match r.place_class.as_deref() {
            Some("highway") => AccuracyLevel::Street,
            Some("building") | Some("amenity") | Some("shop") | Some("office") => {
                AccuracyLevel::Exact
            }
            _ => AccuracyLevel::Locality,
        },
    }
}

fn components_of(address: &BTreeMap<String, String>) -> BTreeSet<String> {
    address
        .keys()
        .filter_map(|key| {
            let tag = match key.as_str() {
                "house_number" => "street_number",
                "road" | "pedestrian" | "footway" => "route",
                "postcode" => "postal_code",
                "city" | "town" | "village" | "hamlet" | "municipality" => "locality",
                "suburb" | "neighbourhood" | "quarter" | "city_district" => "sublocality",
                "county" | "state_district" => "administrative_area_level_2",
                "state" | "region" => "administrative_area_level_1",
                "country" => "country",
                _ => return None,
            };
            Some(tag.to_string())
        })
        .collect()
}

// ─── Fixture provider ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureEntry {
    Candidates(Vec<GeocodeCandidate>),
    Failure { error: ProviderError },
}

/// Deterministic provider backed by a fixed query → response table.
///
/// Queries are matched after [`normalize_query`]; unknown queries yield no
/// candidates.
#[derive(Debug, Default)]
pub struct FixtureProvider {
    entries: HashMap<String, FixtureEntry>,
    calls: AtomicUsize,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, candidates: Vec<GeocodeCandidate>) -> Self {
        self.entries
            .insert(normalize_query(query), FixtureEntry::Candidates(candidates));
        self
    }

    pub fn with_error(mut self, query: &str, error: ProviderError) -> Self {
        self.entries
            .insert(normalize_query(query), FixtureEntry::Failure { error });
        self
    }

    /// Load a JSON object mapping queries to candidate lists or `{"error": ..}`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: HashMap<String, FixtureEntry> =
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let entries = raw
            .into_iter()
            .map(|(q, entry)| (normalize_query(&q), entry))
            .collect();
        Ok(Self {
            entries,
            calls: AtomicUsize::new(0),
        })
    }

    /// How many times `geocode` has been invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GeocodeProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn geocode(&self, query: &str) -> Result<Vec<GeocodeCandidate>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.entries.get(&normalize_query(query)) {
            Some(FixtureEntry::Candidates(c)) => Ok(c.clone()),
            Some(FixtureEntry::Failure { error }) => Err(error.clone()),
            None => Ok(Vec::new()),
        }
    }
}
