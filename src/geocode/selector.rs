//! Picks the one provider candidate a policy accepts, or says why none fits.

use super::policy::GeocodingPolicy;
use super::types::{GeocodeCandidate, SelectionFailure};

/// Select the best acceptable candidate.
///
/// Filters run in a fixed order (accuracy, expected components,
/// inconclusiveness) so the reported failure names the first rule every
/// candidate broke. Among survivors the most precise one wins; equally
/// precise candidates keep the provider's relevance order.
pub fn select<'a>(
    candidates: &'a [GeocodeCandidate],
    policy: &GeocodingPolicy,
) -> Result<&'a GeocodeCandidate, SelectionFailure> {
    if candidates.is_empty() {
        return Err(SelectionFailure::NoMatch);
    }

    let accurate: Vec<&GeocodeCandidate> = candidates
        .iter()
        .filter(|c| c.accuracy >= policy.min_accuracy)
        .collect();
    if accurate.is_empty() {
        return Err(SelectionFailure::AccuracyTooLow);
    }

    let complete: Vec<&GeocodeCandidate> = if policy.expected_components.is_empty() {
        accurate
    } else {
        accurate
            .into_iter()
            .filter(|c| c.has_components(&policy.expected_components))
            .collect()
    };
    if complete.is_empty() {
        return Err(SelectionFailure::MissingExpectedComponent);
    }

    if !policy.allow_inconclusive && complete.iter().any(|c| c.is_partial_match) {
        return Err(SelectionFailure::Inconclusive);
    }

    let mut best = complete[0];
    for c in &complete[1..] {
        if c.accuracy > best.accuracy {
            best = *c;
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::types::{AccuracyLevel, Coordinate};
    use std::collections::BTreeSet;

    fn candidate(name: &str, accuracy: AccuracyLevel, components: &[&str]) -> GeocodeCandidate {
        GeocodeCandidate {
            coordinate: Coordinate { lat: 49.0, lng: 10.0 },
            formatted_address: name.to_string(),
            accuracy,
            address_components: components.iter().map(|s| s.to_string()).collect(),
            is_partial_match: false,
        }
    }

    #[test]
    fn test_empty_is_no_match() {
        let policy = GeocodingPolicy::default();
        assert_eq!(select(&[], &policy), Err(SelectionFailure::NoMatch));
    }

    #[test]
    fn test_prefers_accurate_candidate() {
        let policy = GeocodingPolicy::default();
        let candidates = vec![
            candidate("Deutschland", AccuracyLevel::Country, &["country"]),
            candidate("Krebenweg, Bibersfeld", AccuracyLevel::Street, &["route"]),
        ];
        let chosen = select(&candidates, &policy).unwrap();
        assert_eq!(chosen.formatted_address, "Krebenweg, Bibersfeld");
    }

    #[test]
    fn test_country_only_fails_default_threshold() {
        let policy = GeocodingPolicy::default();
        let candidates = vec![candidate("Deutschland", AccuracyLevel::Country, &["country"])];
        assert_eq!(
            select(&candidates, &policy),
            Err(SelectionFailure::AccuracyTooLow)
        );
    }

    #[test]
    fn test_country_only_passes_lowest_threshold() {
        let policy = GeocodingPolicy {
            min_accuracy: AccuracyLevel::Country,
            ..Default::default()
        };
        let candidates = vec![candidate("Deutschland", AccuracyLevel::Country, &["country"])];
        assert!(select(&candidates, &policy).is_ok());
    }

    #[test]
    fn test_high_threshold_rejects_locality() {
        let policy = GeocodingPolicy {
            min_accuracy: AccuracyLevel::Street,
            ..Default::default()
        };
        let candidates = vec![candidate("München", AccuracyLevel::Locality, &["locality"])];
        assert_eq!(
            select(&candidates, &policy),
            Err(SelectionFailure::AccuracyTooLow)
        );
    }

    #[test]
    fn test_missing_expected_component() {
        let policy = GeocodingPolicy::default().expect("postal_code");
        let candidates = vec![candidate(
            "Bibersfeld",
            AccuracyLevel::Locality,
            &["locality", "country"],
        )];
        assert_eq!(
            select(&candidates, &policy),
            Err(SelectionFailure::MissingExpectedComponent)
        );

        let candidates = vec![candidate(
            "74523 Schwäbisch Hall",
            AccuracyLevel::Locality,
            &["postal_code", "locality"],
        )];
        assert!(select(&candidates, &policy).is_ok());
    }

    #[test]
    fn test_inconclusive_rejected_unless_allowed() {
        let mut a = candidate("Neustadt an der Weinstraße", AccuracyLevel::Locality, &[]);
        let mut b = candidate("Neustadt bei Coburg", AccuracyLevel::Locality, &[]);
        a.is_partial_match = true;
        b.is_partial_match = true;
        let candidates = vec![a, b];

        let strict = GeocodingPolicy::default();
        assert_eq!(
            select(&candidates, &strict),
            Err(SelectionFailure::Inconclusive)
        );

        let lenient = GeocodingPolicy {
            allow_inconclusive: true,
            ..Default::default()
        };
        let chosen = select(&candidates, &lenient).unwrap();
        assert_eq!(chosen.formatted_address, "Neustadt an der Weinstraße");
    }

    #[test]
    fn test_partial_match_filtered_by_accuracy_does_not_count() {
        let mut vague = candidate("Somewhere", AccuracyLevel::Region, &[]);
        vague.is_partial_match = true;
        let candidates = vec![vague, candidate("Marktplatz 1", AccuracyLevel::Exact, &[])];
        let chosen = select(&candidates, &GeocodingPolicy::default()).unwrap();
        assert_eq!(chosen.accuracy, AccuracyLevel::Exact);
    }

    #[test]
    fn test_equal_accuracy_keeps_provider_order() {
        let candidates = vec![
            candidate("first", AccuracyLevel::Street, &[]),
            candidate("second", AccuracyLevel::Street, &[]),
            candidate("coarse", AccuracyLevel::Locality, &[]),
        ];
        let chosen = select(&candidates, &GeocodingPolicy::default()).unwrap();
        assert_eq!(chosen.formatted_address, "first");
    }

    #[test]
    fn test_expected_components_empty_set_accepts_all() {
        let policy = GeocodingPolicy {
            expected_components: BTreeSet::new(),
            ..Default::default()
        };
        let candidates = vec![candidate("x", AccuracyLevel::Locality, &[])];
        assert!(select(&candidates, &policy).is_ok());
    }
}
