//! Great-circle distance via the spherical law of cosines.
//!
//! A [`DistanceExpression`] fixes one end of the formula so a collection can
//! be ranked against a single reference point, either in-process or by
//! handing its SQL projection to a store.

use crate::geocode::policy::Unit;
use crate::geocode::types::Coordinate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write;

/// Distance between two points along the Earth's surface.
///
/// Identical points are exactly zero; otherwise the `acos` argument is
/// clamped to [-1, 1] so rounding never yields NaN.
pub fn distance(a: &Coordinate, b: &Coordinate, unit: Unit) -> f64 {
    if a == b {
        return 0.0;
    }
    let (phi_a, phi_b) = (a.lat.to_radians(), b.lat.to_radians());
    let delta_lambda = a.lng.to_radians() - b.lng.to_radians();

    let cos_angle = phi_a.cos() * phi_b.cos() * delta_lambda.cos() + phi_a.sin() * phi_b.sin();
    unit.earth_radius() * cos_angle.clamp(-1.0, 1.0).acos()
}

/// The distance formula with its reference point bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceExpression {
    pub reference: Coordinate,
    pub unit: Unit,
}

impl DistanceExpression {
    pub fn new(reference: Coordinate, unit: Unit) -> Self {
        Self { reference, unit }
    }

    pub fn evaluate(&self, target: &Coordinate) -> f64 {
        distance(&self.reference, target, self.unit)
    }

    /// Borrow the expression as a plain closure for iterator adaptors.
    pub fn as_fn(&self) -> impl Fn(&Coordinate) -> f64 + '_ {
        move |target: &Coordinate| self.evaluate(target)
    }

    /// Declarative form for store-side evaluation.
    pub fn projection(&self) -> DistanceProjection {
        let phi = self.reference.lat.to_radians();
        DistanceProjection {
            ref_lat: self.reference.lat,
            ref_lng: self.reference.lng,
            radius: self.unit.earth_radius(),
            sin_ref_lat: phi.sin(),
            cos_ref_lat: phi.cos(),
            ref_lng_rad: self.reference.lng.to_radians(),
        }
    }
}

/// Build the reusable expression for `reference`.
pub fn build_distance_expression(reference: Coordinate, unit: Unit) -> DistanceExpression {
    DistanceExpression::new(reference, unit)
}

/// Column names the SQL projection reads coordinates from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlColumns {
    /// Table or model alias the columns are qualified with, if any.
    pub table: Option<String>,
    pub lat: String,
    pub lng: String,
}

impl Default for SqlColumns {
    fn default() -> Self {
        Self {
            table: None,
            lat: "lat".into(),
            lng: "lng".into(),
        }
    }
}

impl SqlColumns {
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Default::default()
        }
    }

    fn qualify(&self, column: &str) -> String {
        match self.table {
            Some(ref t) => format!("{}.{}", t, column),
            None => column.to_string(),
        }
    }
}

/// The distance formula reduced to constants of the reference point.
///
/// The reference itself is kept in degrees so rows sitting exactly on it
/// get 0, as with [`distance`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceProjection {
    pub ref_lat: f64,
    pub ref_lng: f64,
    pub radius: f64,
    pub sin_ref_lat: f64,
    pub cos_ref_lat: f64,
    pub ref_lng_rad: f64,
}

impl DistanceProjection {
    /// Evaluate exactly what the SQL text computes.
    pub fn evaluate(&self, lat: f64, lng: f64) -> f64 {
        if lat == self.ref_lat && lng == self.ref_lng {
            return 0.0;
        }
        let phi = lat.to_radians();
        let cos_angle = phi.cos() * self.cos_ref_lat * (lng.to_radians() - self.ref_lng_rad).cos()
            + phi.sin() * self.sin_ref_lat;
        self.radius * cos_angle.clamp(-1.0, 1.0).acos()
    }

    /// SQL expression (MySQL/PostgreSQL dialect) over the given columns.
    pub fn to_sql(&self, columns: &SqlColumns) -> String {
        let lat = columns.qualify(&columns.lat);
        let lng = columns.qualify(&columns.lng);
        let mut sql = String::new();
        let _ = write!(
            sql,
            "CASE WHEN {lat} = {} AND {lng} = {} THEN 0 ELSE {} * ACOS(LEAST(1, GREATEST(-1, \
             COS(RADIANS({lat})) * {} * COS(RADIANS({lng}) - {}) + SIN(RADIANS({lat})) * {}))) END",
            self.ref_lat,
            self.ref_lng,
            self.radius,
            self.cos_ref_lat,
            self.ref_lng_rad,
            self.sin_ref_lat,
            lat = lat,
            lng = lng,
        );
        sql
    }

    /// `<expr> AS <table>.<alias>`, for use as a select-list field.
    pub fn to_sql_field(&self, columns: &SqlColumns, alias: &str) -> String {
        format!("{} AS {}", self.to_sql(columns), columns.qualify(alias))
    }
}

fn nearest_first(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Rank items by distance from the expression's reference, nearest first.
/// Items without a coordinate go last; ties keep their input order.
pub fn sort_by_distance<T, F>(
    items: Vec<T>,
    expr: &DistanceExpression,
    coordinate_of: F,
) -> Vec<(T, Option<f64>)>
where
    F: Fn(&T) -> Option<Coordinate>,
{
    let mut ranked: Vec<(T, Option<f64>)> = items
        .into_iter()
        .map(|item| {
            let d = coordinate_of(&item).map(|c| expr.evaluate(&c));
            (item, d)
        })
        .collect();
    ranked.sort_by(|a, b| nearest_first(a.1, b.1));
    ranked
}

/// Keep items strictly closer than `max_distance`, in input order.
pub fn within_radius<T, F>(
    items: Vec<T>,
    expr: &DistanceExpression,
    max_distance: f64,
    coordinate_of: F,
) -> Vec<(T, f64)>
where
    F: Fn(&T) -> Option<Coordinate>,
{
    items
        .into_iter()
        .filter_map(|item| {
            let d = expr.evaluate(&coordinate_of(&item)?);
            (d < max_distance).then_some((item, d))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const BERLIN: Coordinate = Coordinate { lat: 52.5200, lng: 13.4050 };
    const MUNICH: Coordinate = Coordinate { lat: 48.1351, lng: 11.5820 };
    const BIBERSFELD: Coordinate = Coordinate { lat: 49.0971, lng: 9.7969 };

    fn random_coordinate(rng: &mut StdRng) -> Coordinate {
        Coordinate {
            lat: rng.gen_range(-90.0..=90.0),
            lng: rng.gen_range(-180.0..=180.0),
        }
    }

    #[test]
    fn test_identical_points_are_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let a = random_coordinate(&mut rng);
            assert_eq!(distance(&a, &a, Unit::Km), 0.0);
            assert_eq!(distance(&a, &a, Unit::Miles), 0.0);
        }
    }

    #[test]
    fn test_nearly_identical_points_are_not_nan() {
        let a = Coordinate { lat: 49.0971, lng: 9.7969 };
        let b = Coordinate { lat: 49.0971, lng: 9.79690000001 };
        let d = distance(&a, &b, Unit::Km);
        assert!(d.is_finite());
        assert!(d >= 0.0 && d < 0.001);
    }

    #[test]
    fn test_one_degree_on_equator() {
        let a = Coordinate { lat: 0.0, lng: 0.0 };
        let b = Coordinate { lat: 0.0, lng: 1.0 };
        assert_relative_eq!(
            distance(&a, &b, Unit::Km),
            6371.04 * std::f64::consts::PI / 180.0,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_berlin_munich() {
        let d = distance(&BERLIN, &MUNICH, Unit::Km);
        assert!(d > 500.0 && d < 510.0, "got {}", d);
        assert_relative_eq!(d, distance(&MUNICH, &BERLIN, Unit::Km), max_relative = 1e-12);
    }

    #[test]
    fn test_antipodes() {
        let a = Coordinate { lat: 10.0, lng: 20.0 };
        let b = Coordinate { lat: -10.0, lng: -160.0 };
        assert_relative_eq!(
            distance(&a, &b, Unit::Km),
            6371.04 * std::f64::consts::PI,
            max_relative = 1e-6
        );
    }

    #[test]
    fn test_km_to_miles_ratio() {
        let km = distance(&BERLIN, &BIBERSFELD, Unit::Km);
        let miles = distance(&BERLIN, &BIBERSFELD, Unit::Miles);
        assert_relative_eq!(km / miles, 1.60934, max_relative = 1e-4);
    }

    #[test]
    fn test_expression_matches_scalar() {
        let mut rng = StdRng::seed_from_u64(42);
        for i in 0..100 {
            let reference = random_coordinate(&mut rng);
            let target = random_coordinate(&mut rng);
            let unit = if i % 2 == 0 { Unit::Km } else { Unit::Miles };
            let expected = distance(&reference, &target, unit);

            let expr = build_distance_expression(reference, unit);
            assert_relative_eq!(expr.evaluate(&target), expected, max_relative = 1e-6);
            assert_relative_eq!((expr.as_fn())(&target), expected, max_relative = 1e-6);
            assert_relative_eq!(
                expr.projection().evaluate(target.lat, target.lng),
                expected,
                max_relative = 1e-6
            );
        }
    }

    #[test]
    fn test_projection_at_reference_is_zero() {
        for reference in [BIBERSFELD, BERLIN, MUNICH, Coordinate { lat: -89.5, lng: 179.9 }] {
            let projection = build_distance_expression(reference, Unit::Km).projection();
            assert_eq!(projection.evaluate(reference.lat, reference.lng), 0.0);
            assert_eq!(
                projection.evaluate(reference.lat, reference.lng),
                distance(&reference, &reference, Unit::Km)
            );
        }
    }

    #[test]
    fn test_sql_projection_text() {
        let expr = build_distance_expression(Coordinate { lat: 0.0, lng: 0.0 }, Unit::Km);
        let sql = expr.projection().to_sql(&SqlColumns::for_table("Comment"));
        assert_eq!(
            sql,
            "CASE WHEN Comment.lat = 0 AND Comment.lng = 0 THEN 0 ELSE \
             6371.04 * ACOS(LEAST(1, GREATEST(-1, COS(RADIANS(Comment.lat)) * 1 * \
             COS(RADIANS(Comment.lng) - 0) + SIN(RADIANS(Comment.lat)) * 0))) END"
        );
    }

    #[test]
    fn test_sql_projection_custom_columns_and_alias() {
        let expr = build_distance_expression(Coordinate { lat: 12.0, lng: 14.0 }, Unit::Miles);
        let columns = SqlColumns {
            table: Some("Comment".into()),
            lat: "x".into(),
            lng: "y".into(),
        };
        let field = expr.projection().to_sql_field(&columns, "distance");
        assert!(field.starts_with("CASE WHEN Comment.x = 12 AND Comment.y = 14 THEN 0 ELSE 3958.75 * ACOS("));
        assert!(field.contains("RADIANS(Comment.x)"));
        assert!(field.contains("RADIANS(Comment.y)"));
        assert!(field.ends_with(" AS Comment.distance"));

        let bare = expr.projection().to_sql_field(&SqlColumns::default(), "distance");
        assert!(bare.ends_with(") END AS distance"));
    }

    #[test]
    fn test_sort_by_distance() {
        let points = vec![
            ("berlin", Some(BERLIN)),
            ("nowhere", None),
            ("bibersfeld", Some(BIBERSFELD)),
            ("munich", Some(MUNICH)),
        ];
        let expr = build_distance_expression(Coordinate { lat: 49.0, lng: 10.0 }, Unit::Km);
        let ranked = sort_by_distance(points, &expr, |p| p.1);
        let names: Vec<&str> = ranked.iter().map(|(p, _)| p.0).collect();
        assert_eq!(names, vec!["bibersfeld", "munich", "berlin", "nowhere"]);
        assert!(ranked[0].1.unwrap() < ranked[1].1.unwrap());
        assert!(ranked[3].1.is_none());
    }

    #[test]
    fn test_within_radius() {
        let points = vec![BERLIN, MUNICH, BIBERSFELD];
        let expr = build_distance_expression(MUNICH, Unit::Km);
        let near = within_radius(points, &expr, 300.0, |c| Some(*c));
        assert_eq!(near.len(), 2);
        assert_eq!(near[0].0, MUNICH);
        assert_eq!(near[0].1, 0.0);
        assert_eq!(near[1].0, BIBERSFELD);
    }
}
