use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::distance::{build_distance_expression, distance, sort_by_distance, SqlColumns};
use crate::geocode::{
    AccuracyLevel, Coordinate, EntityGeocoder, Fields, GeocodedEntity, GeocodingFailure,
    ProviderError, Unit,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

pub(super) struct ApiError {
    status: StatusCode,
    message: String,
    reason: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.message,
            code: self.status.as_u16(),
            reason: self.reason,
        };
        (self.status, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError {
        status,
        message: msg.into(),
        reason: None,
    }
}

impl From<GeocodingFailure> for ApiError {
    fn from(failure: GeocodingFailure) -> Self {
        ApiError {
            status: status_for(&failure),
            message: failure.user_message(),
            reason: Some(failure.code()),
        }
    }
}

fn status_for(failure: &GeocodingFailure) -> StatusCode {
    match failure {
        GeocodingFailure::Selection(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GeocodingFailure::Provider(ProviderError::Canceled) => StatusCode::GATEWAY_TIMEOUT,
        GeocodingFailure::Provider(_) => StatusCode::BAD_GATEWAY,
    }
}

// ─── GET /api/geocode ────────────────────────────────────────────

#[derive(Serialize)]
pub struct GeocodeResponse {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<AccuracyLevel>,
}

impl From<Option<GeocodedEntity>> for GeocodeResponse {
    fn from(geocoded: Option<GeocodedEntity>) -> Self {
        match geocoded {
            Some(g) => GeocodeResponse {
                skipped: false,
                lat: Some(g.coordinate.lat),
                lng: Some(g.coordinate.lng),
                formatted_address: Some(g.formatted_address),
                accuracy: Some(g.raw.accuracy),
            },
            None => GeocodeResponse {
                skipped: true,
                lat: None,
                lng: None,
                formatted_address: None,
                accuracy: None,
            },
        }
    }
}

/// Run the blocking provider call off the async runtime. A call that
/// outlives `timeout` is abandoned and reported as canceled.
pub(super) async fn geocode_with_timeout(
    geocoder: Arc<EntityGeocoder>,
    fields: Fields,
    timeout: Duration,
) -> Result<Option<GeocodedEntity>, GeocodingFailure> {
    let task = tokio::task::spawn_blocking(move || geocoder.geocode(&fields));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            log::error!("geocoding task failed: {}", e);
            Err(ProviderError::Network(format!("geocoding task failed: {}", e)).into())
        }
        Err(_) => {
            log::warn!("geocoding exceeded {:?}, canceled", timeout);
            Err(ProviderError::Canceled.into())
        }
    }
}

pub async fn geocode(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<GeocodeResponse>, ApiError> {
    let start = Instant::now();
    let fields: Fields = params.into_iter().collect();

    let geocoded =
        geocode_with_timeout(state.geocoder.clone(), fields, state.provider_timeout).await?;

    log::info!(
        "GET /api/geocode -> {} ({:.1}ms)",
        geocoded
            .as_ref()
            .map(|g| g.formatted_address.as_str())
            .unwrap_or("skipped"),
        start.elapsed().as_secs_f64() * 1000.0,
    );

    Ok(Json(geocoded.into()))
}

// ─── GET /api/distance ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct DistanceQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub unit: Option<String>,
}

#[derive(Serialize)]
pub struct DistanceResponse {
    pub distance: f64,
    pub unit: Unit,
}

fn parse_coordinate(param: &str, value: Option<&str>) -> Result<Coordinate, ApiError> {
    let value = value
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("Missing '{}' parameter", param)))?;
    value
        .parse()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid '{}': {}", param, e)))
}

fn parse_unit(value: Option<&str>, default: Unit) -> Result<Unit, ApiError> {
    match value {
        Some(u) => u.parse().map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e)),
        None => Ok(default),
    }
}

pub async fn distance_between(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DistanceQuery>,
) -> Result<Json<DistanceResponse>, ApiError> {
    let from = parse_coordinate("from", params.from.as_deref())?;
    let to = parse_coordinate("to", params.to.as_deref())?;
    let unit = parse_unit(params.unit.as_deref(), state.geocoder.policy().unit)?;

    Ok(Json(DistanceResponse {
        distance: distance(&from, &to, unit),
        unit,
    }))
}

// ─── POST /api/nearest ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct NamedPoint {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
pub struct NearestRequest {
    pub reference: Coordinate,
    pub unit: Option<Unit>,
    pub max_distance: Option<f64>,
    pub points: Vec<NamedPoint>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct NearestHit {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    /// `None` for points with invalid coordinates.
    pub distance: Option<f64>,
}

/// Rank points against the reference; with `max_distance`, only points
/// strictly inside the radius remain.
pub(super) fn rank_points(request: NearestRequest, default_unit: Unit) -> Vec<NearestHit> {
    let expr = build_distance_expression(request.reference, request.unit.unwrap_or(default_unit));

    let ranked = sort_by_distance(request.points, &expr, |p| Coordinate::new(p.lat, p.lng).ok());
    ranked
        .into_iter()
        .filter(|(_, d)| match (request.max_distance, d) {
            (Some(max), Some(d)) => *d < max,
            (Some(_), None) => false,
            (None, _) => true,
        })
        .map(|(p, d)| NearestHit {
            id: p.id,
            lat: p.lat,
            lng: p.lng,
            distance: d,
        })
        .collect()
}

pub async fn nearest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NearestRequest>,
) -> Result<Json<Vec<NearestHit>>, ApiError> {
    let hits = rank_points(request, state.geocoder.policy().unit);
    log::debug!("POST /api/nearest -> {} hits", hits.len());
    Ok(Json(hits))
}

// ─── GET /api/sql ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SqlQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub table: Option<String>,
    pub lat_column: Option<String>,
    pub lng_column: Option<String>,
    pub alias: Option<String>,
    pub unit: Option<String>,
}

pub async fn sql_projection(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SqlQuery>,
) -> Result<Response, ApiError> {
    let (Some(lat), Some(lng)) = (params.lat, params.lng) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Provide 'lat' and 'lng' parameters"));
    };
    let reference = Coordinate::new(lat, lng)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let unit = parse_unit(params.unit.as_deref(), state.geocoder.policy().unit)?;

    let mapping = &state.geocoder.policy().fields;
    let columns = SqlColumns {
        table: params.table,
        lat: params.lat_column.unwrap_or_else(|| mapping.lat.clone()),
        lng: params.lng_column.unwrap_or_else(|| mapping.lng.clone()),
    };
    let projection = build_distance_expression(reference, unit).projection();
    let sql = match params.alias {
        Some(alias) => projection.to_sql_field(&columns, &alias),
        None => projection.to_sql(&columns),
    };

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], sql).into_response())
}
