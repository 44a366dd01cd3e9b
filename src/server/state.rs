use crate::geocode::EntityGeocoder;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub geocoder: Arc<EntityGeocoder>,
    /// Upper bound on one provider round trip before it counts as canceled.
    pub provider_timeout: Duration,
}
