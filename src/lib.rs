//! Address geocoding with policy-driven result selection, plus
//! great-circle distance expressions for ranking records by proximity.

pub mod distance;
pub mod geocode;
pub mod server;
