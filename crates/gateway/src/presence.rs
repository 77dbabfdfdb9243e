// Presence and nearby-user helpers built on the store's tab-session and
// location inputs.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::ChatStore;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const NEARBY_RADIUS_KM: f64 = 10.0;
/// Trailing window in which either presence signal counts as "online".
pub const PRESENCE_WINDOW_MINUTES: i64 = 5;

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// A user is online iff either signal fired within the trailing window: an
/// active tab session, or a fresh location fix. The two signals are a union,
/// not a hierarchy.
pub async fn is_online(store: &ChatStore, username: &str, now: DateTime<Utc>) -> bool {
    let window = Duration::minutes(PRESENCE_WINDOW_MINUTES);

    let tab_recent = match store.last_tab_activity(username).await {
        Ok(Some(at)) => now.signed_duration_since(at) <= window,
        _ => false,
    };
    if tab_recent {
        return true;
    }

    match store.latest_location(username).await {
        Ok(Some(fix)) => now.signed_duration_since(fix.recorded_at) <= window,
        _ => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyUser {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub is_online: bool,
}

/// Users whose latest fix lies within [`NEARBY_RADIUS_KM`] of the caller's,
/// nearest first. A caller with no location of their own sees nobody.
pub async fn nearby_users(store: &ChatStore, username: &str) -> anyhow::Result<Vec<NearbyUser>> {
    let Some(origin) = store.latest_location(username).await? else {
        return Ok(Vec::new());
    };

    let now = Utc::now();
    let mut nearby = Vec::new();
    for fix in store.latest_locations().await? {
        if fix.username == username {
            continue;
        }
        let distance_km =
            haversine_km(origin.latitude, origin.longitude, fix.latitude, fix.longitude);
        if distance_km <= NEARBY_RADIUS_KM {
            let online = is_online(store, &fix.username, now).await;
            nearby.push(NearbyUser {
                username: fix.username,
                latitude: fix.latitude,
                longitude: fix.longitude,
                distance_km,
                is_online: online,
            });
        }
    }

    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    Ok(nearby)
}
