use std::sync::Arc;

use emg_db::sea_orm::DatabaseConnection;

use crate::config::ControlConfig;
use crate::geocoding::{GeocodingService, NominatimTransport};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<ControlConfig>,
    pub geocoding: Arc<GeocodingService<NominatimTransport>>,
}
