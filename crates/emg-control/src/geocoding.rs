use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use specta::Type;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const USER_AGENT: &str = "HMQ-EMG-App/1.0";
pub const MIN_QUERY_LEN: usize = 3;
const COUNTRY_CODES: &str = "ch";
const RESULT_LIMIT: &str = "5";

/// One place as returned by Nominatim with `addressdetails=1`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NominatimPlace {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub lon: String,
    #[serde(default)]
    pub address: NominatimAddress,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NominatimAddress {
    pub road: Option<String>,
    pub house_number: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub town: Option<String>,
    pub village: Option<String>,
    pub municipality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, Type)]
pub struct ParsedAddress {
    pub display_name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl From<&NominatimPlace> for ParsedAddress {
    fn from(place: &NominatimPlace) -> Self {
        let a = &place.address;
        let street = match (&a.road, &a.house_number) {
            (Some(road), Some(nr)) => Some(format!("{road} {nr}")),
            (Some(road), None) => Some(road.clone()),
            _ => None,
        };
        let city = a
            .city
            .clone()
            .or_else(|| a.town.clone())
            .or_else(|| a.village.clone())
            .or_else(|| a.municipality.clone());

        ParsedAddress {
            display_name: place.display_name.clone(),
            street,
            postal_code: a.postcode.clone(),
            city,
            lat: place.lat.trim().parse().ok(),
            lng: place.lon.trim().parse().ok(),
        }
    }
}

/// Outbound side of the geocoder.
#[async_trait::async_trait]
pub trait GeocodeTransport: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<NominatimPlace>>;
    async fn reverse(&self, lat: f64, lng: f64) -> anyhow::Result<Option<NominatimPlace>>;
}

pub struct NominatimTransport {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimTransport {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("build geocoding http client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl GeocodeTransport for NominatimTransport {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<NominatimPlace>> {
        let url = format!("{}/search", self.base_url);
        let places = self
            .client
            .get(url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("addressdetails", "1"),
                ("countrycodes", COUNTRY_CODES),
                ("limit", RESULT_LIMIT),
            ])
            .send()
            .await
            .context("nominatim search request")?
            .error_for_status()?
            .json::<Vec<NominatimPlace>>()
            .await
            .context("parse nominatim search JSON")?;
        Ok(places)
    }

    async fn reverse(&self, lat: f64, lng: f64) -> anyhow::Result<Option<NominatimPlace>> {
        let url = format!("{}/reverse", self.base_url);
        let (lat, lon) = (lat.to_string(), lng.to_string());
        let body: serde_json::Value = self
            .client
            .get(url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "json"),
                ("addressdetails", "1"),
            ])
            .send()
            .await
            .context("nominatim reverse request")?
            .error_for_status()?
            .json()
            .await
            .context("parse nominatim reverse JSON")?;

        // Nominatim answers `{"error": "Unable to geocode"}` with status 200.
        if body.get("error").is_some() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(body)?))
    }
}

struct CacheEntry {
    fetched_at: Instant,
    places: Vec<NominatimPlace>,
}

/// Geocoder with an in-memory TTL cache in front of the transport.
///
/// Failures are logged and reported as "no result"; they are never cached.
pub struct GeocodingService<T> {
    transport: T,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

pub fn search_cache_key(query: &str) -> String {
    query.trim().to_lowercase()
}

pub fn reverse_cache_key(lat: f64, lng: f64) -> String {
    format!("reverse:{lat},{lng}")
}

impl<T: GeocodeTransport> GeocodingService<T> {
    pub fn new(transport: T, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn cached(&self, key: &str) -> Option<Vec<NominatimPlace>> {
        let g = self.cache.read().await;
        g.get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.places.clone())
    }

    async fn store(&self, key: String, places: Vec<NominatimPlace>) {
        let mut g = self.cache.write().await;
        let ttl = self.ttl;
        g.retain(|_, e| e.fetched_at.elapsed() < ttl);
        g.insert(
            key,
            CacheEntry {
                fetched_at: Instant::now(),
                places,
            },
        );
    }

    pub async fn search(&self, query: &str) -> Vec<ParsedAddress> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Vec::new();
        }

        let key = search_cache_key(query);
        if let Some(places) = self.cached(&key).await {
            return places.iter().map(ParsedAddress::from).collect();
        }

        match self.transport.search(query).await {
            Ok(places) => {
                let out = places.iter().map(ParsedAddress::from).collect();
                self.store(key, places).await;
                out
            }
            Err(err) => {
                tracing::warn!(error = %err, query, "geocoding search failed");
                Vec::new()
            }
        }
    }

    pub async fn reverse(&self, lat: f64, lng: f64) -> Option<ParsedAddress> {
        let key = reverse_cache_key(lat, lng);
        if let Some(places) = self.cached(&key).await {
            return places.first().map(ParsedAddress::from);
        }

        match self.transport.reverse(lat, lng).await {
            Ok(place) => {
                let out = place.as_ref().map(ParsedAddress::from);
                self.store(key, place.into_iter().collect()).await;
                out
            }
            Err(err) => {
                tracing::warn!(error = %err, lat, lng, "reverse geocoding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        searches: AtomicUsize,
        reverses: AtomicUsize,
        fail: bool,
    }

    fn bern() -> NominatimPlace {
        NominatimPlace {
            display_name: "Bundesplatz 3, 3005 Bern".to_string(),
            lat: "46.9466".to_string(),
            lon: "7.4441".to_string(),
            address: NominatimAddress {
                road: Some("Bundesplatz".to_string()),
                house_number: Some("3".to_string()),
                postcode: Some("3005".to_string()),
                city: Some("Bern".to_string()),
                ..Default::default()
            },
        }
    }

    #[async_trait::async_trait]
    impl GeocodeTransport for CountingTransport {
        async fn search(&self, _query: &str) -> anyhow::Result<Vec<NominatimPlace>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("upstream down");
            }
            Ok(vec![bern()])
        }

        async fn reverse(&self, _lat: f64, _lng: f64) -> anyhow::Result<Option<NominatimPlace>> {
            self.reverses.fetch_add(1, Ordering::SeqCst);
            Ok(Some(bern()))
        }
    }

    fn service(fail: bool) -> GeocodingService<CountingTransport> {
        GeocodingService::new(
            CountingTransport {
                fail,
                ..Default::default()
            },
            Duration::from_secs(3600),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn identical_queries_hit_the_cache_until_expiry() {
        let svc = service(false);

        let first = svc.search("Bundesplatz 3").await;
        let second = svc.search("  bundesplatz 3 ").await;
        assert_eq!(first, second);
        assert_eq!(svc.transport.searches.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(3601)).await;
        svc.search("Bundesplatz 3").await;
        assert_eq!(svc.transport.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn short_queries_do_not_call_out() {
        let svc = service(false);
        assert!(svc.search("Be").await.is_empty());
        assert!(svc.search("   ").await.is_empty());
        assert_eq!(svc.transport.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_yield_nothing_and_are_not_cached() {
        let svc = service(true);
        assert!(svc.search("Zürich").await.is_empty());
        assert!(svc.search("Zürich").await.is_empty());
        assert_eq!(svc.transport.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reverse_results_are_cached_per_coordinate() {
        let svc = service(false);
        let got = svc.reverse(46.9466, 7.4441).await;
        svc.reverse(46.9466, 7.4441).await;
        svc.reverse(47.0, 8.0).await;

        assert_eq!(got.and_then(|a| a.city), Some("Bern".to_string()));
        assert_eq!(svc.transport.reverses.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parses_street_and_falls_back_through_locality_fields() {
        let mut place = bern();
        place.address.city = None;
        place.address.village = Some("Ittigen".to_string());
        place.address.house_number = None;

        let parsed = ParsedAddress::from(&place);
        assert_eq!(parsed.street.as_deref(), Some("Bundesplatz"));
        assert_eq!(parsed.city.as_deref(), Some("Ittigen"));
        assert_eq!(parsed.postal_code.as_deref(), Some("3005"));
        assert_eq!(parsed.lat, Some(46.9466));
    }

    #[test]
    fn unparseable_coordinates_become_none() {
        let parsed = ParsedAddress::from(&NominatimPlace::default());
        assert_eq!(parsed.lat, None);
        assert_eq!(parsed.street, None);
    }
}
