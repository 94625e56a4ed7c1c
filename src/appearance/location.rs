//! Best-effort geographic location for the stamp, cached per process.

use crate::Error;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const IPINFO_URL: &str = "https://ipinfo.io/json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const RETRY_AFTER: Duration = Duration::from_secs(60);

/// Where a fresh location string comes from.
pub trait LocationSource: Send + Sync {
    fn fetch(&self) -> Result<String, Error>;
}

/// What the renderer asks for. `None` means no location is known.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
}

pub struct IpInfoSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl IpInfoSource {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pdf-signing/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Error::Other(format!("HTTP client build failed: {}", err)))?;
        Ok(IpInfoSource {
            client,
            url: IPINFO_URL.to_owned(),
        })
    }
}

impl LocationSource for IpInfoSource {
    fn fetch(&self) -> Result<String, Error> {
        let info: IpInfo = self
            .client
            .get(&self.url)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|err| Error::Other(format!("Location lookup failed: {}", err)))?;
        let parts = [info.city, info.region, info.country]
            .into_iter()
            .flatten()
            .map(|part| part.trim().to_owned())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        if parts.is_empty() {
            return Err(Error::Other("Location lookup returned no place".to_owned()));
        }
        Ok(parts.join(", "))
    }
}

#[derive(Debug, Default)]
struct CacheState {
    value: Option<String>,
    fetched_at: Option<Instant>,
    failed_at: Option<Instant>,
}

/// Serves the cached value while it is fresh, refreshes it at most once per
/// TTL and keeps the last good value when a refresh fails.
pub struct LocationCache<S> {
    source: S,
    ttl: Duration,
    retry_after: Duration,
    state: RwLock<CacheState>,
}

impl<S: LocationSource> LocationCache<S> {
    pub fn new(source: S) -> Self {
        Self::with_timing(source, CACHE_TTL, RETRY_AFTER)
    }

    pub fn with_timing(source: S, ttl: Duration, retry_after: Duration) -> Self {
        LocationCache {
            source,
            ttl,
            retry_after,
            state: RwLock::new(CacheState::default()),
        }
    }

    fn is_settled(&self, state: &CacheState, now: Instant) -> bool {
        let fresh = state
            .fetched_at
            .map_or(false, |at| now.duration_since(at) < self.ttl);
        let backing_off = state
            .failed_at
            .map_or(false, |at| now.duration_since(at) < self.retry_after);
        fresh || backing_off
    }
}

impl<S: LocationSource> LocationProvider for LocationCache<S> {
    fn current_location(&self) -> Option<String> {
        {
            let state = self.state.read();
            if self.is_settled(&state, Instant::now()) {
                return state.value.clone();
            }
        }
        let mut state = self.state.write();
        // Another caller may have refreshed while we waited for the lock.
        if self.is_settled(&state, Instant::now()) {
            return state.value.clone();
        }
        match self.source.fetch() {
            Ok(value) => {
                log::debug!("Location resolved to `{}`.", value);
                state.value = Some(value);
                state.fetched_at = Some(Instant::now());
                state.failed_at = None;
            }
            Err(err) => {
                log::warn!("{}", err);
                state.failed_at = Some(Instant::now());
            }
        }
        state.value.clone()
    }
}

static SHARED: OnceCell<Arc<LocationCache<IpInfoSource>>> = OnceCell::new();

/// The process-wide ipinfo.io cache.
pub fn shared_provider() -> Result<Arc<dyn LocationProvider>, Error> {
    let cache = SHARED
        .get_or_try_init(|| IpInfoSource::new().map(|source| Arc::new(LocationCache::new(source))))?;
    let provider: Arc<dyn LocationProvider> = cache.clone();
    Ok(provider)
}
