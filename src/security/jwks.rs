//! Signing-key cache for the trusted issuer.
//!
//! This is the only shared mutable state on the request path. Readers take a
//! lock-free snapshot through [`ArcSwap`]. Refreshes are single-flight: one
//! caller fetches while concurrent callers block on a condition variable and
//! reuse its result. The refresh lock is never held across the fetch itself.
//!
//! Every completed refresh attempt bumps the snapshot `epoch`, success or
//! failure. A caller that observed epoch `n` and missed a key only triggers a
//! fetch if nothing newer than `n` has completed in the meantime, so a burst of
//! requests carrying a freshly rotated `kid` produces exactly one fetch.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::KeyFetchError;

/// A verification key plus the algorithm it was published for (if any).
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub algorithm: Option<Algorithm>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Keys indexed by `kid`.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
}

impl KeySet {
    /// Parse a JWKS document.
    ///
    /// Supports `oct` (HS*), `RSA` (RS*) and `EC` (ES256/ES384) keys. Entries
    /// without a `kid`, with an unsupported type, or with unusable material are
    /// skipped. A document that yields no keys at all is an error.
    pub fn from_jwks_json(body: &str) -> Result<Self, KeyFetchError> {
        let parsed: Value =
            serde_json::from_str(body).map_err(|e| KeyFetchError::Parse(e.to_string()))?;
        let entries = parsed
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| KeyFetchError::Parse("missing 'keys' array".to_string()))?;

        let mut keys = HashMap::new();
        for entry in entries {
            let kid = match entry.get("kid").and_then(Value::as_str) {
                Some(k) if !k.is_empty() => k,
                _ => continue,
            };
            if entry.get("use").and_then(Value::as_str).is_some_and(|u| u != "sig") {
                continue;
            }
            match parse_jwk(entry) {
                Some(key) => {
                    keys.insert(kid.to_string(), Arc::new(key));
                }
                None => debug!(kid = %kid, "Skipping unsupported JWK"),
            }
        }
        if keys.is_empty() {
            return Err(KeyFetchError::Empty);
        }
        Ok(Self { keys })
    }

    /// Build a key set directly (useful when keys come from configuration).
    #[must_use]
    pub fn from_keys(keys: impl IntoIterator<Item = (String, VerificationKey)>) -> Self {
        Self {
            keys: keys.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn parse_jwk(entry: &Value) -> Option<VerificationKey> {
    let kty = entry.get("kty").and_then(Value::as_str)?;
    let algorithm = entry
        .get("alg")
        .and_then(Value::as_str)
        .and_then(|a| Algorithm::from_str(a).ok());
    let field = |name: &str| entry.get(name).and_then(Value::as_str);

    let key = if kty.eq_ignore_ascii_case("oct") {
        let secret = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(field("k")?)
            .ok()?;
        DecodingKey::from_secret(&secret)
    } else if kty.eq_ignore_ascii_case("RSA") {
        DecodingKey::from_rsa_components(field("n")?, field("e")?).ok()?
    } else if kty.eq_ignore_ascii_case("EC") {
        DecodingKey::from_ec_components(field("x")?, field("y")?).ok()?
    } else {
        return None;
    };

    // An advertised alg must belong to the key type.
    if let Some(alg) = algorithm {
        let family_ok = match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => kty.eq_ignore_ascii_case("oct"),
            Algorithm::ES256 | Algorithm::ES384 => kty.eq_ignore_ascii_case("EC"),
            Algorithm::EdDSA => false,
            _ => kty.eq_ignore_ascii_case("RSA"),
        };
        if !family_ok {
            return None;
        }
    }
    Some(VerificationKey { key, algorithm })
}

/// Where key sets come from.
pub trait KeySource: Send + Sync {
    /// Fetch the current key set. Must be bounded in time.
    fn fetch(&self) -> Result<KeySet, KeyFetchError>;

    /// Human-readable location for logs.
    fn describe(&self) -> &str;
}

/// Fetches a JWKS document over HTTP with a bounded timeout.
pub struct HttpKeySource {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeyFetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| KeyFetchError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl KeySource for HttpKeySource {
    fn fetch(&self) -> Result<KeySet, KeyFetchError> {
        let response = self
            .client
            .get(&self.url)
            .header("accept", "application/json")
            .send()
            .map_err(|e| KeyFetchError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(KeyFetchError::Status(status.as_u16()));
        }
        let body = response
            .text()
            .map_err(|e| KeyFetchError::Transport(e.to_string()))?;
        KeySet::from_jwks_json(&body)
    }

    fn describe(&self) -> &str {
        &self.url
    }
}

/// Refresh tuning.
#[derive(Debug, Clone, Copy)]
pub struct KeyCacheConfig {
    /// Age after which the key set is refreshed on next use
    pub ttl: Duration,
    /// Minimum spacing between refresh attempts
    pub min_refresh_interval: Duration,
    /// How long a caller waits for someone else's in-flight refresh
    pub wait_timeout: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            min_refresh_interval: Duration::from_secs(1),
            wait_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    keys: Arc<KeySet>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
    epoch: u64,
}

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
}

/// Clears the in-flight flag and wakes waiters, also when the fetch unwinds.
struct InFlight<'a> {
    cache: &'a KeyCache,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.cache.refresh.lock().in_flight = false;
        self.cache.refreshed.notify_all();
    }
}

/// Point-in-time counters, mostly for tests and the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCacheStats {
    pub keys: usize,
    pub fetches: u64,
    pub failures: u64,
    pub epoch: u64,
}

/// Shared, coalescing cache of verification keys.
pub struct KeyCache {
    source: Box<dyn KeySource>,
    config: KeyCacheConfig,
    snapshot: ArcSwap<Snapshot>,
    refresh: Mutex<RefreshState>,
    refreshed: Condvar,
    fetches: AtomicU64,
    failures: AtomicU64,
}

impl KeyCache {
    pub fn new(source: impl KeySource + 'static, config: KeyCacheConfig) -> Self {
        Self {
            source: Box::new(source),
            config,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            refresh: Mutex::new(RefreshState::default()),
            refreshed: Condvar::new(),
            fetches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Initial fetch at startup. Failure is reported but the cache stays
    /// usable; the next lookup tries again.
    pub fn prime(&self) -> Result<usize, KeyFetchError> {
        let seen = self.snapshot.load().epoch;
        self.refresh_after(seen, true)?;
        Ok(self.snapshot.load().keys.len())
    }

    /// Look up a key, refreshing first if the cached set is older than the TTL.
    ///
    /// Does not force a refresh for an unknown `kid`; see
    /// [`lookup_or_refresh`](Self::lookup_or_refresh).
    pub fn lookup(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        let snapshot = self.snapshot.load();
        if self.is_stale(&snapshot) && self.may_attempt(&snapshot) {
            // A failed refresh keeps serving the old keys.
            if let Err(e) = self.refresh_after(snapshot.epoch, false) {
                debug!(error = %e, "TTL refresh of signing keys failed");
            }
        }
        self.snapshot.load().keys.get(kid)
    }

    /// Look up a key; on a miss, perform at most one coalesced refresh and
    /// look again.
    pub fn lookup_or_refresh(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        let seen = self.snapshot.load().epoch;
        if let Some(key) = self.lookup(kid) {
            return Some(key);
        }
        if let Err(e) = self.refresh_after(seen, true) {
            debug!(kid = %kid, error = %e, "Key refresh for unknown kid did not complete");
        }
        self.snapshot.load().keys.get(kid)
    }

    /// Coalesced refresh.
    ///
    /// `seen` is the epoch the caller observed when it decided a refresh was
    /// needed. If a newer attempt has already completed, nothing is fetched.
    /// With `wait`, a caller that finds a refresh in flight blocks until it
    /// completes; without it, the caller returns immediately.
    fn refresh_after(&self, seen: u64, wait: bool) -> Result<(), KeyFetchError> {
        let mut state = self.refresh.lock();
        if self.snapshot.load().epoch > seen {
            return Ok(());
        }
        if state.in_flight {
            if !wait {
                return Ok(());
            }
            let deadline = Instant::now() + self.config.wait_timeout;
            while state.in_flight {
                if self.refreshed.wait_until(&mut state, deadline).timed_out() {
                    return Err(KeyFetchError::WaitTimeout);
                }
            }
            return Ok(());
        }
        if !self.may_attempt(&self.snapshot.load()) {
            return Err(KeyFetchError::Throttled);
        }
        state.in_flight = true;
        drop(state);
        let _in_flight = InFlight { cache: self };

        let started = Instant::now();
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let result = self.source.fetch();
        let elapsed = started.elapsed();

        let current = self.snapshot.load_full();
        let now = Instant::now();
        let (next, outcome) = match result {
            Ok(keys) => {
                info!(
                    source = %self.source.describe(),
                    keys = keys.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Refreshed signing keys"
                );
                (
                    Snapshot {
                        keys: Arc::new(keys),
                        fetched_at: Some(now),
                        attempted_at: Some(now),
                        epoch: current.epoch + 1,
                    },
                    Ok(()),
                )
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    cached_keys = current.keys.len(),
                    "Signing key refresh failed, keeping cached keys"
                );
                (
                    Snapshot {
                        keys: Arc::clone(&current.keys),
                        fetched_at: current.fetched_at,
                        attempted_at: Some(now),
                        epoch: current.epoch + 1,
                    },
                    Err(e),
                )
            }
        };

        self.snapshot.store(Arc::new(next));
        outcome
    }

    fn is_stale(&self, snapshot: &Snapshot) -> bool {
        match snapshot.fetched_at {
            Some(at) => at.elapsed() >= self.config.ttl,
            None => true,
        }
    }

    fn may_attempt(&self, snapshot: &Snapshot) -> bool {
        match snapshot.attempted_at {
            Some(at) => at.elapsed() >= self.config.min_refresh_interval,
            None => true,
        }
    }

    #[must_use]
    pub fn stats(&self) -> KeyCacheStats {
        let snapshot = self.snapshot.load();
        KeyCacheStats {
            keys: snapshot.keys.len(),
            fetches: self.fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            epoch: snapshot.epoch,
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        self.source.describe()
    }
}
