//! Network weight store
//!
//! Resolves a network id to a verified local weight file, downloading it
//! from the distribution endpoint on first use.
//!
//! Downloads stream into a `.part` file next to the final location while
//! hashing, and are renamed into place only after the integrity check. Per-id
//! `OnceCell`s make concurrent resolves of one id share a single fetch.
//!
//! With `max_cached_networks` set, each download removes the oldest other
//! weight files beyond the limit. Networks held through a [`WeightLease`]
//! are never removed.

use crate::error::ErrorKind;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default distribution endpoint
pub const DEFAULT_WEIGHTS_URL_TEMPLATE: &str = "https://training.lczero.org/get_network?sha={network_id}";

/// Placeholder replaced by the network id in the URL template
pub const NETWORK_ID_PLACEHOLDER: &str = "{network_id}";

const USER_AGENT: &str = concat!("nncrawl/", env!("CARGO_PKG_VERSION"));

/// Weight store errors
#[derive(Debug, Error)]
pub enum WeightError {
    /// Endpoint unreachable, non-success status or broken body stream
    #[error("Download of network {network_id} failed: {reason}")]
    Download { network_id: String, reason: String },

    /// Empty payload or checksum mismatch
    #[error("Integrity check failed for network {network_id}: {reason}")]
    Integrity { network_id: String, reason: String },

    /// Local cache failure
    #[error("Weight cache I/O error for network {network_id}: {source}")]
    Io {
        network_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl WeightError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeightError::Integrity { .. } => ErrorKind::IntegrityError,
            WeightError::Download { .. } | WeightError::Io { .. } | WeightError::Client(_) => {
                ErrorKind::DownloadError
            }
        }
    }

    fn download(network_id: &str, reason: impl Into<String>) -> Self {
        WeightError::Download {
            network_id: network_id.to_string(),
            reason: reason.into(),
        }
    }

    fn integrity(network_id: &str, reason: impl Into<String>) -> Self {
        WeightError::Integrity {
            network_id: network_id.to_string(),
            reason: reason.into(),
        }
    }

    fn io(network_id: &str, source: std::io::Error) -> Self {
        WeightError::Io {
            network_id: network_id.to_string(),
            source,
        }
    }
}

/// A verified weight file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWeights {
    pub path: PathBuf,
    /// SHA-256 of the file, lowercase hex
    pub checksum: String,
    /// Whether this resolve fetched the file; false for cache hits and for
    /// resolves served by another caller's fetch
    pub downloaded: bool,
}

/// Weight store settings
#[derive(Debug, Clone)]
pub struct WeightStoreConfig {
    pub cache_dir: PathBuf,
    pub url_template: String,
    pub download_timeout: Duration,
    /// Weight files kept after a download; `None` keeps all
    pub max_cached_networks: Option<usize>,
}

impl WeightStoreConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            url_template: DEFAULT_WEIGHTS_URL_TEMPLATE.to_string(),
            download_timeout: Duration::from_secs(600),
            max_cached_networks: None,
        }
    }

    pub fn with_max_cached_networks(mut self, limit: Option<usize>) -> Self {
        self.max_cached_networks = limit;
        self
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }
}

/// Local cache of network weight files
pub struct WeightStore {
    config: WeightStoreConfig,
    client: reqwest::Client,
    cells: Mutex<HashMap<String, Arc<OnceCell<ResolvedWeights>>>>,
    /// Live lease count per network id
    leases: Mutex<HashMap<String, usize>>,
}

impl WeightStore {
    pub fn new(config: WeightStoreConfig) -> Result<Self, WeightError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.download_timeout)
            .build()
            .map_err(|e| WeightError::Client(e.to_string()))?;

        Ok(Self {
            config,
            client,
            cells: Mutex::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Cache location for `network_id` (may not exist yet)
    pub fn cache_path(&self, network_id: &str) -> PathBuf {
        self.config.cache_dir.join(cache_file_name(network_id))
    }

    /// Download URL for `network_id`
    pub fn url_for(&self, network_id: &str) -> String {
        self.config.url_template.replace(NETWORK_ID_PLACEHOLDER, network_id)
    }

    /// Local path of the verified weights for `network_id`
    pub async fn resolve(&self, network_id: &str) -> Result<PathBuf, WeightError> {
        Ok(self.resolve_with_checksum(network_id, None).await?.path)
    }

    /// Resolve, verifying against `expected_checksum` when one is known
    pub async fn resolve_with_checksum(
        &self,
        network_id: &str,
        expected_checksum: Option<&str>,
    ) -> Result<ResolvedWeights, WeightError> {
        let expected = expected_checksum.map(|c| c.trim().to_ascii_lowercase());
        let cell = self.cell_for(network_id);

        let mut initialized_here = false;
        let resolved = cell
            .get_or_try_init(|| {
                initialized_here = true;
                self.load_or_fetch(network_id, expected.as_deref())
            })
            .await?;

        // Cell may have been filled by a caller that knew no checksum
        if let Some(expected) = expected.as_deref() {
            if resolved.checksum != expected {
                return Err(WeightError::integrity(
                    network_id,
                    format!("checksum {} does not match expected {}", resolved.checksum, expected),
                ));
            }
        }

        Ok(ResolvedWeights {
            downloaded: initialized_here && resolved.downloaded,
            ..resolved.clone()
        })
    }

    /// Resolve and keep `network_id` out of cache eviction until the lease drops
    pub async fn lease(
        self: &Arc<Self>,
        network_id: &str,
        expected_checksum: Option<&str>,
    ) -> Result<WeightLease, WeightError> {
        // Held before resolving so a concurrent download cannot evict the file mid-resolve
        let pin = LeasePin::acquire(Arc::clone(self), network_id);
        let weights = self.resolve_with_checksum(network_id, expected_checksum).await?;
        Ok(WeightLease { weights, pin })
    }

    fn cell_for(&self, network_id: &str) -> Arc<OnceCell<ResolvedWeights>> {
        let mut cells = self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cells.entry(network_id.to_string()).or_default().clone()
    }

    fn leased_file_names(&self) -> HashSet<String> {
        let leases = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        leases.keys().map(|id| cache_file_name(id)).collect()
    }

    /// Drop resolved state for whichever network id maps to `file_name`
    fn forget_file(&self, file_name: &str) {
        let mut cells = self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cells.retain(|id, _| cache_file_name(id) != file_name);
    }

    /// Remove the oldest unleased weight files until at most
    /// `max_cached_networks` remain; `keep_id` is never removed
    ///
    /// Failures are logged and leave the file in place.
    async fn evict_beyond_limit(&self, keep_id: &str) {
        let Some(limit) = self.config.max_cached_networks else {
            return;
        };

        let mut files = match cached_files(&self.config.cache_dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, cache_dir = %self.config.cache_dir.display(), "Cannot list weight cache");
                return;
            }
        };
        if files.len() <= limit {
            return;
        }

        let mut protected = self.leased_file_names();
        protected.insert(cache_file_name(keep_id));

        // Oldest first
        files.sort();
        let mut excess = files.len() - limit;
        for (_, name) in files {
            if excess == 0 {
                break;
            }
            if protected.contains(&name) {
                continue;
            }

            let path = self.config.cache_dir.join(&name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!(file = %name, limit, "Evicted cached weights");
                    self.forget_file(&name);
                    excess -= 1;
                }
                Err(e) => warn!(file = %name, error = %e, "Failed to evict cached weights"),
            }
        }

        if excess > 0 {
            debug!(excess, limit, "Weight cache above limit, remaining files are leased");
        }
    }

    async fn load_or_fetch(
        &self,
        network_id: &str,
        expected: Option<&str>,
    ) -> Result<ResolvedWeights, WeightError> {
        let path = self.cache_path(network_id);

        if tokio::fs::try_exists(&path).await.map_err(|e| WeightError::io(network_id, e))? {
            match verify_cached(network_id, &path, expected).await? {
                Some(checksum) => {
                    debug!(network_id, path = %path.display(), "Using cached weights");
                    return Ok(ResolvedWeights {
                        path,
                        checksum,
                        downloaded: false,
                    });
                }
                None => {
                    warn!(network_id, path = %path.display(), "Cached weights failed verification, removing");
                    tokio::fs::remove_file(&path)
                        .await
                        .map_err(|e| WeightError::io(network_id, e))?;
                }
            }
        }

        let checksum = self.download(network_id, &path, expected).await?;
        self.evict_beyond_limit(network_id).await;
        Ok(ResolvedWeights {
            path,
            checksum,
            downloaded: true,
        })
    }

    async fn download(
        &self,
        network_id: &str,
        path: &Path,
        expected: Option<&str>,
    ) -> Result<String, WeightError> {
        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .map_err(|e| WeightError::io(network_id, e))?;

        let part_path = part_path(path);
        let url = self.url_for(network_id);
        info!(network_id, url = %url, "Downloading network weights");

        let result = self.stream_to_file(network_id, &url, &part_path).await;
        let (size, checksum) = match result {
            Ok(done) => done,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        let integrity = if size == 0 {
            Some("empty payload".to_string())
        } else {
            expected
                .filter(|expected| *expected != checksum)
                .map(|expected| format!("checksum {} does not match expected {}", checksum, expected))
        };
        if let Some(reason) = integrity {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(WeightError::integrity(network_id, reason));
        }

        if let Err(e) = tokio::fs::rename(&part_path, path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(WeightError::io(network_id, e));
        }

        info!(network_id, bytes = size, checksum = %checksum, "Downloaded network weights");
        Ok(checksum)
    }

    /// Write the response body to `part_path`, returning (size, sha256 hex)
    async fn stream_to_file(
        &self,
        network_id: &str,
        url: &str,
        part_path: &Path,
    ) -> Result<(u64, String), WeightError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WeightError::download(network_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeightError::download(network_id, format!("HTTP {}", status)));
        }

        let mut file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| WeightError::io(network_id, e))?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| WeightError::download(network_id, e.to_string()))?
        {
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| WeightError::io(network_id, e))?;
        }

        file.flush().await.map_err(|e| WeightError::io(network_id, e))?;
        file.sync_all().await.map_err(|e| WeightError::io(network_id, e))?;

        Ok((size, format!("{:x}", hasher.finalize())))
    }
}

/// Verified weights held out of cache eviction; released on drop
pub struct WeightLease {
    weights: ResolvedWeights,
    pin: LeasePin,
}

impl WeightLease {
    pub fn network_id(&self) -> &str {
        &self.pin.network_id
    }
}

impl Deref for WeightLease {
    type Target = ResolvedWeights;

    fn deref(&self) -> &ResolvedWeights {
        &self.weights
    }
}

impl fmt::Debug for WeightLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightLease")
            .field("network_id", &self.pin.network_id)
            .field("weights", &self.weights)
            .finish()
    }
}

struct LeasePin {
    store: Arc<WeightStore>,
    network_id: String,
}

impl LeasePin {
    fn acquire(store: Arc<WeightStore>, network_id: &str) -> Self {
        {
            let mut leases = store.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *leases.entry(network_id.to_string()).or_insert(0) += 1;
        }
        Self {
            store,
            network_id: network_id.to_string(),
        }
    }
}

impl Drop for LeasePin {
    fn drop(&mut self) {
        let mut leases = self
            .store
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(count) = leases.get_mut(&self.network_id) {
            *count -= 1;
            if *count == 0 {
                leases.remove(&self.network_id);
            }
        }
    }
}

/// Weight files in `cache_dir` with their modification times
///
/// In-flight `.part` files are skipped.
async fn cached_files(cache_dir: &Path) -> std::io::Result<Vec<(SystemTime, String)>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(cache_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".part") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        files.push((metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH), name));
    }
    Ok(files)
}

/// Cache file name for a network id
///
/// Ids made only of `[A-Za-z0-9._-]` and not starting with `.` are used as
/// is; anything else maps to `net-<16 hex digits of sha256(id)>`.
pub fn cache_file_name(network_id: &str) -> String {
    let safe = !network_id.is_empty()
        && !network_id.starts_with('.')
        && network_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if safe {
        network_id.to_string()
    } else {
        let digest = format!("{:x}", Sha256::digest(network_id.as_bytes()));
        format!("net-{}", &digest[..16])
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    PathBuf::from(name)
}

/// Hash a cached file; `None` when it is empty or does not match `expected`
async fn verify_cached(
    network_id: &str,
    path: &Path,
    expected: Option<&str>,
) -> Result<Option<String>, WeightError> {
    let owned_path = path.to_path_buf();
    let hashed = tokio::task::spawn_blocking(move || -> std::io::Result<(u64, String)> {
        let mut file = std::fs::File::open(&owned_path)?;
        let mut hasher = Sha256::new();
        let size = std::io::copy(&mut file, &mut hasher)?;
        Ok((size, format!("{:x}", hasher.finalize())))
    })
    .await
    .map_err(|e| WeightError::io(network_id, std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let (size, checksum) = hashed.map_err(|e| WeightError::io(network_id, e))?;

    if size == 0 || expected.is_some_and(|expected| expected != checksum) {
        return Ok(None);
    }
    Ok(Some(checksum))
}
