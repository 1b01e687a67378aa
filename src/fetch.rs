//! Resolution of dataset, checkpoint and reference audio locations.
//!
//! Accepted forms:
//! - plain filesystem paths,
//! - `http://` and `https://` URLs, downloaded once into a local cache,
//! - Hugging Face URIs, resolved through the hub cache:
//!   `hf://datasets/{org}/{name}/{file}`, `hf://spaces/{org}/{name}/{file}` and
//!   `hf://{org}/{repo}/{file}` (a model repo). A revision may follow the repo name,
//!   e.g. `hf://datasets/acme/dialogs@v2/test.parquet`.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Cache, Repo, RepoType};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid location '{0}'")]
    InvalidUri(String),

    #[error("local file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Hugging Face download of {uri} failed: {reason}")]
    Hub { uri: String, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Kind of Hugging Face repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubRepo {
    Model,
    Dataset,
    Space,
}

impl HubRepo {
    fn repo_type(self) -> RepoType {
        match self {
            HubRepo::Model => RepoType::Model,
            HubRepo::Dataset => RepoType::Dataset,
            HubRepo::Space => RepoType::Space,
        }
    }
}

/// One file inside a Hugging Face repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubFile {
    pub repo: HubRepo,
    pub repo_id: String,  // "{org}/{name}"
    pub revision: String, // Branch, tag or commit
    pub filename: String, // Path inside the repository
}

/// Where a location points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Http(String),
    Hub(HubFile),
}

impl Location {
    /// Classify a location string.
    pub fn parse(uri: &str) -> Result<Self, FetchError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(FetchError::InvalidUri(uri.to_string()));
        }
        if let Some(rest) = uri.strip_prefix("hf://") {
            return hub_file(rest).map(Location::Hub).ok_or_else(|| FetchError::InvalidUri(uri.to_string()));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(Location::Http(uri.to_string()));
        }
        Ok(Location::Local(PathBuf::from(uri)))
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Location::Local(_))
    }
}

/// Split the part after `hf://` into repository and file.
fn hub_file(rest: &str) -> Option<HubFile> {
    let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
    let (repo, parts) = match parts.first() {
        Some(&"datasets") => (HubRepo::Dataset, &parts[1..]),
        Some(&"spaces") => (HubRepo::Space, &parts[1..]),
        Some(&"models") => (HubRepo::Model, &parts[1..]),
        _ => (HubRepo::Model, &parts[..]),
    };
    // org, repo and at least one path segment
    if parts.len() < 3 {
        return None;
    }

    let (name, revision) = match parts[1].split_once('@') {
        Some((name, revision)) if !name.is_empty() && !revision.is_empty() => (name, revision),
        Some(_) => return None,
        None => (parts[1], "main"),
    };

    Some(HubFile { repo, repo_id: format!("{}/{}", parts[0], name), revision: revision.to_string(), filename: parts[2..].join("/") })
}

/// Cache locations used to resolve remote files.
#[derive(Debug, Clone)]
pub struct Caches {
    pub http: PathBuf, // Plain URL downloads
    pub hub: Cache,    // Hugging Face hub cache
}

impl Caches {
    /// `$DIALOG_TTS_CACHE` (else the platform cache dir) for URLs, the standard hub cache
    /// (`HF_HOME`) for `hf://` files.
    pub fn from_env() -> Self {
        Self { http: cache_dir(), hub: Cache::from_env() }
    }
}

/// Download cache directory for plain URLs: `$DIALOG_TTS_CACHE`, else the platform cache dir.
pub fn cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("DIALOG_TTS_CACHE") {
        return PathBuf::from(dir);
    }
    dirs::cache_dir().map(|d| d.join("dialog-tts")).unwrap_or_else(|| PathBuf::from(".cache").join("dialog-tts"))
}

/// Stable cache file name for a URL.
///
/// The scheme and query string are dropped and every character outside `[A-Za-z0-9._-]` becomes
/// `_`, so the file extension of the remote file survives.
pub fn cache_file_name(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let without_query = without_scheme.split(['?', '#']).next().unwrap_or(without_scheme);
    without_query.chars().map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' }).collect()
}

/// Resolve a location to a readable local file, downloading remote files when needed.
///
/// # Errors
/// Returns an error if a local file does not exist, the download fails, or the cache cannot be written.
pub async fn fetch(uri: &str) -> Result<PathBuf, FetchError> {
    fetch_with(uri, &Caches::from_env()).await
}

/// Same as [`fetch`] with explicit caches.
pub async fn fetch_with(uri: &str, caches: &Caches) -> Result<PathBuf, FetchError> {
    match Location::parse(uri)? {
        Location::Local(path) => {
            if path.exists() {
                Ok(path)
            } else {
                Err(FetchError::NotFound(path))
            }
        }
        Location::Http(url) => {
            let target = caches.http.join(cache_file_name(&url));
            if target.exists() {
                debug!("Using cached {}", target.display());
                return Ok(target);
            }
            download(&url, &target).await?;
            Ok(target)
        }
        Location::Hub(file) => {
            let cache = caches.hub.clone();
            let hub_error = |reason: String| FetchError::Hub { uri: uri.to_string(), reason };
            // hf-hub's client is blocking
            tokio::task::spawn_blocking(move || resolve_hub(&file, cache)).await.map_err(|e| hub_error(e.to_string()))?.map_err(hub_error)
        }
    }
}

/// Resolve a hub file through the hub cache, downloading it when the cached revision lacks it.
fn resolve_hub(file: &HubFile, cache: Cache) -> Result<PathBuf, String> {
    let mut builder = ApiBuilder::from_cache(cache);
    if let Ok(endpoint) = std::env::var("HF_ENDPOINT") {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(token) = hf_token() {
        builder = builder.with_token(Some(token));
    }
    let api = builder.build().map_err(|e| e.to_string())?;

    debug!("Resolving {} from {}@{}", file.filename, file.repo_id, file.revision);
    let repo = Repo::with_revision(file.repo_id.clone(), file.repo.repo_type(), file.revision.clone());
    api.repo(repo).get(&file.filename).map_err(|e| e.to_string())
}

fn hf_token() -> Option<String> {
    std::env::var("HUGGINGFACE_HUB_TOKEN").ok().or_else(|| std::env::var("HF_TOKEN").ok()).or_else(|| std::env::var("HUGGINGFACE_TOKEN").ok())
}

/// Stream a URL into `target` through a sibling `.part` file, so interrupted downloads are never reused.
async fn download(url: &str, target: &Path) -> Result<(), FetchError> {
    info!("⬇️  Downloading {}", url);

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|source| FetchError::Io { path: parent.to_path_buf(), source })?;
    }

    let request_error = |source: reqwest::Error| FetchError::Request { url: url.to_string(), source };
    let mut response = reqwest::Client::new().get(url).send().await.map_err(request_error)?;
    if !response.status().is_success() {
        return Err(FetchError::Status { url: url.to_string(), status: response.status().as_u16() });
    }

    let partial = partial_path(target);
    let io_error = |source: std::io::Error| FetchError::Io { path: partial.clone(), source };
    let mut file = tokio::fs::File::create(&partial).await.map_err(io_error)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(request_error)? {
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_error)?;
    drop(file);

    tokio::fs::rename(&partial, target).await.map_err(|source| FetchError::Io { path: target.to_path_buf(), source })?;
    info!("Downloaded {} bytes to {}", written, target.display());
    Ok(())
}

/// `{target}.part`, keeping the full file name so different targets never share one.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub(repo: HubRepo, repo_id: &str, revision: &str, filename: &str) -> Location {
        Location::Hub(HubFile { repo, repo_id: repo_id.to_string(), revision: revision.to_string(), filename: filename.to_string() })
    }

    fn caches(dir: &Path) -> Caches {
        Caches { http: dir.join("http"), hub: Cache::new(dir.join("hub")) }
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(Location::parse("data/dialogs.csv").unwrap(), Location::Local(PathBuf::from("data/dialogs.csv")));
        assert_eq!(Location::parse("https://example.com/d.jsonl").unwrap(), Location::Http("https://example.com/d.jsonl".to_string()));
        assert_eq!(
            Location::parse("hf://datasets/acme/dialogs/data/test.parquet").unwrap(),
            hub(HubRepo::Dataset, "acme/dialogs", "main", "data/test.parquet")
        );
        assert_eq!(
            Location::parse("hf://SWivid/F5-TTS/F5TTS_Base/model_1200000.safetensors").unwrap(),
            hub(HubRepo::Model, "SWivid/F5-TTS", "main", "F5TTS_Base/model_1200000.safetensors")
        );
        assert_eq!(Location::parse("hf://datasets/acme/dialogs@v2/test.csv").unwrap(), hub(HubRepo::Dataset, "acme/dialogs", "v2", "test.csv"));
        assert!(!Location::parse("refs/a.wav").unwrap().is_remote());
        assert!(Location::parse("hf://acme/voices/a.wav").unwrap().is_remote());
    }

    #[test]
    fn test_invalid_locations() {
        assert!(matches!(Location::parse(""), Err(FetchError::InvalidUri(_))));
        assert!(matches!(Location::parse("hf://acme/only-repo"), Err(FetchError::InvalidUri(_))));
        assert!(matches!(Location::parse("hf://datasets/acme/dialogs@/test.csv"), Err(FetchError::InvalidUri(_))));
    }

    #[test]
    fn test_cache_file_name_is_stable() {
        let url = "https://example.com/datasets/acme/test.jsonl?download=true";
        assert_eq!(cache_file_name(url), "example.com_datasets_acme_test.jsonl");
        assert_eq!(cache_file_name(url), cache_file_name(url));
    }

    #[test]
    fn test_partial_path_keeps_extension() {
        assert_eq!(partial_path(Path::new("/c/x.csv")), PathBuf::from("/c/x.csv.part"));
        assert_ne!(partial_path(Path::new("/c/x.csv")), partial_path(Path::new("/c/x.jsonl")));
    }

    #[tokio::test]
    async fn test_fetch_local_and_cached_url() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(dir.path());
        let local = dir.path().join("rows.jsonl");
        std::fs::write(&local, "{}\n").unwrap();
        assert_eq!(fetch_with(local.to_str().unwrap(), &caches).await.unwrap(), local);

        let missing = dir.path().join("missing.jsonl");
        assert!(matches!(fetch_with(missing.to_str().unwrap(), &caches).await, Err(FetchError::NotFound(_))));

        // A previously downloaded URL is served from the cache without touching the network
        let url = "https://example.invalid/data/rows.csv";
        std::fs::create_dir_all(&caches.http).unwrap();
        let cached = caches.http.join(cache_file_name(url));
        std::fs::write(&cached, "Dialog,Turn\n").unwrap();
        assert_eq!(fetch_with(url, &caches).await.unwrap(), cached);
    }

    #[tokio::test]
    async fn test_hub_file_resolves_from_revision_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(dir.path());

        // Hub cache layout: {repo folder}/refs/{revision} names the snapshot holding the files
        let repo_dir = dir.path().join("hub").join("datasets--acme--dialogs");
        std::fs::create_dir_all(repo_dir.join("refs")).unwrap();
        std::fs::write(repo_dir.join("refs").join("v2"), "abc123").unwrap();
        let snapshot = repo_dir.join("snapshots").join("abc123").join("data");
        std::fs::create_dir_all(&snapshot).unwrap();
        std::fs::write(snapshot.join("test.csv"), "Dialog,Turn\n").unwrap();

        let path = fetch_with("hf://datasets/acme/dialogs@v2/data/test.csv", &caches).await.unwrap();
        assert_eq!(path, snapshot.join("test.csv"));
    }
}
