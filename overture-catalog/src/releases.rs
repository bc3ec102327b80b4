use overture_object_storage::{OvertureObjectStores, StorageError};
use serde::Deserialize;
use tokio::sync::Mutex;

pub const CATALOG_DOCUMENT: &str = "catalog.json";

/// Used when the catalog cannot be fetched or parsed. Newest first.
pub const FALLBACK_RELEASES: &[&str] = &[
    "2025-10-22.0",
    "2025-09-24.0",
    "2025-08-20.1",
    "2025-08-20.0",
    "2025-07-23.0",
    "2025-06-25.0",
    "2025-05-21.0",
    "2025-04-23.0",
    "2025-03-19.1",
    "2025-03-19.0",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Releases {
    /// Newest first.
    pub all: Vec<String>,
    pub latest: String,
}

impl Releases {
    pub fn fallback() -> Self {
        Self {
            all: FALLBACK_RELEASES.iter().map(|r| r.to_string()).collect(),
            latest: FALLBACK_RELEASES[0].to_string(),
        }
    }

    pub fn contains(&self, release: &str) -> bool {
        self.all.iter().any(|r| r == release)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReleaseResolutionError {
    #[error("Failed to fetch release catalog: {0}")]
    Fetch(#[from] StorageError),
    #[error("Failed to parse release catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Release catalog lists no releases")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    latest: Option<String>,
    #[serde(default)]
    links: Vec<CatalogLink>,
}

#[derive(Debug, Deserialize)]
struct CatalogLink {
    rel: String,
    href: String,
}

/// `YYYY-MM-DD.N`, optionally tagged as in `2024-03-12-alpha.0`.
pub fn is_release_token(token: &str) -> bool {
    let Some((date, revision)) = token.split_once('.') else {
        return false;
    };
    let parts: Vec<&str> = date.splitn(4, '-').collect();
    let tag_ok = match parts.get(3) {
        Some(tag) => !tag.is_empty() && tag.bytes().all(|b| b.is_ascii_alphanumeric()),
        None => true,
    };
    parts.len() >= 3
        && [4, 2, 2]
            .iter()
            .zip(&parts)
            .all(|(len, part)| part.len() == *len && part.bytes().all(|b| b.is_ascii_digit()))
        && tag_ok
        && !revision.is_empty()
        && revision.bytes().all(|b| b.is_ascii_digit())
}

/// First path segment of a child link, e.g. `./2025-09-24.0/catalog.json`.
fn release_token(href: &str) -> Option<&str> {
    let href = href.trim_start_matches("./");
    let token = href.split('/').next()?;
    is_release_token(token).then_some(token)
}

pub fn parse_catalog(bytes: &[u8]) -> Result<Releases, ReleaseResolutionError> {
    let document: CatalogDocument = serde_json::from_slice(bytes)?;

    let mut all: Vec<String> = document
        .links
        .iter()
        .filter(|link| link.rel == "child")
        .filter_map(|link| release_token(&link.href))
        .map(str::to_string)
        .collect();

    if let Some(latest) = &document.latest {
        if !all.contains(latest) {
            all.push(latest.clone());
        }
    }

    // Tokens sort chronologically as plain strings.
    all.sort_unstable_by(|a, b| b.cmp(a));
    all.dedup();

    let latest = match document.latest {
        Some(latest) => latest,
        None => all.first().cloned().ok_or(ReleaseResolutionError::Empty)?,
    };

    Ok(Releases { all, latest })
}

/// Reads the release list from the STAC catalog.
#[derive(Debug, Clone)]
pub struct ReleaseResolver {
    stores: OvertureObjectStores,
}

impl ReleaseResolver {
    pub fn new(stores: OvertureObjectStores) -> Self {
        Self { stores }
    }

    /// Never fails: any fetch or parse problem yields [`Releases::fallback`].
    pub async fn resolve(&self) -> Releases {
        match self.fetch().await {
            Ok(releases) => {
                tracing::debug!(
                    "Resolved {} releases, latest {}",
                    releases.all.len(),
                    releases.latest
                );
                releases
            }
            Err(e) => {
                tracing::warn!("Falling back to built-in release list: {}", e);
                Releases::fallback()
            }
        }
    }

    pub async fn resolve_latest(&self) -> String {
        self.resolve().await.latest
    }

    async fn fetch(&self) -> Result<Releases, ReleaseResolutionError> {
        let bytes = self.stores.get_stac_document(CATALOG_DOCUMENT).await?;
        parse_catalog(&bytes)
    }
}

/// Holds the resolved releases until explicitly invalidated.
///
/// The fill runs while holding the lock, so concurrent first callers wait for
/// one catalog fetch instead of racing.
#[derive(Debug, Default)]
pub struct ReleaseCache {
    value: Mutex<Option<Releases>>,
}

impl ReleaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<Releases> {
        self.value.lock().await.clone()
    }

    pub async fn set(&self, releases: Releases) {
        *self.value.lock().await = Some(releases);
    }

    pub async fn invalidate(&self) {
        self.value.lock().await.take();
    }

    pub async fn get_or_resolve(&self, resolver: &ReleaseResolver) -> Releases {
        let mut guard = self.value.lock().await;
        if let Some(releases) = guard.as_ref() {
            return releases.clone();
        }
        let releases = resolver.resolve().await;
        *guard = Some(releases.clone());
        releases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "latest": "2025-10-22.0",
        "links": [
            {"rel": "child", "href": "./2025-09-24.0/catalog.json"},
            {"rel": "child", "href": "./2025-10-22.0/catalog.json"},
            {"rel": "child", "href": "./2025-08-20.1/catalog.json"},
            {"rel": "self", "href": "./catalog.json"}
        ]
    }"#;

    #[test]
    fn catalog_is_parsed_newest_first() {
        let releases = parse_catalog(CATALOG.as_bytes()).unwrap();
        assert_eq!(
            releases.all,
            vec!["2025-10-22.0", "2025-09-24.0", "2025-08-20.1"]
        );
        assert_eq!(releases.latest, "2025-10-22.0");
    }

    #[test]
    fn missing_latest_uses_newest_child() {
        let catalog = r#"{"links": [
            {"rel": "child", "href": "./2025-08-20.1/catalog.json"},
            {"rel": "child", "href": "2025-09-24.0/catalog.json"}
        ]}"#;
        let releases = parse_catalog(catalog.as_bytes()).unwrap();
        assert_eq!(releases.latest, "2025-09-24.0");
    }

    #[test]
    fn latest_outside_children_is_listed() {
        let catalog = r#"{"latest": "2025-11-19.0", "links": [
            {"rel": "child", "href": "./2025-10-22.0/catalog.json"}
        ]}"#;
        let releases = parse_catalog(catalog.as_bytes()).unwrap();
        assert_eq!(releases.all, vec!["2025-11-19.0", "2025-10-22.0"]);
        assert!(releases.contains("2025-11-19.0"));
    }

    #[test]
    fn catalog_without_releases_is_an_error() {
        let catalog = r#"{"links": [{"rel": "self", "href": "./catalog.json"}]}"#;
        assert!(matches!(
            parse_catalog(catalog.as_bytes()),
            Err(ReleaseResolutionError::Empty)
        ));
        assert!(matches!(
            parse_catalog(b"<html>"),
            Err(ReleaseResolutionError::Parse(_))
        ));
    }

    #[test]
    fn release_tokens_are_validated() {
        assert!(is_release_token("2025-10-22.0"));
        assert!(is_release_token("2025-08-20.12"));
        assert!(!is_release_token("catalog.json"));
        assert!(!is_release_token("2025-10-22"));
        assert!(!is_release_token("25-10-22.0"));
    }

    #[test]
    fn tagged_release_tokens_are_accepted() {
        assert!(is_release_token("2024-03-12-alpha.0"));
        assert!(is_release_token("2023-07-26-beta2.1"));
        assert!(!is_release_token("2024-03-12-.0"));
        assert!(!is_release_token("2024-03-12-alpha-1.0"));
        assert!(!is_release_token("2024-03-12-alpha."));

        let catalog = r#"{"links": [
            {"rel": "child", "href": "./2024-03-12-alpha.0/catalog.json"}
        ]}"#;
        let releases = parse_catalog(catalog.as_bytes()).unwrap();
        assert_eq!(releases.latest, "2024-03-12-alpha.0");
    }

    #[test]
    fn fallback_is_newest_first() {
        let fallback = Releases::fallback();
        assert_eq!(fallback.latest, fallback.all[0]);
        let mut sorted = fallback.all.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sorted, fallback.all);
        assert!(fallback.all.iter().all(|r| is_release_token(r)));
    }

    #[tokio::test]
    async fn cache_set_get_invalidate() {
        let cache = ReleaseCache::new();
        assert!(cache.get().await.is_none());

        cache.set(Releases::fallback()).await;
        assert_eq!(cache.get().await, Some(Releases::fallback()));

        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }
}
