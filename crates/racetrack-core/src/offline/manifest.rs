use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// App routes cached up front.
pub const DEFAULT_ROUTES: &[&str] = &["/"];

/// Assets outside our origin that the app needs to render offline.
pub const DEFAULT_EXTERNAL_ASSETS: &[&str] = &[
    "https://fonts.googleapis.com/css2?family=Inter:wght@400;700;800&display=swap",
    "https://unpkg.com/ress/dist/ress.min.css",
    "https://fonts.gstatic.com/s/inter/v11/UcC73FwrK3iLTeHuS_fvQtMwCp50KnMa1ZL7W0Q5nw.woff2",
];

/// Large, mostly unused touch icons are never precached.
fn excluded_file(path: &str) -> bool {
    static DENYLIST: OnceLock<Regex> = OnceLock::new();
    DENYLIST
        .get_or_init(|| Regex::new(r"/icons/(apple.*?|original.png)").expect("static regex"))
        .is_match(path)
}

/// Normalize to the form `Url` reports as its href, so membership checks
/// match resolved request URLs.
fn normalize(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.to_string(),
        Err(e) => {
            warn!(%url, error = %e, "Asset URL does not parse, keeping it verbatim");
            url.to_string()
        }
    }
}

/// Names of the two cache partitions for one app version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub static_name: String,
    pub runtime_name: String,
}

impl CacheNames {
    pub fn for_version(version: &str) -> Self {
        Self {
            static_name: format!("cache{}", version),
            runtime_name: format!("offline{}", version),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        name == self.static_name || name == self.runtime_name
    }
}

/// The fixed set of assets precached at install time.
#[derive(Debug, Clone)]
pub struct AssetManifest {
    origin: Url,
    version: String,
    to_cache: Vec<String>,
    static_assets: HashSet<String>,
}

impl AssetManifest {
    /// Build the manifest from bundler output (`build`), static files
    /// (`files`), app `routes` and `external` absolute URLs.
    pub fn new(
        origin: Url,
        version: impl Into<String>,
        build: &[String],
        files: &[String],
        routes: &[String],
        external: &[String],
    ) -> Self {
        let origin_prefix = origin.origin().ascii_serialization();

        let own = files
            .iter()
            .filter(|f| !excluded_file(f))
            .chain(build.iter())
            .chain(routes.iter())
            .map(|path| normalize(&format!("{}{}", origin_prefix, path)));
        let external = external.iter().map(|url| normalize(url));

        let mut to_cache = Vec::new();
        let mut static_assets = HashSet::new();
        for url in own.chain(external) {
            // Duplicate URLs would fail a batch add
            if static_assets.insert(url.clone()) {
                to_cache.push(url);
            }
        }

        Self {
            origin,
            version: version.into(),
            to_cache,
            static_assets,
        }
    }

    /// Manifest with the default routes and external assets.
    pub fn with_defaults(origin: Url, version: impl Into<String>, build: &[String], files: &[String]) -> Self {
        let routes: Vec<String> = DEFAULT_ROUTES.iter().map(|s| s.to_string()).collect();
        let external: Vec<String> = DEFAULT_EXTERNAL_ASSETS.iter().map(|s| s.to_string()).collect();
        Self::new(origin, version, build, files, &routes, &external)
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn cache_names(&self) -> CacheNames {
        CacheNames::for_version(&self.version)
    }

    pub fn to_cache(&self) -> &[String] {
        &self.to_cache
    }

    pub fn is_static(&self, href: &str) -> bool {
        self.static_assets.contains(href)
    }
}

/// List the files under `dir` as absolute URL paths (`/a/b.js`).
/// A missing directory yields no paths.
pub fn scan_dir(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        debug!(?dir, "Asset directory does not exist");
        return Vec::new();
    }

    let mut paths: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable asset entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(dir).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(format!("/{}", parts.join("/")))
        })
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://race.example.com").unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cache_names_are_versioned() {
        let names = CacheNames::for_version("1700000000");
        assert_eq!(names.static_name, "cache1700000000");
        assert_eq!(names.runtime_name, "offline1700000000");
        assert!(names.contains("offline1700000000"));
        assert!(!names.contains("cache1600000000"));
    }

    #[test]
    fn test_manifest_prefixes_own_assets_and_keeps_external() {
        let manifest = AssetManifest::with_defaults(
            origin(),
            "1",
            &strings(&["/_app/start.js"]),
            &strings(&["/favicon.png"]),
        );

        let to_cache = manifest.to_cache();
        assert_eq!(to_cache[0], "https://race.example.com/favicon.png");
        assert_eq!(to_cache[1], "https://race.example.com/_app/start.js");
        assert_eq!(to_cache[2], "https://race.example.com/");
        assert_eq!(to_cache.len(), 3 + DEFAULT_EXTERNAL_ASSETS.len());
        assert!(manifest.is_static("https://unpkg.com/ress/dist/ress.min.css"));
        assert!(manifest.is_static(DEFAULT_EXTERNAL_ASSETS[0]));
    }

    #[test]
    fn test_manifest_excludes_large_icons() {
        let manifest = AssetManifest::new(
            origin(),
            "1",
            &[],
            &strings(&[
                "/icons/apple-touch-icon.png",
                "/icons/original.png",
                "/icons/icon-192.png",
            ]),
            &[],
            &[],
        );
        assert_eq!(manifest.to_cache(), &["https://race.example.com/icons/icon-192.png".to_string()]);
        assert!(!manifest.is_static("https://race.example.com/icons/original.png"));
    }

    #[test]
    fn test_manifest_deduplicates() {
        let manifest = AssetManifest::new(origin(), "1", &strings(&["/"]), &[], &strings(&["/"]), &[]);
        assert_eq!(manifest.to_cache().len(), 1);
    }

    #[test]
    fn test_scan_dir_lists_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("_app/immutable")).unwrap();
        std::fs::write(dir.path().join("_app/immutable/start.js"), "x").unwrap();
        std::fs::write(dir.path().join("favicon.png"), "x").unwrap();

        assert_eq!(
            scan_dir(dir.path()),
            vec!["/_app/immutable/start.js".to_string(), "/favicon.png".to_string()]
        );
        assert!(scan_dir(&dir.path().join("missing")).is_empty());
    }
}
