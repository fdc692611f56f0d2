//! URL materialization for stored media paths.
//!
//! Media and profile-picture values are stored as storage-relative paths.
//! Before they leave the API they are rewritten into fetchable URLs through
//! the same-origin proxy. Values that are already absolute URLs (http
//! scheme) or static assets (leading `/`) pass through unchanged.

/// Rewrites storage paths into fetchable URLs. One instance is shared by
/// every endpoint that returns media or profile pictures.
#[derive(Debug, Clone)]
pub struct MediaUrls {
    proxy_base: String,
}

impl MediaUrls {
    pub fn new(proxy_base: impl Into<String>) -> Self {
        Self {
            proxy_base: proxy_base.into(),
        }
    }

    /// Default proxy under the API surface.
    pub fn proxy() -> Self {
        Self::new("/api/media")
    }

    pub fn materialize(&self, path: &str) -> String {
        if path.starts_with("http") || path.starts_with('/') {
            return path.to_string();
        }
        format!("{}/{}", self.proxy_base, path)
    }

    pub fn materialize_opt(&self, path: Option<&str>) -> Option<String> {
        path.map(|p| self.materialize(p))
    }
}
