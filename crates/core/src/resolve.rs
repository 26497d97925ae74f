//! Rewrites loopback URLs into the fleet's externally routable address.

use std::sync::RwLock;

use tracing::warn;
use url::Url;

/// Resolves candidate URLs against the configured canonical application URL.
///
/// The canonical URL is read on every call; it can be swapped at runtime
/// with [`AddressResolver::set_canonical_url`].
#[derive(Debug, Default)]
pub struct AddressResolver {
    canonical: RwLock<Option<String>>,
}

impl AddressResolver {
    /// `canonical_url` is the fleet's external base, if any.
    pub fn new(canonical_url: Option<String>) -> Self {
        Self {
            canonical: RwLock::new(canonical_url),
        }
    }

    /// Replaces the canonical base used by later resolutions.
    pub fn set_canonical_url(&self, canonical_url: Option<String>) {
        *self.canonical.write().unwrap_or_else(|e| e.into_inner()) = canonical_url;
    }

    /// Current canonical URL, if configured and valid with a host.
    fn canonical(&self) -> Option<Url> {
        let raw = self
            .canonical
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;
        match Url::parse(&raw) {
            Ok(url) if url.host_str().is_some() => Some(url),
            Ok(_) => None,
            Err(e) => {
                warn!(canonical_url = %raw, error = %e, "ignoring invalid canonical url");
                None
            }
        }
    }

    /// Parses `candidate` and, when asked to and a canonical host is
    /// configured, moves it onto the canonical scheme, host and port.
    ///
    /// Path, query and fragment of the candidate are kept. Returns `None`
    /// only when `candidate` is not a valid URL.
    pub fn resolve(&self, candidate: &str, use_canonical_host: bool) -> Option<Url> {
        let url = Url::parse(candidate).ok()?;
        // `mailto:` and friends have no host to replace.
        if !use_canonical_host || url.cannot_be_a_base() {
            return Some(url);
        }
        let Some(mut rebased) = self.canonical() else {
            return Some(url);
        };
        rebased.set_path(url.path());
        rebased.set_query(url.query());
        rebased.set_fragment(url.fragment());
        Some(rebased)
    }
}
