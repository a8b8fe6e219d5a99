//! Canonical request identity and request classification.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// Canonical identity of an intercepted request.
///
/// Identity is method-independent: two requests targeting the same URL are
/// the same cache entry regardless of how they were issued. The fragment is
/// stripped (it never reaches the network) and the URL is normalized by the
/// parser, so trivially different spellings collapse to one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
  url: Url,
  hash: String,
}

impl RequestIdentity {
  /// Canonicalize an absolute URL into a request identity.
  pub fn parse(raw: &str) -> Result<Self> {
    let url = Url::parse(raw).map_err(|e| eyre!("Invalid request URL '{}': {}", raw, e))?;
    Ok(Self::from_url(url))
  }

  /// Canonicalize a URL that may be relative, resolving against `base`.
  pub fn parse_with_base(raw: &str, base: &Url) -> Result<Self> {
    let url = base
      .join(raw)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", raw, e))?;
    Ok(Self::from_url(url))
  }

  fn from_url(mut url: Url) -> Self {
    url.set_fragment(None);

    // SHA256 hash for stable, fixed-length storage keys; the readable URL
    // is kept alongside for debugging.
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { url, hash }
  }

  /// The canonical URL string.
  pub fn as_str(&self) -> &str {
    self.url.as_str()
  }

  /// Stable fixed-length key for storage.
  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// Path component of the target, used for classification.
  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// Category of an intercepted request.
///
/// Exactly one of the two, decided purely by the target identity before any
/// cache or network decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Matches the reserved data path prefix
  Data,
  /// Everything else: static application shell
  Shell,
}

impl RequestClass {
  /// Classify an identity against the reserved data path prefix.
  ///
  /// A request matching the prefix is never treated as a shell request,
  /// even if a shell entry happens to exist for the same identity.
  pub fn of(identity: &RequestIdentity, data_path_prefix: &str) -> Self {
    if identity.path().starts_with(data_path_prefix) {
      RequestClass::Data
    } else {
      RequestClass::Shell
    }
  }
}

/// An intercepted outgoing request as seen by the router.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
  /// Absolute target URL
  pub url: String,
  /// Whether this is a top-level navigation (page load)
  pub navigation: bool,
}

impl InterceptedRequest {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      navigation: false,
    }
  }

  pub fn navigation(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      navigation: true,
    }
  }
}
