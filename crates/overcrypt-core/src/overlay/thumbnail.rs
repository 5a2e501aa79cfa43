//! Thumbnail URLs for listed files.
//!
//! Thumbnails live next to the file under `.thumbnails/<name>.webp` and are
//! served through the host's download route `{api_url}/d/...`.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use ring::hmac;
use tracing::warn;
use url::Url;

use super::path::VirtualPath;

/// Produces the `sign` query value for a download path.
pub trait ThumbnailSigner: Send + Sync + fmt::Debug {
    fn sign(&self, path: &str) -> String;
}

/// HMAC-SHA256 signatures without expiry: `base64url(mac(path:0)):0`.
pub struct HmacSigner {
    key: hmac::Key,
}

impl HmacSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }
}

impl fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl ThumbnailSigner for HmacSigner {
    fn sign(&self, path: &str) -> String {
        let tag = hmac::sign(&self.key, format!("{path}:0").as_bytes());
        format!("{}:0", URL_SAFE.encode(tag.as_ref()))
    }
}

/// Thumbnail URL for `name` inside `dir`.
pub fn thumbnail_url(
    api_url: &Url,
    dir: &VirtualPath,
    name: &str,
    signer: Option<&dyn ThumbnailSigner>,
) -> Option<Url> {
    let thumb_path = dir.join(".thumbnails").join(format!("{name}.webp"));
    let mut url = api_url.clone();
    {
        let Ok(mut segments) = url.path_segments_mut() else {
            warn!(api_url = %api_url, "API URL cannot carry a path, skipping thumbnails");
            return None;
        };
        segments.pop_if_empty().push("d").extend(thumb_path.components());
    }
    if let Some(signer) = signer {
        url.query_pairs_mut().append_pair("sign", &signer.sign(&thumb_path.to_string()));
    }
    Some(url)
}
