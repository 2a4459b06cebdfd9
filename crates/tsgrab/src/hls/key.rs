use reqwest::Url;

use crate::{
    config::MissingIvPolicy,
    decrypt::{decrypt, CipherMethod},
    error::{GrabError, GrabResult},
    hls::{EncryptionDescriptor, Segment},
    util::http::HttpClient,
};

/// Decryption key shared read-only by every worker of a session.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub method: CipherMethod,
    pub key: [u8; 16],
    /// Explicit IV from the manifest. When absent, the media sequence number is used.
    pub iv: Option<[u8; 16]>,
}

impl ResolvedKey {
    pub fn new(method: CipherMethod, key: [u8; 16], iv: Option<[u8; 16]>) -> Self {
        Self { method, key, iv }
    }

    pub fn iv_for(&self, segment: &Segment) -> [u8; 16] {
        self.iv
            .unwrap_or_else(|| (segment.media_sequence as u128).to_be_bytes())
    }

    pub fn decrypt(&self, segment: &Segment, data: &[u8]) -> GrabResult<Vec<u8>> {
        decrypt(data, &self.key, &self.iv_for(segment), self.method)
    }
}

/// Fetch the key referenced by `descriptor`. This is done once per manifest
/// and never retried here.
pub async fn resolve_key(
    client: &HttpClient,
    descriptor: &EncryptionDescriptor,
    manifest_url: &Url,
    missing_iv: MissingIvPolicy,
) -> GrabResult<ResolvedKey> {
    let method: CipherMethod = descriptor.method.parse()?;
    if descriptor.iv.is_none() && missing_iv == MissingIvPolicy::Reject {
        return Err(GrabError::Manifest(
            "EXT-X-KEY has no IV and IV derivation is disabled".to_string(),
        ));
    }

    let key_url = manifest_url.join(&descriptor.uri)?;
    log::info!("Uri key: {key_url}");

    let key_bytes = client
        .get_bytes(key_url.clone())
        .await
        .map_err(|e| GrabError::KeyFetch {
            url: key_url.to_string(),
            reason: e.to_string(),
        })?;
    let key: [u8; 16] = key_bytes
        .as_ref()
        .try_into()
        .map_err(|_| GrabError::InvalidKey(key_bytes.len()))?;
    log::debug!("Key resolved: {}", hex::encode(key));

    Ok(ResolvedKey::new(method, key, descriptor.iv))
}
