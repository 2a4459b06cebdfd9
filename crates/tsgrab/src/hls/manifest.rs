use std::{io::Write, path::Path};

use m3u8_rs::{KeyMethod, MasterPlaylist, MediaPlaylist, Playlist};
use reqwest::Url;

use crate::{
    error::{GrabError, GrabResult},
    hls::Segment,
    util::http::HttpClient,
};

/// Where the manifest comes from.
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// Fetch the manifest from this URL.
    Url(Url),
    /// Manifest text supplied by the caller. `base` resolves relative URIs.
    Text { text: String, base: Url },
}

impl ManifestSource {
    pub fn base(&self) -> &Url {
        match self {
            Self::Url(url) => url,
            Self::Text { base, .. } => base,
        }
    }
}

/// `EXT-X-KEY` attributes of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionDescriptor {
    /// Method as written in the manifest, e.g. `AES-128`.
    pub method: String,
    /// Key URI, possibly relative to the manifest.
    pub uri: String,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    /// URL of the media playlist the segments were resolved against.
    pub url: Url,
    pub segments: Vec<Segment>,
    /// Sum of all EXTINF durations in seconds.
    pub duration: f64,
    pub encryption: Option<EncryptionDescriptor>,
}

impl Manifest {
    /// Parse a media playlist. Master playlists are rejected; use [load_manifest]
    /// to follow their variants.
    pub fn parse(body: &[u8], url: Url) -> GrabResult<Self> {
        match parse_playlist(body)? {
            Playlist::MediaPlaylist(playlist) => Self::from_media_playlist(playlist, url),
            Playlist::MasterPlaylist(_) => Err(GrabError::Manifest(
                "expected a media playlist, got a master playlist".to_string(),
            )),
        }
    }

    fn from_media_playlist(playlist: MediaPlaylist, url: Url) -> GrabResult<Self> {
        if playlist.segments.is_empty() {
            return Err(GrabError::Manifest("no segments found".to_string()));
        }

        let mut encryption = None;
        let mut segments = Vec::with_capacity(playlist.segments.len());
        for (index, segment) in playlist.segments.iter().enumerate() {
            if let Some(key) = &segment.key {
                let descriptor = EncryptionDescriptor::from_key(key)?;
                match (&encryption, descriptor) {
                    (_, None) => {}
                    (None, Some(descriptor)) => encryption = Some(descriptor),
                    (Some(current), Some(descriptor)) if *current != descriptor => {
                        log::warn!(
                            "Key rotation at segment {index} is not supported, keeping the first key."
                        );
                    }
                    _ => {}
                }
            }

            segments.push(Segment {
                index,
                url: url.join(&segment.uri)?,
                duration: segment.duration as f64,
                media_sequence: playlist.media_sequence + index as u64,
            });
        }

        let duration = segments.iter().map(|s| s.duration).sum();
        log::info!("Segments to download: [{}]", segments.len());

        Ok(Self {
            url,
            segments,
            duration,
            encryption,
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl EncryptionDescriptor {
    fn from_key(key: &m3u8_rs::Key) -> GrabResult<Option<Self>> {
        let method = match &key.method {
            KeyMethod::None => return Ok(None),
            KeyMethod::AES128 => "AES-128".to_string(),
            KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
            KeyMethod::Other(name) => name.clone(),
        };
        let uri = key
            .uri
            .clone()
            .ok_or_else(|| GrabError::Manifest("URI field in key must exist".to_string()))?;
        let iv = key.iv.as_deref().map(parse_iv).transpose()?;

        Ok(Some(Self { method, uri, iv }))
    }
}

fn parse_iv(iv: &str) -> GrabResult<[u8; 16]> {
    let hex_iv = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    let mut bytes = [0u8; 16];
    hex::decode_to_slice(hex_iv, &mut bytes)?;
    Ok(bytes)
}

/// Characters of an unparseable body quoted in the error message.
const BODY_PREVIEW_LIMIT: usize = 120;

fn parse_playlist(body: &[u8]) -> GrabResult<Playlist> {
    m3u8_rs::parse_playlist_res(body).map_err(|_| {
        let text = String::from_utf8_lossy(body);
        log::debug!("Unparseable M3U8 file: {text}");

        let mut preview: String = text.chars().take(BODY_PREVIEW_LIMIT).collect();
        if text.chars().nth(BODY_PREVIEW_LIMIT).is_some() {
            preview.push_str("...");
        }
        GrabError::Manifest(format!("not a playlist ({} bytes): {preview}", body.len()))
    })
}

/// Choose the highest quality variant: widest, then fastest, then largest bandwidth.
fn best_variant(playlist: &MasterPlaylist) -> Option<&m3u8_rs::VariantStream> {
    playlist
        .variants
        .iter()
        .filter(|variant| !variant.is_i_frame)
        .min_by(|a, b| {
            // compare resolution first
            if let (Some(a), Some(b)) = (a.resolution, b.resolution) {
                if a.width != b.width {
                    return b.width.cmp(&a.width);
                }
            }

            // compare framerate then
            if let (Some(a), Some(b)) = (a.frame_rate, b.frame_rate) {
                let a = a as u64;
                let b = b as u64;
                if a != b {
                    return b.cmp(&a);
                }
            }

            // compare bandwidth finally
            b.bandwidth.cmp(&a.bandwidth)
        })
}

/// Load and parse a manifest. A copy of every fetched manifest text is kept in
/// `dump_dir` for diagnostics.
pub async fn load_manifest(
    client: &HttpClient,
    source: ManifestSource,
    dump_dir: &Path,
) -> GrabResult<Manifest> {
    let (url, body) = match source {
        ManifestSource::Url(url) => {
            log::info!("Start fetching M3U8 file.");
            let body = client.get_bytes(url.clone()).await?;
            dump_manifest(dump_dir, &body);
            log::info!("M3U8 file fetched.");
            (url, body.to_vec())
        }
        ManifestSource::Text { text, base } => (base, text.into_bytes()),
    };

    load_playlist(client, url, body, dump_dir, true).await
}

#[async_recursion::async_recursion]
async fn load_playlist(
    client: &HttpClient,
    url: Url,
    body: Vec<u8>,
    dump_dir: &Path,
    follow_variants: bool,
) -> GrabResult<Manifest> {
    match parse_playlist(&body)? {
        Playlist::MediaPlaylist(playlist) => Manifest::from_media_playlist(playlist, url),
        Playlist::MasterPlaylist(playlist) if follow_variants => {
            log::info!("Master playlist input detected. Auto selecting best quality streams.");
            let variant = best_variant(&playlist)
                .ok_or_else(|| GrabError::Manifest("no variant found".to_string()))?;
            let variant_url = url.join(&variant.uri)?;
            log::info!(
                "Best stream: {variant_url}; Bandwidth: {bandwidth}",
                bandwidth = variant.bandwidth
            );

            let body = client.get_bytes(variant_url.clone()).await?;
            dump_manifest(dump_dir, &body);
            load_playlist(client, variant_url, body.to_vec(), dump_dir, false).await
        }
        Playlist::MasterPlaylist(_) => Err(GrabError::Manifest(
            "variant stream is itself a master playlist".to_string(),
        )),
    }
}

fn dump_manifest(dir: &Path, body: &[u8]) {
    let result = tempfile::Builder::new()
        .prefix("playlist-")
        .suffix(".m3u8")
        .tempfile_in(dir)
        .and_then(|mut file| {
            file.write_all(body)?;
            file.keep().map_err(|e| e.error)
        });
    match result {
        Ok((_, path)) => log::debug!("M3U8 file saved to {}", path.display()),
        Err(e) => log::warn!("Failed to save M3U8 file: {e}"),
    }
}
