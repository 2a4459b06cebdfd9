use reqwest::StatusCode;
use tsgrab::{
    hls::{load_manifest, Manifest},
    GrabError, HttpClient, ManifestSource,
};

use super::{media_playlist, setup_mock_server, HlsMock};

#[tokio::test]
async fn test_load_manifest_from_url() -> anyhow::Result<()> {
    crate::init_logger();
    let (playlist_uri, server) = setup_mock_server(&media_playlist(3, "")).await;
    let dump_dir = tempfile::tempdir()?;

    let manifest = load_manifest(
        &HttpClient::default(),
        ManifestSource::Url(playlist_uri.parse()?),
        dump_dir.path(),
    )
    .await?;

    assert_eq!(manifest.len(), 3);
    assert!(manifest.encryption.is_none());
    assert!((manifest.duration - 27.027).abs() < 1e-6);
    for (index, segment) in manifest.segments.iter().enumerate() {
        assert_eq!(segment.index, index);
        assert_eq!(
            segment.url.as_str(),
            format!("{}/seg{index}.ts", server.uri())
        );
    }

    // the fetched text is kept for diagnostics
    let dumped: Vec<_> = std::fs::read_dir(dump_dir.path())?.collect::<Result<_, _>>()?;
    assert_eq!(dumped.len(), 1);
    let name = dumped[0].file_name().to_string_lossy().into_owned();
    assert!(name.starts_with("playlist-") && name.ends_with(".m3u8"));

    Ok(())
}

#[tokio::test]
async fn test_load_manifest_from_text() -> anyhow::Result<()> {
    let dump_dir = tempfile::tempdir()?;
    let text = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:100
#EXTINF:6.0,
a.ts
#EXTINF:6.0,
../other/b.ts
#EXTINF:6.0,
https://cdn.example.com/c.ts
#EXT-X-ENDLIST
";

    let manifest = load_manifest(
        &HttpClient::default(),
        ManifestSource::Text {
            text: text.to_string(),
            base: "https://example.com/live/stream/".parse()?,
        },
        dump_dir.path(),
    )
    .await?;

    let urls: Vec<_> = manifest.segments.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(
        urls,
        [
            "https://example.com/live/stream/a.ts",
            "https://example.com/live/other/b.ts",
            "https://cdn.example.com/c.ts",
        ]
    );
    assert_eq!(manifest.segments[2].media_sequence, 102);
    assert!(std::fs::read_dir(dump_dir.path())?.next().is_none());

    Ok(())
}

#[tokio::test]
async fn test_master_playlist_selects_best_variant() -> anyhow::Result<()> {
    crate::init_logger();
    let (playlist_uri, server) = setup_mock_server(
        "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720
high/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=854x480
mid/index.m3u8
",
    )
    .await;
    server.mock("/high/index.m3u8", media_playlist(2, "")).await;
    let dump_dir = tempfile::tempdir()?;

    let manifest = load_manifest(
        &HttpClient::default(),
        ManifestSource::Url(playlist_uri.parse()?),
        dump_dir.path(),
    )
    .await?;

    assert_eq!(manifest.url.path(), "/high/index.m3u8");
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest.segments[1].url.path(), "/high/seg1.ts");

    Ok(())
}

#[tokio::test]
async fn test_manifest_http_error() -> anyhow::Result<()> {
    let server = wiremock::MockServer::start().await;
    server.mock_status("/playlist.m3u8", 404, None).await;
    let dump_dir = tempfile::tempdir()?;

    let result = load_manifest(
        &HttpClient::default(),
        ManifestSource::Url(format!("{}/playlist.m3u8", server.uri()).parse()?),
        dump_dir.path(),
    )
    .await;
    assert!(matches!(
        result,
        Err(GrabError::HttpStatus(StatusCode::NOT_FOUND))
    ));

    Ok(())
}

#[test]
fn test_parse_rejects_garbage() {
    let result = Manifest::parse(
        b"<html>not a playlist</html>",
        "https://example.com/".parse().unwrap(),
    );
    assert!(matches!(result, Err(GrabError::Manifest(_))));
}
