use std::sync::{Arc, Mutex};

use tsgrab::{
    DecryptFailurePolicy, DownloadSession, GrabError, ManifestSource, ProgressStatus,
    ProgressTracker, SessionOutcome, TrackType,
};

use super::{fast_config, n};
use crate::hls::{
    expected_output, media_playlist, segment_body, setup_mock_server, HlsMock, Plain, KEY,
};

fn source(uri: &str) -> anyhow::Result<ManifestSource> {
    Ok(ManifestSource::Url(uri.parse()?))
}

#[tokio::test]
async fn test_download_all_segments() -> anyhow::Result<()> {
    crate::init_logger();
    let (playlist_uri, server) = setup_mock_server(&media_playlist(3, "")).await;
    server.mock_segments::<Plain>(3, None).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let outcome = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .download(source(&playlist_uri)?, &output)
        .await?;

    let SessionOutcome::Completed(report) = outcome else {
        panic!("download was interrupted");
    };
    assert_eq!(report.track, TrackType::Video);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.completion_percent, 100.);
    assert_eq!(report.retry_count, 0);
    assert!(report.failed_indices.is_empty());

    let written = std::fs::read(&output)?;
    assert_eq!(written, expected_output(0..3));
    assert_eq!(report.bytes_written, written.len() as u64);
    assert_eq!(report.summary.segments_written, 3);
    assert_eq!(report.summary.total_segments, 3);

    Ok(())
}

#[tokio::test]
async fn test_download_encrypted_with_explicit_iv() -> anyhow::Result<()> {
    crate::init_logger();
    let iv = [0x42; 16];
    let (playlist_uri, server) = setup_mock_server(&media_playlist(
        4,
        "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x42424242424242424242424242424242",
    ))
    .await;
    server.mock("/key.bin", KEY.to_vec()).await;
    server.mock_segments(4, Some(|_| iv)).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let outcome = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .download(source(&playlist_uri)?, &output)
        .await?;

    assert!(outcome.is_completed());
    assert_eq!(std::fs::read(&output)?, expected_output(0..4));

    Ok(())
}

#[tokio::test]
async fn test_download_encrypted_with_media_sequence_iv() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(&media_playlist(
        3,
        "#EXT-X-MEDIA-SEQUENCE:5\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"",
    ))
    .await;
    server.mock("/key.bin", KEY.to_vec()).await;
    server
        .mock_segments(3, Some(|index| (5 + index as u128).to_be_bytes()))
        .await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let outcome = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .download(source(&playlist_uri)?, &output)
        .await?;

    assert!(outcome.is_completed());
    assert_eq!(std::fs::read(&output)?, expected_output(0..3));

    Ok(())
}

#[tokio::test]
async fn test_key_failure_leaves_no_output() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(&media_playlist(
        3,
        "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"",
    ))
    .await;
    server.mock_status("/key.bin", 500, None).await;
    server.mock_segments::<Plain>(3, None).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let result = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .download(source(&playlist_uri)?, &output)
        .await;

    assert!(matches!(result, Err(GrabError::KeyFetch { .. })));
    assert!(!output.exists());
    // no segment is requested without a key
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.iter().all(|r| !r.url.path().ends_with(".ts")));

    Ok(())
}

#[tokio::test]
async fn test_incomplete_download_reports_missing() -> anyhow::Result<()> {
    crate::init_logger();
    let (playlist_uri, server) = setup_mock_server(&media_playlist(10, "")).await;
    server.mock_status("/seg4.ts", 500, None).await;
    server.mock_segments::<Plain>(10, None).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let progress = ProgressTracker::new();
    let result = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .progress(progress.clone())
        .download(source(&playlist_uri)?, &output)
        .await;

    match result {
        Err(GrabError::IncompleteDownload {
            completion,
            missing,
        }) => {
            assert_eq!(missing, vec![4]);
            assert!((completion - 90.).abs() < 1e-9);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // the other segments are still in the file, in order
    let expected = expected_output((0..10).filter(|&i| i != 4));
    assert_eq!(std::fs::read(&output)?, expected);
    assert_eq!(progress.snapshot().status, Some(ProgressStatus::Error));

    // two rounds of two attempts each
    let attempts = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/seg4.ts")
        .count();
    assert_eq!(attempts, 4);

    Ok(())
}

#[tokio::test]
async fn test_failures_below_threshold_complete() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(&media_playlist(10, "")).await;
    server.mock_status("/seg4.ts", 404, None).await;
    server.mock_segments::<Plain>(10, None).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let outcome = DownloadSession::builder()
        .config(fast_config(dir.path()).completion_threshold(85.))
        .download(source(&playlist_uri)?, &output)
        .await?;

    let SessionOutcome::Completed(report) = outcome else {
        panic!("download was interrupted");
    };
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.failed_indices, vec![4]);
    assert!((report.completion_percent - 90.).abs() < 1e-9);
    assert_eq!(report.summary.failed, 1);
    // 3 retries for segment 4: one in the first round, two in the second
    assert_eq!(report.retry_count, 3);
    assert_eq!(report.summary.max_segment_retries, 3);
    assert_eq!(
        std::fs::read(&output)?,
        expected_output((0..10).filter(|&i| i != 4))
    );

    Ok(())
}

#[tokio::test]
async fn test_segment_succeeds_within_retry_budget() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(&media_playlist(3, "")).await;
    server.mock_status("/seg1.ts", 503, Some(2)).await;
    server.mock_segments::<Plain>(3, None).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let outcome = DownloadSession::builder()
        .config(
            fast_config(dir.path())
                .max_retries(n(3))
                .max_retry_rounds(n(1)),
        )
        .download(source(&playlist_uri)?, &output)
        .await?;

    let SessionOutcome::Completed(report) = outcome else {
        panic!("download was interrupted");
    };
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.retry_count, 2);
    assert_eq!(report.summary.max_segment_retries, 2);
    assert_eq!(std::fs::read(&output)?, expected_output(0..3));

    Ok(())
}

#[tokio::test]
async fn test_segment_recovers_in_later_round() -> anyhow::Result<()> {
    crate::init_logger();
    let (playlist_uri, server) = setup_mock_server(&media_playlist(5, "")).await;
    server.mock_status("/seg2.ts", 500, Some(2)).await;
    server.mock_segments::<Plain>(5, None).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let outcome = DownloadSession::builder()
        .config(
            fast_config(dir.path())
                .max_retries(n(1))
                .max_retry_rounds(n(3)),
        )
        .download(source(&playlist_uri)?, &output)
        .await?;

    let SessionOutcome::Completed(report) = outcome else {
        panic!("download was interrupted");
    };
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.retry_count, 2);
    assert_eq!(std::fs::read(&output)?, expected_output(0..5));

    Ok(())
}

#[tokio::test]
async fn test_rerun_is_idempotent() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(&media_playlist(6, "")).await;
    server.mock_segments::<Plain>(6, None).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");
    std::fs::write(&output, b"stale content from an earlier run, longer than nothing")?;

    let session = DownloadSession::builder()
        .config(fast_config(dir.path()).video_workers(n(6)))
        .build()?;
    session.download(source(&playlist_uri)?, &output).await?;
    let first = std::fs::read(&output)?;
    session.download(source(&playlist_uri)?, &output).await?;
    let second = std::fs::read(&output)?;

    assert_eq!(first, expected_output(0..6));
    assert_eq!(first, second);

    Ok(())
}

#[tokio::test]
async fn test_decrypt_failure_fail_fast() -> anyhow::Result<()> {
    let iv = [0x42; 16];
    let (playlist_uri, server) = setup_mock_server(&media_playlist(
        4,
        "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x42424242424242424242424242424242",
    ))
    .await;
    server.mock("/key.bin", KEY.to_vec()).await;
    // not a whole number of cipher blocks
    server.mock("/seg2.ts", b"broken".to_vec()).await;
    server.mock_segments(4, Some(|_| iv)).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let session = DownloadSession::builder()
        .config(fast_config(dir.path()).decrypt_failure(DecryptFailurePolicy::FailFast))
        .build()?;
    let result = session.download(source(&playlist_uri)?, &output).await;
    assert!(matches!(result, Err(GrabError::Decrypt { index: 2, .. })));

    // the summary is still produced for the aborted session
    let summary = session.last_summary().expect("summary of the aborted session");
    assert_eq!(summary.total_segments, 4);
    assert!(summary.segments_written < 4);
    assert_eq!(summary.retries, 0);

    // with retries the segment is just missing
    let result = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .download(source(&playlist_uri)?, &output)
        .await;
    assert!(matches!(
        result,
        Err(GrabError::IncompleteDownload { missing, .. }) if missing == vec![2]
    ));

    Ok(())
}

#[tokio::test]
async fn test_progress_observer() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(&media_playlist(4, "")).await;
    server.mock_segments::<Plain>(4, None).await;
    let dir = tempfile::tempdir()?;

    let progress = ProgressTracker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_inner = seen.clone();
    progress.register(move |update| seen_inner.lock().unwrap().push(update.percent));

    DownloadSession::builder()
        .config(fast_config(dir.path()))
        .progress(progress.clone())
        .track(TrackType::Audio)
        .download(source(&playlist_uri)?, dir.path().join("audio.ts"))
        .await?;

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last(), Some(&100));
    assert_eq!(progress.snapshot().downloaded, 4);

    Ok(())
}

#[tokio::test]
async fn test_download_from_manifest_text() -> anyhow::Result<()> {
    let server = wiremock::MockServer::start().await;
    server.mock("/vod/seg0.ts", segment_body(0)).await;
    server.mock("/vod/seg1.ts", segment_body(1)).await;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let outcome = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .download(
            ManifestSource::Text {
                text: media_playlist(2, ""),
                base: format!("{}/vod/", server.uri()).parse()?,
            },
            &output,
        )
        .await?;

    assert!(outcome.is_completed());
    assert_eq!(std::fs::read(&output)?, expected_output(0..2));

    Ok(())
}

#[tokio::test]
async fn test_empty_output_is_rejected() -> anyhow::Result<()> {
    let (playlist_uri, server) = setup_mock_server(&media_playlist(3, "")).await;
    for index in 0..3 {
        server.mock(&format!("/seg{index}.ts"), Vec::new()).await;
    }
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("output.ts");

    let result = DownloadSession::builder()
        .config(fast_config(dir.path()))
        .download(source(&playlist_uri)?, &output)
        .await;

    match result {
        Err(GrabError::OutputIntegrity { path, reason }) => {
            assert_eq!(path, output);
            assert_eq!(reason, "empty");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    Ok(())
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_write_failure_stops_downloads() -> anyhow::Result<()> {
    crate::init_logger();
    let (playlist_uri, server) = setup_mock_server(&media_playlist(20, "")).await;
    server.mock_segments::<Plain>(20, None).await;
    let dir = tempfile::tempdir()?;

    let session = DownloadSession::builder()
        .config(fast_config(dir.path()).video_workers(n(1)))
        .build()?;
    let result = session.download(source(&playlist_uri)?, "/dev/full").await;
    assert!(matches!(result, Err(GrabError::IOError(_))));

    let segment_requests = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().ends_with(".ts"))
        .count();
    assert!(
        segment_requests < 5,
        "{segment_requests} segments fetched after the writer failed"
    );

    let summary = session.last_summary().expect("summary of the failed session");
    assert_eq!(summary.segments_written, 0);
    assert_eq!(summary.total_segments, 20);

    Ok(())
}
