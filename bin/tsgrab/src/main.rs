use std::{num::NonZeroU32, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use fake_user_agent::get_chrome_rua;
use tsgrab::{
    CancellationToken, DecryptFailurePolicy, DownloadConfig, DownloadSession, HttpClient,
    ManifestSource, MissingIvPolicy, ProgressTracker, SessionOutcome, TrackType,
};

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct TsgrabArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Load download settings from a JSON file. Flags given on the command line win.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Download with the audio worker pool
    #[clap(long)]
    audio: bool,

    /// Threads limit
    #[clap(long)]
    threads: Option<NonZeroU32>,

    /// Attempts per segment in each round
    #[clap(long)]
    retries: Option<NonZeroU32>,

    /// Rounds over the failed segments
    #[clap(long)]
    rounds: Option<NonZeroU32>,

    /// Request timeout in seconds
    #[clap(long)]
    timeout: Option<f64>,

    /// File with one proxy URL per line
    #[clap(long)]
    proxy_list: Option<PathBuf>,

    /// Skip TLS certificate verification
    #[clap(long)]
    insecure: bool,

    /// Refuse encrypted manifests that do not declare an IV
    #[clap(long)]
    strict_iv: bool,

    /// Abort on the first segment that fails to decrypt
    #[clap(long)]
    fail_fast_decrypt: bool,

    /// Cookies used to download
    #[clap(long)]
    cookies: Option<String>,

    /// HTTP Header used to download
    ///
    /// Custom header. eg. "Referer: https://example.com/".
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Treat INPUT as a local manifest file, resolving relative URIs against --base
    #[clap(long, requires = "base")]
    file: bool,

    /// Base URL for a local manifest
    #[clap(long)]
    base: Option<String>,

    /// Output file path
    #[clap(short, long, default_value = "./output.ts")]
    output: PathBuf,

    /// Progress display
    #[clap(long, value_enum, default_value_t = ProgressStyle::Log)]
    progress: ProgressStyle,

    /// m3u8 url, or manifest path with --file
    input: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressStyle {
    Log,
    Quiet,
}

impl TsgrabArgs {
    fn download_config(&self) -> anyhow::Result<DownloadConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                DownloadConfig::from_json(&json)?
            }
            None => DownloadConfig::default(),
        };

        if let Some(threads) = self.threads {
            config = config.video_workers(threads).audio_workers(threads);
        }
        if let Some(retries) = self.retries {
            config = config.max_retries(retries);
        }
        if let Some(rounds) = self.rounds {
            config = config.max_retry_rounds(rounds);
        }
        if let Some(timeout) = self.timeout {
            config = config.timeout(Duration::try_from_secs_f64(timeout)?);
        }
        if let Some(proxy_list) = &self.proxy_list {
            config = config.proxy_list(proxy_list);
        }
        if self.insecure {
            config = config.verify_tls(false);
        }
        if self.strict_iv {
            config = config.missing_iv(MissingIvPolicy::Reject);
        }
        if self.fail_fast_decrypt {
            config = config.decrypt_failure(DecryptFailurePolicy::FailFast);
        }
        if config.user_agent.is_none() {
            config = config.user_agent(get_chrome_rua());
        }
        for header in &self.headers {
            let Some((name, value)) = header.split_once(':') else {
                bail!("Invalid header: {header}");
            };
            config = config.header(name.trim(), value.trim());
        }

        Ok(config)
    }

    fn source(&self) -> anyhow::Result<ManifestSource> {
        if self.file {
            let text = std::fs::read_to_string(&self.input)
                .with_context(|| format!("Failed to read {}", self.input))?;
            let base = self.base.as_deref().unwrap_or_default().parse()?;
            Ok(ManifestSource::Text { text, base })
        } else {
            Ok(ManifestSource::Url(self.input.parse()?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TsgrabArgs::parse();
    if args.verbose {
        std::env::set_var("RUST_LOG", "debug");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let config = args.download_config()?;
    let source = args.source()?;

    let client = HttpClient::from_config(&config)?;
    if let Some(cookies) = &args.cookies {
        let cookies = cookies.split(';').map(|c| c.trim().to_string()).collect();
        client.add_cookies(cookies, source.base().clone())?;
    }

    let progress = ProgressTracker::new();
    if args.progress == ProgressStyle::Log {
        progress.register(|update| match update.status {
            Some(status) => log::info!("Progress: {}% ({})", update.percent, status.as_str()),
            None => log::debug!(
                "Progress: {}% ({} / {})",
                update.percent,
                update.downloaded,
                update.total
            ),
        });
    }

    // ctrl-c handler
    let cancel = CancellationToken::new();
    let cancel_inner = cancel.clone();
    let ctrlc_handler = tokio::spawn(async move {
        // wait for the first ctrl-c to stop downloader
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, stopping downloader.");
            cancel_inner.cancel();
        }

        // wait for the second ctrl-c to force exit
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received again, force exit.");
            std::process::exit(1);
        }
    });

    let track = if args.audio {
        TrackType::Audio
    } else {
        TrackType::Video
    };
    let outcome = DownloadSession::builder()
        .config(config)
        .client(client)
        .progress(progress)
        .cancel(cancel)
        .track(track)
        .download(source, args.output.clone())
        .await;
    ctrlc_handler.abort();

    match outcome? {
        SessionOutcome::Completed(report) => {
            log::info!(
                "All finished. Please checkout your files at {} ({} track, {:.1}%, {} failed, {} retries)",
                args.output.display(),
                report.track,
                report.completion_percent,
                report.failed_count,
                report.retry_count
            );
        }
        SessionOutcome::Interrupted(report) => {
            log::warn!(
                "Interrupted after {}/{} segments; {} bytes kept in {}",
                report.segments_written,
                report.total_segments,
                report.bytes_written,
                args.output.display()
            );
        }
    }

    Ok(())
}
