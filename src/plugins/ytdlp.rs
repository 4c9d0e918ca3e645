use super::{
    handler::Handler,
    http,
    types::{DownloadItem, FetchContext, ItemStream, OptionSpec, Options},
};
use crate::error::HandlerError;
use crate::utils::path_component;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};
use url::Url;

const LISTING_LINE_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct YtDlpHandler;

impl YtDlpHandler {
    pub fn new() -> Self {
        Self
    }
}

fn add_auth_args(command: &mut Command, options: &Options) {
    if let Some(username) = options.get("username") {
        command.arg("--username").arg(username);
    }
    if let Some(password) = options.get("password") {
        command.arg("--password").arg(password);
    }
}

fn parse_entry(line: &str, fallback_url: &str) -> Result<DownloadItem> {
    let json: Value = serde_json::from_str(line).context("Failed to parse media metadata")?;

    // The real extension is only known once yt-dlp has picked a format.
    let id = path_component(json["id"].as_str().unwrap_or_default(), "video");
    let ext = path_component(json["ext"].as_str().unwrap_or_default(), "mp4");
    let source = json["webpage_url"]
        .as_str()
        .or(json["url"].as_str())
        .unwrap_or(fallback_url);

    let mut item = DownloadItem::new(source, format!("{id}.{ext}"));
    if let Some(title) = json["title"].as_str() {
        item.name = title.to_string();
    }
    Ok(item)
}

/// `-o` template placing the file next to `destination` with whatever
/// extension the chosen format has.
fn output_template(destination: &Path) -> PathBuf {
    destination.with_extension("%(ext)s")
}

/// Final path printed by `--print after_move:filepath`.
fn printed_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Where yt-dlp actually wrote `item`, relative to `directory`.
fn saved_path(directory: &Path, item: &DownloadItem, printed: &Path) -> PathBuf {
    match printed.strip_prefix(directory) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => match printed.file_name() {
            Some(name) => item.path.with_file_name(name),
            None => item.path.clone(),
        },
    }
}

/// Entries printed by `yt-dlp --flat-playlist --dump-json`, one per line,
/// read as the process produces them.
struct Listing {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    url: String,
    finished: bool,
}

impl Listing {
    fn spawn(url: &str, options: &Options) -> Result<Self> {
        let mut command = Command::new("yt-dlp");
        command
            .arg("--flat-playlist")
            .arg("--dump-json")
            .arg("--no-warnings");
        add_auth_args(&mut command, options);
        command
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().context("Failed to spawn yt-dlp")?;
        let stdout = child
            .stdout
            .take()
            .context("Failed to get yt-dlp stdout")?;

        Ok(Self {
            lines: BufReader::new(stdout).lines(),
            child,
            url: url.to_string(),
            finished: false,
        })
    }

    async fn next_item(&mut self) -> Option<Result<DownloadItem>> {
        if self.finished {
            return None;
        }

        loop {
            let line = match tokio::time::timeout(LISTING_LINE_TIMEOUT, self.lines.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e).context("Failed to read yt-dlp output"));
                }
                Err(_) => {
                    self.finished = true;
                    return Some(Err(anyhow::anyhow!("Media listing timed out")));
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            debug!("yt-dlp entry: {}", line);
            return Some(parse_entry(&line, &self.url));
        }

        self.finished = true;
        match self.child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) => Some(Err(anyhow::anyhow!("yt-dlp exited with {}", status))),
            Err(e) => Some(Err(e).context("Failed to wait for yt-dlp")),
        }
    }
}

#[async_trait]
impl Handler for YtDlpHandler {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn claims(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
            .unwrap_or(false)
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("format", "yt-dlp format selector").with_default("best"),
            OptionSpec::optional("username", "Account username"),
            OptionSpec::optional("password", "Account password"),
        ]
    }

    // Video sites throttle parallel downloads aggressively.
    fn concurrency_ceiling(&self, _options: &Options) -> Option<usize> {
        Some(1)
    }

    async fn resolve(&self, url: &str, options: &Options) -> Result<ItemStream, HandlerError> {
        let mut listing = Listing::spawn(url, options)?;

        // The first entry decides whether the URL resolves at all.
        let first = match listing.next_item().await {
            Some(item) => item?,
            None => return Err(anyhow::anyhow!("No media found for this URL").into()),
        };
        info!("yt-dlp is listing entries for {}", url);

        let rest = stream::unfold(listing, |mut listing| async move {
            listing
                .next_item()
                .await
                .map(|item| (item.map_err(HandlerError::from), listing))
        });

        Ok(stream::once(async move { Ok(first) }).chain(rest).boxed())
    }

    async fn fetch(&self, item: &DownloadItem, ctx: &FetchContext<'_>) -> Result<u64, HandlerError> {
        let destination = ctx.destination(item);
        http::ensure_parent(&destination).await?;

        info!("Downloading media with yt-dlp: {}", item.name);
        let mut command = Command::new("yt-dlp");
        command
            .arg("--format")
            .arg(ctx.options.get_or("format", "best"))
            .arg("--output")
            .arg(output_template(&destination))
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--no-progress")
            .arg("--no-playlist")
            .arg("--no-warnings");
        add_auth_args(&mut command, ctx.options);
        command.arg(&item.source).kill_on_drop(true);

        let output = tokio::time::timeout(DOWNLOAD_TIMEOUT, command.output())
            .await
            .context("Media download timed out")?
            .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("Media download failed: {}", error.trim()).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let relative = match printed_path(&stdout) {
            Some(printed) => saved_path(ctx.directory, item, &printed),
            None => item.path.clone(),
        };
        let written = ctx.directory.join(&relative);

        let size = tokio::fs::metadata(&written)
            .await
            .with_context(|| format!("yt-dlp did not write {}", written.display()))?
            .len();
        if relative != item.path {
            debug!("yt-dlp saved {} as {}", item.name, relative.display());
            ctx.saved_as(relative);
        }
        ctx.add_bytes(size);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playlist_entry() {
        let line = r#"{"id": "abc123", "title": "First video", "url": "https://example.com/v/abc123", "filesize_approx": 2048}"#;
        let item = parse_entry(line, "https://example.com/list").unwrap();
        assert_eq!(item.name, "First video");
        assert_eq!(item.source, "https://example.com/v/abc123");
        assert_eq!(item.path.to_str(), Some("abc123.mp4"));
    }

    #[test]
    fn test_parse_entry_keeps_path_inside_directory() {
        let line = r#"{"id": "../../../etc/cron", "ext": "/sh", "url": "https://example.com/v/1"}"#;
        let item = parse_entry(line, "https://example.com/list").unwrap();
        assert!(item.has_contained_path());
        assert_eq!(item.path.to_str(), Some(".._.._.._etc_cron._sh"));
    }

    #[test]
    fn test_output_template_lets_yt_dlp_pick_extension() {
        let template = output_template(Path::new("/srv/media/abc123.mp4"));
        assert_eq!(template, PathBuf::from("/srv/media/abc123.%(ext)s"));
        let template = output_template(Path::new("downloads/v1.2.mp4"));
        assert_eq!(template, PathBuf::from("downloads/v1.2.%(ext)s"));
    }

    #[test]
    fn test_saved_path_follows_printed_file() {
        let item = DownloadItem::new("https://example.com/v/abc", "abc.mp4");
        let stdout = "[download] 100%\n/srv/media/abc.webm\n\n";
        let printed = printed_path(stdout).unwrap();
        assert_eq!(printed, PathBuf::from("/srv/media/abc.webm"));
        assert_eq!(
            saved_path(Path::new("/srv/media"), &item, &printed),
            PathBuf::from("abc.webm")
        );
        assert_eq!(
            saved_path(Path::new("downloads"), &item, Path::new("/elsewhere/abc.mkv")),
            PathBuf::from("abc.mkv")
        );
        assert_eq!(printed_path("  \n"), None);
    }

    #[test]
    fn test_parse_single_video_prefers_webpage_url() {
        let line = r#"{"id": "xyz", "ext": "webm", "webpage_url": "https://example.com/watch?v=xyz", "url": "https://cdn.example.com/stream"}"#;
        let item = parse_entry(line, "https://example.com/watch?v=xyz").unwrap();
        assert_eq!(item.source, "https://example.com/watch?v=xyz");
        assert_eq!(item.path.to_str(), Some("xyz.webm"));
        assert_eq!(item.name, "xyz.webm");
    }

    #[test]
    fn test_parse_entry_rejects_garbage() {
        assert!(parse_entry("not json", "https://example.com").is_err());
    }

    #[test]
    fn test_always_serial() {
        let handler = YtDlpHandler::new();
        let options: Options = [("format", "worst")].into_iter().collect();
        assert_eq!(handler.concurrency_ceiling(&options), Some(1));
    }

    #[tokio::test]
    #[ignore] // Requires yt-dlp to be installed
    async fn test_resolve_real_video() {
        let handler = YtDlpHandler::new();
        let result = handler
            .resolve("https://www.youtube.com/watch?v=jNQXAC9IVRw", &Options::new())
            .await;
        assert!(result.is_ok());
    }
}
