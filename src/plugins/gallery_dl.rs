use super::{
    handler::Handler,
    http,
    types::{DownloadItem, FetchContext, ItemStream, OptionSpec, Options},
};
use crate::error::HandlerError;
use crate::utils::path_component;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

pub struct GalleryDlHandler {
    client: OnceCell<reqwest::Client>,
}

impl GalleryDlHandler {
    pub fn new() -> Self {
        Self {
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client> {
        self.client.get_or_try_init(|| async { http::client(None) }).await
    }

    async fn dump_json(&self, url: &str, options: &Options) -> Result<Value> {
        debug!("Extracting media listing with gallery-dl for: {}", url);

        let mut command = tokio::process::Command::new("gallery-dl");
        command.arg("--dump-json");
        if let Some(cookies) = options.get("cookies") {
            command.arg("--cookies").arg(cookies);
        }
        command.arg(url);

        let output = tokio::time::timeout(std::time::Duration::from_secs(60), command.output())
            .await
            .context("Media listing timed out")?
            .context("Failed to run gallery-dl")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("Media listing failed: {}", error.trim()));
        }

        serde_json::from_slice(&output.stdout).context("Failed to parse media listing")
    }
}

/// Turns gallery-dl's `[[type, metadata], [type, url, metadata], ...]` dump
/// into items named `<category>/<id>_<n>.<ext>`.
fn parse_listing(listing: &Value) -> Result<Vec<DownloadItem>> {
    let array = listing
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid media listing format"))?;

    let mut items = Vec::new();
    for entry in array {
        let Some([_, url, meta]) = entry.as_array().map(Vec::as_slice) else {
            continue;
        };
        let Some(url) = url.as_str() else {
            continue;
        };

        let index = items.len() + 1;
        let id = meta["id"]
            .as_str()
            .map(str::to_string)
            .or_else(|| meta["id"].as_u64().map(|n| n.to_string()))
            .or_else(|| meta["filename"].as_str().map(str::to_string))
            .unwrap_or_default();
        let id = path_component(&id, "media");
        let ext = path_component(meta["extension"].as_str().unwrap_or_default(), "jpg");
        let category = path_component(meta["category"].as_str().unwrap_or_default(), "gallery");

        let path = format!("{category}/{id}_{index}.{ext}");
        items.push(DownloadItem::new(url, path));
    }

    Ok(items)
}

#[async_trait]
impl Handler for GalleryDlHandler {
    fn name(&self) -> &'static str {
        "gallery-dl"
    }

    fn claims(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
            .unwrap_or(false)
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("cookies", "Path to a Netscape cookies file"),
            OptionSpec::optional("serial", "Download one file at a time (true/false)")
                .with_default("false"),
        ]
    }

    fn concurrency_ceiling(&self, options: &Options) -> Option<usize> {
        options.flag("serial").then_some(1)
    }

    async fn resolve(&self, url: &str, options: &Options) -> Result<ItemStream, HandlerError> {
        let listing = self.dump_json(url, options).await?;
        let items = parse_listing(&listing)?;
        if items.is_empty() {
            return Err(anyhow::anyhow!("No media found for this URL").into());
        }

        info!("Found {} media files with gallery-dl", items.len());
        Ok(Box::pin(stream::iter(items.into_iter().map(Ok))))
    }

    async fn fetch(&self, item: &DownloadItem, ctx: &FetchContext<'_>) -> Result<u64, HandlerError> {
        let client = self.client().await?;
        Ok(http::save_to_file(client, item, ctx).await?)
    }
}
