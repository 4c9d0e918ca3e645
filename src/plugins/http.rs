use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::types::{DownloadItem, FetchContext};

const USER_AGENT: &str = concat!("sitegrab/", env!("CARGO_PKG_VERSION"));

pub fn client(user_agent: Option<&str>) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent.unwrap_or(USER_AGENT))
        .connect_timeout(Duration::from_secs(30))
        .read_timeout(Duration::from_secs(60))
        .build()
        .context("Failed to create HTTP client")
}

/// Streams `item.source` into its destination, reporting bytes as they land.
pub async fn save_to_file(
    client: &reqwest::Client,
    item: &DownloadItem,
    ctx: &FetchContext<'_>,
) -> Result<u64> {
    let destination = ctx.destination(item);
    debug!("Downloading {} to {}", item.source, destination.display());

    let mut response = client
        .get(&item.source)
        .send()
        .await
        .context("Failed to fetch URL")?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "Failed to download {}: HTTP {}",
            item.name,
            response.status()
        ));
    }

    ensure_parent(&destination).await?;
    let file = tokio::fs::File::create(&destination)
        .await
        .with_context(|| format!("Failed to create {}", destination.display()))?;

    match write_body(&mut response, file, ctx).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(remove) = tokio::fs::remove_file(&destination).await {
                warn!("Failed to remove partial {}: {}", destination.display(), remove);
            }
            Err(e)
        }
    }
}

async fn write_body(
    response: &mut reqwest::Response,
    mut file: tokio::fs::File,
    ctx: &FetchContext<'_>,
) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await.context("Failed to read body")? {
        file.write_all(&chunk)
            .await
            .context("Failed to write file")?;
        written += chunk.len() as u64;
        ctx.add_bytes(chunk.len() as u64);
    }
    file.flush().await.context("Failed to flush file")?;

    Ok(written)
}

pub async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}
