use super::{
    handler::Handler,
    http,
    types::{DownloadItem, FetchContext, ItemStream, OptionSpec, Options},
};
use crate::error::HandlerError;
use async_trait::async_trait;
use futures::stream;
use tokio::sync::OnceCell;
use url::Url;

/// Plain HTTP download of a URL pointing straight at a file.
pub struct DirectHandler {
    // Options are negotiated once per handler, so one client serves every item.
    client: OnceCell<reqwest::Client>,
}

impl DirectHandler {
    pub fn new() -> Self {
        Self {
            client: OnceCell::new(),
        }
    }

    async fn client(&self, options: &Options) -> anyhow::Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async { http::client(options.get("user-agent")) })
            .await
    }

    fn file_name(url: &Url) -> Option<String> {
        let segment = url.path_segments()?.next_back()?;
        let (stem, ext) = segment.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(segment.to_string())
    }
}

#[async_trait]
impl Handler for DirectHandler {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn claims(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .and_then(|u| Self::file_name(&u))
            .is_some()
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![OptionSpec::optional(
            "user-agent",
            "User-Agent header sent with requests",
        )]
    }

    async fn resolve(&self, url: &str, _options: &Options) -> Result<ItemStream, HandlerError> {
        let parsed = Url::parse(url).map_err(|_| HandlerError::Unsupported(url.to_string()))?;
        let name = Self::file_name(&parsed).ok_or_else(|| HandlerError::Unsupported(url.to_string()))?;

        let item = DownloadItem::new(url, name);
        Ok(Box::pin(stream::iter([Ok(item)])))
    }

    async fn fetch(&self, item: &DownloadItem, ctx: &FetchContext<'_>) -> Result<u64, HandlerError> {
        let client = self.client(ctx.options).await?;
        Ok(http::save_to_file(client, item, ctx).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_claims_file_urls_only() {
        let handler = DirectHandler::new();
        assert!(handler.claims("https://example.com/files/archive.tar.gz"));
        assert!(handler.claims("http://example.com/image.jpg?size=large"));
        assert!(!handler.claims("https://example.com/gallery/"));
        assert!(!handler.claims("https://example.com/watch"));
        assert!(!handler.claims("ftp://example.com/file.zip"));
        assert!(!handler.claims("not a url"));
    }

    #[tokio::test]
    async fn test_resolve_single_item() {
        let handler = DirectHandler::new();
        let mut items = handler
            .resolve("https://example.com/a/b/photo.png", &Options::new())
            .await
            .unwrap();

        let item = items.next().await.unwrap().unwrap();
        assert_eq!(item.name, "photo.png");
        assert_eq!(item.source, "https://example.com/a/b/photo.png");
        assert!(items.next().await.is_none());
    }
}
