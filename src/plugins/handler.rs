use super::types::{DownloadItem, FetchContext, ItemStream, OptionSpec, Options};
use crate::error::HandlerError;
use async_trait::async_trait;

#[async_trait]
pub trait Handler: Send + Sync {
    /// Human-readable name of the handler
    fn name(&self) -> &'static str;

    /// Whether this handler is willing to service the URL
    fn claims(&self, url: &str) -> bool;

    /// Options this handler understands, in prompting order
    fn options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    /// Hard upper bound on concurrent fetches, if the site needs one.
    /// `None` means no ceiling.
    fn concurrency_ceiling(&self, _options: &Options) -> Option<usize> {
        None
    }

    /// Resolve the URL into the items it contains
    async fn resolve(&self, url: &str, options: &Options) -> Result<ItemStream, HandlerError>;

    /// Fetch a single item into the output directory, returning the number
    /// of bytes written
    async fn fetch(&self, item: &DownloadItem, ctx: &FetchContext<'_>)
        -> Result<u64, HandlerError>;
}
