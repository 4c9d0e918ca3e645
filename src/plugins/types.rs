use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::stream::BoxStream;

use crate::error::HandlerError;

/// Lazy, finite sequence of items discovered while resolving a URL.
pub type ItemStream = BoxStream<'static, Result<DownloadItem, HandlerError>>;

/// A configuration option declared by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub description: &'static str,
    pub default: Option<&'static str>,
    pub required: bool,
}

impl OptionSpec {
    pub const fn required(key: &'static str, description: &'static str) -> Self {
        Self {
            key,
            description,
            default: None,
            required: true,
        }
    }

    pub const fn optional(key: &'static str, description: &'static str) -> Self {
        Self {
            key,
            description,
            default: None,
            required: false,
        }
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// Finalized option values bound to a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(BTreeMap<String, String>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value for `key`, falling back to the handler's implicit default.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Interprets the option as a boolean flag. Unset counts as `false`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(str::to_ascii_lowercase).as_deref(),
            Some("true" | "yes" | "1" | "on")
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    InProgress,
    Done { bytes: u64 },
    Failed { reason: String },
}

/// One fetchable unit produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    /// Display name used in logs and progress output.
    pub name: String,
    /// Where the handler fetches the item from.
    pub source: String,
    /// Destination, relative to the output directory.
    pub path: PathBuf,
    pub state: ItemState,
}

impl DownloadItem {
    pub fn new(source: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            name,
            source: source.into(),
            path,
            state: ItemState::Pending,
        }
    }

    /// True when `path` is relative and never leaves the output directory.
    pub fn has_contained_path(&self) -> bool {
        let mut components = self.path.components().peekable();
        components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ItemState::Done { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, ItemState::Failed { .. })
    }
}

impl fmt::Display for DownloadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.source)
    }
}

/// Everything a handler needs while fetching a single item.
pub struct FetchContext<'a> {
    pub options: &'a Options,
    pub directory: &'a Path,
    bytes: &'a AtomicU64,
    saved_as: Mutex<Option<PathBuf>>,
}

impl<'a> FetchContext<'a> {
    pub fn new(options: &'a Options, directory: &'a Path, bytes: &'a AtomicU64) -> Self {
        Self {
            options,
            directory,
            bytes,
            saved_as: Mutex::new(None),
        }
    }

    /// Absolute destination of `item`.
    pub fn destination(&self, item: &DownloadItem) -> PathBuf {
        self.directory.join(&item.path)
    }

    /// Reports freshly written bytes for throughput accounting.
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Records that the item ended up at `path`, relative to the output
    /// directory, instead of where it was announced.
    pub fn saved_as(&self, path: PathBuf) {
        *self.saved_as.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
    }

    pub(crate) fn take_saved_path(&self) -> Option<PathBuf> {
        self.saved_as
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_lookup() {
        let options: Options = [("quality", "high"), ("serial", "Yes")].into_iter().collect();
        assert_eq!(options.get("quality"), Some("high"));
        assert_eq!(options.get_or("missing", "fallback"), "fallback");
        assert!(options.flag("serial"));
        assert!(!options.flag("quality"));
        assert!(!options.flag("missing"));
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn test_download_item_name_from_path() {
        let item = DownloadItem::new("https://example.com/a/b.jpg", "album/b.jpg");
        assert_eq!(item.name, "b.jpg");
        assert_eq!(item.state, ItemState::Pending);
        assert!(!item.is_done());
    }

    #[test]
    fn test_fetch_context_destination_and_bytes() {
        let options = Options::new();
        let bytes = AtomicU64::new(0);
        let ctx = FetchContext::new(&options, Path::new("/tmp/out"), &bytes);
        let item = DownloadItem::new("src", "x/y.bin");
        assert_eq!(ctx.destination(&item), PathBuf::from("/tmp/out/x/y.bin"));
        ctx.add_bytes(10);
        ctx.add_bytes(5);
        assert_eq!(bytes.load(Ordering::Relaxed), 15);

        assert_eq!(ctx.take_saved_path(), None);
        ctx.saved_as(PathBuf::from("x/y.webm"));
        assert_eq!(ctx.take_saved_path(), Some(PathBuf::from("x/y.webm")));
        assert_eq!(ctx.take_saved_path(), None);
    }

    #[test]
    fn test_contained_paths() {
        let contained = |path: &str| DownloadItem::new("src", path).has_contained_path();
        assert!(contained("a.png"));
        assert!(contained("imgur/a_1.png"));
        assert!(!contained("/tmp/x_1.png"));
        assert!(!contained("imgur/../../../etc/cron_2.png"));
        assert!(!contained("../a.png"));
        assert!(!contained("./a.png"));
        assert!(!contained(""));
    }
}
