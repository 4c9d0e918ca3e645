mod direct;
mod gallery_dl;
mod handler;
mod http;
pub mod options;
mod types;
mod ytdlp;

pub use handler::Handler;
pub use options::{Overrides, Policy};
pub use types::{DownloadItem, FetchContext, ItemState, ItemStream, OptionSpec, Options};

use std::collections::HashMap;
use std::sync::Arc;

use direct::DirectHandler;
use gallery_dl::GalleryDlHandler;
use tracing::{debug, info};
use ytdlp::YtDlpHandler;

use crate::error::PluginError;
use crate::prompt::Prompter;

/// Built-in handlers in priority order.
pub fn registry() -> Vec<Arc<dyn Handler>> {
    vec![
        // direct links first, they need no external tooling
        Arc::new(DirectHandler::new()),
        Arc::new(GalleryDlHandler::new()),
        Arc::new(YtDlpHandler::new()),
    ]
}

/// The handlers claiming one URL, in registry order.
#[derive(Clone)]
pub struct Candidates {
    pub url: String,
    pub handlers: Vec<Arc<dyn Handler>>,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

/// A handler together with its negotiated options.
#[derive(Clone)]
pub struct Plugin {
    pub handler: Arc<dyn Handler>,
    pub options: Arc<Options>,
}

impl Plugin {
    pub fn name(&self) -> &'static str {
        self.handler.name()
    }

    pub fn concurrency_ceiling(&self) -> Option<usize> {
        self.handler.concurrency_ceiling(&self.options)
    }
}

pub struct PluginManager {
    handlers: Vec<Arc<dyn Handler>>,
    bundles: HashMap<&'static str, Arc<Options>>,
    prompter: Box<dyn Prompter>,
}

impl PluginManager {
    pub fn new(handlers: Vec<Arc<dyn Handler>>, prompter: Box<dyn Prompter>) -> Self {
        Self {
            handlers,
            bundles: HashMap::new(),
            prompter,
        }
    }

    pub fn handlers(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }

    pub fn find_handlers(&self, urls: &[String]) -> Vec<Candidates> {
        urls.iter()
            .map(|url| Candidates {
                url: url.clone(),
                handlers: self
                    .handlers
                    .iter()
                    .filter(|h| h.claims(url))
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    /// Negotiate options for every candidate. Handlers negotiated earlier
    /// keep their bundle.
    pub fn set_options(
        &mut self,
        candidates: &Candidates,
        overrides: &Overrides,
        policy: Policy,
    ) -> Result<(), PluginError> {
        for handler in &candidates.handlers {
            if self.bundles.contains_key(handler.name()) {
                continue;
            }

            let specs = handler.options();
            let options = options::negotiate(
                handler.name(),
                &specs,
                overrides,
                policy,
                self.prompter.as_ref(),
            )?;
            debug!(
                handler = handler.name(),
                options = options.len(),
                "Negotiated options"
            );
            self.bundles.insert(handler.name(), Arc::new(options));
        }

        for key in overrides.cli_keys() {
            let declared = candidates
                .handlers
                .iter()
                .any(|h| h.options().iter().any(|spec| spec.key == key));
            if !declared {
                debug!(key, url = %candidates.url, "Option not declared by any candidate");
            }
        }

        Ok(())
    }

    /// Pick the handler for a URL, asking the user when several claim it.
    ///
    /// The chosen handler must have gone through [`PluginManager::set_options`].
    pub fn select_plugin(&self, candidates: &Candidates) -> Result<Plugin, PluginError> {
        let handler = match candidates.handlers.as_slice() {
            [] => {
                return Err(PluginError::NoHandler {
                    url: candidates.url.clone(),
                })
            }
            [only] => only.clone(),
            many => {
                let names = candidates.names();
                let choice = self.prompter.choose(&candidates.url, &names)?;
                if choice == 0 || choice > many.len() {
                    return Err(PluginError::InvalidChoice {
                        choice,
                        count: many.len(),
                    });
                }
                info!("Using {} for {}", names[choice - 1], candidates.url);
                many[choice - 1].clone()
            }
        };

        let options = self
            .bundles
            .get(handler.name())
            .cloned()
            .ok_or_else(|| PluginError::NotNegotiated {
                handler: handler.name().to_string(),
            })?;
        Ok(Plugin { handler, options })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::HandlerError;
    use async_trait::async_trait;
    use futures::stream;

    /// Handler claiming URLs with a fixed prefix and resolving to nothing.
    pub struct PrefixHandler {
        pub name: &'static str,
        pub prefix: &'static str,
        pub specs: Vec<OptionSpec>,
    }

    impl PrefixHandler {
        pub fn new(name: &'static str, prefix: &'static str) -> Self {
            Self {
                name,
                prefix,
                specs: Vec::new(),
            }
        }

        pub fn with_options(mut self, specs: Vec<OptionSpec>) -> Self {
            self.specs = specs;
            self
        }
    }

    #[async_trait]
    impl Handler for PrefixHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        fn claims(&self, url: &str) -> bool {
            url.starts_with(self.prefix)
        }

        fn options(&self) -> Vec<OptionSpec> {
            self.specs.clone()
        }

        async fn resolve(&self, _url: &str, _options: &Options) -> Result<ItemStream, HandlerError> {
            Ok(Box::pin(stream::empty()))
        }

        async fn fetch(
            &self,
            _item: &DownloadItem,
            _ctx: &FetchContext<'_>,
        ) -> Result<u64, HandlerError> {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::PrefixHandler;
    use super::*;
    use crate::prompt::testing::ScriptedPrompter;

    fn manager(prompter: ScriptedPrompter) -> PluginManager {
        let user = OptionSpec::required("user", "Account name");
        PluginManager::new(
            vec![
                Arc::new(PrefixHandler::new("alpha", "https://a.")),
                Arc::new(PrefixHandler::new("beta", "https://").with_options(vec![user])),
                Arc::new(PrefixHandler::new("gamma", "https://a.")),
            ],
            Box::new(prompter),
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_registry_order() {
        let names: Vec<_> = registry().iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["direct", "gallery-dl", "yt-dlp"]);
    }

    #[test]
    fn test_find_handlers_keeps_registry_order() {
        let pm = manager(ScriptedPrompter::default());
        let found = pm.find_handlers(&urls(&["https://a.example", "https://b.example", "ftp://x"]));

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].names(), vec!["alpha", "beta", "gamma"]);
        assert_eq!(found[1].names(), vec!["beta"]);
        assert!(found[2].is_empty());
        assert_eq!(found[2].url, "ftp://x");
    }

    #[test]
    fn test_select_single_candidate_without_prompt() {
        let prompter = ScriptedPrompter::with_answers(&["alice"]);
        let mut pm = manager(prompter);
        let found = pm.find_handlers(&urls(&["https://b.example"]));
        pm.set_options(&found[0], &Overrides::default(), Policy::default())
            .unwrap();

        let plugin = pm.select_plugin(&found[0]).unwrap();
        assert_eq!(plugin.name(), "beta");
        assert_eq!(plugin.options.get("user"), Some("alice"));
    }

    #[test]
    fn test_select_among_many_by_index() {
        let mut pm = manager(ScriptedPrompter::with_choices(&[3]));
        let found = pm.find_handlers(&urls(&["https://a.example"]));
        pm.set_options(
            &found[0],
            &Overrides::new(HashMap::from([("user".to_string(), "x".to_string())])),
            Policy::default(),
        )
        .unwrap();

        let plugin = pm.select_plugin(&found[0]).unwrap();
        assert_eq!(plugin.name(), "gamma");
    }

    #[test]
    fn test_select_out_of_range_choice() {
        for choice in [0, 4] {
            let pm = manager(ScriptedPrompter::with_choices(&[choice]));
            let found = pm.find_handlers(&urls(&["https://a.example"]));
            let err = pm.select_plugin(&found[0]).err().unwrap();
            assert!(matches!(err, PluginError::InvalidChoice { count: 3, .. }));
        }
    }

    #[test]
    fn test_select_empty_candidates() {
        let pm = manager(ScriptedPrompter::default());
        let found = pm.find_handlers(&urls(&["ftp://nothing"]));
        let err = pm.select_plugin(&found[0]).err().unwrap();
        assert!(matches!(err, PluginError::NoHandler { url } if url == "ftp://nothing"));
    }

    #[test]
    fn test_set_options_fails_for_any_candidate() {
        let mut pm = manager(ScriptedPrompter::default());
        let found = pm.find_handlers(&urls(&["https://a.example"]));
        let policy = Policy {
            use_defaults: true,
            no_prompt: true,
        };
        let err = pm
            .set_options(&found[0], &Overrides::default(), policy)
            .unwrap_err();
        assert!(matches!(err, PluginError::MissingOption { key, .. } if key == "user"));
    }

    #[test]
    fn test_set_options_negotiates_each_handler_once() {
        let prompter = ScriptedPrompter::with_answers(&["alice", "bob"]);
        let mut pm = manager(prompter);
        let found = pm.find_handlers(&urls(&["https://a.example", "https://b.example"]));
        for candidates in &found {
            pm.set_options(candidates, &Overrides::default(), Policy::default())
                .unwrap();
        }

        let plugin = pm.select_plugin(&found[1]).unwrap();
        assert_eq!(plugin.options.get("user"), Some("alice"));
    }

    #[test]
    fn test_select_requires_negotiated_options() {
        let pm = manager(ScriptedPrompter::default());
        let found = pm.find_handlers(&urls(&["https://b.example"]));
        let err = pm.select_plugin(&found[0]).err().unwrap();
        assert!(matches!(err, PluginError::NotNegotiated { handler } if handler == "beta"));
    }
}
