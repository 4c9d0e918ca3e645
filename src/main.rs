use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use sitegrab::app::{self, Settings};
use sitegrab::config::{self, Config, LogFormat};
use sitegrab::plugins::{self, Overrides, PluginManager, Policy};
use sitegrab::prompt::ConsolePrompter;
use tracing::{error, info};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "A downloader for various sites and services", long_about = None)]
struct Args {
    /// URLs to download
    #[arg(required_unless_present = "list")]
    urls: Vec<String>,

    /// Options in a key=value format passed to handlers
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    options: Vec<(String, String)>,

    /// The number of workers to use [default: 10]
    #[arg(short, long, value_parser = parse_workers)]
    workers: Option<usize>,

    /// Display debug messages
    #[arg(short, long)]
    verbose: bool,

    /// Use default values for options whenever possible
    #[arg(short, long)]
    defaults: bool,

    /// Never prompt for options, fail if a required option is left unset
    #[arg(short, long)]
    no_prompt: bool,

    /// ZIP the files after the download finishes
    #[arg(short, long)]
    zip: bool,

    /// The directory in which to save the downloaded files [default: downloads]
    #[arg(short = 'D', long)]
    directory: Option<PathBuf>,

    /// Ignore handler limits such as forced worker counts
    #[arg(long = "override", hide = true)]
    override_limits: bool,

    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List the available handlers and their options
    #[arg(long)]
    list: bool,
}

fn parse_option(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err("Invalid option format. Should be key=value.".to_string()),
    }
}

fn parse_workers(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("at least one worker is required".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init(),
    }
}

fn print_handlers(pm: &PluginManager) {
    for handler in pm.handlers() {
        println!("{}", handler.name());
        for spec in handler.options() {
            let mut line = format!("    {:<12} {}", spec.key, spec.description);
            if spec.required {
                line.push_str(" (required)");
            }
            if let Some(default) = spec.default {
                line.push_str(&format!(" [default: {default}]"));
            }
            println!("{line}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match config::find_config_path(args.config.as_deref()) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    init_logging(args.verbose, config.get_logging_format());

    let mut pm = PluginManager::new(plugins::registry(), Box::new(ConsolePrompter));
    if args.list {
        print_handlers(&pm);
        return Ok(ExitCode::SUCCESS);
    }

    let settings = Settings {
        workers: args.workers.unwrap_or_else(|| config.workers()),
        directory: args.directory.unwrap_or_else(|| config.directory()),
        zip: args.zip,
        override_limits: args.override_limits,
    };
    let overrides = Overrides::new(args.options.into_iter().collect()).with_presets(config.presets());
    let policy = Policy {
        use_defaults: args.defaults,
        no_prompt: args.no_prompt,
    };

    let outcomes = app::run(&mut pm, &args.urls, &overrides, policy, &settings).await;
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();

    if failed > 0 {
        error!("{} of {} URLs failed", failed, outcomes.len());
        return Ok(ExitCode::FAILURE);
    }
    if outcomes.len() > 1 {
        info!("All {} URLs processed", outcomes.len());
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("user=alice").unwrap(),
            ("user".to_string(), "alice".to_string())
        );
        assert_eq!(
            parse_option("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_option("empty=").unwrap().1, "");
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=x").is_err());
    }

    #[test]
    fn test_parse_workers() {
        assert_eq!(parse_workers("4"), Ok(4));
        assert!(parse_workers("0").is_err());
        assert!(parse_workers("many").is_err());
    }

    #[test]
    fn test_args_shape() {
        let args = Args::try_parse_from([
            "sitegrab", "-o", "user=alice", "-d", "-w", "3", "-z", "-D", "out", "--override",
            "https://example.com/a.jpg",
        ])
        .unwrap();
        assert_eq!(args.options, vec![("user".to_string(), "alice".to_string())]);
        assert!(args.defaults && args.zip && args.override_limits);
        assert_eq!(args.workers, Some(3));
        assert_eq!(args.directory, Some(PathBuf::from("out")));
        assert_eq!(args.urls, vec!["https://example.com/a.jpg"]);

        assert!(Args::try_parse_from(["sitegrab"]).is_err());
        assert!(Args::try_parse_from(["sitegrab", "--list"]).is_ok());
    }
}
