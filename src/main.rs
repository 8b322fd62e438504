use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use libris::api::{ApiClient, HttpTransport, SessionToken};
use libris::cache::{CacheConfig, CacheContext};
use libris::config::Config;
use libris::event::EventHandler;
use libris::logging;
use libris::shell::Shell;

#[derive(Parser, Debug)]
#[command(name = "libris")]
#[command(about = "A terminal admin client for the library service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/libris/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Service root URL, overrides `api.base_url`
  #[arg(short, long)]
  base_url: Option<String>,

  /// Run one command and exit instead of starting the shell
  #[arg(trailing_var_arg = true)]
  command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }
  info!(base_url = %config.api.base_url, "starting");

  let transport = Arc::new(HttpTransport::new(&config.api)?);
  let tokens = Arc::new(SessionToken::new(Config::get_api_token()));
  let client = ApiClient::new(transport, tokens.clone());
  let cache = CacheContext::new(client, CacheConfig::from(&config.cache));

  if args.command.is_empty() {
    let mut shell = Shell::new(cache, tokens, EventHandler::new());
    shell.run().await
  } else {
    let mut shell = Shell::new(cache, tokens, EventHandler::detached());
    shell.run_once(&args.command.join(" ")).await
  }
}
