use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use tagcache::api;
use tagcache::cache::{QueryClient, RequestSignature};
use tagcache::config::Config;
use tagcache::logging;
use tagcache::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "tagcache")]
#[command(about = "Query a project-management API through a tagged cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tagcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List registered query and mutation endpoints
  Endpoints,
  /// Run a query through the cache and print its data
  Query {
    endpoint: String,
    /// JSON argument, e.g. '{"organizationId":"O1"}'
    arg: String,
  },
  /// Run a mutation and print its result and invalidated tags
  Mutate { endpoint: String, arg: String },
  /// Print the request signature of a query
  Signature { endpoint: String, arg: String },
}

fn parse_arg(arg: &str) -> Result<Value> {
  serde_json::from_str(arg).map_err(|e| eyre!("Invalid JSON argument {}: {}", arg, e))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Commands that need no network
  match &args.command {
    Command::Signature { endpoint, arg } => {
      println!("{}", RequestSignature::new(endpoint, &parse_arg(arg)?));
      return Ok(());
    }
    Command::Endpoints => {
      let registry = tagcache::cache::EndpointRegistry::new();
      api::register_all(&registry);
      println!("queries:");
      for name in registry.query_names() {
        println!("  {}", name);
      }
      println!("mutations:");
      for name in registry.mutation_names() {
        println!("  {}", name);
      }
      return Ok(());
    }
    _ => {}
  }

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let token = Config::get_api_token()?;
  let transport = HttpTransport::new(&config.api, Some(token))?;
  let client = api::registered(QueryClient::init(Arc::new(transport), config.cache_config())?);

  let result = match args.command {
    Command::Query { endpoint, arg } => {
      let data = client.query_value(&endpoint, parse_arg(&arg)?).await?;
      print_json(&data)
    }
    Command::Mutate { endpoint, arg } => {
      let outcome = client.mutate_value(&endpoint, parse_arg(&arg)?).await?;
      print_json(&outcome.data)?;
      for tag in &outcome.invalidated {
        eprintln!("invalidated {}", tag);
      }
      Ok(())
    }
    Command::Signature { .. } | Command::Endpoints => Ok(()),
  };

  client.dispose();
  result
}
