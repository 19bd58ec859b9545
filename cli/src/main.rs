//! lens — drive a language server from the command line.
//!
//! Reads one action request as JSON (from a file argument or stdin), routes
//! it through a language server for the project root, and prints the result
//! envelope's content on stdout. A failed action still exits 0: failure is
//! data in the envelope, not a harness error.

mod config;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use lens_actions::{ActionRequest, Router};
use lens_lsp::ServerLaunch;
use tracing_subscriber::EnvFilter;

use crate::config::HarnessConfig;

const USAGE: &str = "\
Usage: lens [OPTIONS] [REQUEST_FILE]

Reads an action request as JSON from REQUEST_FILE (or stdin when omitted or
\"-\") and prints the result envelope content.

Options:
  --root DIR         Project root (default: current directory)
  --server CMD       Language server command (overrides lens.toml)
  --server-arg ARG   Argument for the server command (repeatable)
  -h, --help         Print this help
";

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    root: Option<PathBuf>,
    server: Option<String>,
    server_args: Vec<String>,
    request_file: Option<PathBuf>,
    help: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--root" => {
                let value = args.next().context("--root requires a directory")?;
                parsed.root = Some(PathBuf::from(value));
            }
            "--server" => {
                parsed.server = Some(args.next().context("--server requires a command")?);
            }
            "--server-arg" => {
                parsed
                    .server_args
                    .push(args.next().context("--server-arg requires a value")?);
            }
            "-h" | "--help" => parsed.help = true,
            "-" => parsed.request_file = None,
            other if other.starts_with("--") => bail!("unknown option: {other}"),
            other => {
                if parsed.request_file.is_some() {
                    bail!("only one request file may be given");
                }
                parsed.request_file = Some(PathBuf::from(other));
            }
        }
    }

    Ok(parsed)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    // Results go to stdout; keep logs on stderr so callers can pipe output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_request(args: &CliArgs) -> Result<ActionRequest> {
    let raw = match &args.request_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading request from {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading request from stdin")?;
            buffer
        }
    };
    serde_json::from_str(&raw).context("parsing action request")
}

fn resolve_launch(args: &CliArgs, config: &HarnessConfig) -> Result<ServerLaunch> {
    if let Some(command) = &args.server {
        return Ok(ServerLaunch::new(command.clone(), args.server_args.clone()));
    }
    if let Some(server) = &config.server {
        return Ok(server.clone());
    }
    bail!(
        "no language server configured: pass --server or add a [server] section to {}",
        config::CONFIG_FILE_NAME
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        print!("{USAGE}");
        return Ok(());
    }

    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let root = std::fs::canonicalize(&root)
        .with_context(|| format!("resolving project root {}", root.display()))?;

    let harness_config = HarnessConfig::load(&root)?;
    let launch = resolve_launch(&args, &harness_config)?;
    tracing::debug!(command = %launch.command, root = %root.display(), "using language server");
    let request = read_request(&args)?;

    let router = Router::new(root, launch);
    let envelope = router.dispatch(&request).await;
    router.shutdown().await;

    println!("{}", envelope.content);
    Ok(())
}
