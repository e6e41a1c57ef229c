// OESP host: token sync upload from the command line.

use std::path::PathBuf;

use anyhow::{bail, Context};
use oesp_host::{config, SyncClient};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: oesp-host sync <tokens-file> --did <did> [--pub <b64>]";

struct SyncArgs {
    tokens_file: PathBuf,
    did: String,
    pub_b64: Option<String>,
}

fn parse_sync_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<SyncArgs> {
    let mut tokens_file = None;
    let mut did = None;
    let mut pub_b64 = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--did" => did = Some(args.next().context("--did needs a value")?),
            "--pub" => pub_b64 = Some(args.next().context("--pub needs a value")?),
            s if s.starts_with("--") => bail!("unknown option {s}\n{USAGE}"),
            _ if tokens_file.is_none() => tokens_file = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument {arg}\n{USAGE}"),
        }
    }
    Ok(SyncArgs {
        tokens_file: tokens_file.context(USAGE)?,
        did: did.context(USAGE)?,
        pub_b64,
    })
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("--version") | Some("-V") => {
            println!("oesp-host {}", VERSION);
            return Ok(());
        }
        Some("sync") => {}
        _ => bail!(USAGE),
    }
    let sync_args = parse_sync_args(args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("oesp_host=info,oesp_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    let success = rt.block_on(async {
        let text = tokio::fs::read_to_string(&sync_args.tokens_file)
            .await
            .with_context(|| format!("reading {}", sync_args.tokens_file.display()))?;
        let tokens: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let client = SyncClient::new(&cfg)?;
        let summary = tokio::select! {
            summary = client.sync_tokens(
                &tokens,
                &sync_args.did,
                sync_args.pub_b64.as_deref(),
                None,
                true,
            ) => summary,
            res = shutdown_signal() => {
                res?;
                bail!("interrupted");
            }
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok::<_, anyhow::Error>(summary.success)
    })?;
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn sync_args_parse() {
        let a = parse_sync_args(args(&["tokens.txt", "--did", "oesp:did:abc", "--pub", "AAAA"]))
            .unwrap();
        assert_eq!(a.tokens_file, PathBuf::from("tokens.txt"));
        assert_eq!(a.did, "oesp:did:abc");
        assert_eq!(a.pub_b64.as_deref(), Some("AAAA"));
    }

    #[test]
    fn sync_args_require_did() {
        assert!(parse_sync_args(args(&["tokens.txt"])).is_err());
        assert!(parse_sync_args(args(&["tokens.txt", "--did"])).is_err());
        assert!(parse_sync_args(args(&["a", "b", "--did", "x"])).is_err());
    }
}
