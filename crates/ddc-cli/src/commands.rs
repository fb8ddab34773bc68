use std::fs;
use std::path::Path;

use anyhow::Context;
use colored::Colorize;

use ddc_crypto::ContentHasher;
use ddc_server::{DdcServer, ServerConfig};
use ddc_store::{CodecConfig, CompressedCodec};
use ddc_types::{BlobId, ContentId};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Config(args) => cmd_config(args),
        Command::Replicate(args) => cmd_replicate(args),
        Command::Hash(args) => cmd_hash(args),
        Command::Compress(args) => cmd_compress(args).map(|id| {
            println!("{} {}", "✓".green().bold(), id.to_hex().yellow());
        }),
        Command::Decompress(args) => cmd_decompress(args).map(|id| {
            println!("{} {} verified", "✓".green().bold(), id.to_hex().yellow());
        }),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(ServerConfig::default()),
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = args.data_root {
        config.data_root = root;
    }
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let server = DdcServer::open(config).await?;
        server.serve().await
    })?;
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_replicate(args: ReplicateArgs) -> anyhow::Result<()> {
    let mut config = load_config(Some(&args.config))?;
    if let Some(root) = args.data_root {
        config.data_root = root;
    }
    if config.replication.replicators.is_empty() {
        anyhow::bail!("{} configures no replicators", args.config.display());
    }
    let runtime = tokio::runtime::Runtime::new()?;
    let failed = runtime.block_on(async {
        let server = DdcServer::open(config).await?;
        let mut failed = 0;
        for (name, result) in server.replicators().run_once().await {
            match result {
                Ok(report) => {
                    println!(
                        "{} {}: {} events, {} mirrored, {} deleted",
                        "✓".green().bold(),
                        name.cyan(),
                        report.events_applied,
                        report.refs_mirrored,
                        report.refs_deleted
                    );
                    if let Some(snapshot) = report.snapshot_restored {
                        println!("  restored snapshot {}", snapshot.to_hex().yellow());
                    }
                }
                Err(e) => {
                    failed += 1;
                    eprintln!("{} {}: {e}", "✗".red().bold(), name.cyan());
                }
            }
        }
        server.state().flush()?;
        anyhow::Ok(failed)
    })?;
    if failed > 0 {
        anyhow::bail!("{failed} replicator(s) failed");
    }
    Ok(())
}

fn cmd_hash(args: HashArgs) -> anyhow::Result<()> {
    for path in &args.paths {
        let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let id = BlobId::new(ContentHasher::hash(&data));
        println!("{}  {}", id.to_hex().yellow(), path.display());
    }
    Ok(())
}

pub(crate) fn cmd_compress(args: CompressArgs) -> anyhow::Result<ContentId> {
    let data = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let codec = CompressedCodec::new(CodecConfig {
        level: args.level,
        block_size: args.block_size,
        ..CodecConfig::default()
    });
    let buf = codec.compress(&data)?;
    fs::write(&args.output, &buf)
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::debug!(input = data.len(), output = buf.len(), "compressed");
    Ok(ContentId::from_bytes(&data))
}

/// Decoding checks the content hash carried in the buffer.
pub(crate) fn cmd_decompress(args: DecompressArgs) -> anyhow::Result<ContentId> {
    let buf = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let (id, data) = CompressedCodec::default()
        .decompress(&buf)
        .with_context(|| format!("decoding {}", args.input.display()))?;
    fs::write(&args.output, &data)
        .with_context(|| format!("writing {}", args.output.display()))?;
    Ok(id)
}
