use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ddc", about = "Distributed derived-data cache", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the cache server
    Serve(ServeArgs),
    /// Print the effective server configuration as TOML
    Config(ConfigArgs),
    /// Run every configured replicator once until caught up, then exit
    Replicate(ReplicateArgs),
    /// Print the blob id of a file
    Hash(HashArgs),
    /// Encode a file into the compressed-blob format
    Compress(CompressArgs),
    /// Decode and verify a compressed blob
    Decompress(DecompressArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Override the bind address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Override the data root
    #[arg(long)]
    pub data_root: Option<PathBuf>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct ReplicateArgs {
    /// TOML configuration file with `[[replication.replicators]]` entries
    #[arg(short, long)]
    pub config: PathBuf,
    /// Override the data root
    #[arg(long)]
    pub data_root: Option<PathBuf>,
}

#[derive(Args)]
pub struct HashArgs {
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct CompressArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    /// zstd level
    #[arg(long, default_value_t = 3)]
    pub level: i32,
    /// Uncompressed bytes per block
    #[arg(long, default_value_t = 256 * 1024)]
    pub block_size: u32,
}

#[derive(Args)]
pub struct DecompressArgs {
    pub input: PathBuf,
    pub output: PathBuf,
}
