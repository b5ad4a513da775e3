//! cryptmirror - Encrypting mirror filesystem
//!
//! Usage:
//!   cryptmirror <KEY> <SOURCE_DIR> <MOUNT_POINT> [--config FILE] [--allow-other] [-v]

use clap::Parser;
use cryptmirror::{
    config::Config,
    crypto::CipherKey,
    fs::{CryptFs, MountContext, Operations},
    Result,
};
use nix::sys::stat::{umask, Mode};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cryptmirror")]
#[command(author = "cryptmirror Contributors")]
#[command(version)]
#[command(about = "Mirror a directory through FUSE, encrypting file contents at rest")]
struct Cli {
    /// Encryption key, used verbatim as key material
    key: String,

    /// Real directory to mirror
    source_dir: PathBuf,

    /// Where to mount the encrypted view
    mount_point: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::discover(cli.config.as_deref())?;
    if cli.allow_other {
        config.mount.allow_other = true;
        config.validate()?;
    }

    // Requested modes land on disk verbatim
    umask(Mode::empty());

    let ctx = MountContext::new(cli.source_dir, CipherKey::from(cli.key));
    let options = config.mount.mount_options();
    let fs = CryptFs::with_ttl(Operations::new(ctx), config.mount.ttl());

    info!("Mounting at {:?}", cli.mount_point);

    fuser::mount2(fs, &cli.mount_point, &options)?;

    info!("Unmounted {:?}", cli.mount_point);
    Ok(())
}
