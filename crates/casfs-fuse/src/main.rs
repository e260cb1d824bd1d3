#![warn(missing_docs)]
//! CASFS mount daemon.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use casfs_api::{HttpConfig, HttpStore};
use casfs_fuse::{
    options_to_fuser, parse_mount_options, validate_mountpoint, CasFilesystem, FsConfig,
};

fn usage() -> ! {
    eprintln!("Usage: casfs-mount <mountpoint> [--api URL] [-o OPTIONS]");
    std::process::exit(1);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut mountpoint: Option<PathBuf> = None;
    let mut api = HttpConfig::default();
    let mut opts_str = String::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--api" => match args.next() {
                Some(url) => api.base_url = url,
                None => usage(),
            },
            "-o" => match args.next() {
                Some(opts) => opts_str = opts,
                None => usage(),
            },
            _ if mountpoint.is_none() => mountpoint = Some(PathBuf::from(arg)),
            _ => usage(),
        }
    }
    let mountpoint = match mountpoint {
        Some(p) => p,
        None => usage(),
    };

    validate_mountpoint(&mountpoint)?;
    let options = parse_mount_options(&opts_str)?;

    let store = HttpStore::new(api)?;
    let fs = CasFilesystem::new(Arc::new(store), FsConfig::for_mount(&mountpoint)?);

    tracing::info!(mountpoint = %mountpoint.display(), "mounting casfs");
    fuser::mount2(fs, &mountpoint, &options_to_fuser(&options))?;
    Ok(())
}
