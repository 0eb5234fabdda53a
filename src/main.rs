use anyhow::Result;
use pupiltrim::{
    collect::collect_dirs,
    pipeline::{TrimConfig, TrimPipeline},
};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const MAX_DIRS: usize = 50;

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();
    info!("startup");

    // ─── 2) collect directories below the working directory ─────────
    let root = env::current_dir()?;
    let directories = collect_dirs(&root, MAX_DIRS);
    info!(
        "collected {} directory entries under {}",
        directories.len(),
        root.display()
    );

    // ─── 3) trim every csv into the output folder ───────────────────
    let mut pipeline = TrimPipeline::new(&root, TrimConfig::default());
    pipeline.run(&directories)?;

    // ─── 4) report what was left behind ─────────────────────────────
    if !pipeline.skipped_files.is_empty() {
        warn!(
            "{} files skipped for missing columns: {:?}",
            pipeline.skipped_files.len(),
            pipeline.skipped_files
        );
    }
    if !pipeline.decode_error_files.is_empty() {
        warn!(
            "{} files failed to decode: {:?}",
            pipeline.decode_error_files.len(),
            pipeline.decode_error_files
        );
    }

    info!("all done");
    Ok(())
}
