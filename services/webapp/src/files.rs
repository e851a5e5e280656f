//! Sample download files.
//!
//! Generated at startup so download benchmarks have deterministic
//! sizes without shipping blobs in the image.

use std::path::Path;

use anyhow::{Context, Result};
use rand::RngCore;
use tracing::info;

/// Name and size of each generated sample file.
pub const SAMPLE_FILES: &[(&str, usize)] = &[
    ("small.txt", 10 * 1024),
    ("medium.txt", 1024 * 1024),
    ("large.txt", 10 * 1024 * 1024),
];

/// Create any missing sample files under `dir`.
pub async fn create_sample_files(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating download dir {}", dir.display()))?;

    for (name, size) in SAMPLE_FILES {
        let path = dir.join(name);
        if tokio::fs::try_exists(&path).await? {
            continue;
        }

        info!(file = %name, bytes = size, "Creating sample file");
        let mut data = vec![0u8; *size];
        rand::rng().fill_bytes(&mut data);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("writing sample file {}", path.display()))?;
    }

    Ok(())
}
