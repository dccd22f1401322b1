use std::path::Path;

use anyhow::Result;
use log::debug;
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does
/// not. Idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).await?;
        debug!("Created directory at {:?}", path);
    }
    Ok(())
}
