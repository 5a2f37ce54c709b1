//! Keygen command implementation

use std::path::Path;

use anyhow::{Context, Result};

use burrow_core::config::write_private;
use burrow_core::keys::KeyPair;

use crate::output::print_success;

/// Generate a key pair
///
/// With `out`, the pair is saved there (owner-only) and only the public key
/// is printed.
pub async fn keygen_command(out: Option<&Path>) -> Result<()> {
    let keys = KeyPair::generate();

    match out {
        Some(path) => {
            let contents = toml::to_string_pretty(&keys).context("Failed to encode key pair")?;
            write_private(path, &contents)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            print_success(&format!("Key pair written to {}", path.display()));
            println!("{}", keys.public_key);
        }
        None => {
            println!("private_key = {}", keys.private_key);
            println!("public_key = {}", keys.public_key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_saved_pair_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("client.toml");
        keygen_command(Some(&path)).await.unwrap();

        let saved: KeyPair = burrow_core::config::load_config(&path).unwrap();
        assert_eq!(KeyPair::from_private(&saved.private_key).unwrap(), saved);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
