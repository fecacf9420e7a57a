//! Prompt-cache maintenance commands.

use anyhow::{Context, Result};

use filechat::cache::Fingerprint;
use filechat::config::Config;

use super::CacheAction;

/// Manage the prompt caches of the configured model.
pub(crate) async fn cmd_cache(config: &Config, action: CacheAction) -> Result<()> {
    let store = config.store();

    match action {
        CacheAction::List => {
            let entries = store.list().with_context(|| "Failed to list prompt caches")?;
            if entries.is_empty() {
                println!("No cached prompts for {}.", store.model_id());
                return Ok(());
            }

            println!(
                "{} cached prompt(s) in {}:",
                entries.len(),
                store.dir().display()
            );
            for entry in entries {
                let modified = entry
                    .modified
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "- {} | {} | {} | {}",
                    entry.key.fingerprint,
                    entry.key.precision,
                    format_size(entry.size_bytes),
                    modified
                );
            }
        }
        CacheAction::Remove {
            fingerprint,
            precision,
        } => {
            let fingerprint = Fingerprint::from_hex(&fingerprint)?;
            let precision = precision.unwrap_or(config.cache_precision);
            if store.remove(&fingerprint, precision).await? {
                println!("Removed {}.", store.cache_path(&fingerprint, precision).display());
            } else {
                anyhow::bail!(
                    "No {} cached prompt with fingerprint {}",
                    precision,
                    fingerprint.short()
                );
            }
        }
        CacheAction::Clear => {
            let removed = store.clear().with_context(|| "Failed to clear prompt caches")?;
            println!(
                "Removed {} cached prompt(s) from {}.",
                removed,
                store.dir().display()
            );
        }
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }
}
