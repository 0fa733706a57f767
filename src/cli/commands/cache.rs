//! Cache command - inspect and manage the artifact store

use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::DistroResult;
use crate::store::ArtifactStore;
use crate::ui::{self, UiContext};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> DistroResult<()> {
    let store = ArtifactStore::new(config.store_root());

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Invalidate { key } => invalidate_entry(&store, &key).await,
        CacheAction::Clear { yes } => clear_store(&store, yes).await,
    }
}

/// One store entry as shown by `cache list`
#[derive(Debug, serde::Serialize)]
struct EntryInfo {
    key: String,
    files: Vec<String>,
    size_bytes: u64,
}

async fn list_entries(store: &ArtifactStore, format: OutputFormat) -> DistroResult<()> {
    let mut entries = Vec::new();
    for key in store.keys().await? {
        let Some(files) = store.lookup(&key).await? else {
            continue;
        };

        let mut size_bytes = 0;
        for path in files.data.iter().chain(&files.metadata) {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                size_bytes += meta.len();
            }
        }
        let files = files
            .data
            .iter()
            .filter_map(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        entries.push(EntryInfo {
            key,
            files,
            size_bytes,
        });
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
        OutputFormat::Table => print_table(store, &entries),
    }
    Ok(())
}

fn print_table(store: &ArtifactStore, entries: &[EntryInfo]) {
    if entries.is_empty() {
        println!("No stored artifacts in {}", store.root().display());
        return;
    }

    println!("{:<56} {:>10}  {}", "KEY", "SIZE", "FILES");
    println!("{}", "-".repeat(90));
    for entry in entries {
        println!(
            "{:<56} {:>10}  {}",
            entry.key,
            format_size(entry.size_bytes),
            entry.files.join(", ")
        );
    }
    println!();
    println!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

async fn invalidate_entry(store: &ArtifactStore, key: &str) -> DistroResult<()> {
    let ctx = UiContext::detect();
    if store.lookup(key).await?.is_none() {
        ui::step_warn(&ctx, &format!("No entry for {}", key));
        return Ok(());
    }
    store.invalidate(key).await?;
    ui::step_ok(&ctx, &format!("Invalidated {}", key));
    Ok(())
}

async fn clear_store(store: &ArtifactStore, yes: bool) -> DistroResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let question = format!("Remove every artifact in {}?", store.root().display());

    if !ui::confirm(&ctx, &question, false).await? {
        ui::step_warn_hint(&ctx, "Store left untouched", "Pass --yes to clear without a prompt");
        return Ok(());
    }

    store.clear().await?;
    ui::step_ok(&ctx, &format!("Cleared {}", store.root().display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
