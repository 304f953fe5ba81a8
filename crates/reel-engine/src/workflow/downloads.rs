use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Suffixes browsers use while a download is still in flight.
const PARTIAL_SUFFIXES: [&str; 3] = ["crdownload", "part", "tmp"];

/// Files already present before the download was requested. A missing
/// directory counts as empty.
pub(crate) async fn snapshot(dir: &Path) -> BTreeSet<PathBuf> {
    list(dir).await.unwrap_or_default()
}

/// First non-empty, finished file that is not in `baseline`.
pub(crate) async fn new_complete_file(
    dir: &Path,
    baseline: &BTreeSet<PathBuf>,
) -> io::Result<Option<PathBuf>> {
    for path in list(dir).await? {
        if baseline.contains(&path) || is_partial(&path) {
            continue;
        }
        let meta = tokio::fs::metadata(&path).await?;
        if meta.is_file() && meta.len() > 0 {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

async fn list(dir: &Path) -> io::Result<BTreeSet<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = BTreeSet::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.insert(entry.path());
    }
    Ok(paths)
}

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            PARTIAL_SUFFIXES
                .iter()
                .any(|s| ext.eq_ignore_ascii_case(s))
        })
}
