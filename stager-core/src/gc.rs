//! Removal of mirrors whose pull requests are gone

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::mirror::MirrorRoot;
use crate::Result;

/// Names present on disk that are neither allow-listed nor desired
pub fn stale_mirrors<S: AsRef<str>>(
    existing: &BTreeSet<String>,
    desired: &BTreeSet<String>,
    allow_list: &[S],
) -> BTreeSet<String> {
    existing
        .iter()
        .filter(|name| !allow_list.iter().any(|safe| safe.as_ref() == name.as_str()))
        .filter(|name| !desired.contains(*name))
        .cloned()
        .collect()
}

/// Delete every stale entry under the mirror root
///
/// Returns the removed names. A mirror root that does not exist yet has
/// nothing to collect.
pub fn collect_garbage<S: AsRef<str>>(
    root: &MirrorRoot,
    desired: &BTreeSet<String>,
    allow_list: &[S],
) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(root.path()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut existing = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        match entry.file_name().into_string() {
            Ok(name) => {
                existing.insert(name);
            }
            Err(raw) => warn!(name = ?raw, "Skipping mirror entry with non UTF-8 name"),
        }
    }

    let stale = stale_mirrors(&existing, desired, allow_list);
    for name in &stale {
        info!(mirror = %name, "Unstaging mirror without an open pull request");
        root.remove(name)?;
    }

    Ok(stale.into_iter().collect())
}
