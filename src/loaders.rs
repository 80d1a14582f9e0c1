//! Loads the two signal-reloadable snapshots named in the config surface
//! (§4.10): the rule set and the SOP catalog. Both are plain JSON so no extra
//! parsing crate is needed beyond `serde_json`, already pulled in for every
//! wire format in this workspace.

use std::path::Path;

use incident_common::{Error, Result, Rule};
use incident_safety::SopDefinition;
use tracing::warn;

pub async fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    load_json_or_empty(path, "rule set").await
}

pub async fn load_sop_catalog(path: &Path) -> Result<Vec<SopDefinition>> {
    load_json_or_empty(path, "sop catalog").await
}

async fn load_json_or_empty<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents).map_err(Error::from),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "{what} file not found, starting with an empty snapshot");
            Ok(Vec::new())
        }
        Err(e) => Err(Error::Configuration(format!(
            "failed to read {what} at {}: {e}",
            path.display()
        ))),
    }
}
