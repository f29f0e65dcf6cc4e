//! File-backed topology lookup.
//!
//! Reads `<dir>/<pipeline-name>.json`, a dump of the orchestration service's
//! stage/action definition. Deployments that talk to the orchestration API
//! directly can swap in their own [`TopologyLookup`] implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::domain::Topology;

use super::TopologyLookup;

pub struct FileTopologyLookup {
    dir: PathBuf,
}

impl FileTopologyLookup {
    pub fn new(dir: PathBuf) -> Self {
        FileTopologyLookup { dir }
    }
}

#[async_trait]
impl TopologyLookup for FileTopologyLookup {
    async fn get_topology(&self, pipeline_name: &str) -> Result<Topology> {
        let path = self.dir.join(format!("{pipeline_name}.json"));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read topology: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse topology: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_topology_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codepipeline-test.json");
        tokio::fs::write(
            &path,
            r#"{"stages": [{"name": "Deploy", "actions": [{"name": "Push", "runOrder": 1}]}]}"#,
        )
        .await
        .unwrap();

        let lookup = FileTopologyLookup::new(dir.path().to_path_buf());
        let topology = lookup.get_topology("codepipeline-test").await.unwrap();
        assert_eq!(topology.action_run_order("Deploy", "Push"), Some(1));
    }

    #[tokio::test]
    async fn missing_topology_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = FileTopologyLookup::new(dir.path().to_path_buf());
        assert!(lookup.get_topology("nope").await.is_err());
    }
}
