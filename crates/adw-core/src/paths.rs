//! Path derivation for the on-disk data layout.
//!
//! ```text
//! <data_root>/workflows/<adw_id>/<artifact-type>.json
//! <data_root>/agents/logs/<adw_id>/<agent_name>/prompts/<command>.txt
//! <data_root>/agents/logs/<adw_id>/<agent_name>/raw_output.jsonl
//! ```

use crate::types::AdwId;
use std::path::{Path, PathBuf};

/// Root of all per-workflow artifact directories.
pub fn workflows_dir(data_root: &Path) -> PathBuf {
    data_root.join("workflows")
}

/// Artifact directory for one workflow.
pub fn workflow_dir(data_root: &Path, adw_id: &AdwId) -> PathBuf {
    workflows_dir(data_root).join(adw_id.as_ref())
}

/// Log directory for one agent within one workflow.
pub fn agent_log_dir(data_root: &Path, adw_id: &AdwId, agent_name: &str) -> PathBuf {
    data_root
        .join("agents/logs")
        .join(adw_id.as_ref())
        .join(agent_name)
}

/// Directory holding mirrored prompts for one agent.
pub fn agent_prompts_dir(data_root: &Path, adw_id: &AdwId, agent_name: &str) -> PathBuf {
    agent_log_dir(data_root, adw_id, agent_name).join("prompts")
}

/// File a `/command`-style prompt is mirrored to before execution.
pub fn prompt_file(data_root: &Path, adw_id: &AdwId, agent_name: &str, command: &str) -> PathBuf {
    let stem = command.trim_start_matches('/');
    agent_prompts_dir(data_root, adw_id, agent_name).join(format!("{stem}.txt"))
}

/// JSON-lines capture of an agent's raw stdout.
pub fn raw_output_path(data_root: &Path, adw_id: &AdwId, agent_name: &str) -> PathBuf {
    agent_log_dir(data_root, adw_id, agent_name).join("raw_output.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_dir_layout() {
        let id = AdwId::from_string("adw-abc");
        assert_eq!(
            workflow_dir(Path::new("/data"), &id),
            PathBuf::from("/data/workflows/adw-abc")
        );
    }

    #[test]
    fn agent_log_layout() {
        let id = AdwId::from_string("adw-abc");
        assert_eq!(
            raw_output_path(Path::new("/data"), &id, "implementor"),
            PathBuf::from("/data/agents/logs/adw-abc/implementor/raw_output.jsonl")
        );
        assert_eq!(
            prompt_file(Path::new("/data"), &id, "planner", "/adw-feature-plan"),
            PathBuf::from("/data/agents/logs/adw-abc/planner/prompts/adw-feature-plan.txt")
        );
    }
}
