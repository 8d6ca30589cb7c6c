//! `contextrelay generate`: Template request bodies for the `api` commands.

use clap::ValueEnum;
use serde_json::{Value, json};
use std::path::Path;

const PLACEHOLDER_CONTEXT_ID: &str = "ctx-replace-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Template {
    InitRequest,
    RelayRequest,
    MergeRequest,
    PruneRequest,
    VersionRequest,
}

/// Build the template body for `template`.
pub fn template(template: Template, context_id: Option<&str>) -> Value {
    let context_id = context_id.unwrap_or(PLACEHOLDER_CONTEXT_ID);
    match template {
        Template::InitRequest => json!({
            "session_id": "session-cli-123",
            "initial_input": "User wants to plan a trip to Japan",
            "metadata": {
                "user_type": "cli_tester",
                "priority": "normal"
            }
        }),
        Template::RelayRequest => json!({
            "from_agent": "AgentA",
            "to_agent": "AgentB",
            "context_id": context_id,
            "delta": {
                "new_fragments": [
                    {
                        "fragment_id": "frag-cli-456",
                        "content": "User prefers budget accommodation under $100/night",
                        "importance_score": 0.7,
                        "tags": ["preference"],
                        "metadata": { "source": "cli_input" }
                    }
                ],
                "removed_fragment_ids": [],
                "decision_updates": [
                    {
                        "agent": "AgentA",
                        "decision": "added_cli_constraint",
                        "reasoning": "manual input from cli"
                    }
                ]
            }
        }),
        Template::MergeRequest => json!({
            "context_ids": [context_id, "ctx-other"],
            "merge_strategy": "union"
        }),
        Template::PruneRequest => json!({
            "context_id": context_id,
            "pruning_strategy": "recency",
            "budget": 10
        }),
        Template::VersionRequest => json!({
            "context_id": context_id,
            "version_label": "v1.0-cli"
        }),
    }
}

pub fn run(
    kind: Template,
    output: Option<&Path>,
    context_id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = serde_json::to_string_pretty(&template(kind, context_id))?;
    match output {
        Some(path) => {
            std::fs::write(path, body + "\n")?;
            println!("Generated {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextrelay_gateway::routes::{
        InitializeRequest, MergeRequest, PruneRequest, RelayRequest, VersionRequest,
    };

    #[test]
    fn templates_parse_as_requests() {
        let init: InitializeRequest =
            serde_json::from_value(template(Template::InitRequest, None)).unwrap();
        assert_eq!(init.session_id, "session-cli-123");

        let relay: RelayRequest =
            serde_json::from_value(template(Template::RelayRequest, Some("ctx-1"))).unwrap();
        assert_eq!(relay.context_id, "ctx-1");
        assert_eq!(relay.delta.new_fragments[0].id, "frag-cli-456");

        let merge: MergeRequest =
            serde_json::from_value(template(Template::MergeRequest, Some("ctx-1"))).unwrap();
        assert_eq!(merge.context_ids.len(), 2);

        let prune: PruneRequest =
            serde_json::from_value(template(Template::PruneRequest, None)).unwrap();
        assert_eq!(prune.context_id, PLACEHOLDER_CONTEXT_ID);

        let version: VersionRequest =
            serde_json::from_value(template(Template::VersionRequest, None)).unwrap();
        assert_eq!(version.version_label.as_deref(), Some("v1.0-cli"));
    }

    #[test]
    fn writes_to_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prune.json");
        run(Template::PruneRequest, Some(&path), Some("ctx-9")).unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["context_id"], "ctx-9");
        assert_eq!(written["budget"], 10);
    }
}
