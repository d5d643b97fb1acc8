//! Structured-output wire schema.
//!
//! The model emits connection endpoints as parallel `…Source`/`…Target`
//! arrays. They are validated and zipped into [`LabelPair`]s here, at the
//! provider boundary, so the rest of the system only ever sees pairs.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use sage_core::graph::{GraphModification, LabelPair};

use crate::provider::{ProviderError, ProviderResult, StructuredTurn};

/// Raw structured payload as the model emits it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredPayload {
    response: String,
    #[serde(default)]
    updated_preferences: Option<String>,
    #[serde(default)]
    add_nodes: Vec<String>,
    #[serde(default)]
    remove_nodes: Vec<String>,
    #[serde(default)]
    add_connections_source: Vec<String>,
    #[serde(default)]
    add_connections_target: Vec<String>,
    #[serde(default)]
    remove_connections_source: Vec<String>,
    #[serde(default)]
    remove_connections_target: Vec<String>,
}

/// Zip parallel endpoint arrays into pairs. A length mismatch drops the
/// unmatched tail rather than the whole batch.
fn zip_pairs(kind: &str, sources: Vec<String>, targets: Vec<String>) -> Vec<LabelPair> {
    if sources.len() != targets.len() {
        warn!(
            kind,
            sources = sources.len(),
            targets = targets.len(),
            "connection arrays have mismatched lengths; zipping to the shorter"
        );
    }
    sources
        .into_iter()
        .zip(targets)
        .map(|(source, target)| LabelPair { source, target })
        .collect()
}

/// Parse the model's structured JSON into a [`StructuredTurn`].
pub fn parse_structured(raw: &str) -> ProviderResult<StructuredTurn> {
    let payload: StructuredPayload = serde_json::from_str(raw)
        .map_err(|err| ProviderError::MalformedOutput(format!("{err}: {raw}")))?;

    // Treat an all-whitespace preference update as "no update".
    let updated_preferences = payload
        .updated_preferences
        .filter(|p| !p.trim().is_empty());

    Ok(StructuredTurn {
        reply: payload.response,
        updated_preferences,
        modification: GraphModification {
            add_nodes: payload.add_nodes,
            remove_nodes: payload.remove_nodes,
            add_connections: zip_pairs(
                "add",
                payload.add_connections_source,
                payload.add_connections_target,
            ),
            remove_connections: zip_pairs(
                "remove",
                payload.remove_connections_source,
                payload.remove_connections_target,
            ),
        },
    })
}

/// `response_format` body instructing the API to emit the structured schema.
#[must_use]
pub fn response_format() -> Value {
    let string_array = json!({ "type": "array", "items": { "type": "string" } });
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "assistant_turn",
            "strict": false,
            "schema": {
                "type": "object",
                "properties": {
                    "response": {
                        "type": "string",
                        "description": "The assistant's reply to the user."
                    },
                    "updatedPreferences": {
                        "type": "string",
                        "description": "Full replacement of the user's stored preferences; empty when unchanged."
                    },
                    "addNodes": string_array,
                    "removeNodes": string_array,
                    "addConnectionsSource": string_array,
                    "addConnectionsTarget": string_array,
                    "removeConnectionsSource": string_array,
                    "removeConnectionsTarget": string_array
                },
                "required": ["response"],
                "additionalProperties": false
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
