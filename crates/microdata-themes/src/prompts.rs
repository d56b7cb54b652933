//! Theme prompt construction.

use microdata_types::{ClusterId, EnrichmentArtifact};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tokens::TokenCounter;

/// System message asking for themes over a delimited label list.
pub const DEFAULT_THEME_SYSTEM_MESSAGE: &str = r#"You are an expert in survey data documentation. You will be given a list of variable labels from a household or establishment survey data dictionary. Each label is preceded by a special separator.

Identify the main themes covered by these variables. For each theme, give a short name, a one-sentence description and the labels that belong to it, copied exactly.

Respond with a JSON object of the form:
{"themes": [{"theme": "Theme name", "description": "One sentence.", "labels": ["label", "label"]}]}"#;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat completion message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Prompt for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemePrompt {
    pub cluster_id: ClusterId,

    /// System message followed by the label payload
    pub messages: Vec<ChatMessage>,

    /// Tokens across all message contents
    pub token_count: usize,
}

/// User content for a label list: the separator leads and delimits.
pub fn label_payload<'a>(labels: impl IntoIterator<Item = &'a str>, separator: &str) -> String {
    let mut payload = String::from(separator);
    let mut first = true;
    for label in labels {
        if !first {
            payload.push_str(separator);
        }
        payload.push_str(label);
        first = false;
    }
    payload
}

/// One prompt per cluster, in ascending cluster id order.
///
/// `token_count` is informational; no budget is enforced here.
pub fn build_prompts(
    artifact: &EnrichmentArtifact,
    system_message: &str,
    counter: &dyn TokenCounter,
) -> Vec<ThemePrompt> {
    let system_tokens = counter.count(system_message);

    let prompts: Vec<ThemePrompt> = artifact
        .cluster
        .iter()
        .map(|(cluster_id, group)| {
            let payload = label_payload(
                group.keys().map(String::as_str),
                &artifact.special_separator,
            );
            let token_count = system_tokens + counter.count(&payload);
            ThemePrompt {
                cluster_id: *cluster_id,
                messages: vec![ChatMessage::system(system_message), ChatMessage::user(payload)],
                token_count,
            }
        })
        .collect();

    debug!(idno = %artifact.idno, prompts = prompts.len(), "Built theme prompts");
    prompts
}

/// Largest prompts first; ties keep ascending cluster id order.
pub fn sort_by_token_count_desc(prompts: &mut [ThemePrompt]) {
    prompts.sort_by(|a, b| {
        b.token_count
            .cmp(&a.token_count)
            .then(a.cluster_id.cmp(&b.cluster_id))
    });
}
