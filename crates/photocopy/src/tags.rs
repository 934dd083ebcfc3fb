use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Maximum number of tags returned by an analysis.
pub const MAX_TAGS: usize = 15;

// first `{` to last `}`, across lines
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// The structured part of the tag answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StructuredTags {
    /// Objects seen in the image.
    pub objects: Vec<String>,
    /// Short scene description.
    pub scene: String,
    /// Dominant colors.
    pub colors: Vec<String>,
    /// Activities taking place.
    pub actions: Vec<String>,
}

/// Tags and structured fields recovered from the model's free-text answer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagResponse {
    /// Tags in answer order, not truncated.
    pub tags: Vec<String>,
    /// Structured fields, empty when the answer had no JSON object.
    pub analysis: StructuredTags,
}

/// Parse the answer to the tag prompt.
///
/// The answer is expected to embed a JSON object with `tags`, `objects`, `scene`,
/// `colors` and `actions`. When no object can be found or parsed, the whole
/// answer is read as a comma separated list of tags and the structured fields
/// stay empty. The tag list is not truncated here.
pub fn parse_tag_response(text: &str) -> TagResponse {
    let Some(found) = JSON_OBJECT.find(text) else {
        return comma_separated(text);
    };

    match serde_json::from_str::<Value>(found.as_str()) {
        Ok(value) => TagResponse {
            tags: string_list(value.get("tags")),
            analysis: StructuredTags {
                objects: string_list(value.get("objects")),
                scene: scene(value.get("scene")),
                colors: string_list(value.get("colors")),
                actions: string_list(value.get("actions")),
            },
        },
        Err(e) => {
            log::warn!("Failed to parse tags JSON ({e}): {text}");
            comma_separated(text)
        }
    }
}

fn comma_separated(text: &str) -> TagResponse {
    TagResponse {
        tags: split_tags(text),
        analysis: StructuredTags::default(),
    }
}

fn split_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => split_tags(s),
        _ => Vec::new(),
    }
}

fn scene(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}
