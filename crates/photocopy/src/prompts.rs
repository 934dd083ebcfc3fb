/// Question asked to obtain the caption.
pub const CAPTION_PROMPT: &str = "Describe this image in a concise, natural way.";

/// Question asked to obtain the tags and the structured analysis.
pub const TAGS_PROMPT: &str = r#"Analyze this image and return a JSON object with the following structure:
{
  "tags": ["tag1", "tag2", "tag3", ...],
  "objects": ["object1", "object2", ...],
  "scene": "scene description",
  "colors": ["color1", "color2", ...],
  "actions": ["action1", "action2", ...]
}

Focus on the most important and relevant tags. Limit tags to 10-15 items total."#;
