//! Platform transformers.
//!
//! Shapes an extracted field map into the payload each destination
//! platform expects. Transformers are pure functions of their input,
//! so transforming the same fields twice yields identical bodies.

use fanout_core::models::Platform;
use serde_json::{json, Map, Value};

use crate::{
    classify::{classify, Severity},
    error::{Result, TransformError},
};

/// Discord embed title limit.
const DISCORD_TITLE_MAX: usize = 256;
/// Discord embed description limit.
const DISCORD_DESCRIPTION_MAX: usize = 4096;
/// Discord embed field value limit.
const DISCORD_FIELD_VALUE_MAX: usize = 1024;
/// Discord embed field count limit.
const DISCORD_FIELD_COUNT_MAX: usize = 20;
/// Field values shorter than this render inline.
const DISCORD_INLINE_MAX: usize = 50;
/// Slack header block text limit.
const SLACK_HEADER_MAX: usize = 150;
/// Slack section field text limit.
const SLACK_FIELD_MAX: usize = 2000;
/// Slack caps fields per section block.
const SLACK_FIELDS_PER_SECTION: usize = 10;

/// Keys promoted to the front of Discord embeds.
const WELL_KNOWN_KEYS: [&str; 4] =
    ["QualitativeNewState", "CustomerName", "DeviceURI", "TimeOfStateChange"];

/// Ready-to-send outgoing payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedPayload {
    /// Serialized request body.
    pub body: String,
    /// MIME type for the outgoing request.
    pub content_type: String,
}

impl TransformedPayload {
    fn json(body: String) -> Self {
        Self { body, content_type: "application/json".to_string() }
    }
}

/// Transforms extracted fields into the payload for one platform.
pub fn transform(fields: &Map<String, Value>, platform: Platform) -> Result<TransformedPayload> {
    let severity = classify(fields);
    let body = match platform {
        Platform::Discord => discord_payload(fields, severity),
        Platform::Slack => slack_payload(fields),
        Platform::Teams => teams_payload(fields, severity),
        Platform::Webhook => generic_payload(fields)?,
    };
    Ok(TransformedPayload::json(body))
}

/// Renders a value as display text. Strings pass through unquoted;
/// everything else serializes compactly.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// First present, non-empty field among `keys`, with the key it came
/// from.
fn first_present<'a>(fields: &Map<String, Value>, keys: &[&'a str]) -> Option<(&'a str, String)> {
    keys.iter().find_map(|key| {
        let text = fields.get(*key).map(value_text)?;
        if text.is_empty() {
            None
        } else {
            Some((*key, text))
        }
    })
}

fn notification_title(fields: &Map<String, Value>) -> (Option<&'static str>, String) {
    match first_present(fields, &["DeviceName", "title"]) {
        Some((key, text)) => (Some(key), text),
        None => (None, "Notification".to_string()),
    }
}

fn discord_payload(fields: &Map<String, Value>, severity: Severity) -> String {
    let (title_key, title) = notification_title(fields);
    let description = first_present(fields, &["AffectedService", "message"]);

    let mut used: Vec<&str> = Vec::new();
    used.extend(title_key);
    if let Some((key, _)) = &description {
        used.push(*key);
    }

    let mut embed_fields = Vec::new();
    let ordered = WELL_KNOWN_KEYS
        .iter()
        .copied()
        .filter(|k| fields.contains_key(*k))
        .chain(fields.keys().map(String::as_str).filter(|k| !WELL_KNOWN_KEYS.contains(k)));
    for key in ordered {
        if embed_fields.len() >= DISCORD_FIELD_COUNT_MAX {
            break;
        }
        if used.contains(&key) {
            continue;
        }
        let Some(value) = fields.get(key) else { continue };
        let text = value_text(value);
        if text.is_empty() {
            continue;
        }
        embed_fields.push(json!({
            "name": truncate_chars(key, DISCORD_TITLE_MAX),
            "value": truncate_chars(&text, DISCORD_FIELD_VALUE_MAX),
            "inline": text.chars().count() < DISCORD_INLINE_MAX,
        }));
    }

    let mut embed = json!({
        "title": truncate_chars(&title, DISCORD_TITLE_MAX),
        "color": severity.color(),
        "fields": embed_fields,
    });
    if let (Some((_, text)), Some(obj)) = (description, embed.as_object_mut()) {
        obj.insert(
            "description".to_string(),
            Value::String(truncate_chars(&text, DISCORD_DESCRIPTION_MAX)),
        );
    }

    json!({ "embeds": [embed] }).to_string()
}

fn teams_payload(fields: &Map<String, Value>, severity: Severity) -> String {
    let (_, title) = notification_title(fields);
    let facts: Vec<Value> = fields
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value_text(value) }))
        .collect();

    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": severity.theme_color(),
        "summary": title,
        "title": title,
        "sections": [{ "facts": facts }],
    })
    .to_string()
}

fn slack_payload(fields: &Map<String, Value>) -> String {
    let (_, title) = notification_title(fields);
    match slack_blocks(fields, &title) {
        Ok(body) => body,
        // Rich formatting never fails the attempt; degrade to text.
        Err(_) => json!({ "text": title }).to_string(),
    }
}

fn slack_blocks(fields: &Map<String, Value>, title: &str) -> Result<String> {
    if fields.is_empty() {
        return Err(TransformError::NoFields);
    }

    let mut blocks = vec![json!({
        "type": "header",
        "text": { "type": "plain_text", "text": truncate_chars(title, SLACK_HEADER_MAX) },
    })];

    let texts: Vec<Value> = fields
        .iter()
        .map(|(name, value)| {
            let line = format!("*{name}*\n{}", value_text(value));
            json!({ "type": "mrkdwn", "text": truncate_chars(&line, SLACK_FIELD_MAX) })
        })
        .collect();
    for chunk in texts.chunks(SLACK_FIELDS_PER_SECTION) {
        blocks.push(json!({ "type": "section", "fields": chunk }));
    }

    Ok(json!({ "blocks": blocks }).to_string())
}

fn generic_payload(fields: &Map<String, Value>) -> Result<String> {
    serde_json::to_string_pretty(&Value::Object(fields.clone()))
        .map_err(|e| TransformError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), Value::String(v.to_string()))).collect()
    }

    #[test]
    fn discord_failed_state_renders_red_embed() {
        let input = fields(&[
            ("DeviceName", "edge-01"),
            ("QualitativeNewState", "Failed"),
            ("CustomerName", "Acme"),
        ]);
        let out = transform(&input, Platform::Discord).unwrap();
        let body: Value = serde_json::from_str(&out.body).unwrap();
        let embed = &body["embeds"][0];
        assert_eq!(embed["title"], "edge-01");
        assert_eq!(embed["color"], 0xff0000);
        assert_eq!(embed["fields"][0]["name"], "QualitativeNewState");
        assert_eq!(embed["fields"][1]["name"], "CustomerName");
    }

    #[test]
    fn discord_title_truncated_and_field_cap_enforced() {
        let mut input = Map::new();
        input.insert("title".into(), Value::String("x".repeat(500)));
        for i in 0..30 {
            input.insert(format!("field{i:02}"), Value::String("v".into()));
        }
        let out = transform(&input, Platform::Discord).unwrap();
        let body: Value = serde_json::from_str(&out.body).unwrap();
        let embed = &body["embeds"][0];
        assert_eq!(embed["title"].as_str().unwrap().len(), DISCORD_TITLE_MAX);
        assert_eq!(embed["fields"].as_array().unwrap().len(), DISCORD_FIELD_COUNT_MAX);
    }

    #[test]
    fn discord_long_values_are_not_inline() {
        let input = fields(&[("Detail", "a short one"), ("Long", &"y".repeat(80))]);
        let out = transform(&input, Platform::Discord).unwrap();
        let body: Value = serde_json::from_str(&out.body).unwrap();
        let embed_fields = body["embeds"][0]["fields"].as_array().unwrap();
        assert_eq!(embed_fields[0]["inline"], true);
        assert_eq!(embed_fields[1]["inline"], false);
    }

    #[test]
    fn teams_card_lists_all_fields_as_facts() {
        let input = fields(&[("DeviceName", "db-02"), ("Status", "warn")]);
        let out = transform(&input, Platform::Teams).unwrap();
        let body: Value = serde_json::from_str(&out.body).unwrap();
        assert_eq!(body["@type"], "MessageCard");
        assert_eq!(body["themeColor"], "FFA500");
        let facts = body["sections"][0]["facts"].as_array().unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0]["name"], "DeviceName");
        assert_eq!(facts[0]["value"], "db-02");
    }

    #[test]
    fn slack_uses_blocks_with_header() {
        let input = fields(&[("DeviceName", "edge-01"), ("Status", "ok")]);
        let out = transform(&input, Platform::Slack).unwrap();
        let body: Value = serde_json::from_str(&out.body).unwrap();
        let blocks = body["blocks"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[0]["text"]["text"], "edge-01");
        assert_eq!(blocks[1]["type"], "section");
    }

    #[test]
    fn slack_empty_fields_falls_back_to_text() {
        let out = transform(&Map::new(), Platform::Slack).unwrap();
        let body: Value = serde_json::from_str(&out.body).unwrap();
        assert_eq!(body["text"], "Notification");
    }

    #[test]
    fn generic_webhook_pretty_prints_fields() {
        let input = fields(&[("a", "1"), ("b", "2")]);
        let out = transform(&input, Platform::Webhook).unwrap();
        assert!(out.body.contains('\n'));
        let body: Value = serde_json::from_str(&out.body).unwrap();
        assert_eq!(body["a"], "1");
    }

    #[test]
    fn transform_is_idempotent() {
        let input = fields(&[("DeviceName", "edge-01"), ("QualitativeNewState", "Failed")]);
        for platform in [Platform::Discord, Platform::Slack, Platform::Teams, Platform::Webhook] {
            let first = transform(&input, platform).unwrap();
            let second = transform(&input, platform).unwrap();
            assert_eq!(first, second);
        }
    }
}
