//! Inbound payload parsing.
//!
//! Turns a raw request body into an ordered map of top-level fields.
//! XML and SOAP bodies are unwrapped to the innermost element record;
//! JSON bodies must be a top-level object; form bodies decode to one
//! field per pair. Field order follows document order throughout.

use quick_xml::{events::Event, Reader};
use serde_json::{Map, Value};

use crate::error::{Result, TransformError};

const XML_TYPES: &[&str] = &["application/xml", "text/xml", "application/soap+xml"];
const FORM_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_TYPE: &str = "application/json";

/// Normalizes a content type header: parameters stripped, lowercased.
pub fn media_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Whether the relay accepts this inbound content type.
pub fn is_supported_content_type(content_type: &str) -> bool {
    let mt = media_type(content_type);
    XML_TYPES.contains(&mt.as_str()) || mt == FORM_TYPE || mt == JSON_TYPE
}

/// Parses a request body into an ordered field map.
///
/// The declared content type selects the parser; an unsupported type
/// or an empty body is rejected before parsing.
pub fn parse_payload(content_type: &str, body: &[u8]) -> Result<Map<String, Value>> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(TransformError::EmptyBody);
    }
    let mt = media_type(content_type);
    if XML_TYPES.contains(&mt.as_str()) {
        let text = std::str::from_utf8(body)
            .map_err(|e| TransformError::MalformedPayload(format!("invalid utf-8: {e}")))?;
        parse_xml(text)
    } else if mt == FORM_TYPE {
        Ok(parse_form(body))
    } else if mt == JSON_TYPE {
        parse_json(body)
    } else {
        Err(TransformError::UnsupportedContentType(mt))
    }
}

fn parse_json(body: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(TransformError::MalformedPayload(format!(
            "expected top-level JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_form(body: &[u8]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        map.insert(key.into_owned(), Value::String(value.into_owned()));
    }
    map
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn into_value(self) -> Value {
        if self.is_leaf() {
            Value::String(self.text)
        } else {
            let mut map = Map::new();
            for child in self.children {
                map.insert(child.name.clone(), child.into_value());
            }
            Value::Object(map)
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    let full = String::from_utf8_lossy(raw);
    match full.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => full.into_owned(),
    }
}

fn parse_xml(body: &str) -> Result<Map<String, Value>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    // Synthetic document root so the stack is never empty.
    let mut stack = vec![XmlNode::default()];
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                stack.push(XmlNode {
                    name: local_name(e.name().as_ref()),
                    ..XmlNode::default()
                });
            },
            Event::Empty(e) => {
                let node =
                    XmlNode { name: local_name(e.name().as_ref()), ..XmlNode::default() };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            },
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            },
            Event::CData(t) => {
                let raw = t.into_inner();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&raw));
                }
            },
            Event::End(_) => {
                if stack.len() > 1 {
                    let node = stack.pop().unwrap_or_default();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    let root = stack.pop().unwrap_or_default();
    let document = root
        .children
        .into_iter()
        .next()
        .ok_or_else(|| TransformError::MalformedPayload("no root element".into()))?;
    let record = innermost_record(document)?;
    if record.is_leaf() {
        return Err(TransformError::NoFields);
    }
    let mut map = Map::new();
    for child in record.children {
        map.insert(child.name.clone(), child.into_value());
    }
    Ok(map)
}

/// Descends past SOAP envelopes and single-element wrappers to the
/// element whose children are the notification fields.
fn innermost_record(mut node: XmlNode) -> Result<XmlNode> {
    if node.name.eq_ignore_ascii_case("envelope") {
        node = node
            .children
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case("body"))
            .ok_or_else(|| TransformError::MalformedPayload("SOAP envelope without body".into()))?;
    }
    while node.children.len() == 1 && !node.children[0].is_leaf() {
        node = node.children.remove(0);
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_fields_keep_document_order() {
        let body = r#"<Notification>
            <DeviceName>edge-01</DeviceName>
            <QualitativeNewState>Failed</QualitativeNewState>
            <CustomerName>Acme</CustomerName>
        </Notification>"#;
        let fields = parse_payload("application/xml", body.as_bytes()).unwrap();
        let keys: Vec<_> = fields.keys().cloned().collect();
        assert_eq!(keys, ["DeviceName", "QualitativeNewState", "CustomerName"]);
        assert_eq!(fields["DeviceName"], "edge-01");
    }

    #[test]
    fn soap_envelope_unwraps_to_inner_record() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body>
                <StateChange>
                    <DeviceName>core-router</DeviceName>
                    <QualitativeNewState>Normal</QualitativeNewState>
                </StateChange>
            </soap:Body>
        </soap:Envelope>"#;
        let fields = parse_payload("application/soap+xml", body.as_bytes()).unwrap();
        assert_eq!(fields["DeviceName"], "core-router");
        assert_eq!(fields["QualitativeNewState"], "Normal");
    }

    #[test]
    fn form_body_decodes_pairs() {
        let body = b"DeviceName=edge-01&Status=error&Message=disk%20full";
        let fields = parse_payload("application/x-www-form-urlencoded", body).unwrap();
        assert_eq!(fields["Message"], "disk full");
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn json_object_parses() {
        let body = br#"{"title":"alert","Status":"ok"}"#;
        let fields = parse_payload("application/json; charset=utf-8", body).unwrap();
        assert_eq!(fields["title"], "alert");
    }

    #[test]
    fn json_array_rejected() {
        let err = parse_payload("application/json", b"[1,2]").unwrap_err();
        assert!(matches!(err, TransformError::MalformedPayload(_)));
    }

    #[test]
    fn empty_body_rejected() {
        let err = parse_payload("application/xml", b"   ").unwrap_err();
        assert!(matches!(err, TransformError::EmptyBody));
    }

    #[test]
    fn unsupported_content_type_rejected() {
        let err = parse_payload("text/plain", b"hello").unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedContentType(_)));
    }

    #[test]
    fn malformed_xml_rejected() {
        let err = parse_payload("text/xml", b"<a><b></a>").unwrap_err();
        assert!(matches!(err, TransformError::MalformedPayload(_)));
    }

    #[test]
    fn supported_types_recognized() {
        assert!(is_supported_content_type("text/xml; charset=utf-8"));
        assert!(is_supported_content_type("APPLICATION/JSON"));
        assert!(!is_supported_content_type("text/plain"));
    }
}
