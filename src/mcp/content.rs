//! Content mapping from MCP tool results to host content blocks
//!
//! MCP servers return a heterogeneous list of content items from
//! `tools/call`. The host only understands two block kinds, text and image,
//! so every item is normalized into exactly one [`ContentBlock`]:
//!
//! - `text` passes through, with any non-empty annotation map appended as a
//!   readable trailer line.
//! - `image` passes through as `{data, mimeType}`.
//! - `resource` becomes a text block describing the URI, MIME type, and
//!   inline text.
//! - `resource_link` becomes a compact `[Resource ...]: <uri>` line.
//! - Anything else (including known types with malformed fields) becomes a
//!   labeled `[<type>] ...` text dump.
//!
//! Decoding a [`ContentItem`] never fails, and mapping is a pure function of
//! its input.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A single content item as returned by an MCP server.
///
/// Deserialization never fails: anything that does not match a known shape
/// is kept as [`ContentItem::Unknown`] with its raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    /// Plain text, optionally annotated
    Text {
        /// The text content
        text: String,
        /// Annotation map (audience, priority, ...) if present
        annotations: Option<Map<String, Value>>,
    },
    /// A base64-encoded image
    Image {
        /// Base64-encoded image bytes
        data: String,
        /// MIME type of the image
        mime_type: String,
    },
    /// An embedded resource
    Resource(EmbeddedResource),
    /// A link to a resource the server can serve
    ResourceLink {
        /// Resource URI, if supplied
        uri: Option<String>,
        /// Resource name
        name: Option<String>,
        /// MIME type of the linked resource
        mime_type: Option<String>,
        /// Human-readable description
        description: Option<String>,
    },
    /// Any other item type, kept verbatim
    Unknown {
        /// Value of the `type` field, or `"unknown"` when absent
        kind: String,
        /// The item as received
        raw: Value,
    },
}

/// Contents of an embedded `resource` item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedResource {
    /// Resource URI
    pub uri: Option<String>,
    /// MIME type
    pub mime_type: Option<String>,
    /// Inline text contents
    pub text: Option<String>,
    /// Base64 binary contents
    pub blob: Option<String>,
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

impl ContentItem {
    /// Decode one content item from raw JSON. Never fails.
    pub fn from_value(value: Value) -> Self {
        let Some(obj) = value.as_object() else {
            return ContentItem::Unknown {
                kind: "unknown".to_string(),
                raw: value,
            };
        };
        let kind = str_field(obj, "type").unwrap_or_else(|| "unknown".to_string());

        let decoded = match kind.as_str() {
            "text" => str_field(obj, "text").map(|text| ContentItem::Text {
                text,
                annotations: obj
                    .get("annotations")
                    .and_then(Value::as_object)
                    .cloned(),
            }),
            "image" => match (str_field(obj, "data"), str_field(obj, "mimeType")) {
                (Some(data), Some(mime_type)) => Some(ContentItem::Image { data, mime_type }),
                _ => None,
            },
            "resource" => obj.get("resource").and_then(Value::as_object).map(|r| {
                ContentItem::Resource(EmbeddedResource {
                    uri: str_field(r, "uri"),
                    mime_type: str_field(r, "mimeType"),
                    text: str_field(r, "text"),
                    blob: str_field(r, "blob"),
                })
            }),
            "resource_link" => Some(ContentItem::ResourceLink {
                uri: str_field(obj, "uri"),
                name: str_field(obj, "name"),
                mime_type: str_field(obj, "mimeType"),
                description: str_field(obj, "description"),
            }),
            _ => None,
        };

        decoded.unwrap_or(ContentItem::Unknown { kind, raw: value })
    }

    /// Encode back to the MCP wire shape.
    pub fn to_value(&self) -> Value {
        fn put(obj: &mut Map<String, Value>, key: &str, v: &Option<String>) {
            if let Some(v) = v {
                obj.insert(key.to_string(), Value::String(v.clone()));
            }
        }

        match self {
            ContentItem::Text { text, annotations } => {
                let mut obj = Map::new();
                obj.insert("type".into(), "text".into());
                obj.insert("text".into(), text.clone().into());
                if let Some(a) = annotations {
                    obj.insert("annotations".into(), Value::Object(a.clone()));
                }
                Value::Object(obj)
            }
            ContentItem::Image { data, mime_type } => serde_json::json!({
                "type": "image",
                "data": data,
                "mimeType": mime_type,
            }),
            ContentItem::Resource(r) => {
                let mut inner = Map::new();
                put(&mut inner, "uri", &r.uri);
                put(&mut inner, "mimeType", &r.mime_type);
                put(&mut inner, "text", &r.text);
                put(&mut inner, "blob", &r.blob);
                serde_json::json!({ "type": "resource", "resource": inner })
            }
            ContentItem::ResourceLink {
                uri,
                name,
                mime_type,
                description,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), "resource_link".into());
                put(&mut obj, "uri", uri);
                put(&mut obj, "name", name);
                put(&mut obj, "mimeType", mime_type);
                put(&mut obj, "description", description);
                Value::Object(obj)
            }
            ContentItem::Unknown { raw, .. } => raw.clone(),
        }
    }
}

impl<'de> Deserialize<'de> for ContentItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ContentItem::from_value)
    }
}

impl Serialize for ContentItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// A normalized content block handed to the host agent.
///
/// # Examples
///
/// ```
/// use xzatoma_mcp::mcp::content::ContentBlock;
///
/// let block = ContentBlock::text("hello");
/// let json = serde_json::to_value(&block).unwrap();
/// assert_eq!(json["type"], "text");
/// assert_eq!(json["text"], "hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Text output
    Text {
        /// The text
        text: String,
    },
    /// Base64 image output
    Image {
        /// Base64-encoded image bytes
        data: String,
        /// MIME type of the image
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    /// Convenience constructor for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Returns the text if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Image { .. } => None,
        }
    }
}

/// Map a list of MCP content items to host content blocks, one block per
/// item, in order.
pub fn map_content(items: &[ContentItem]) -> Vec<ContentBlock> {
    items.iter().map(map_item).collect()
}

/// Map a single MCP content item to exactly one host content block.
pub fn map_item(item: &ContentItem) -> ContentBlock {
    match item {
        ContentItem::Text { text, annotations } => match annotations {
            Some(a) if !a.is_empty() => {
                ContentBlock::text(format!("{}\n[Annotations: {}]", text, render_map(a)))
            }
            _ => ContentBlock::text(text.clone()),
        },
        ContentItem::Image { data, mime_type } => ContentBlock::Image {
            data: data.clone(),
            mime_type: mime_type.clone(),
        },
        ContentItem::Resource(r) => ContentBlock::text(describe_resource(r)),
        ContentItem::ResourceLink {
            uri,
            name,
            mime_type,
            description,
        } => {
            let mut label = vec!["Resource".to_string()];
            if let Some(name) = name {
                label.push(name.clone());
            }
            if let Some(mime) = mime_type {
                label.push(format!("({})", mime));
            }
            if let Some(desc) = description {
                label.push(format!("- {}", desc));
            }
            ContentBlock::text(format!(
                "[{}]: {}",
                label.join(" "),
                uri.as_deref().unwrap_or("unknown")
            ))
        }
        ContentItem::Unknown { kind, raw } => {
            let body = match raw {
                Value::Object(obj) => {
                    let mut rest = obj.clone();
                    rest.remove("type");
                    Value::Object(rest).to_string()
                }
                other => other.to_string(),
            };
            ContentBlock::text(format!("[{}] {}", kind, body))
        }
    }
}

fn describe_resource(r: &EmbeddedResource) -> String {
    let mut out = format!("[Resource: {}]", r.uri.as_deref().unwrap_or("unknown"));
    if let Some(mime) = &r.mime_type {
        out.push_str(&format!("\nMIME type: {}", mime));
    }
    if let Some(text) = &r.text {
        out.push('\n');
        out.push_str(text);
    } else if let Some(blob) = &r.blob {
        out.push_str(&format!("\n(binary content, {} base64 characters)", blob.len()));
    }
    out
}

fn render_map(map: &Map<String, Value>) -> String {
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
