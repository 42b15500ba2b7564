//! Declarative markup to JSON Schema.
//!
//! Vocabulary:
//!
//! ```html
//! <tool name="add" description="Add two numbers">
//!   <prop name="a" type="number" required/>
//!   <prop name="b" type="number" required>Example: 2</prop>
//!   <array name="items" description="Line items">
//!     <dict>
//!       <prop name="sku" required/>
//!       <prop name="qty" type="number"/>
//!     </dict>
//!   </array>
//! </tool>
//!
//! <resource name="cart" description="Current cart">3 items</resource>
//! <context name="user">Legacy context, used when no resource shares the name</context>
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dom::{Document, ElementId, ElementRef};

/// Tag declaring a tool.
pub const TOOL_TAG: &str = "tool";
/// Tag declaring a scalar property.
pub const PROP_TAG: &str = "prop";
/// Tag declaring an array property.
pub const ARRAY_TAG: &str = "array";
/// Tag grouping the item properties of an array.
pub const DICT_TAG: &str = "dict";
/// Tag declaring a resource.
pub const RESOURCE_TAG: &str = "resource";
/// Legacy resource tag.
pub const CONTEXT_TAG: &str = "context";

const DEFAULT_TYPE: &str = "string";

/// Schema of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Declared type, passed through unvalidated.
    #[serde(rename = "type")]
    pub kind: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Example value taken from the element text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    /// Allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Item shape for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ObjectSchema>>,
}

/// Object schema with required names tracked at this level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    /// Always `"object"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Properties by name.
    pub properties: BTreeMap<String, PropertySchema>,
    /// Names of required properties, in discovery order.
    pub required: Vec<String>,
}

impl Default for ObjectSchema {
    fn default() -> Self {
        Self {
            kind: "object".into(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ObjectSchema {
    /// Insert a property; a later insert of the same name replaces it.
    pub fn insert(&mut self, name: String, schema: PropertySchema, required: bool) {
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
    }

    /// As a JSON value.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A `<tool>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Input schema.
    pub schema: ObjectSchema,
    /// Backing element.
    pub element: ElementId,
}

/// Which tag declared a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceOrigin {
    /// `<resource>`.
    Resource,
    /// Legacy `<context>`.
    Context,
}

/// A `<resource>` or `<context>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResource {
    /// Resource name.
    pub name: String,
    /// Resource description.
    pub description: String,
    /// Trimmed text content.
    pub content: String,
    /// Declaring tag.
    pub origin: ResourceOrigin,
    /// Backing element.
    pub element: ElementId,
}

/// All named `<tool>` elements, in document order.
pub fn parse_tools(document: &Document) -> Vec<ParsedTool> {
    document
        .elements_by_tag(TOOL_TAG)
        .filter_map(|el| {
            let name = el.attr("name")?;
            Some(ParsedTool {
                name: name.to_string(),
                description: el.attr("description").unwrap_or_default().to_string(),
                schema: parse_object_schema(el),
                element: el.id(),
            })
        })
        .collect()
}

/// All named `<resource>` elements, then all named `<context>` elements.
///
/// Priority between the two is the registry's business.
pub fn parse_resources(document: &Document) -> Vec<ParsedResource> {
    declared_resources(document, RESOURCE_TAG, ResourceOrigin::Resource)
        .chain(declared_resources(document, CONTEXT_TAG, ResourceOrigin::Context))
        .collect()
}

fn declared_resources<'a>(
    document: &'a Document,
    tag: &'a str,
    origin: ResourceOrigin,
) -> impl Iterator<Item = ParsedResource> + 'a {
    document.elements_by_tag(tag).filter_map(move |el| {
        let name = el.attr("name")?;
        Some(ParsedResource {
            name: name.to_string(),
            description: el.attr("description").unwrap_or_default().to_string(),
            content: el.text_content().trim().to_string(),
            origin,
            element: el.id(),
        })
    })
}

/// Input schema of a tool: its direct `<prop>` children, then its direct
/// `<array>` children.
pub fn parse_object_schema(tool: ElementRef<'_>) -> ObjectSchema {
    let mut schema = ObjectSchema::default();

    for prop in tool.children_by_tag(PROP_TAG) {
        if let Some((name, property)) = parse_property(prop) {
            schema.insert(name, property, prop.has_attr("required"));
        }
    }

    for array in tool.children_by_tag(ARRAY_TAG) {
        if let Some((name, property)) = parse_array(array) {
            schema.insert(name, property, array.has_attr("required"));
        }
    }

    schema
}

fn parse_property(prop: ElementRef<'_>) -> Option<(String, PropertySchema)> {
    let name = prop.attr("name")?.to_string();
    let text = prop.text_content();
    let example = strip_example_prefix(text.trim());
    let allowed = prop.attr("enum").map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
            .collect()
    });

    Some((
        name,
        PropertySchema {
            kind: prop.attr("type").unwrap_or(DEFAULT_TYPE).to_string(),
            description: prop.attr("description").unwrap_or_default().to_string(),
            example: (!example.is_empty()).then(|| example.to_string()),
            allowed,
            items: None,
        },
    ))
}

fn parse_array(array: ElementRef<'_>) -> Option<(String, PropertySchema)> {
    let name = array.attr("name")?.to_string();

    // Every group contributes to one merged item shape.
    let mut items = ObjectSchema::default();
    for dict in array.children_by_tag(DICT_TAG) {
        for prop in dict.descendants_by_tag(PROP_TAG) {
            if let Some((prop_name, property)) = parse_property(prop) {
                items.insert(prop_name, property, prop.has_attr("required"));
            }
        }
    }

    Some((
        name,
        PropertySchema {
            kind: "array".into(),
            description: array.attr("description").unwrap_or_default().to_string(),
            example: None,
            allowed: None,
            items: Some(Box::new(items)),
        },
    ))
}

/// Strip a leading `Example:` (any case) and the whitespace after it.
fn strip_example_prefix(text: &str) -> &str {
    const PREFIX: &str = "example:";
    match text.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => text[PREFIX.len()..].trim_start(),
        _ => text,
    }
}
