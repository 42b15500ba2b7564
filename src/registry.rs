//! Tool and resource registry.
//!
//! The document is the source of truth: a registry is a value computed from
//! one document snapshot by [`Registry::refresh`] and thrown away on the next
//! protocol call.

use std::collections::HashMap;

use crate::dom::{Document, ElementId};
use crate::protocol::{ResourceContents, ResourceDefinition, ToolDefinition};
use crate::schema::{self, ObjectSchema, ResourceOrigin};

/// URI scheme of page resources.
pub const RESOURCE_SCHEME: &str = "dom://";

/// MIME type of every page resource.
pub const RESOURCE_MIME_TYPE: &str = "text/plain";

/// A tool declared on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Input schema.
    pub schema: ObjectSchema,
    /// Element that receives the call event.
    pub element: ElementId,
}

impl ToolDescriptor {
    /// Protocol view of this tool.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_value(),
        }
    }
}

/// A resource declared on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    /// Unique name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Flattened text content.
    pub content: String,
    /// Declaring tag.
    pub origin: ResourceOrigin,
    /// Declaring element.
    pub element: ElementId,
}

impl ResourceDescriptor {
    /// `dom://<name>`.
    pub fn uri(&self) -> String {
        format!("{}{}", RESOURCE_SCHEME, self.name)
    }

    /// Protocol view of this resource.
    pub fn definition(&self) -> ResourceDefinition {
        ResourceDefinition {
            uri: self.uri(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: RESOURCE_MIME_TYPE.into(),
        }
    }

    /// Contents as returned by a read of `uri`.
    pub fn contents(&self, uri: &str) -> ResourceContents {
        ResourceContents {
            uri: uri.to_string(),
            mime_type: RESOURCE_MIME_TYPE.into(),
            text: self.content.clone(),
        }
    }
}

/// Name-indexed entries kept in first-insertion order.
#[derive(Debug, Clone)]
struct Catalog<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for Catalog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Catalog<T> {
    /// Insert, replacing any entry of the same name in place.
    fn insert(&mut self, name: &str, entry: T) {
        match self.index.get(name) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Insert only if no entry has this name yet.
    fn insert_if_absent(&mut self, name: &str, entry: T) {
        if !self.index.contains_key(name) {
            self.insert(name, entry);
        }
    }

    fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&position| &self.entries[position])
    }
}

/// Tools and resources of one document snapshot.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    generation: u64,
    tools: Catalog<ToolDescriptor>,
    resources: Catalog<ResourceDescriptor>,
}

impl Registry {
    /// Build the registry for a document.
    pub fn refresh(document: &Document) -> Self {
        let mut tools = Catalog::default();
        for tool in schema::parse_tools(document) {
            let name = tool.name.clone();
            tools.insert(
                &name,
                ToolDescriptor {
                    name: tool.name,
                    description: tool.description,
                    schema: tool.schema,
                    element: tool.element,
                },
            );
        }

        let mut resources = Catalog::default();
        for resource in schema::parse_resources(document) {
            let name = resource.name.clone();
            let descriptor = ResourceDescriptor {
                name: resource.name,
                description: resource.description,
                content: resource.content,
                origin: resource.origin,
                element: resource.element,
            };
            match resource.origin {
                ResourceOrigin::Resource => resources.insert(&name, descriptor),
                ResourceOrigin::Context => resources.insert_if_absent(&name, descriptor),
            }
        }

        tracing::debug!(
            tools = tools.entries.len(),
            resources = resources.entries.len(),
            "registry refreshed"
        );

        Self {
            generation: document.generation(),
            tools,
            resources,
        }
    }

    /// Generation of the document this registry was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tools in order of first declaration.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools.entries
    }

    /// Tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Resources in order of first declaration, `<resource>` tags first.
    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources.entries
    }

    /// Resource by name.
    pub fn resource(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.get(name)
    }

    /// Resource by URI; the `dom://` prefix is optional.
    pub fn resource_by_uri(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.resource(uri.strip_prefix(RESOURCE_SCHEME).unwrap_or(uri))
    }

    /// Tool definitions for listing.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools().iter().map(ToolDescriptor::definition).collect()
    }

    /// Resource definitions for listing.
    pub fn resource_definitions(&self) -> Vec<ResourceDefinition> {
        self.resources()
            .iter()
            .map(ResourceDescriptor::definition)
            .collect()
    }
}
