//! The live page: current document, URL and event bus.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::dom::{Document, ElementId};
use crate::events::{CallEvent, EventBus, EventTarget, ListenerId};

/// A page whose markup declares tools and resources.
///
/// The document may be swapped at any time; readers take an `Arc` snapshot.
#[derive(Debug)]
pub struct Page {
    url: String,
    document: RwLock<Arc<Document>>,
    events: EventBus,
}

impl Page {
    /// Parse markup into a new page.
    pub fn new(url: impl Into<String>, markup: &str) -> Self {
        Self::from_document(url, Document::parse(markup))
    }

    /// Wrap an already parsed document.
    pub fn from_document(url: impl Into<String>, document: Document) -> Self {
        Self {
            url: url.into(),
            document: RwLock::new(Arc::new(document)),
            events: EventBus::new(),
        }
    }

    /// Page URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Signal transport of this page.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current document as seen at call time.
    pub async fn snapshot(&self) -> Arc<Document> {
        Arc::clone(&*self.document.read().await)
    }

    /// Replace the document with freshly parsed markup.
    pub async fn replace_markup(&self, markup: &str) {
        self.replace_document(Document::parse(markup)).await;
    }

    /// Replace the document. Listeners attached to old elements are dropped.
    pub async fn replace_document(&self, document: Document) {
        let generation = document.generation();
        *self.document.write().await = Arc::new(document);
        self.events.prune_stale(generation);
        tracing::debug!(generation, "page document replaced");
    }

    /// Document title.
    pub async fn title(&self) -> String {
        self.snapshot().await.title()
    }

    /// Context used when the page declares no resources.
    pub async fn fallback_context(&self) -> String {
        format!("Current URL: {}\nPage Title: {}", self.url, self.title().await)
    }

    /// Element that currently backs the tool `name`.
    ///
    /// When several elements share the name the last one wins, matching what
    /// the registry exposes.
    pub async fn tool_element(&self, name: &str) -> Option<ElementId> {
        let document = self.snapshot().await;
        let element = document
            .elements_by_tag("tool")
            .filter(|el| el.attr("name") == Some(name))
            .last()
            .map(|el| el.id());
        element
    }

    /// Attach a call listener directly to the element of tool `name`.
    pub async fn on_tool_call<F>(&self, name: &str, listener: F) -> Option<ListenerId>
    where
        F: Fn(&mut CallEvent) + Send + Sync + 'static,
    {
        let element = self.tool_element(name).await?;
        Some(self.events.on_call(EventTarget::Element(element), listener))
    }

    /// Attach a call listener on the document root.
    pub fn on_any_call<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&mut CallEvent) + Send + Sync + 'static,
    {
        self.events.on_call(EventTarget::Document, listener)
    }
}
