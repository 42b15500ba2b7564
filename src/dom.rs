//! Document model for page markup.
//!
//! Pages are parsed into an arena tree. The parser is tolerant in the way
//! browsers are (unknown elements, stray end tags, unterminated markup) but
//! honours self-closing syntax on every element, so `<prop name="a"/><prop
//! name="b"/>` yields two siblings rather than nesting the second property
//! inside the first.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Elements that never have children.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

const ROOT: usize = 0;

/// Non-owning handle to an element of one specific document.
///
/// Handles carry the generation of the document they were taken from and
/// resolve to nothing once the page swaps in a new document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    generation: u64,
    index: usize,
}

impl ElementId {
    /// Generation of the owning document.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    kind: NodeKind,
}

/// Parsed markup document.
#[derive(Debug, Clone)]
pub struct Document {
    generation: u64,
    nodes: Vec<Node>,
}

impl Document {
    /// Document with nothing but the root.
    pub fn empty() -> Self {
        Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Element {
                    tag: "#document".into(),
                    attrs: Vec::new(),
                },
            }],
        }
    }

    /// Parse markup. Never fails; malformed input degrades to text.
    pub fn parse(markup: &str) -> Self {
        let mut builder = TreeBuilder::new();
        builder.feed(markup);
        builder.finish()
    }

    /// Generation stamped on every handle taken from this document.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The document root. Listeners on the root see every bubbling event.
    pub fn root(&self) -> ElementRef<'_> {
        ElementRef {
            doc: self,
            index: ROOT,
        }
    }

    /// Resolve a handle, if it belongs to this document.
    pub fn get(&self, id: ElementId) -> Option<ElementRef<'_>> {
        if id.generation != self.generation {
            return None;
        }
        match self.nodes.get(id.index) {
            Some(Node {
                kind: NodeKind::Element { .. },
                ..
            }) => Some(ElementRef {
                doc: self,
                index: id.index,
            }),
            _ => None,
        }
    }

    /// All elements with this tag, in document order.
    pub fn elements_by_tag<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        self.root().descendants_by_tag(tag)
    }

    /// Text of the first `<title>` element, trimmed.
    pub fn title(&self) -> String {
        self.elements_by_tag("title")
            .next()
            .map(|el| el.text_content().trim().to_string())
            .unwrap_or_default()
    }

    /// The element and its ancestors, innermost first, ending at the root.
    ///
    /// Empty when the handle is stale.
    pub fn bubbling_path(&self, id: ElementId) -> Vec<ElementId> {
        let mut path = Vec::new();
        let mut current = self.get(id).map(|el| el.index);
        while let Some(index) = current {
            path.push(self.id_of(index));
            current = self.nodes[index].parent;
        }
        path
    }

    fn id_of(&self, index: usize) -> ElementId {
        ElementId {
            generation: self.generation,
            index,
        }
    }

    fn preorder(&self, start: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev().copied());
        }
        order
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::empty()
    }
}

/// Borrowed view of one element.
#[derive(Debug, Clone, Copy)]
pub struct ElementRef<'a> {
    doc: &'a Document,
    index: usize,
}

impl<'a> ElementRef<'a> {
    /// Stable handle for this element.
    pub fn id(&self) -> ElementId {
        self.doc.id_of(self.index)
    }

    /// Lower-case tag name.
    pub fn tag(&self) -> &'a str {
        match &self.doc.nodes[self.index].kind {
            NodeKind::Element { tag, .. } => tag,
            NodeKind::Text(_) => "",
        }
    }

    /// Attribute value, looked up case-insensitively.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        match &self.doc.nodes[self.index].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    /// Whether the attribute is present, whatever its value.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Parent element, `None` for the root.
    pub fn parent(&self) -> Option<ElementRef<'a>> {
        self.doc.nodes[self.index].parent.map(|index| ElementRef {
            doc: self.doc,
            index,
        })
    }

    /// Direct child elements with this tag.
    pub fn children_by_tag(&self, tag: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        let doc = self.doc;
        doc.nodes[self.index]
            .children
            .iter()
            .map(move |&index| ElementRef { doc, index })
            .filter(move |el| el.tag() == tag)
    }

    /// Descendant elements with this tag, in document order, excluding self.
    pub fn descendants_by_tag(&self, tag: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        let doc = self.doc;
        let start = self.index;
        doc.preorder(start)
            .into_iter()
            .filter(move |&index| index != start)
            .map(move |index| ElementRef { doc, index })
            .filter(move |el| el.tag() == tag)
    }

    /// Concatenated text of all descendant text nodes, like `textContent`.
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        for index in self.doc.preorder(self.index) {
            if let NodeKind::Text(chunk) = &self.doc.nodes[index].kind {
                text.push_str(chunk);
            }
        }
        text
    }
}

struct StartTag {
    name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
}

struct TreeBuilder {
    doc: Document,
    open: Vec<usize>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            doc: Document::empty(),
            open: vec![ROOT],
        }
    }

    fn current(&self) -> usize {
        self.open.last().copied().unwrap_or(ROOT)
    }

    fn append(&mut self, kind: NodeKind) -> usize {
        let parent = self.current();
        let index = self.doc.nodes.len();
        self.doc.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.doc.nodes[parent].children.push(index);
        index
    }

    fn text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let text = decode_entities(raw);
        // Merge adjacent text so textContent stays cheap.
        let parent = self.current();
        if let Some(&last) = self.doc.nodes[parent].children.last() {
            if let NodeKind::Text(existing) = &mut self.doc.nodes[last].kind {
                existing.push_str(&text);
                return;
            }
        }
        self.append(NodeKind::Text(text));
    }

    fn open_element(&mut self, tag: StartTag) -> usize {
        let void = VOID_ELEMENTS.contains(&tag.name.as_str());
        let index = self.append(NodeKind::Element {
            tag: tag.name,
            attrs: tag.attrs,
        });
        if !void && !tag.self_closing {
            self.open.push(index);
        }
        index
    }

    fn close_element(&mut self, name: &str) {
        // Stray end tags are ignored; matched ones close everything above them.
        let position = self.open.iter().rposition(|&index| {
            index != ROOT
                && matches!(
                    &self.doc.nodes[index].kind,
                    NodeKind::Element { tag, .. } if tag == name
                )
        });
        if let Some(position) = position {
            self.open.truncate(position);
        }
    }

    fn feed(&mut self, input: &str) {
        let mut rest = input;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("<!--") {
                match after.find("-->") {
                    Some(end) => rest = &after[end + 3..],
                    None => break,
                }
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                match rest.find('>') {
                    Some(end) => rest = &rest[end + 1..],
                    None => break,
                }
                continue;
            }
            if let Some(after) = rest.strip_prefix("</") {
                match after.find('>') {
                    Some(end) => {
                        let name = after[..end].trim().to_ascii_lowercase();
                        self.close_element(&name);
                        rest = &after[end + 1..];
                    }
                    None => break,
                }
                continue;
            }
            let opens_tag = rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic());
            if opens_tag {
                if let Some((tag, consumed)) = parse_start_tag(&rest[1..]) {
                    rest = &rest[1 + consumed..];
                    let raw = RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) && !tag.self_closing;
                    let name = tag.name.clone();
                    self.open_element(tag);
                    if raw {
                        rest = self.raw_text(&name, rest);
                    }
                    continue;
                }
            }
            // Plain text runs up to the next '<' that is not the first char.
            let first = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            let end = rest[first..]
                .find('<')
                .map(|i| i + first)
                .unwrap_or(rest.len());
            self.text(&rest[..end]);
            rest = &rest[end..];
        }
    }

    /// Consume raw text of `name` and its end tag; returns the remainder.
    fn raw_text<'i>(&mut self, name: &str, rest: &'i str) -> &'i str {
        let lowered = rest.to_ascii_lowercase();
        let needle = format!("</{}", name);
        let (body, remainder) = match lowered.find(&needle) {
            Some(start) => {
                let after = &rest[start..];
                let end = after.find('>').map(|i| start + i + 1).unwrap_or(rest.len());
                (&rest[..start], &rest[end..])
            }
            None => (rest, ""),
        };
        self.text(body);
        self.close_element(name);
        remainder
    }

    fn finish(self) -> Document {
        self.doc
    }
}

fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
}

/// Parse a start tag whose `<` has been consumed. Returns the tag and the
/// number of bytes consumed including the closing `>`.
fn parse_start_tag(input: &str) -> Option<(StartTag, usize)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() && !is_space(bytes[i]) && bytes[i] != b'>' && bytes[i] != b'/' {
        i += 1;
    }
    let name = input[..i].to_ascii_lowercase();
    let mut attrs: Vec<(String, String)> = Vec::new();

    loop {
        while i < bytes.len() && is_space(bytes[i]) {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        match bytes[i] {
            b'>' => {
                return Some((
                    StartTag {
                        name,
                        attrs,
                        self_closing: false,
                    },
                    i + 1,
                ));
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                return Some((
                    StartTag {
                        name,
                        attrs,
                        self_closing: true,
                    },
                    i + 2,
                ));
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let start = i;
        while i < bytes.len()
            && !is_space(bytes[i])
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        if i == start {
            // A lone '=' or similar junk; skip it.
            i += 1;
            continue;
        }
        let key = input[start..i].to_ascii_lowercase();

        let mut j = i;
        while j < bytes.len() && is_space(bytes[j]) {
            j += 1;
        }
        let mut value = String::new();
        if j < bytes.len() && bytes[j] == b'=' {
            j += 1;
            while j < bytes.len() && is_space(bytes[j]) {
                j += 1;
            }
            match bytes.get(j) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let close = input[j + 1..].find(quote as char)?;
                    value = decode_entities(&input[j + 1..j + 1 + close]);
                    j += close + 2;
                }
                Some(_) => {
                    let begin = j;
                    while j < bytes.len() && !is_space(bytes[j]) && bytes[j] != b'>' {
                        j += 1;
                    }
                    value = decode_entities(&input[begin..j]);
                }
                None => return None,
            }
            i = j;
        }

        if !attrs.iter().any(|(existing, _)| *existing == key) {
            attrs.push((key, value));
        }
    }
}

/// Decode the character references that matter for attribute and text content.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, end + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
