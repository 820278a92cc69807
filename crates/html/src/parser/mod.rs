//! Inert parsing of third-party markup.
//!
//! Markup is run through the html5ever fragment algorithm into a throwaway
//! `RcDom`, then copied into the host [`Document`] as detached nodes. Script
//! elements are never copied: each one becomes a [`ScriptDescriptor`] so the
//! caller decides if and where it runs. Nothing here evaluates code or touches
//! the network.

use crate::dom::{Document, DomError};
use html5ever::tendril::TendrilSink as _;
use html5ever::{ParseOpts, QualName, local_name, namespace_url, ns, parse_fragment};
use indextree::NodeId;
use log::debug;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

/// Where a script's code comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScriptSource {
    /// `<script src=...>`.
    External,
    /// Code between the script tags.
    Inline,
}

/// How a script would be treated by a browser, judged from its `type`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    Classic,
    Module,
    /// Not executable (`application/ld+json`, `text/template`, ...).
    Data,
}

/// MIME types a browser treats as classic JavaScript.
const JAVASCRIPT_MIME_TYPES: &[&str] = &[
    "application/ecmascript",
    "application/javascript",
    "application/x-ecmascript",
    "application/x-javascript",
    "text/ecmascript",
    "text/javascript",
    "text/javascript1.0",
    "text/javascript1.1",
    "text/javascript1.2",
    "text/javascript1.3",
    "text/javascript1.4",
    "text/javascript1.5",
    "text/jscript",
    "text/livescript",
    "text/x-ecmascript",
    "text/x-javascript",
];

impl ScriptKind {
    /// Classify a `type` attribute value.
    #[must_use]
    pub fn from_type(script_type: Option<&str>) -> Self {
        let Some(raw) = script_type else {
            return Self::Classic;
        };
        let essence = raw.split(';').next().unwrap_or_default().trim();
        if essence.is_empty() {
            return Self::Classic;
        }
        if essence.eq_ignore_ascii_case("module") {
            return Self::Module;
        }
        if JAVASCRIPT_MIME_TYPES
            .iter()
            .any(|mime| mime.eq_ignore_ascii_case(essence))
        {
            Self::Classic
        } else {
            Self::Data
        }
    }
}

/// A `<script>` element lifted out of parsed markup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub kind: ScriptSource,
    /// Attributes exactly as written, in source order.
    pub attributes: Vec<(String, String)>,
    pub source_url: Option<String>,
    pub inline_body: Option<String>,
}

impl ScriptDescriptor {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn script_type(&self) -> Option<&str> {
        self.attribute("type")
    }

    #[must_use]
    pub fn script_kind(&self) -> ScriptKind {
        ScriptKind::from_type(self.script_type())
    }
}

/// Output of [`parse_markup`].
#[derive(Clone, Debug)]
pub struct ParsedMarkup {
    /// Detached `<div>` holding every non-script node in source order.
    pub container: NodeId,
    /// One entry per `<script>`, in document order.
    pub scripts: Vec<ScriptDescriptor>,
}

/// Parse `markup` into detached nodes of `document`.
///
/// # Errors
/// Returns an error if copying the parsed tree into the document fails.
pub fn parse_markup(document: &mut Document, markup: &str) -> Result<ParsedMarkup, DomError> {
    let context = QualName::new(None, ns!(html), local_name!("body"));
    let dom: RcDom = parse_fragment(RcDom::default(), ParseOpts::default(), context, Vec::new()).one(markup);
    if !dom.errors.is_empty() {
        debug!(
            "markup parsed with {} recoverable error(s): {}",
            dom.errors.len(),
            dom.errors.join("; ")
        );
    }

    let container = document.create_element("div");
    let mut scripts = Vec::new();
    // Fragment parsing puts the parsed nodes under a synthetic <html> element.
    for top in dom.document.children.borrow().iter() {
        if let NodeData::Element { name, .. } = &top.data {
            if name.local == local_name!("html") {
                for child in top.children.borrow().iter() {
                    copy_node(document, child, container, &mut scripts)?;
                }
                continue;
            }
        }
        copy_node(document, top, container, &mut scripts)?;
    }
    Ok(ParsedMarkup { container, scripts })
}

fn copy_node(
    document: &mut Document,
    handle: &Handle,
    parent: NodeId,
    scripts: &mut Vec<ScriptDescriptor>,
) -> Result<(), DomError> {
    match &handle.data {
        NodeData::Text { contents } => {
            let text = document.create_text(&contents.borrow());
            document.append_child(parent, text)
        }
        NodeData::Comment { contents } => {
            let comment = document.create_comment(contents);
            document.append_child(parent, comment)
        }
        NodeData::Element { name, attrs, .. } => {
            if name.local == local_name!("script") {
                scripts.push(describe_script(handle, &attrs.borrow()));
                return Ok(());
            }
            let element = document.create_element(&name.local);
            for attr in attrs.borrow().iter() {
                document.set_attribute(element, &attr.name.local, &attr.value)?;
            }
            document.append_child(parent, element)?;
            // Template contents live in a separate fragment and stay inert.
            for child in handle.children.borrow().iter() {
                copy_node(document, child, element, scripts)?;
            }
            Ok(())
        }
        NodeData::Document | NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => Ok(()),
    }
}

fn describe_script(handle: &Handle, attrs: &[html5ever::Attribute]) -> ScriptDescriptor {
    let attributes: Vec<(String, String)> = attrs
        .iter()
        .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
        .collect();
    let source_url = attributes
        .iter()
        .find(|(name, _)| name == "src")
        .map(|(_, value)| value.trim().to_owned())
        .filter(|value| !value.is_empty());

    let mut body = String::new();
    for child in handle.children.borrow().iter() {
        if let NodeData::Text { contents } = &child.data {
            body.push_str(&contents.borrow());
        }
    }

    match source_url {
        Some(url) => ScriptDescriptor {
            kind: ScriptSource::External,
            attributes,
            source_url: Some(url),
            inline_body: None,
        },
        None => ScriptDescriptor {
            kind: ScriptSource::Inline,
            attributes,
            source_url: None,
            inline_body: Some(body),
        },
    }
}
