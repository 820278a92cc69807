//! Arena-backed host document.
//!
//! Nodes live in an [`indextree::Arena`]; a node is *connected* when the
//! document root is among its ancestors. Nodes created by [`Document::create_element`]
//! start detached, which is what makes markup parsing inert: nothing is part of
//! the page until someone appends it.

use core::error::Error;
use core::fmt::{Display, Formatter, Result as FmtResult};
use indextree::{Arena, NodeId};
use smallvec::SmallVec;

mod printing;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeKind {
    #[default]
    Document,
    Element {
        tag: String,
    },
    Text {
        text: String,
    },
    Comment {
        text: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DOMNode {
    pub kind: NodeKind,
    pub attrs: SmallVec<(String, String), 4>,
}

impl DOMNode {
    fn element(tag: &str) -> Self {
        Self {
            kind: NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
            },
            attrs: SmallVec::new(),
        }
    }

    const fn accepts_children(&self) -> bool {
        matches!(self.kind, NodeKind::Document | NodeKind::Element { .. })
    }
}

/// Errors raised by document mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The node id does not belong to this document.
    UnknownNode(NodeId),
    /// The node was removed from the arena.
    Removed(NodeId),
    /// Attributes can only be set on elements.
    NotAnElement(NodeId),
    /// The requested insertion would produce an invalid tree.
    HierarchyRequest(String),
    /// The document has no `<head>` to attach scripts to.
    MissingHead,
    /// The document has no `<body>`.
    MissingBody,
}

impl Display for DomError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnknownNode(node) => write!(formatter, "unknown node {node:?}"),
            Self::Removed(node) => write!(formatter, "node {node:?} was removed from the document"),
            Self::NotAnElement(node) => write!(formatter, "node {node:?} is not an element"),
            Self::HierarchyRequest(message) => write!(formatter, "HierarchyRequestError: {message}"),
            Self::MissingHead => formatter.write_str("document has no <head> element"),
            Self::MissingBody => formatter.write_str("document has no <body> element"),
        }
    }
}

impl Error for DomError {}

#[derive(Debug)]
pub struct Document {
    dom: Arena<DOMNode>,
    root: NodeId,
    head: Option<NodeId>,
    body: Option<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document with the usual `html > head + body` skeleton.
    #[must_use]
    pub fn new() -> Self {
        let mut document = Self::empty();
        let html = document.dom.new_node(DOMNode::element("html"));
        let head = document.dom.new_node(DOMNode::element("head"));
        let body = document.dom.new_node(DOMNode::element("body"));
        document.root.append(html, &mut document.dom);
        html.append(head, &mut document.dom);
        html.append(body, &mut document.dom);
        document.head = Some(head);
        document.body = Some(body);
        document
    }

    /// A document holding nothing but its root node.
    #[must_use]
    pub fn empty() -> Self {
        let mut dom = Arena::new();
        let root = dom.new_node(DOMNode::default());
        Self {
            dom,
            root,
            head: None,
            body: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// The `<head>`, if it is still part of the document.
    ///
    /// # Errors
    /// Returns [`DomError::MissingHead`] when the document was built without a
    /// head or the head has since been detached.
    pub fn head(&self) -> Result<NodeId, DomError> {
        self.head
            .filter(|head| self.is_connected(*head))
            .ok_or(DomError::MissingHead)
    }

    /// The `<body>`, if it is still part of the document.
    ///
    /// # Errors
    /// Returns [`DomError::MissingBody`] when there is no connected body.
    pub fn body(&self) -> Result<NodeId, DomError> {
        self.body
            .filter(|body| self.is_connected(*body))
            .ok_or(DomError::MissingBody)
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.dom.new_node(DOMNode::element(tag))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.dom.new_node(DOMNode {
            kind: NodeKind::Text {
                text: text.to_owned(),
            },
            attrs: SmallVec::new(),
        })
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.dom.new_node(DOMNode {
            kind: NodeKind::Comment {
                text: text.to_owned(),
            },
            attrs: SmallVec::new(),
        })
    }

    /// Look up a live node.
    ///
    /// # Errors
    /// Returns an error if the id is foreign to this arena or was removed.
    pub fn node(&self, node: NodeId) -> Result<&DOMNode, DomError> {
        match self.dom.get(node) {
            Some(entry) if !entry.is_removed() => Ok(entry.get()),
            Some(_) => Err(DomError::Removed(node)),
            None => Err(self.missing(node)),
        }
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut DOMNode, DomError> {
        let error = self.missing(node);
        match self.dom.get_mut(node) {
            Some(entry) if !entry.is_removed() => Ok(entry.get_mut()),
            Some(_) => Err(DomError::Removed(node)),
            None => Err(error),
        }
    }

    /// Classify an id the arena no longer resolves. A slot inside the arena
    /// whose stamp moved on held a node that was removed.
    fn missing(&self, node: NodeId) -> DomError {
        if usize::from(node) <= self.dom.len() {
            DomError::Removed(node)
        } else {
            DomError::UnknownNode(node)
        }
    }

    #[must_use]
    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        match &self.node(node).ok()?.kind {
            NodeKind::Element { tag } => Some(tag.as_str()),
            _ => None,
        }
    }

    /// Set (or replace) an attribute, keeping first-insertion order.
    ///
    /// # Errors
    /// Fails on removed nodes and non-elements.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let entry = self.node_mut(node)?;
        if !matches!(entry.kind, NodeKind::Element { .. }) {
            return Err(DomError::NotAnElement(node));
        }
        let name = name.to_ascii_lowercase();
        if let Some(slot) = entry.attrs.iter_mut().find(|(key, _)| *key == name) {
            value.clone_into(&mut slot.1);
        } else {
            entry.attrs.push((name, value.to_owned()));
        }
        Ok(())
    }

    #[must_use]
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.node(node)
            .ok()?
            .attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        self.node(node).map_or(&[], |entry| &entry.attrs[..])
    }

    /// Append `child` as the last child of `parent`, detaching it from any
    /// previous parent first.
    ///
    /// # Errors
    /// Fails if either node is gone, the parent cannot hold children, or the
    /// child is an ancestor of the parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if !self.node(parent)?.accepts_children() {
            return Err(DomError::HierarchyRequest(format!(
                "node {parent:?} cannot have children"
            )));
        }
        self.node(child)?;
        parent
            .checked_append(child, &mut self.dom)
            .map_err(|err| DomError::HierarchyRequest(format!("{err:?}")))
    }

    /// Detach a node from its parent. Returns `false` when there was nothing
    /// to do: the node is unknown, removed, or already parentless.
    pub fn detach(&mut self, node: NodeId) -> bool {
        let attached = self
            .dom
            .get(node)
            .is_some_and(|entry| !entry.is_removed() && entry.parent().is_some());
        if attached {
            node.detach(&mut self.dom);
        }
        attached
    }

    /// Remove every child subtree of `node`, returning how many direct children
    /// went away.
    pub fn clear_children(&mut self, node: NodeId) -> usize {
        let children = self.children(node);
        for child in &children {
            child.remove_subtree(&mut self.dom);
        }
        children.len()
    }

    /// Remove a node and its whole subtree from the arena.
    pub fn remove_subtree(&mut self, node: NodeId) {
        if self.node(node).is_ok() {
            node.remove_subtree(&mut self.dom);
        }
    }

    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        if self.node(node).is_err() {
            return Vec::new();
        }
        node.children(&self.dom).collect()
    }

    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.dom
            .get(node)
            .filter(|entry| !entry.is_removed())
            .and_then(indextree::Node::parent)
    }

    /// Whether the document root is an ancestor of (or equal to) `node`.
    #[must_use]
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.node(node).is_ok() && node.ancestors(&self.dom).any(|ancestor| ancestor == self.root)
    }

    /// Concatenated text of every descendant text node.
    #[must_use]
    pub fn text_content(&self, node: NodeId) -> String {
        if self.node(node).is_err() {
            return String::new();
        }
        node.descendants(&self.dom)
            .filter_map(|id| match &self.dom[id].get().kind {
                NodeKind::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Descendant elements of `scope` (excluding `scope`) with the given tag.
    #[must_use]
    pub fn elements_by_tag(&self, scope: NodeId, tag: &str) -> Vec<NodeId> {
        if self.node(scope).is_err() {
            return Vec::new();
        }
        node_descendants(&self.dom, scope)
            .filter(|id| self.tag_name(*id).is_some_and(|name| name.eq_ignore_ascii_case(tag)))
            .collect()
    }

    /// First connected element carrying `id="<value>"`.
    #[must_use]
    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        node_descendants(&self.dom, self.root)
            .find(|id| self.attribute(*id, "id") == Some(value))
    }
}

fn node_descendants(dom: &Arena<DOMNode>, scope: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    scope.descendants(dom).skip(1)
}
