//! JSON snapshots of document subtrees.
//!
//! Snapshots keep what a reader of the page would see: elements with their
//! attributes and non-blank text. Runs of adjacent text nodes read as one.

use super::{Document, NodeKind};
use indextree::NodeId;
use serde_json::{Map, Value, json};

impl Document {
    /// JSON snapshot of the subtree rooted at `node`.
    ///
    /// Comments and whitespace-only text are dropped. Removed nodes snapshot
    /// as `null`.
    #[must_use]
    pub fn snapshot(&self, node: NodeId) -> Value {
        let Ok(entry) = self.node(node) else {
            return Value::Null;
        };
        match &entry.kind {
            NodeKind::Document => json!({ "type": "document", "children": self.snapshot_children(node) }),
            NodeKind::Element { tag } => {
                let attrs: Map<String, Value> = entry
                    .attrs
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                    .collect();
                json!({
                    "type": "element",
                    "tag": tag,
                    "attrs": attrs,
                    "children": self.snapshot_children(node),
                })
            }
            NodeKind::Text { text } => text_value(text),
            NodeKind::Comment { .. } => Value::Null,
        }
    }

    fn snapshot_children(&self, node: NodeId) -> Vec<Value> {
        let mut children = Vec::new();
        let mut run = String::new();
        for child in self.children(node) {
            if let Ok(NodeKind::Text { text }) = self.node(child).map(|entry| &entry.kind) {
                run.push_str(text);
                continue;
            }
            children.push(text_value(&run));
            run.clear();
            children.push(self.snapshot(child));
        }
        children.push(text_value(&run));
        children.retain(|value| !value.is_null());
        children
    }
}

fn text_value(text: &str) -> Value {
    if text.trim().is_empty() {
        Value::Null
    } else {
        json!({ "type": "text", "text": text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomError;

    #[test]
    fn snapshot_joins_text_runs_and_skips_comments() -> Result<(), DomError> {
        let mut document = Document::new();
        let body = document.body()?;
        let div = document.create_element("div");
        document.set_attribute(div, "class", "ad-container")?;
        let first = document.create_text("Buy ");
        let second = document.create_text("now");
        let comment = document.create_comment("tracking pixel");
        let blank = document.create_text("  ");
        document.append_child(body, div)?;
        document.append_child(div, first)?;
        document.append_child(div, second)?;
        document.append_child(div, comment)?;
        document.append_child(div, blank)?;

        assert_eq!(
            document.snapshot(div),
            json!({
                "type": "element",
                "tag": "div",
                "attrs": { "class": "ad-container" },
                "children": [{ "type": "text", "text": "Buy now" }],
            })
        );
        Ok(())
    }

    #[test]
    fn removed_nodes_snapshot_as_null() -> Result<(), DomError> {
        let mut document = Document::new();
        let body = document.body()?;
        let div = document.create_element("div");
        document.append_child(body, div)?;
        document.remove_subtree(div);
        assert_eq!(document.snapshot(div), Value::Null);
        assert_eq!(document.snapshot(body), json!({ "type": "element", "tag": "body", "attrs": {}, "children": [] }));
        Ok(())
    }
}
