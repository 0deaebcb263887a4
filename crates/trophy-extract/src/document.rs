//! Capability-scoped view over a rendered page.
//!
//! Strategies only see [`StructuredDocument`]; [`HtmlDocument`] backs it with `scraper`.

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use trophy_core::collapse_whitespace;

/// Opaque node reference. Two handles are equal iff they name the same element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

pub trait StructuredDocument {
    /// Elements matching `selector`, in document order. Invalid selectors match nothing.
    fn query(&self, selector: &str) -> Vec<NodeHandle>;

    /// Elements strictly inside `scope` matching `selector`, in document order.
    fn query_within(&self, scope: NodeHandle, selector: &str) -> Vec<NodeHandle>;

    /// Visible text with whitespace collapsed; script/style bodies excluded.
    fn text(&self, node: NodeHandle) -> String;

    fn attr(&self, node: NodeHandle, name: &str) -> Option<String>;

    /// Number of elements nested below `node`. Handles inside `node` are exactly
    /// `node.index() + 1 ..= node.index() + subtree_len(node)`.
    fn subtree_len(&self, node: NodeHandle) -> usize;

    /// Raw script bodies and JSON-looking attribute payloads, in document order.
    fn embedded_payloads(&self) -> Vec<String>;
}

const NON_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

pub struct HtmlDocument {
    html: Html,
    /// Tree ids of every element in document order; `NodeHandle(i)` names `ids[i]`.
    ids: Vec<NodeId>,
}

impl HtmlDocument {
    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let ids = html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .map(|el| el.id())
            .collect();
        Self { html, ids }
    }

    /// `<title>` text, used to flag interstitial pages in logs.
    pub fn title(&self) -> Option<String> {
        let handle = self.query("title").into_iter().next()?;
        let text = self.text(handle);
        (!text.is_empty()).then_some(text)
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> + '_ {
        self.ids.iter().filter_map(|id| self.html.tree.get(*id)).filter_map(ElementRef::wrap)
    }

    fn element(&self, node: NodeHandle) -> Option<ElementRef<'_>> {
        let id = self.ids.get(node.0)?;
        self.html.tree.get(*id).and_then(ElementRef::wrap)
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(sel) => Some(sel),
        Err(err) => {
            warn!(selector, error = %err, "skipping invalid selector");
            None
        }
    }
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let inside_non_text = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| NON_TEXT_ELEMENTS.contains(&e.name())))
            .unwrap_or(false);
        if !inside_non_text {
            parts.push(&**text);
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn looks_like_json(value: &str) -> bool {
    let trimmed = value.trim_start();
    trimmed.len() > 2 && (trimmed.starts_with('{') || trimmed.starts_with('['))
}

impl StructuredDocument for HtmlDocument {
    fn query(&self, selector: &str) -> Vec<NodeHandle> {
        let Some(sel) = parse_selector(selector) else {
            return Vec::new();
        };
        self.elements()
            .enumerate()
            .filter(|(_, el)| sel.matches(el))
            .map(|(i, _)| NodeHandle(i))
            .collect()
    }

    fn query_within(&self, scope: NodeHandle, selector: &str) -> Vec<NodeHandle> {
        let Some(sel) = parse_selector(selector) else {
            return Vec::new();
        };
        let Some(root) = self.element(scope) else {
            return Vec::new();
        };
        root.descendants()
            .filter_map(ElementRef::wrap)
            .enumerate()
            .skip(1)
            .filter(|(_, el)| sel.matches(el))
            .map(|(offset, _)| NodeHandle(scope.0 + offset))
            .collect()
    }

    fn text(&self, node: NodeHandle) -> String {
        self.element(node).map(visible_text).unwrap_or_default()
    }

    fn attr(&self, node: NodeHandle, name: &str) -> Option<String> {
        self.element(node)
            .and_then(|el| el.value().attr(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn subtree_len(&self, node: NodeHandle) -> usize {
        self.element(node)
            .map(|el| el.descendants().filter_map(ElementRef::wrap).count().saturating_sub(1))
            .unwrap_or(0)
    }

    fn embedded_payloads(&self) -> Vec<String> {
        let mut payloads = Vec::new();
        for el in self.elements() {
            if el.value().name() == "script" {
                let body = el.text().collect::<String>();
                if !body.trim().is_empty() {
                    payloads.push(body);
                }
                continue;
            }
            for (_, value) in el.value().attrs() {
                if looks_like_json(value) {
                    payloads.push(value.to_string());
                }
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title> Trophies </title>
        <script>window.__STATE__ = {"a": 1};</script></head>
        <body>
          <ul id="list">
            <li class="row"><b>First</b> <span>10%</span></li>
            <li class="row" data-props='{"trophyId": 2}'><b>Second</b><style>.x{}</style></li>
          </ul>
        </body></html>"#;

    #[test]
    fn handles_are_document_order_indices() {
        let doc = HtmlDocument::parse(PAGE);
        let rows = doc.query("li.row");
        assert_eq!(rows.len(), 2);
        assert!(rows[0] < rows[1]);

        let list = doc.query("#list")[0];
        let inner = doc.query_within(list, "b");
        assert_eq!(inner.len(), 2);
        for handle in inner.iter().chain(rows.iter()) {
            assert!(handle.index() > list.index());
            assert!(handle.index() <= list.index() + doc.subtree_len(list));
        }
        assert_eq!(doc.text(inner[1]), "Second");
    }

    #[test]
    fn text_skips_style_bodies_and_collapses_whitespace() {
        let doc = HtmlDocument::parse(PAGE);
        let rows = doc.query("li.row");
        assert_eq!(doc.text(rows[0]), "First 10%");
        assert_eq!(doc.text(rows[1]), "Second");
        assert_eq!(doc.title().as_deref(), Some("Trophies"));
    }

    #[test]
    fn payloads_include_scripts_and_json_attributes() {
        let doc = HtmlDocument::parse(PAGE);
        let payloads = doc.embedded_payloads();
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].contains("__STATE__"));
        assert_eq!(payloads[1], r#"{"trophyId": 2}"#);
    }

    #[test]
    fn handles_stay_valid_on_long_pages() {
        let rows: String = (0..400)
            .map(|i| format!("<li class=\"row\"><b>Row {i}</b></li>"))
            .collect();
        let doc = HtmlDocument::parse(&format!("<html><body><ul>{rows}</ul></body></html>"));
        let handles = doc.query("li.row");
        assert_eq!(handles.len(), 400);
        assert_eq!(doc.text(handles[399]), "Row 399");
        assert_eq!(doc.attr(handles[250], "class").as_deref(), Some("row"));
        let bold = doc.query_within(handles[123], "b");
        assert_eq!(bold.len(), 1);
        assert_eq!(doc.text(bold[0]), "Row 123");
        assert_eq!(doc.subtree_len(handles[7]), 1);
    }

    #[test]
    fn invalid_selector_matches_nothing() {
        let doc = HtmlDocument::parse(PAGE);
        assert!(doc.query("li[").is_empty());
    }
}
