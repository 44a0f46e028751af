//! Visible-text extraction from HTML.
//!
//! The content root is the first `article`, else `main`, else `body`.
//! Scripts, styles, navigation and hidden elements are dropped; block
//! elements and `<br>` end a line. Runs of whitespace collapse to one space
//! and blank lines are removed, so the same markup always yields the same
//! text.

use chrono::Utc;
use ego_tree::iter::Edge;
use ego_tree::NodeId;
use encoding_rs::{Encoding, UTF_8};
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};

use mr_core::{ExtractedDoc, ExtractionError};

pub const DEFAULT_MAX_CHARS: usize = 80_000;
const MAX_TITLE_CHARS: usize = 300;

const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "canvas", "iframe", "nav", "head",
    "object", "embed",
];

const BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "details", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hr", "li", "main", "ol", "p", "pre", "section", "summary", "table", "tr", "ul",
    "caption", "tbody", "thead", "tfoot",
];

const CELLS: &[&str] = &["td", "th"];

#[derive(Debug, Clone)]
pub struct Extractor {
    max_chars: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl Extractor {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn extract(
        &self,
        source_label: &str,
        raw: &[u8],
        content_type: &str,
    ) -> Result<ExtractedDoc, ExtractionError> {
        let markup = decode(raw, content_type);
        if markup.trim().is_empty() {
            return Err(ExtractionError::MalformedMarkup("document is empty".to_string()));
        }
        if markup.contains('\0') {
            return Err(ExtractionError::MalformedMarkup(
                "document contains NUL bytes".to_string(),
            ));
        }

        let document = Html::parse_document(&markup);
        let title = title(&document);

        let mut sink = TextSink::default();
        walk(content_root(&document), &mut sink);
        let text = cap_chars(sink.finish(), self.max_chars);

        Ok(ExtractedDoc {
            source_label: source_label.to_string(),
            title,
            word_count: text.split_whitespace().count(),
            text,
            extracted_at: Utc::now(),
        })
    }
}

/// Decodes with the charset named in the content type, UTF-8 otherwise.
/// Labels follow the WHATWG table, so `iso-8859-1` decodes as windows-1252.
fn decode(raw: &[u8], content_type: &str) -> String {
    let encoding = content_type
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, value)| Encoding::for_label(value.trim().trim_matches('"').as_bytes()))
        .unwrap_or(UTF_8);

    let (text, _, _) = encoding.decode(raw);
    text.into_owned()
}

fn title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let element = document.select(&selector).next()?;
    let title = collapse(&element.text().collect::<String>());
    if title.is_empty() {
        None
    } else {
        Some(cap_chars(title, MAX_TITLE_CHARS))
    }
}

fn content_root(document: &Html) -> ElementRef<'_> {
    ["article", "main", "body"]
        .iter()
        .filter_map(|name| Selector::parse(name).ok())
        .find_map(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element())
}

fn is_hidden(element: &Element) -> bool {
    element.attr("hidden").is_some()
        || element
            .attr("aria-hidden")
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("true"))
        || element
            .attr("role")
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("navigation"))
}

/// Iterative so nesting depth never grows the stack.
fn walk(root: ElementRef<'_>, sink: &mut TextSink) {
    let mut skipping: Option<NodeId> = None;

    for edge in root.traverse() {
        match edge {
            Edge::Open(node) => {
                if skipping.is_some() {
                    continue;
                }
                match node.value() {
                    Node::Text(text) => sink.push(text),
                    Node::Element(el) => {
                        let name = el.name();
                        if node.id() != root.id() && (SKIPPED.contains(&name) || is_hidden(el)) {
                            skipping = Some(node.id());
                        } else if name == "br" || BLOCKS.contains(&name) {
                            sink.break_line();
                        }
                    }
                    _ => {}
                }
            }
            Edge::Close(node) => {
                if let Some(id) = skipping {
                    if id == node.id() {
                        skipping = None;
                    }
                    continue;
                }
                if let Node::Element(el) = node.value() {
                    let name = el.name();
                    if BLOCKS.contains(&name) {
                        sink.break_line();
                    } else if CELLS.contains(&name) {
                        sink.push(" ");
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct TextSink {
    lines: Vec<String>,
    current: String,
}

impl TextSink {
    fn push(&mut self, text: &str) {
        self.current.push_str(text);
    }

    fn break_line(&mut self) {
        let line = collapse(&self.current);
        if !line.is_empty() {
            self.lines.push(line);
        }
        self.current.clear();
    }

    fn finish(mut self) -> String {
        self.break_line();
        self.lines.join("\n")
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = "text/html; charset=utf-8";

    fn extract(markup: &str) -> ExtractedDoc {
        Extractor::default().extract("live", markup.as_bytes(), HTML).unwrap()
    }

    #[test]
    fn test_entities_decoded_and_scripts_dropped() {
        let doc = extract(
            "<html><head><title>A &amp; B</title><style>p{}</style></head>\
             <body><script>var x = 1;</script><p>Fish &amp; chips &lt;3</p></body></html>",
        );
        assert_eq!(doc.title.as_deref(), Some("A & B"));
        assert_eq!(doc.text, "Fish & chips <3");
        assert_eq!(doc.word_count, 4);
        assert_eq!(doc.source_label, "live");
    }

    #[test]
    fn test_blocks_and_breaks_become_lines() {
        let doc = extract(
            "<body><h1>Title</h1><p>one   <b>two</b>\n three</p><div>four<br>five</div>\
             <ul><li>a</li><li>b</li></ul></body>",
        );
        assert_eq!(doc.text, "Title\none two three\nfour\nfive\na\nb");
    }

    #[test]
    fn test_navigation_and_hidden_content_skipped() {
        let doc = extract(
            "<body><nav>Home | About</nav><div role=\"navigation\">Menu</div>\
             <p hidden>secret</p><p aria-hidden=\"true\">icon</p><p>Visible</p></body>",
        );
        assert_eq!(doc.text, "Visible");
    }

    #[test]
    fn test_article_preferred_over_body() {
        let doc = extract(
            "<body><header>Site header</header><main><article><p>Story text</p></article>\
             <aside>Related</aside></main></body>",
        );
        assert_eq!(doc.text, "Story text");

        let doc = extract("<body><p>Outside</p><main><p>Inside main</p></main></body>");
        assert_eq!(doc.text, "Inside main");
    }

    #[test]
    fn test_table_cells_are_separated() {
        let doc = extract("<body><table><tr><td>Price</td><td>$10</td></tr></table></body>");
        assert_eq!(doc.text, "Price $10");
    }

    #[test]
    fn test_deterministic() {
        let markup = "<body><p>The  Berenstain\tBears</p><p>Looney Tunes</p></body>";
        assert_eq!(extract(markup).text, extract(markup).text);
    }

    #[test]
    fn test_malformed_input() {
        let extractor = Extractor::default();
        assert!(matches!(
            extractor.extract("live", b"", HTML),
            Err(ExtractionError::MalformedMarkup(_))
        ));
        assert!(matches!(
            extractor.extract("live", b"  \n ", HTML),
            Err(ExtractionError::MalformedMarkup(_))
        ));
        assert!(matches!(
            extractor.extract("live", b"<p>a\0b</p>", HTML),
            Err(ExtractionError::MalformedMarkup(_))
        ));
        // broken but recoverable markup still extracts
        let doc = extractor.extract("live", b"<p>unclosed <b>bold", HTML).unwrap();
        assert_eq!(doc.text, "unclosed bold");
    }

    #[test]
    fn test_text_is_capped() {
        let doc = Extractor::new(10)
            .extract("live", b"<p>abcdefghij klmnop</p>", HTML)
            .unwrap();
        assert_eq!(doc.text, "abcdefghij");
    }

    #[test]
    fn test_declared_charsets() {
        let extractor = Extractor::default();
        let doc = extractor
            .extract("live", b"<p>caf\xe9</p>", "text/html; charset=ISO-8859-1")
            .unwrap();
        assert_eq!(doc.text, "café");

        let doc = extractor
            .extract(
                "live",
                b"<p>\x93quoted\x94 costs \x8010\x85 more</p>",
                "text/html; charset=\"windows-1252\"",
            )
            .unwrap();
        assert_eq!(doc.text, "\u{201c}quoted\u{201d} costs \u{20ac}10\u{2026} more");
        assert_eq!(doc.word_count, 4);

        let doc = extractor
            .extract("live", "<p>naïve</p>".as_bytes(), "text/html; charset=bogus")
            .unwrap();
        assert_eq!(doc.text, "naïve");
    }

    #[test]
    fn test_deeply_nested_markup() {
        let depth = 30_000;
        let markup = format!("<body>{}x</body>", "<div>".repeat(depth));
        let doc = Extractor::default()
            .extract("live", markup.as_bytes(), HTML)
            .unwrap();
        assert_eq!(doc.text, "x");

        let markup = format!("<body><p>kept</p><nav>{}hidden</nav></body>", "<span>".repeat(depth));
        let doc = Extractor::default()
            .extract("live", markup.as_bytes(), HTML)
            .unwrap();
        assert_eq!(doc.text, "kept");
    }
}
