use scraper::{ElementRef, Html, Node};

use loom_domain::text::collapse_whitespace;

/// Tags whose text is page furniture rather than article content.
const SKIP_TAGS: &[&str] =
	&["script", "style", "noscript", "nav", "header", "footer", "aside", "iframe", "svg", "form"];

/// Strips markup from an HTML fragment, dropping scripts, styles, and
/// page furniture, and collapses the remaining text to single-space
/// runs.
pub fn html_to_text(html: &str) -> String {
	let fragment = Html::parse_fragment(html);
	let mut out = String::new();

	collect_text(fragment.root_element(), &mut out);

	collapse_whitespace(&out)
}

pub(crate) fn collect_text(element: ElementRef<'_>, out: &mut String) {
	for child in element.children() {
		match child.value() {
			Node::Text(text) => {
				out.push_str(text);
				out.push(' ');
			},
			Node::Element(el) => {
				if SKIP_TAGS.contains(&el.name()) {
					continue;
				}
				if let Some(child_ref) = ElementRef::wrap(child) {
					collect_text(child_ref, out);
				}
			},
			_ => {},
		}
	}
}
