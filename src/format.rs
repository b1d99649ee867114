//! Line-oriented formatter that turns advice text into HTML fragments.
//!
//! The backend answers with loosely markdown-flavored text: `# ` headings,
//! numbered items with a bold title, `- **label**` bullets, `* ` bullets,
//! inline `**bold**` spans, bare URLs and the occasional literal anchor tag.
//! Every input line becomes exactly one [`Fragment`], in input order.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '\'', '"'];

static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b[^>]*>.*?</a>").expect("valid anchor regex"));
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x{E000}(\d+)\x{E001}").expect("valid placeholder regex"));
static ORDERED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+\.\s)\*\*(.*?)\*\*(.*)$").expect("valid ordered regex"));
static LABELLED_BULLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^- \*\*(.*?)\*\*(.*)$").expect("valid bullet regex"));
static BOLD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid bold regex"));
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?P<label>(?:Visit|Portal):\s*)(?P<labelled>[^\s<>"\x{E000}]+\.[A-Za-z]{2,}[^\s<>"\x{E000}]*)|(?P<bare>(?i:https?://|www\.)[^\s<>"\x{E000}]+)"#,
    )
    .expect("valid url regex")
});
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid tag regex"));

/// Semantic kind of a rendered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Heading,
    Paragraph,
    Break,
}

impl FragmentKind {
    /// Element name used for the fragment's placeholder.
    pub fn tag(self) -> &'static str {
        match self {
            FragmentKind::Heading => "h3",
            FragmentKind::Paragraph => "p",
            FragmentKind::Break => "br",
        }
    }

    pub fn is_void(self) -> bool {
        matches!(self, FragmentKind::Break)
    }
}

/// One rendered block derived from one input line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// CSS class of the outer element; empty for breaks.
    pub class: &'static str,
    /// Full HTML for the block, including its outer element.
    pub markup: String,
    /// Plain-text projection of `markup`, revealed character by character.
    pub text: String,
}

impl Fragment {
    fn line_break() -> Self {
        Self {
            kind: FragmentKind::Break,
            class: "",
            markup: "<br>".to_string(),
            text: String::new(),
        }
    }

    fn block(kind: FragmentKind, class: &'static str, inner: &str) -> Self {
        let tag = kind.tag();
        let markup = format!(r#"<{tag} class="{class}">{inner}</{tag}>"#);
        let text = plain_text(inner);
        Self {
            kind,
            class,
            markup,
            text,
        }
    }

    /// The heading label, if this is a heading.
    pub fn heading_label(&self) -> Option<&str> {
        match self.kind {
            FragmentKind::Heading => Some(&self.text),
            _ => None,
        }
    }
}

/// Formats a whole response, one fragment per line.
///
/// Empty input yields no fragments. A trailing `\r` on each line is dropped so
/// CRLF responses format the same as LF ones.
pub fn format_response(text: &str) -> Vec<Fragment> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n')
        .map(|line| format_line(line.strip_suffix('\r').unwrap_or(line)))
        .collect()
}

/// Direct, non-animated rendering of a fragment sequence.
pub fn render_html(fragments: &[Fragment]) -> String {
    fragments.iter().map(|f| f.markup.as_str()).collect()
}

/// Formats a single line.
pub fn format_line(line: &str) -> Fragment {
    if line.trim().is_empty() {
        return Fragment::line_break();
    }

    let (protected, anchors) = protect_anchors(line);
    let mut fragment = classify(&protected);
    if !anchors.is_empty() {
        fragment.markup = restore_anchors(&fragment.markup, &anchors);
        fragment.text = plain_text(&restore_anchors(&fragment.text, &anchors));
    }
    fragment
}

fn classify(line: &str) -> Fragment {
    if let Some(label) = line.strip_prefix("# ") {
        return Fragment::block(FragmentKind::Heading, "mt-4 mb-3", &inline(label));
    }

    if let Some(caps) = ORDERED_RE.captures(line) {
        let inner = format!(
            "{}<strong>{}</strong>{}",
            &caps[1],
            &caps[2],
            bold_spans(&caps[3])
        );
        return Fragment::block(FragmentKind::Paragraph, "mb-2", &link_urls(&inner));
    }

    if line.starts_with("- **") {
        if let Some(caps) = LABELLED_BULLET_RE.captures(line) {
            let inner = format!("• <strong>{}</strong>{}", &caps[1], bold_spans(&caps[2]));
            return Fragment::block(FragmentKind::Paragraph, "mb-2", &link_urls(&inner));
        }
    }

    if let Some(item) = line.strip_prefix("* ") {
        let inner = format!("• {}", inline(item));
        return Fragment::block(FragmentKind::Paragraph, "mb-2 ms-3", &inner);
    }

    Fragment::block(FragmentKind::Paragraph, "mb-2", &inline(line))
}

/// Bold first, then links, so a URL inside a bold span stays inside it.
fn inline(text: &str) -> String {
    link_urls(&bold_spans(text))
}

fn bold_spans(text: &str) -> String {
    BOLD_RE.replace_all(text, "<strong>$1</strong>").into_owned()
}

fn protect_anchors(line: &str) -> (String, Vec<String>) {
    let mut anchors = Vec::new();
    let protected = ANCHOR_RE.replace_all(line, |caps: &Captures| {
        let index = anchors.len();
        anchors.push(caps[0].to_string());
        format!("{PLACEHOLDER_OPEN}{index}{PLACEHOLDER_CLOSE}")
    });
    (protected.into_owned(), anchors)
}

fn restore_anchors(text: &str, anchors: &[String]) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| anchors.get(index))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

fn link_urls(html: &str) -> String {
    URL_RE
        .replace_all(html, |caps: &Captures| {
            let (prefix, raw) = match (caps.name("label"), caps.name("labelled")) {
                (Some(label), Some(url)) => (label.as_str(), url.as_str()),
                _ => ("", caps.name("bare").map(|m| m.as_str()).unwrap_or_default()),
            };
            let (url, trailing) = split_trailing_punctuation(raw);
            if url.is_empty() {
                return caps[0].to_string();
            }
            format!("{prefix}{}{trailing}", anchor(url))
        })
        .into_owned()
}

fn split_trailing_punctuation(raw: &str) -> (&str, &str) {
    let url = raw.trim_end_matches(TRAILING_PUNCTUATION);
    (url, &raw[url.len()..])
}

fn anchor(url: &str) -> String {
    format!(
        r#"<a href="{}" target="_blank" rel="noopener noreferrer">{url}</a>"#,
        normalize_href(url)
    )
}

/// Prefixes `https://` when the URL carries no scheme.
pub fn normalize_href(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Strips tags and decodes the handful of entities the backend emits.
pub fn plain_text(markup: &str) -> String {
    let stripped = TAG_RE.replace_all(markup, "");
    decode_entities(&stripped)
}

/// Escapes text for use as element content or a quoted attribute value.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_fragment_per_line_in_order() {
        let input = "# Intro\nfirst\n\n- **Soil**: loam\n* mulch\n2. **Water** daily";
        let fragments = format_response(input);
        assert_eq!(fragments.len(), input.split('\n').count());
        let kinds: Vec<_> = fragments.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FragmentKind::Heading,
                FragmentKind::Paragraph,
                FragmentKind::Break,
                FragmentKind::Paragraph,
                FragmentKind::Paragraph,
                FragmentKind::Paragraph,
            ]
        );
        assert_eq!(fragments[1].text, "first");
    }

    #[test]
    fn empty_input_has_no_fragments() {
        assert!(format_response("").is_empty());
    }

    #[test]
    fn whitespace_line_is_a_break() {
        let fragments = format_response("   \t");
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].kind, FragmentKind::Break);
        assert_eq!(fragments[0].markup, "<br>");
        assert!(fragments[0].text.is_empty());
    }

    #[test]
    fn heading_label() {
        let fragments = format_response("# Title");
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].heading_label(), Some("Title"));
        assert_eq!(fragments[0].markup, r#"<h3 class="mt-4 mb-3">Title</h3>"#);
    }

    #[test]
    fn labelled_bullet() {
        let fragment = format_line("- **Label** rest");
        assert_eq!(fragment.kind, FragmentKind::Paragraph);
        assert_eq!(
            fragment.markup,
            r#"<p class="mb-2">• <strong>Label</strong> rest</p>"#
        );
        assert_eq!(fragment.text, "• Label rest");
    }

    #[test]
    fn numbered_bold_item() {
        let fragment = format_line("1. **Watering Schedule** twice a week");
        assert_eq!(
            fragment.markup,
            r#"<p class="mb-2">1. <strong>Watering Schedule</strong> twice a week</p>"#
        );
    }

    #[test]
    fn indented_bullet() {
        let fragment = format_line("* neem oil spray");
        assert_eq!(fragment.class, "mb-2 ms-3");
        assert_eq!(fragment.text, "• neem oil spray");
    }

    #[test]
    fn generic_paragraph_bolds_every_span() {
        let fragment = format_line("Use **compost** and **mulch** often");
        assert_eq!(
            fragment.markup,
            r#"<p class="mb-2">Use <strong>compost</strong> and <strong>mulch</strong> often</p>"#
        );
    }

    #[test]
    fn dash_without_closing_bold_falls_back_to_paragraph() {
        let fragment = format_line("- **unterminated");
        assert_eq!(fragment.markup, r#"<p class="mb-2">- **unterminated</p>"#);
    }

    #[test]
    fn bare_www_gets_scheme_and_loses_trailing_period() {
        let fragment = format_line("www.example.com.");
        assert_eq!(
            fragment.markup,
            r#"<p class="mb-2"><a href="https://www.example.com" target="_blank" rel="noopener noreferrer">www.example.com</a>.</p>"#
        );
        assert_eq!(fragment.text, "www.example.com.");
    }

    #[test]
    fn portal_prefix_accepts_bare_domain() {
        let fragment = format_line("Portal: pmkisan.gov.in");
        assert!(fragment.markup.contains(
            r#"Portal: <a href="https://pmkisan.gov.in" target="_blank" rel="noopener noreferrer">pmkisan.gov.in</a>"#
        ));
    }

    #[test]
    fn visit_prefix_needs_a_real_domain() {
        for line in ["Visit: e.g. the block office", "Visit: K.V.K. in your district", "Portal: 3.5 km away"] {
            let fragment = format_line(line);
            assert!(!fragment.markup.contains("<a "), "{line} was linked");
            assert_eq!(fragment.text, line);
        }
        let fragment = format_line("Visit: pmkisan.gov.in.");
        assert!(fragment.markup.ends_with(
            r#"Visit: <a href="https://pmkisan.gov.in" target="_blank" rel="noopener noreferrer">pmkisan.gov.in</a>.</p>"#
        ));
    }

    #[test]
    fn quote_after_url_stays_outside_the_link() {
        assert_eq!(split_trailing_punctuation("agri.example/kcc\"."), ("agri.example/kcc", "\"."));
        let fragment = format_line("Apply at \"https://agri.example/kcc\".");
        assert!(fragment.markup.contains(r#"href="https://agri.example/kcc""#));
        assert_eq!(fragment.text, "Apply at \"https://agri.example/kcc\".");
    }

    #[test]
    fn existing_anchor_is_left_alone() {
        let anchor = r#"<a href="https://agri.example/scheme">the scheme page</a>"#;
        let fragment = format_line(&format!("See {anchor} or https://other.example."));
        assert!(fragment.markup.contains(anchor));
        assert_eq!(fragment.markup.matches("<a ").count(), 2);
        assert!(fragment.markup.contains(r#"href="https://other.example""#));
        assert_eq!(fragment.text, "See the scheme page or https://other.example.");
    }

    #[test]
    fn numbered_item_with_url_gets_both_transforms() {
        let fragment = format_line("3. **PM-KISAN** Visit: https://pmkisan.gov.in, apply online");
        assert!(fragment.markup.starts_with(r#"<p class="mb-2">3. <strong>PM-KISAN</strong>"#));
        assert!(fragment.markup.contains(
            r#"Visit: <a href="https://pmkisan.gov.in" target="_blank" rel="noopener noreferrer">https://pmkisan.gov.in</a>, apply online"#
        ));
    }

    #[test]
    fn crlf_lines_match_lf_lines() {
        assert_eq!(format_response("# A\r\nb"), format_response("# A\nb"));
    }

    #[test]
    fn render_html_concatenates_markup() {
        let html = render_html(&format_response("# Tip\nWater daily."));
        assert_eq!(
            html,
            r#"<h3 class="mt-4 mb-3">Tip</h3><p class="mb-2">Water daily.</p>"#
        );
    }

    #[test]
    fn plain_text_decodes_entities() {
        assert_eq!(plain_text("<b>N &amp; P &lt;5%</b>"), "N & P <5%");
    }

    #[test]
    fn comparison_signs_are_not_tags() {
        let line = "Keep pH < 6.5 and EC > 2 for rice";
        assert_eq!(plain_text(line), line);
        assert_eq!(format_line(line).text, line);
        assert_eq!(plain_text("<p class=\"mb-2\">pH < 7</p>"), "pH < 7");
    }
}
