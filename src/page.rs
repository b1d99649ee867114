//! Headless page model: the result regions, loading overlay, advice
//! container and transient notices the handlers write into.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::format::{FragmentKind, escape_html, plain_text};
use crate::reveal::{RenderGuard, RenderToken, RevealTarget};

pub const ADVICE_REGION: &str = "advice-result";
pub const WATER_REGION: &str = "water-advice-result";
pub const IMAGE_REGION: &str = "image-analysis-result";
pub const DISEASE_REGION: &str = "disease-result";
pub const BIO_FERTILIZER_REGION: &str = "bio-fertilizer-result";
pub const SCHEMES_REGION: &str = "schemes-result";
pub const TEMPERATURE_REGION: &str = "temperature-data";
pub const HUMIDITY_REGION: &str = "humidity-data";
pub const CONDITIONS_REGION: &str = "conditions-data";
pub const FORECAST_REGION: &str = "forecast-data";

pub const STANDARD_REGIONS: [&str; 10] = [
    ADVICE_REGION,
    WATER_REGION,
    IMAGE_REGION,
    DISEASE_REGION,
    BIO_FERTILIZER_REGION,
    SCHEMES_REGION,
    TEMPERATURE_REGION,
    HUMIDITY_REGION,
    CONDITIONS_REGION,
    FORECAST_REGION,
];

const ERROR_LIFETIME: Duration = Duration::from_secs(5);
const TOAST_LIFETIME: Duration = Duration::from_secs(3);
const TYPING_CLASS: &str = "typing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Error,
    Toast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    expires_at: Instant,
}

impl Notice {
    fn new(kind: NoticeKind, message: String) -> Self {
        let lifetime = match kind {
            NoticeKind::Error => ERROR_LIFETIME,
            NoticeKind::Toast => TOAST_LIFETIME,
        };
        Self {
            kind,
            message,
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeContent {
    Text(String),
    Markup(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    kind: FragmentKind,
    class: String,
    content: NodeContent,
}

pub type Mirror = Box<dyn RevealTarget + Send + Sync>;

#[derive(Default)]
struct Region {
    nodes: Vec<Node>,
    cursor: Option<usize>,
    token: RenderToken,
    mirror: Option<Mirror>,
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("nodes", &self.nodes)
            .field("cursor", &self.cursor)
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}

impl Region {
    fn html(&self) -> String {
        let mut out = String::new();
        for (index, node) in self.nodes.iter().enumerate() {
            match &node.content {
                NodeContent::Markup(markup) => out.push_str(markup),
                NodeContent::Text(_) if node.kind.is_void() => out.push_str("<br>"),
                NodeContent::Text(text) => {
                    let tag = node.kind.tag();
                    let class = if self.cursor == Some(index) {
                        format!("{} {TYPING_CLASS}", node.class).trim().to_string()
                    } else {
                        node.class.clone()
                    };
                    out.push_str(&format!(
                        r#"<{tag} class="{class}">{}</{tag}>"#,
                        escape_html(text)
                    ));
                }
            }
        }
        out
    }

    fn text(&self) -> String {
        self.nodes
            .iter()
            .map(|node| match &node.content {
                NodeContent::Text(text) => text.clone(),
                NodeContent::Markup(markup) => plain_text(markup),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn replace_markup(&mut self, markup: String) {
        self.token.invalidate();
        self.cursor = None;
        self.nodes = vec![Node {
            kind: FragmentKind::Paragraph,
            class: String::new(),
            content: NodeContent::Markup(markup),
        }];
    }
}

impl RevealTarget for Region {
    fn clear(&mut self) {
        self.nodes.clear();
        self.cursor = None;
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.clear();
        }
    }

    fn append_placeholder(&mut self, kind: FragmentKind, class: &str) -> usize {
        self.nodes.push(Node {
            kind,
            class: class.to_string(),
            content: NodeContent::Text(String::new()),
        });
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.append_placeholder(kind, class);
        }
        self.nodes.len() - 1
    }

    fn set_text(&mut self, index: usize, text: &str) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.content = NodeContent::Text(text.to_string());
        }
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.set_text(index, text);
        }
    }

    fn set_markup(&mut self, index: usize, markup: &str) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.content = NodeContent::Markup(markup.to_string());
        }
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.set_markup(index, markup);
        }
    }

    fn move_cursor(&mut self, index: Option<usize>) {
        self.cursor = index;
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.move_cursor(index);
        }
    }
}

#[derive(Debug, Default)]
struct PageState {
    regions: BTreeMap<String, Region>,
    /// `None` when the page has no overlay; otherwise its visibility.
    loading_overlay: Option<bool>,
    advice_container: Option<bool>,
    notices: Vec<Notice>,
}

/// Shared handle to the page. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct Page {
    inner: Arc<RwLock<PageState>>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every region the handlers address, plus overlay and advice container.
    pub fn standard() -> Self {
        STANDARD_REGIONS
            .iter()
            .fold(Self::new(), |page, id| page.with_region(id))
            .with_loading_overlay()
            .with_advice_container()
    }

    pub fn with_region(self, id: &str) -> Self {
        self.inner
            .write()
            .regions
            .entry(id.to_string())
            .or_default();
        self
    }

    pub fn with_loading_overlay(self) -> Self {
        self.inner.write().loading_overlay = Some(false);
        self
    }

    pub fn with_advice_container(self) -> Self {
        self.inner.write().advice_container = Some(false);
        self
    }

    pub fn region(&self, id: &str) -> Option<RegionHandle> {
        self.inner
            .read()
            .regions
            .contains_key(id)
            .then(|| RegionHandle {
                page: self.clone(),
                id: id.to_string(),
                guard: None,
            })
    }

    /// Forwards every reveal operation on `id` to `mirror` as well.
    pub fn attach_mirror(&self, id: &str, mirror: Mirror) -> bool {
        let mut state = self.inner.write();
        match state.regions.get_mut(id) {
            Some(region) => {
                region.mirror = Some(mirror);
                true
            }
            None => false,
        }
    }

    pub fn has_advice_container(&self) -> bool {
        self.inner.read().advice_container.is_some()
    }

    pub fn advice_visible(&self) -> bool {
        self.inner.read().advice_container == Some(true)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.read().loading_overlay == Some(true)
    }

    /// Shows the overlay and hides the advice container while a request runs.
    pub fn show_loading(&self) {
        let mut state = self.inner.write();
        if state.loading_overlay.is_some() && state.advice_container.is_some() {
            state.loading_overlay = Some(true);
            state.advice_container = Some(false);
        }
    }

    pub fn hide_loading(&self) {
        let mut state = self.inner.write();
        if state.loading_overlay.is_some() {
            state.loading_overlay = Some(false);
        }
    }

    pub fn show_advice(&self) {
        let mut state = self.inner.write();
        if state.advice_container.is_some() {
            state.advice_container = Some(true);
        }
    }

    pub fn show_error(&self, message: impl Into<String>) {
        self.push_notice(NoticeKind::Error, message.into());
    }

    pub fn show_toast(&self, message: impl Into<String>) {
        self.push_notice(NoticeKind::Toast, message.into());
    }

    fn push_notice(&self, kind: NoticeKind, message: String) {
        let mut state = self.inner.write();
        state.notices.retain(|notice| !notice.is_expired());
        state.notices.push(Notice::new(kind, message));
    }

    /// Notices that have not yet auto-dismissed, oldest first.
    pub fn active_notices(&self) -> Vec<Notice> {
        let mut state = self.inner.write();
        state.notices.retain(|notice| !notice.is_expired());
        state.notices.clone()
    }

    pub fn region_html(&self, id: &str) -> Option<String> {
        self.inner.read().regions.get(id).map(Region::html)
    }

    pub fn region_text(&self, id: &str) -> Option<String> {
        self.inner.read().regions.get(id).map(Region::text)
    }

    /// Replaces a region's content outright, cancelling any reveal into it.
    pub fn set_region_html(&self, id: &str, markup: impl Into<String>) -> bool {
        let mut state = self.inner.write();
        match state.regions.get_mut(id) {
            Some(region) => {
                region.replace_markup(markup.into());
                true
            }
            None => false,
        }
    }

    fn with_region_mut<R>(&self, id: &str, f: impl FnOnce(&mut Region) -> R) -> Option<R> {
        let mut state = self.inner.write();
        state.regions.get_mut(id).map(f)
    }
}

/// A region addressed by id; the revealer writes through this.
///
/// A handle bound to a [`RenderGuard`] drops its writes once that render is
/// stale. The generation is checked under the page's write lock, the same lock
/// [`RegionHandle::begin_render`] bumps it under.
#[derive(Debug, Clone)]
pub struct RegionHandle {
    page: Page,
    id: String,
    guard: Option<RenderGuard>,
}

impl RegionHandle {
    /// Starts a new render here, making any earlier render stale.
    pub fn begin_render(&self) -> RenderGuard {
        self.page
            .with_region_mut(&self.id, |region| region.token.begin())
            .unwrap_or_else(|| RenderToken::default().begin())
    }

    pub fn bound_to(mut self, guard: RenderGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    fn write<R>(&self, f: impl FnOnce(&mut Region) -> R) -> Option<R> {
        self.page.with_region_mut(&self.id, |region| {
            self.guard
                .as_ref()
                .is_none_or(RenderGuard::is_current)
                .then(|| f(region))
        })
        .flatten()
    }
}

impl RevealTarget for RegionHandle {
    fn clear(&mut self) {
        self.write(Region::clear);
    }

    fn append_placeholder(&mut self, kind: FragmentKind, class: &str) -> usize {
        self.write(|region| region.append_placeholder(kind, class))
            .unwrap_or_default()
    }

    fn set_text(&mut self, index: usize, text: &str) {
        self.write(|region| region.set_text(index, text));
    }

    fn set_markup(&mut self, index: usize, markup: &str) {
        self.write(|region| region.set_markup(index, markup));
    }

    fn move_cursor(&mut self, index: Option<usize>) {
        self.write(|region| region.move_cursor(index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_node_carries_cursor_class_and_escapes_text() {
        let page = Page::standard();
        let mut handle = page.region(ADVICE_REGION).expect("standard region");
        handle.clear();
        let index = handle.append_placeholder(FragmentKind::Paragraph, "mb-2");
        handle.move_cursor(Some(index));
        handle.set_text(index, "N < P");
        assert_eq!(
            page.region_html(ADVICE_REGION).as_deref(),
            Some(r#"<p class="mb-2 typing">N &lt; P</p>"#)
        );
        handle.set_markup(index, r#"<p class="mb-2">N &lt; P</p>"#);
        handle.move_cursor(None);
        assert_eq!(
            page.region_html(ADVICE_REGION).as_deref(),
            Some(r#"<p class="mb-2">N &lt; P</p>"#)
        );
        assert_eq!(page.region_text(ADVICE_REGION).as_deref(), Some("N < P"));
    }

    #[test]
    fn unknown_region_has_no_handle() {
        assert!(Page::standard().region("nope").is_none());
    }

    #[test]
    fn loading_requires_overlay_and_container() {
        let bare = Page::new().with_loading_overlay();
        bare.show_loading();
        assert!(!bare.is_loading());

        let page = Page::standard();
        page.show_advice();
        page.show_loading();
        assert!(page.is_loading());
        assert!(!page.advice_visible());
        page.hide_loading();
        assert!(!page.is_loading());
    }

    #[test]
    fn set_region_html_invalidates_running_render() {
        let page = Page::standard();
        let handle = page.region(ADVICE_REGION).expect("standard region");
        let guard = handle.begin_render();
        page.set_region_html(ADVICE_REGION, "<p>done</p>");
        assert!(!guard.is_current());
        assert_eq!(page.region_html(ADVICE_REGION).as_deref(), Some("<p>done</p>"));
    }

    #[test]
    fn stale_bound_handle_cannot_write() {
        let page = Page::standard();
        let handle = page.region(ADVICE_REGION).expect("standard region");
        let mut older = handle.clone().bound_to(handle.begin_render());
        older.append_placeholder(FragmentKind::Paragraph, "mb-2");
        older.set_text(0, "old");

        let mut newer = handle.clone().bound_to(handle.begin_render());
        older.set_text(0, "old answer");
        older.append_placeholder(FragmentKind::Heading, "mt-4 mb-3");
        assert_eq!(page.region_text(ADVICE_REGION).as_deref(), Some("old"));

        newer.clear();
        newer.append_placeholder(FragmentKind::Paragraph, "mb-2");
        newer.set_text(0, "new");
        older.clear();
        assert_eq!(page.region_text(ADVICE_REGION).as_deref(), Some("new"));
    }

    #[derive(Default, Clone)]
    struct Counter(Arc<RwLock<usize>>);

    impl RevealTarget for Counter {
        fn clear(&mut self) {}
        fn append_placeholder(&mut self, _kind: FragmentKind, _class: &str) -> usize {
            *self.0.write() += 1;
            0
        }
        fn set_text(&mut self, _index: usize, _text: &str) {}
        fn set_markup(&mut self, _index: usize, _markup: &str) {}
        fn move_cursor(&mut self, _index: Option<usize>) {}
    }

    #[test]
    fn mirror_sees_region_operations() {
        let page = Page::standard();
        let counter = Counter::default();
        assert!(page.attach_mirror(ADVICE_REGION, Box::new(counter.clone())));
        let mut handle = page.region(ADVICE_REGION).expect("standard region");
        handle.append_placeholder(FragmentKind::Heading, "mt-4 mb-3");
        handle.append_placeholder(FragmentKind::Paragraph, "mb-2");
        assert_eq!(*counter.0.read(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn notices_expire() {
        let page = Page::new();
        page.show_error("Please enter your question");
        page.show_toast("Advice copied to clipboard!");
        assert_eq!(page.active_notices().len(), 2);
        tokio::time::advance(Duration::from_secs(4)).await;
        let remaining = page.active_notices();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, NoticeKind::Error);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(page.active_notices().is_empty());
    }
}
