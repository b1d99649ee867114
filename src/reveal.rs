//! Progressive "live typing" reveal of formatted fragments.
//!
//! [`RevealState`] is the whole effect as a state machine: it yields one
//! [`RevealStep`] per tick, each carrying the frame to apply and how long to
//! hold before the next one. [`Revealer::reveal`] drives it against a
//! [`RevealTarget`] with tokio timers; the preview server turns the same
//! steps into server-sent events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::{AdviceRequest, Backend, interpret};
use crate::format::{Fragment, FragmentKind};
use crate::page::Page;

static ANCHOR_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<a\b([^>]*)>").expect("valid anchor regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealConfig {
    pub char_delay: Duration,
    pub fragment_pause: Duration,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            char_delay: Duration::from_millis(10),
            fragment_pause: Duration::from_millis(120),
        }
    }
}

impl RevealConfig {
    pub fn instant() -> Self {
        Self {
            char_delay: Duration::ZERO,
            fragment_pause: Duration::ZERO,
        }
    }
}

/// Where revealed fragments land. Indices are positions in the order the
/// placeholders were appended.
pub trait RevealTarget {
    fn clear(&mut self);
    fn append_placeholder(&mut self, kind: FragmentKind, class: &str) -> usize;
    fn set_text(&mut self, index: usize, text: &str);
    fn set_markup(&mut self, index: usize, markup: &str);
    fn move_cursor(&mut self, index: Option<usize>);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum RevealFrame {
    Cleared,
    Placeholder {
        index: usize,
        kind: FragmentKind,
        class: &'static str,
    },
    /// The revealed prefix of the fragment's plain text.
    Text { index: usize, text: String },
    /// Final markup replacing the placeholder content.
    Markup { index: usize, markup: String },
    Done,
}

impl RevealFrame {
    pub fn name(&self) -> &'static str {
        match self {
            RevealFrame::Cleared => "cleared",
            RevealFrame::Placeholder { .. } => "placeholder",
            RevealFrame::Text { .. } => "text",
            RevealFrame::Markup { .. } => "markup",
            RevealFrame::Done => "done",
        }
    }

    pub fn apply<T: RevealTarget + ?Sized>(&self, target: &mut T) {
        match self {
            RevealFrame::Cleared => target.clear(),
            RevealFrame::Placeholder { kind, class, .. } => {
                let index = target.append_placeholder(*kind, class);
                target.move_cursor(Some(index));
            }
            RevealFrame::Text { index, text } => target.set_text(*index, text),
            RevealFrame::Markup { index, markup } => target.set_markup(*index, markup),
            RevealFrame::Done => target.move_cursor(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealStep {
    pub frame: RevealFrame,
    /// Hold after applying `frame`.
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Placeholder,
    Typing,
    Finish,
    Done,
    Exhausted,
}

/// Per-render reveal state: which fragment, how far into its text.
#[derive(Debug, Clone)]
pub struct RevealState {
    fragments: Vec<Fragment>,
    config: RevealConfig,
    fragment: usize,
    byte_pos: usize,
    revealed: String,
    phase: Phase,
}

impl RevealState {
    pub fn new(fragments: Vec<Fragment>, config: RevealConfig) -> Self {
        Self {
            fragments,
            config,
            fragment: 0,
            byte_pos: 0,
            revealed: String::new(),
            phase: Phase::Start,
        }
    }
}

fn step(frame: RevealFrame, delay: Duration) -> Option<RevealStep> {
    Some(RevealStep { frame, delay })
}

impl Iterator for RevealState {
    type Item = RevealStep;

    fn next(&mut self) -> Option<RevealStep> {
        match self.phase {
            Phase::Start => {
                self.phase = if self.fragments.is_empty() {
                    Phase::Done
                } else {
                    Phase::Placeholder
                };
                step(RevealFrame::Cleared, Duration::ZERO)
            }
            Phase::Placeholder => {
                let fragment = &self.fragments[self.fragment];
                let frame = RevealFrame::Placeholder {
                    index: self.fragment,
                    kind: fragment.kind,
                    class: fragment.class,
                };
                self.byte_pos = 0;
                self.revealed.clear();
                self.phase = if fragment.text.is_empty() {
                    Phase::Finish
                } else {
                    Phase::Typing
                };
                step(frame, Duration::ZERO)
            }
            Phase::Typing => {
                let text = &self.fragments[self.fragment].text;
                let Some(ch) = text[self.byte_pos..].chars().next() else {
                    self.phase = Phase::Finish;
                    return self.next();
                };
                self.byte_pos += ch.len_utf8();
                self.revealed.push(ch);
                if self.byte_pos >= text.len() {
                    self.phase = Phase::Finish;
                }
                let frame = RevealFrame::Text {
                    index: self.fragment,
                    text: self.revealed.clone(),
                };
                let delay = self.config.char_delay;
                step(frame, delay)
            }
            Phase::Finish => {
                let index = self.fragment;
                let markup = force_new_tab(&self.fragments[index].markup);
                self.fragment += 1;
                let more = self.fragment < self.fragments.len();
                self.phase = if more { Phase::Placeholder } else { Phase::Done };
                let delay = if more {
                    self.config.fragment_pause
                } else {
                    Duration::ZERO
                };
                step(RevealFrame::Markup { index, markup }, delay)
            }
            Phase::Done => {
                self.phase = Phase::Exhausted;
                step(RevealFrame::Done, Duration::ZERO)
            }
            Phase::Exhausted => None,
        }
    }
}

/// Ensures every anchor opens in a new browsing context.
pub fn force_new_tab(markup: &str) -> String {
    ANCHOR_OPEN_RE
        .replace_all(markup, |caps: &Captures| {
            let attrs = &caps[1];
            let lower = attrs.to_ascii_lowercase();
            let mut tag = format!("<a{attrs}");
            if !lower.contains("target=") {
                tag.push_str(r#" target="_blank""#);
            }
            if !lower.contains("rel=") {
                tag.push_str(r#" rel="noopener noreferrer""#);
            }
            tag.push('>');
            tag
        })
        .into_owned()
}

/// What a fully revealed region holds for `fragments`.
pub fn final_html(fragments: &[Fragment]) -> String {
    fragments.iter().map(|f| force_new_tab(&f.markup)).collect()
}

/// Per-region render generation counter.
#[derive(Debug, Clone, Default)]
pub struct RenderToken {
    generation: Arc<AtomicU64>,
}

impl RenderToken {
    /// Starts a new render, invalidating every earlier guard.
    pub fn begin(&self) -> RenderGuard {
        let mine = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        RenderGuard {
            generation: Arc::clone(&self.generation),
            mine,
        }
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct RenderGuard {
    generation: Arc<AtomicU64>,
    mine: u64,
}

impl RenderGuard {
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.mine
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealOutcome {
    Completed,
    /// A newer render took over the region.
    Superseded,
    /// The region or the advice container is not on the page.
    MissingTarget,
}

/// Completeness retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_len: usize,
    pub max_attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_len: 100,
            max_attempts: 3,
            pause: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// The request behind a response, kept so the revealer can re-issue it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: AdviceRequest,
    pub closing_section: Option<&'static str>,
}

impl RequestContext {
    pub fn new(request: AdviceRequest) -> Self {
        let closing_section = request.endpoint().closing_section();
        Self {
            request,
            closing_section,
        }
    }

    pub fn looks_complete(&self, text: &str, min_len: usize) -> bool {
        if text.chars().count() < min_len {
            return false;
        }
        self.closing_section
            .is_none_or(|section| text.contains(section))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Revealer {
    config: RevealConfig,
    retry: RetryPolicy,
}

impl Revealer {
    pub fn new(config: RevealConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    pub fn frames(&self, fragments: Vec<Fragment>) -> RevealState {
        RevealState::new(fragments, self.config)
    }

    /// Reveals `fragments` into `target`, stopping as soon as `guard` goes stale.
    pub async fn reveal<T: RevealTarget + ?Sized>(
        &self,
        target: &mut T,
        guard: &RenderGuard,
        fragments: &[Fragment],
    ) -> RevealOutcome {
        for step in self.frames(fragments.to_vec()) {
            if !guard.is_current() {
                debug!(frame = step.frame.name(), "render superseded");
                return RevealOutcome::Superseded;
            }
            step.frame.apply(target);
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
        }
        RevealOutcome::Completed
    }

    /// Reveals into a page region, starting a fresh render there.
    pub async fn display(&self, page: &Page, region: &str, fragments: &[Fragment]) -> RevealOutcome {
        let Some(handle) = page.region(region) else {
            debug!(region, "result region missing; nothing to reveal into");
            return RevealOutcome::MissingTarget;
        };
        if !page.has_advice_container() {
            debug!(region, "advice container missing; nothing to reveal into");
            return RevealOutcome::MissingTarget;
        }
        let guard = handle.begin_render();
        let mut handle = handle.bound_to(guard.clone());
        page.hide_loading();
        page.show_advice();
        debug!(region, fragments = fragments.len(), "revealing response");
        self.reveal(&mut handle, &guard, fragments).await
    }

    /// Re-issues the request while the text looks truncated, keeping the
    /// longest response seen.
    pub async fn settle<B: Backend>(&self, backend: &B, ctx: &RequestContext, text: String) -> String {
        let endpoint = ctx.request.endpoint();
        let mut best = text;
        let mut attempt = 0;
        while attempt < self.retry.max_attempts && !ctx.looks_complete(&best, self.retry.min_len) {
            attempt += 1;
            tokio::time::sleep(self.retry.pause).await;
            debug!(endpoint = endpoint.path(), attempt, "response looks incomplete; retrying");
            let candidate = backend
                .submit(&ctx.request)
                .await
                .and_then(|value| interpret(endpoint, value));
            match candidate {
                Ok(response) => {
                    if let Some(candidate) = response.display_text() {
                        if candidate.chars().count() > best.chars().count() {
                            best = candidate;
                        }
                    }
                }
                Err(err) => {
                    warn!(endpoint = endpoint.path(), attempt, error = %err, "retry failed");
                }
            }
        }
        if !ctx.looks_complete(&best, self.retry.min_len) && self.retry.max_attempts > 0 {
            debug!(
                endpoint = endpoint.path(),
                chars = best.chars().count(),
                "retries exhausted; revealing best available response"
            );
        }
        best
    }
}
