//! Output sinks: live display targets for job and session output.
//!
//! A sink models a read-only presentation surface that the relay briefly
//! unlocks for each programmatic update. The display layer may read a
//! sink's content at any time, so every mutation happens under the sink's
//! lock as unlock → mutate → re-lock.
//!
//! [`OutputSink`] is the seam the supervisor writes through; hosts plug in
//! their own surface via [`SinkFactory`]. [`BufferSink`] is the in-memory
//! implementation used by the CLI, the interactive session, and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Write side of a live display surface.
///
/// Both operations are no-ops once the underlying surface is gone.
pub trait OutputSink: Send + Sync {
    /// Insert `text` verbatim at the end of the content.
    fn append(&self, text: &str);

    /// Discard all content and install `lines`, each newline-terminated.
    fn replace(&self, lines: &[String]);
}

/// Creates the sink a new job renders into.
pub trait SinkFactory: Send + Sync {
    /// Create a sink titled `title` showing `placeholder` until first output.
    fn create(&self, title: &str, placeholder: &str) -> Arc<dyn OutputSink>;
}

// ── Viewport ──────────────────────────────────────────────────────────────────

/// Visible window onto a sink's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Number of visible lines.
    pub height: usize,
    /// Index of the first visible line.
    pub top: usize,
    /// Whether the viewport tracks the end of the content.
    pub follow: bool,
}

impl Viewport {
    fn scroll_to_end(&mut self, line_count: usize) {
        self.top = line_count.saturating_sub(self.height);
    }
}

// ── BufferSink ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SinkState {
    content: String,
    read_only: bool,
    viewport: Option<Viewport>,
    closed: bool,
    focus_requests: u64,
}

impl SinkState {
    /// Run `mutate` with the read-only gate open, then close it again.
    fn edit(&mut self, mutate: impl FnOnce(&mut String)) {
        self.read_only = false;
        mutate(&mut self.content);
        self.read_only = true;

        let line_count = self.content.lines().count();
        if let Some(viewport) = self.viewport.as_mut().filter(|v| v.follow) {
            viewport.scroll_to_end(line_count);
        }
    }
}

/// In-memory sink with an optional viewport.
///
/// Cloning yields another handle onto the same content.
#[derive(Debug, Clone)]
pub struct BufferSink {
    title: Arc<str>,
    state: Arc<Mutex<SinkState>>,
}

impl BufferSink {
    /// Create an empty, read-only, hidden sink.
    #[must_use]
    pub fn new(title: &str) -> Self {
        Self {
            title: Arc::from(title),
            state: Arc::new(Mutex::new(SinkState {
                content: String::new(),
                read_only: true,
                viewport: None,
                closed: false,
                focus_requests: 0,
            })),
        }
    }

    /// Create a sink whose only content is the `placeholder` line.
    #[must_use]
    pub fn with_placeholder(title: &str, placeholder: &str) -> Self {
        let sink = Self::new(title);
        if !placeholder.is_empty() {
            sink.state().edit(|content| {
                content.push_str(placeholder);
                content.push('\n');
            });
        }
        sink
    }

    /// Title of the surface.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Snapshot of the full content.
    #[must_use]
    pub fn contents(&self) -> String {
        self.state().content.clone()
    }

    /// Snapshot of the content split into lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.state().content.lines().map(str::to_owned).collect()
    }

    /// Lines currently inside the viewport, or `None` while hidden.
    #[must_use]
    pub fn visible_lines(&self) -> Option<Vec<String>> {
        let state = self.state();
        let viewport = state.viewport?;
        Some(
            state
                .content
                .lines()
                .skip(viewport.top)
                .take(viewport.height)
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Whether the content is currently locked against edits.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state().read_only
    }

    /// Attach a viewport of `height` lines that follows the end of the content.
    pub fn attach_viewport(&self, height: usize) {
        let mut state = self.state();
        let line_count = state.content.lines().count();
        let mut viewport = Viewport {
            height: height.max(1),
            top: 0,
            follow: true,
        };
        viewport.scroll_to_end(line_count);
        state.viewport = Some(viewport);
    }

    /// Detach the viewport; the content is kept.
    pub fn detach_viewport(&self) {
        self.state().viewport = None;
    }

    /// Current viewport, if attached.
    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.state().viewport
    }

    /// Scroll the viewport so `top` is the first visible line.
    ///
    /// Scrolling to the last page re-enables following the end.
    pub fn scroll_to(&self, top: usize) {
        let mut state = self.state();
        let line_count = state.content.lines().count();
        if let Some(viewport) = state.viewport.as_mut() {
            let last_page = line_count.saturating_sub(viewport.height);
            viewport.top = top.min(last_page);
            viewport.follow = viewport.top == last_page;
        }
    }

    /// `true` while a viewport is attached and the sink is open.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        let state = self.state();
        !state.closed && state.viewport.is_some()
    }

    /// Ask the display layer to focus this surface.
    pub fn focus(&self) {
        self.state().focus_requests += 1;
    }

    /// Number of focus requests made so far.
    #[must_use]
    pub fn focus_requests(&self) -> u64 {
        self.state().focus_requests
    }

    /// Mark the surface as gone; later writes are ignored.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.viewport = None;
    }

    /// Whether [`BufferSink::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputSink for BufferSink {
    fn append(&self, text: &str) {
        let mut state = self.state();
        if state.closed {
            debug!(title = %self.title, "sink: append on closed sink ignored");
            return;
        }
        state.edit(|content| content.push_str(text));
    }

    fn replace(&self, lines: &[String]) {
        let mut state = self.state();
        if state.closed {
            debug!(title = %self.title, "sink: replace on closed sink ignored");
            return;
        }
        state.edit(|content| {
            content.clear();
            for line in lines {
                content.push_str(line);
                content.push('\n');
            }
        });
    }
}

// ── BufferSinkFactory ─────────────────────────────────────────────────────────

/// [`SinkFactory`] producing [`BufferSink`]s, retrievable by title.
#[derive(Debug, Clone, Default)]
pub struct BufferSinkFactory {
    sinks: Arc<Mutex<HashMap<String, BufferSink>>>,
}

impl BufferSinkFactory {
    /// Create an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a sink previously created with `title`.
    #[must_use]
    pub fn get(&self, title: &str) -> Option<BufferSink> {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(title)
            .cloned()
    }
}

impl SinkFactory for BufferSinkFactory {
    fn create(&self, title: &str, placeholder: &str) -> Arc<dyn OutputSink> {
        let sink = BufferSink::with_placeholder(title, placeholder);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(title.to_owned(), sink.clone());
        Arc::new(sink)
    }
}
