//! Page-stack engine shared by every router delegate.

use super::config::RouterConfig;
use super::subscription::{SubscriptionLifecycleController, SubscriptionStats, SyncOutcome};
use crate::core::{
    ActiveStatePath, FailedMessageEvent, PopGuard, StateKey, TransitionEvent, TransitionHistory,
};
use crate::data::{CombinedUpdate, ResolveError};
use crate::machine::{ActiveState, DataError};
use crate::page::{ActivePageResolver, NoPageDiagnostic, PageRegistry, RenderContext};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Stable identity of a page, for the host to diff against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PageKey {
    /// Page bound to (or diagnosing) a state
    State(StateKey),
    /// Placeholder while the machine starts
    Loading,
    /// Intentionally empty transient page
    Blank,
}

/// What a page shows.
#[derive(Clone, Debug, PartialEq)]
pub enum PageContent<V> {
    /// The page builder's output
    View(V),
    Loading,
    Blank,
    /// No registered page matched the active states
    NoPage(NoPageDiagnostic),
    /// The page's data could not be resolved
    Unresolved(ResolveError),
    /// The page's data stream failed
    DataError(DataError),
}

impl<V> PageContent<V> {
    pub fn view(&self) -> Option<&V> {
        match self {
            Self::View(view) => Some(view),
            _ => None,
        }
    }
}

/// One entry of the page stack handed to the host.
#[derive(Clone, Debug, PartialEq)]
pub struct PageHandle<V> {
    pub key: PageKey,
    pub content: PageContent<V>,
    /// Whether the host should wrap the page in common chrome
    pub scaffold: bool,
    /// Failed machine message shown over the page
    pub overlay: Option<FailedMessageEvent>,
}

impl<V> PageHandle<V> {
    fn placeholder(key: PageKey, content: PageContent<V>) -> Self {
        Self {
            key,
            content,
            scaffold: false,
            overlay: None,
        }
    }
}

/// Shared page-stack engine: resolves the page for the active states,
/// keeps its data subscribed and publishes change notifications.
pub(crate) struct RouterCore<H, V> {
    registry: Arc<PageRegistry<H, V>>,
    config: RouterConfig,
    controller: SubscriptionLifecycleController<H, V>,
    pages: Vec<PageHandle<V>>,
    notifier: watch::Sender<u64>,
    diagnostics: Vec<NoPageDiagnostic>,
    history: TransitionHistory,
    overlay: Option<FailedMessageEvent>,
    pop_guard: PopGuard,
    revision: u64,
    at_final: bool,
    allow_blank_final: bool,
    rendered_path: Option<ActiveStatePath>,
    /// Unmatched path the last diagnostic was reported for
    diagnosed: Option<ActiveStatePath>,
    kind: &'static str,
}

impl<H: ActiveState, V> RouterCore<H, V> {
    pub fn new(
        registry: Arc<PageRegistry<H, V>>,
        config: RouterConfig,
        kind: &'static str,
    ) -> Self {
        let (notifier, _) = watch::channel(0);
        let history = TransitionHistory::with_capacity(config.history_capacity);
        Self {
            registry,
            config,
            controller: SubscriptionLifecycleController::new(),
            pages: vec![PageHandle::placeholder(PageKey::Loading, PageContent::Loading)],
            notifier,
            diagnostics: Vec::new(),
            history,
            overlay: None,
            pop_guard: PopGuard::default(),
            revision: 0,
            at_final: false,
            allow_blank_final: false,
            rendered_path: None,
            diagnosed: None,
            kind,
        }
    }

    pub fn set_pop_guard(&mut self, guard: PopGuard) {
        self.pop_guard = guard;
    }

    /// Render a blank page instead of a diagnostic when a final state has
    /// no page.
    pub fn allow_blank_final(&mut self, allowed: bool) {
        self.allow_blank_final = allowed;
    }

    /// Note a transition. The page is recomputed on the next [`refresh`](Self::refresh).
    pub fn record_transition(&mut self, event: TransitionEvent) {
        debug!(router = self.kind, from = %event.from, to = %event.to, "state machine transitioned");
        self.controller.invalidate(&event.exit_path);
        self.at_final = event.is_to_final_state;
        self.overlay = None;
        self.history = self.history.record(event);
    }

    /// Note a failed machine message. Returns whether the page changed.
    pub fn record_failure(&mut self, event: FailedMessageEvent) -> bool {
        warn!(
            router = self.kind,
            state = %event.state,
            message = %event.message,
            error = %event.error,
            "state machine failed to process a message"
        );
        if !self.config.display_state_machine_errors {
            return false;
        }
        for page in &mut self.pages {
            page.overlay = Some(event.clone());
        }
        self.overlay = Some(event);
        self.notify();
        true
    }

    pub fn show_loading(&mut self) {
        self.show(PageHandle::placeholder(PageKey::Loading, PageContent::Loading));
    }

    /// Show a transient blank page and notify the host.
    pub fn show_blank(&mut self) {
        self.controller.unsubscribe();
        self.rendered_path = None;
        self.diagnosed = None;
        self.show(PageHandle::placeholder(PageKey::Blank, PageContent::Blank));
    }

    /// Release the page's data and blank the stack without notifying.
    pub fn detach(&mut self) {
        self.controller.unsubscribe();
        self.rendered_path = None;
        self.diagnosed = None;
        self.overlay = None;
        self.at_final = false;
        self.pages = vec![PageHandle::placeholder(PageKey::Blank, PageContent::Blank)];
    }

    /// Whether `handle`'s active states differ from the last render.
    pub fn is_outdated(&self, handle: &H) -> bool {
        self.rendered_path.as_ref() != Some(&handle.active_path())
    }

    /// Recompute the page stack for `handle`'s active states.
    pub fn refresh(&mut self, handle: &H) {
        let path = handle.active_path();
        let at_final = self.at_final || handle.is_final();

        let page = match ActivePageResolver::resolve(&path, &*self.registry).into_iter().next() {
            Some(page) => page,
            None => {
                self.controller.unsubscribe();
                let page = if at_final && self.allow_blank_final {
                    debug!(router = self.kind, state = %path.leaf(), "final state has no page");
                    PageHandle::placeholder(PageKey::Blank, PageContent::Blank)
                } else {
                    let diagnostic = self.diagnose(&path);
                    self.page_handle(path.leaf().clone(), PageContent::NoPage(diagnostic))
                };
                self.rendered_path = Some(path);
                self.show(page);
                return;
            }
        };

        self.diagnosed = None;
        let context = RenderContext {
            state: page.state().clone(),
            scaffold: self.config.scaffold_pages,
            revision: self.revision,
        };
        let content = match self.controller.sync(&page, handle, &context) {
            SyncOutcome::Disposed => return,
            SyncOutcome::Unresolved(error) => PageContent::Unresolved(error),
            SyncOutcome::Kept | SyncOutcome::Subscribed | SyncOutcome::Resubscribed => {
                self.render_live(handle)
            }
        };
        self.rendered_path = Some(path);
        let page = self.page_handle(page.state().clone(), content);
        self.show(page);
    }

    /// Apply pending data emissions to the current page. Returns whether
    /// the page changed.
    pub fn poll_data(&mut self, handle: &H) -> bool {
        let content = match self.controller.poll() {
            CombinedUpdate::Idle => return false,
            CombinedUpdate::Failed(error) => PageContent::DataError(error),
            CombinedUpdate::Emitted | CombinedUpdate::Completed => self.render_live(handle),
        };
        if let Some(page) = self.pages.first_mut() {
            page.content = content;
        }
        self.notify();
        true
    }

    /// Wait for the current page's data to change.
    pub fn changed(&mut self) -> BoxFuture<'_, ()> {
        self.controller.changed()
    }

    /// Consult the pop guard for the page `key` and notify the host.
    pub fn pop(&mut self, key: &PageKey) -> bool {
        let accepted = match key {
            PageKey::State(state) => self.pop_guard.check(state),
            PageKey::Loading | PageKey::Blank => true,
        };
        debug!(router = self.kind, ?key, accepted, "pop requested");
        self.notify();
        accepted
    }

    pub fn set_revision(&mut self, revision: u64) -> bool {
        let changed = self.revision != revision;
        self.revision = revision;
        changed
    }

    /// Release the page's data for good and blank the stack.
    pub fn dispose(&mut self) {
        self.controller.dispose();
        self.rendered_path = None;
        self.diagnosed = None;
        self.overlay = None;
        self.show(PageHandle::placeholder(PageKey::Blank, PageContent::Blank));
    }

    pub fn is_disposed(&self) -> bool {
        self.controller.is_disposed()
    }

    pub fn change_notifications(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    pub fn page_stack(&self) -> &[PageHandle<V>] {
        &self.pages
    }

    pub fn diagnostics(&self) -> &[NoPageDiagnostic] {
        &self.diagnostics
    }

    pub fn history(&self) -> &TransitionHistory {
        &self.history
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.controller.stats()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PageRegistry<H, V>> {
        &self.registry
    }

    /// Diagnostic for an unmatched `path`. Reported once per path until
    /// a page matches again; older reports are dropped past the history
    /// capacity.
    fn diagnose(&mut self, path: &ActiveStatePath) -> NoPageDiagnostic {
        let diagnostic = NoPageDiagnostic::new(self.registry.name(), path);
        if self.diagnosed.as_ref() == Some(path) {
            return diagnostic;
        }
        warn!(router = self.kind, "{diagnostic}");
        let capacity = self.config.history_capacity.max(1);
        if self.diagnostics.len() >= capacity {
            let excess = self.diagnostics.len() + 1 - capacity;
            self.diagnostics.drain(..excess);
        }
        self.diagnostics.push(diagnostic.clone());
        self.diagnosed = Some(path.clone());
        diagnostic
    }

    fn render_live(&self, handle: &H) -> PageContent<V> {
        match self.controller.render(handle) {
            Some(Ok(view)) => PageContent::View(view),
            Some(Err(error)) => PageContent::DataError(error),
            None => PageContent::Blank,
        }
    }

    fn page_handle(&self, state: StateKey, content: PageContent<V>) -> PageHandle<V> {
        PageHandle {
            key: PageKey::State(state),
            content,
            scaffold: self.config.scaffold_pages,
            overlay: self.overlay.clone(),
        }
    }

    fn show(&mut self, page: PageHandle<V>) {
        self.pages = vec![page];
        self.notify();
    }

    fn notify(&self) {
        self.notifier.send_modify(|generation| *generation += 1);
    }
}

impl<H, V> fmt::Debug for RouterCore<H, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterCore")
            .field("kind", &self.kind)
            .field("registry", &self.registry)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

/// Events drained from a broadcast receiver.
pub(crate) struct Drained<T> {
    pub events: Vec<T>,
    /// Some events were dropped because the receiver fell behind
    pub lagged: bool,
}

/// Take every event available without waiting. A closed receiver is
/// cleared.
pub(crate) fn drain<T: Clone>(
    receiver: &mut Option<broadcast::Receiver<T>>,
    kind: &'static str,
) -> Drained<T> {
    let mut drained = Drained {
        events: Vec::new(),
        lagged: false,
    };
    let Some(rx) = receiver.as_mut() else {
        return drained;
    };
    loop {
        match rx.try_recv() {
            Ok(event) => drained.events.push(event),
            Err(broadcast::error::TryRecvError::Empty) => break,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(router = kind, skipped, "event receiver lagged; recomputing page stack");
                drained.lagged = true;
            }
            Err(broadcast::error::TryRecvError::Closed) => {
                debug!(router = kind, "event stream closed");
                *receiver = None;
                break;
            }
        }
    }
    drained
}

/// Wait until `receiver` has an event available, leaving it queued.
/// Never resolves for a missing receiver.
pub(crate) async fn ready<T: Clone>(receiver: Option<&broadcast::Receiver<T>>) {
    let Some(rx) = receiver else {
        return std::future::pending::<()>().await;
    };
    // Subscribe before checking, so an event sent in between is seen by one of the two.
    let mut probe = rx.resubscribe();
    if rx.is_empty() {
        let _ = probe.recv().await;
    }
}
