//! Subscription lifecycle of the displayed page's data.
//!
//! A router holds at most one live subscription: the combined data of the
//! page it currently shows. The controller decides when that subscription
//! must be rebuilt and guarantees the old one is released first.

use crate::core::StateKey;
use crate::data::{CombinedUpdate, ResolveError, ResolverKey};
use crate::machine::DataError;
use crate::page::{LiveView, PageDefinition, RenderContext};
use futures_util::future::BoxFuture;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of [`SubscriptionLifecycleController::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The live subscription already matches the page
    Kept,
    /// Subscribed with nothing previously live
    Subscribed,
    /// The previous subscription was released and a new one created
    Resubscribed,
    /// The page's data could not be resolved; nothing is live
    Unresolved(ResolveError),
    /// The controller was disposed
    Disposed,
}

/// Subscribe/unsubscribe counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub subscribes: u64,
    pub unsubscribes: u64,
}

impl SubscriptionStats {
    /// Subscriptions currently live.
    pub fn live(&self) -> u64 {
        self.subscribes - self.unsubscribes
    }
}

struct ActiveSubscription<H, V> {
    id: Uuid,
    context: RenderContext,
    resolver_keys: Vec<ResolverKey>,
    view: Box<dyn LiveView<H, V>>,
    /// Set when a transition exited a state the subscription reads from.
    stale: bool,
}

impl<H, V> ActiveSubscription<H, V> {
    fn matches(&self, page: &PageDefinition<H, V>, context: &RenderContext) -> bool {
        !self.stale
            && self.context.state == *page.state()
            && self.context.revision == context.revision
            && self.resolver_keys == page.resolver_keys()
    }
}

enum Lifecycle<H, V> {
    Unsubscribed,
    Subscribed(ActiveSubscription<H, V>),
    Disposed,
}

/// Owns the live subscription of one router.
///
/// `Unsubscribed -> Subscribed -> Unsubscribed`, with `Disposed` terminal.
/// Replacing a subscription always releases the old one in the same step.
pub struct SubscriptionLifecycleController<H, V> {
    lifecycle: Lifecycle<H, V>,
    stats: SubscriptionStats,
}

impl<H, V> Default for SubscriptionLifecycleController<H, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, V> SubscriptionLifecycleController<H, V> {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Unsubscribed,
            stats: SubscriptionStats::default(),
        }
    }

    /// Make the live subscription match `page` under `context`.
    ///
    /// A subscription is kept when the page's state, its resolver keys and
    /// the context revision are unchanged; otherwise it is released and a
    /// new one is created from the current values of `handle`.
    pub fn sync(
        &mut self,
        page: &PageDefinition<H, V>,
        handle: &H,
        context: &RenderContext,
    ) -> SyncOutcome {
        let replacing = match &self.lifecycle {
            Lifecycle::Disposed => return SyncOutcome::Disposed,
            Lifecycle::Subscribed(active) if active.matches(page, context) => {
                return SyncOutcome::Kept
            }
            Lifecycle::Subscribed(_) => true,
            Lifecycle::Unsubscribed => false,
        };
        self.unsubscribe();

        match page.subscribe(handle) {
            Ok(view) => {
                let id = Uuid::new_v4();
                debug!(
                    subscription = %id,
                    state = %page.state(),
                    resolvers = page.resolver_keys().len(),
                    "subscribed page data"
                );
                self.stats.subscribes += 1;
                self.lifecycle = Lifecycle::Subscribed(ActiveSubscription {
                    id,
                    context: context.clone(),
                    resolver_keys: page.resolver_keys().to_vec(),
                    view,
                    stale: false,
                });
                if replacing {
                    SyncOutcome::Resubscribed
                } else {
                    SyncOutcome::Subscribed
                }
            }
            Err(error) => {
                warn!(state = %page.state(), %error, "page data could not be resolved");
                SyncOutcome::Unresolved(error)
            }
        }
    }

    /// Release the live subscription. Returns whether one was live.
    pub fn unsubscribe(&mut self) -> bool {
        if !matches!(self.lifecycle, Lifecycle::Subscribed(_)) {
            return false;
        }
        if let Lifecycle::Subscribed(active) =
            std::mem::replace(&mut self.lifecycle, Lifecycle::Unsubscribed)
        {
            debug!(
                subscription = %active.id,
                state = %active.context.state,
                emissions = active.view.emissions(),
                "unsubscribed page data"
            );
            self.stats.unsubscribes += 1;
        }
        true
    }

    /// Release the live subscription and refuse any further one.
    pub fn dispose(&mut self) {
        self.unsubscribe();
        self.lifecycle = Lifecycle::Disposed;
    }

    /// Mark the subscription for rebuild if any of `exited` is its page's
    /// state or a state it reads data from.
    pub fn invalidate(&mut self, exited: &[StateKey]) {
        if let Lifecycle::Subscribed(active) = &mut self.lifecycle {
            let reads_exited = exited.contains(&active.context.state)
                || active.view.sources().iter().any(|s| exited.contains(s));
            if reads_exited {
                active.stale = true;
            }
        }
    }

    /// Apply pending data emissions.
    pub fn poll(&mut self) -> CombinedUpdate {
        match &mut self.lifecycle {
            Lifecycle::Subscribed(active) => active.view.poll(),
            _ => CombinedUpdate::Idle,
        }
    }

    /// Wait until the live subscription's data changes. Never resolves
    /// while nothing is subscribed.
    pub fn changed(&mut self) -> BoxFuture<'_, ()> {
        match &mut self.lifecycle {
            Lifecycle::Subscribed(active) => active.view.changed(),
            _ => Box::pin(std::future::pending::<()>()),
        }
    }

    /// Build the page from the latest combined value.
    pub fn render(&self, handle: &H) -> Option<Result<V, DataError>> {
        match &self.lifecycle {
            Lifecycle::Subscribed(active) => Some(active.view.render(&active.context, handle)),
            _ => None,
        }
    }

    pub fn subscription_id(&self) -> Option<Uuid> {
        match &self.lifecycle {
            Lifecycle::Subscribed(active) => Some(active.id),
            _ => None,
        }
    }

    /// State of the page currently subscribed.
    pub fn state(&self) -> Option<&StateKey> {
        match &self.lifecycle {
            Lifecycle::Subscribed(active) => Some(&active.context.state),
            _ => None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Subscribed(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Disposed)
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.stats
    }
}

impl<H, V> fmt::Debug for SubscriptionLifecycleController<H, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.lifecycle {
            Lifecycle::Unsubscribed => "unsubscribed".to_string(),
            Lifecycle::Subscribed(active) => format!("subscribed({})", active.context.state),
            Lifecycle::Disposed => "disposed".to_string(),
        };
        f.debug_struct("SubscriptionLifecycleController")
            .field("lifecycle", &state)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataResolver;
    use crate::machine::StateMachine;
    use crate::testing::{MemoryHandle, MemoryMachine};

    fn machine() -> MemoryMachine {
        MemoryMachine::builder()
            .state("root")
            .child("root", "a")
            .child("root", "b")
            .initial("a")
            .build()
    }

    fn ctx(state: &'static str, revision: u64) -> RenderContext {
        RenderContext {
            state: StateKey::from_static(state),
            scaffold: false,
            revision,
        }
    }

    fn counter_page(
        state: &'static str,
        source: &'static str,
    ) -> PageDefinition<MemoryHandle, String> {
        PageDefinition::with_data(state, DataResolver::<u32>::for_state(source), |_, n, _| {
            n.to_string()
        })
    }

    #[tokio::test]
    async fn equal_resolvers_keep_the_subscription() {
        let machine = machine();
        machine.set_data("root", 1u32);
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();

        let first = counter_page("a", "root");
        let second = counter_page("a", "root");
        assert_eq!(controller.sync(&first, &handle, &ctx("a", 0)), SyncOutcome::Subscribed);
        let id = controller.subscription_id();
        assert_eq!(controller.sync(&second, &handle, &ctx("a", 0)), SyncOutcome::Kept);

        assert_eq!(controller.subscription_id(), id);
        assert_eq!(
            controller.stats(),
            SubscriptionStats {
                subscribes: 1,
                unsubscribes: 0,
            }
        );
    }

    #[tokio::test]
    async fn changed_resolver_resubscribes_exactly_once() {
        let machine = machine();
        machine.set_data("root", 1u32);
        machine.set_data("a", 2u32);
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();

        controller.sync(&counter_page("a", "root"), &handle, &ctx("a", 0));
        let outcome = controller.sync(&counter_page("a", "a"), &handle, &ctx("a", 0));

        assert_eq!(outcome, SyncOutcome::Resubscribed);
        assert_eq!(
            controller.stats(),
            SubscriptionStats {
                subscribes: 2,
                unsubscribes: 1,
            }
        );
        assert_eq!(controller.render(&handle).unwrap().unwrap(), "2");
    }

    #[tokio::test]
    async fn revision_change_resubscribes() {
        let machine = machine();
        machine.set_data("root", 1u32);
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();
        let page = counter_page("a", "root");

        controller.sync(&page, &handle, &ctx("a", 0));
        assert_eq!(
            controller.sync(&page, &handle, &ctx("a", 1)),
            SyncOutcome::Resubscribed
        );
    }

    #[tokio::test]
    async fn exited_source_forces_resubscribe() {
        let machine = machine();
        machine.set_data("root", 1u32);
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();
        let page = counter_page("a", "root");

        controller.sync(&page, &handle, &ctx("a", 0));
        controller.invalidate(&[StateKey::new("b")]);
        assert_eq!(controller.sync(&page, &handle, &ctx("a", 0)), SyncOutcome::Kept);

        controller.invalidate(&[StateKey::new("root")]);
        assert_eq!(
            controller.sync(&page, &handle, &ctx("a", 0)),
            SyncOutcome::Resubscribed
        );
    }

    #[tokio::test]
    async fn unresolved_page_leaves_nothing_live() {
        let machine = machine();
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();

        let outcome = controller.sync(&counter_page("a", "b"), &handle, &ctx("a", 0));
        assert!(matches!(
            outcome,
            SyncOutcome::Unresolved(ResolveError::Inactive { .. })
        ));
        assert!(!controller.is_subscribed());
        assert!(controller.render(&handle).is_none());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let machine = machine();
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();
        let page: PageDefinition<MemoryHandle, String> =
            PageDefinition::new("a", |_, _| "a".into());

        controller.sync(&page, &handle, &ctx("a", 0));
        assert!(controller.unsubscribe());
        assert!(!controller.unsubscribe());
        assert_eq!(controller.stats().unsubscribes, 1);
        assert_eq!(controller.stats().live(), 0);
    }

    #[tokio::test]
    async fn disposed_controller_refuses_subscriptions() {
        let machine = machine();
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();
        let page: PageDefinition<MemoryHandle, String> =
            PageDefinition::new("a", |_, _| "a".into());

        controller.sync(&page, &handle, &ctx("a", 0));
        controller.dispose();

        assert!(controller.is_disposed());
        assert_eq!(controller.sync(&page, &handle, &ctx("a", 0)), SyncOutcome::Disposed);
        assert_eq!(
            controller.stats(),
            SubscriptionStats {
                subscribes: 1,
                unsubscribes: 1,
            }
        );
    }

    #[tokio::test]
    async fn poll_forwards_emissions() {
        let machine = machine();
        machine.set_data("root", 1u32);
        let handle = machine.start(None).await.unwrap();
        let mut controller = SubscriptionLifecycleController::new();

        controller.sync(&counter_page("a", "root"), &handle, &ctx("a", 0));
        assert_eq!(controller.poll(), CombinedUpdate::Idle);

        machine.set_data("root", 5u32);
        assert_eq!(controller.poll(), CombinedUpdate::Emitted);
        assert_eq!(controller.render(&handle).unwrap().unwrap(), "5");
    }
}
