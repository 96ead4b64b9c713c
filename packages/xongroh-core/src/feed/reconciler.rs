//! # Live Feed Reconciler
//!
//! Merges a cursor-paginated history with a push-event stream into one
//! consistent sequence per scope.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FEED STATE MACHINE                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Idle ──start──► Loading ──page──► Synced ◄──────────┐                 │
//! │                      │                │               │                 │
//! │                      │           push event      refetch done           │
//! │                      │                ▼               │                 │
//! │                      │           Refetching ──────────┘                 │
//! │                      │                │                                 │
//! │                      └── failure ──► Failed ──retry──► Loading/         │
//! │                                                        Refetching       │
//! │                                                                         │
//! │   any ──teardown──► Unsubscribed (terminal)                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Push events are never applied as diffs. A matching event refetches the
//! loaded page window and replaces it by id, so the order between an event
//! and an in-flight fetch does not matter.
//!
//! Every async completion carries the generation it was started under.
//! `start` and `teardown` bump the generation; completions from an older
//! generation are dropped.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::cursor::Page;
use super::scope::Scope;
use super::store::{FeedItem, FeedStore, PageQuery};
use crate::error::{Error, Result};
use crate::realtime::{PushChannel, PushEvent, Subscription, SubscriptionEvent};

/// Default number of items per page
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Default bound on a single page fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single mark-read call
pub const DEFAULT_MARK_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedState {
    /// Not started
    Idle,
    /// Initial page fetch in flight
    Loading,
    /// Subscribed with at least one page loaded
    Synced,
    /// A push event triggered a refetch of the loaded window
    Refetching,
    /// A fetch failed; waiting for an explicit retry
    Failed,
    /// Torn down; terminal
    Unsubscribed,
}

impl FeedState {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Synced => "synced",
            Self::Refetching => "refetching",
            Self::Failed => "failed",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

/// Feed tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Items per page
    pub page_size: usize,
    /// Bound on each page fetch
    pub fetch_timeout: Duration,
    /// Bound on each mark-read call
    pub mark_read_timeout: Duration,
}

impl FeedConfig {
    /// Same defaults with a different page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            mark_read_timeout: DEFAULT_MARK_READ_TIMEOUT,
        }
    }
}

/// What happened to a mark-read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// The store accepted the mutation and the item is read locally
    Marked,
    /// No call was made (not loaded, already read, not ours to mark, or in flight)
    Skipped,
    /// The store call failed or timed out; logged and dropped
    Failed,
}

/// Point-in-time view of a feed for rendering
#[derive(Debug, Clone)]
pub struct FeedSnapshot<T> {
    /// Active scope, if started
    pub scope: Option<Scope>,
    /// Current state
    pub state: FeedState,
    /// Loaded items, newest first, unique by id
    pub items: Vec<T>,
    /// Whether the initial page is still loading
    pub is_loading: bool,
    /// Whether older items can be fetched
    pub has_next_page: bool,
    /// Opaque [`Cursor`](super::cursor::Cursor) token for the next page
    pub next_page_token: Option<String>,
    /// Unread items for the viewer among the loaded ones
    pub unread_count: usize,
    /// The failure that put the feed in [`FeedState::Failed`]
    pub error: Option<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryAction {
    InitialLoad,
    Refetch,
    NextPage,
}

struct FeedInner<T> {
    state: FeedState,
    scope: Option<Scope>,
    generation: u64,
    pages: Vec<Page<T>>,
    window_version: u64,
    error: Option<Error>,
    retry: Option<RetryAction>,
    refetch_queued: bool,
    next_page_in_flight: bool,
    read_in_flight: HashSet<String>,
    subscription: Option<Subscription>,
    pump: Option<JoinHandle<()>>,
    auto_pump: bool,
}

impl<T: FeedItem> FeedInner<T> {
    fn new() -> Self {
        Self {
            state: FeedState::Idle,
            scope: None,
            generation: 0,
            pages: Vec::new(),
            window_version: 0,
            error: None,
            retry: None,
            refetch_queued: false,
            next_page_in_flight: false,
            read_in_flight: HashSet::new(),
            subscription: None,
            pump: None,
            auto_pump: false,
        }
    }

    /// Clear per-scope state and hand back the old subscription and pump
    fn reset(&mut self) -> (Option<Subscription>, Option<JoinHandle<()>>) {
        self.generation += 1;
        self.pages.clear();
        self.window_version += 1;
        self.error = None;
        self.retry = None;
        self.refetch_queued = false;
        self.next_page_in_flight = false;
        self.read_in_flight.clear();
        (self.subscription.take(), self.pump.take())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state != FeedState::Unsubscribed
    }

    fn fail(&mut self, error: Error, action: RetryAction) {
        self.state = FeedState::Failed;
        self.error = Some(error);
        self.retry = Some(action);
        self.refetch_queued = false;
    }

    fn replace_window(&mut self, pages: Vec<Page<T>>) {
        self.pages = pages;
        self.window_version += 1;
        self.error = None;
        self.retry = None;
    }

    fn items(&self) -> Vec<T> {
        let mut seen = HashSet::new();
        self.pages
            .iter()
            .flat_map(|page| page.items.iter())
            .filter(|item| seen.insert(item.id().to_string()))
            .cloned()
            .collect()
    }

    fn find(&self, item_id: &str) -> Option<&T> {
        self.pages
            .iter()
            .flat_map(|page| page.items.iter())
            .find(|item| item.id() == item_id)
    }

    fn has_next_page(&self) -> bool {
        self.pages.last().map(Page::has_next).unwrap_or(false)
    }

    fn next_page_token(&self) -> Option<String> {
        self.pages
            .last()
            .and_then(|page| page.next_cursor.as_ref())
            .map(|cursor| cursor.encode())
    }

    fn unread_count(&self, viewer_id: &str) -> usize {
        self.items()
            .iter()
            .filter(|item| item.is_unread_for(viewer_id))
            .count()
    }
}

/// Reconciler handle for one scope at a time
///
/// Cloning is cheap; clones share state. Store and push channel are
/// injected so the feed runs headless in tests.
pub struct LiveFeed<T: FeedItem> {
    store: Arc<dyn FeedStore<T>>,
    channel: Arc<dyn PushChannel>,
    viewer_id: String,
    config: FeedConfig,
    inner: Arc<RwLock<FeedInner<T>>>,
}

impl<T: FeedItem> Clone for LiveFeed<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            channel: self.channel.clone(),
            viewer_id: self.viewer_id.clone(),
            config: self.config.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: FeedItem> LiveFeed<T> {
    /// Create an idle feed for `viewer_id`
    pub fn new(
        store: Arc<dyn FeedStore<T>>,
        channel: Arc<dyn PushChannel>,
        viewer_id: impl Into<String>,
        config: FeedConfig,
    ) -> Self {
        Self {
            store,
            channel,
            viewer_id: viewer_id.into(),
            config,
            inner: Arc::new(RwLock::new(FeedInner::new())),
        }
    }

    /// The viewer this feed counts unread items for
    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// The feed configuration
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Activate `scope` and load its first page
    ///
    /// Switching scopes unsubscribes the previous channel first, and any
    /// fetch still running for it is discarded when it completes.
    pub async fn start(&self, scope: Scope) -> Result<()> {
        let (generation, previous) = {
            let mut inner = self.inner.write();
            if inner.state == FeedState::Unsubscribed {
                return Err(Error::FeedTornDown);
            }
            let previous = inner.reset();
            inner.scope = Some(scope.clone());
            inner.state = FeedState::Loading;
            (inner.generation, previous)
        };
        release(previous);

        tracing::info!(scope = %scope, generation, "Feed started");
        self.initial_load(generation).await
    }

    /// Unsubscribe and stop for good (idempotent)
    pub fn teardown(&self) {
        let previous = {
            let mut inner = self.inner.write();
            if inner.state == FeedState::Unsubscribed {
                return;
            }
            let previous = inner.reset();
            inner.state = FeedState::Unsubscribed;
            previous
        };
        release(previous);
        tracing::info!("Feed torn down");
    }

    /// Drain push events on a background task
    ///
    /// Applies to the current scope and to every scope started later. Must
    /// be called from within a tokio runtime.
    pub fn spawn_event_pump(&self) {
        let mut inner = self.inner.write();
        inner.auto_pump = true;
        if inner.pump.is_none() {
            if let Some(subscription) = inner.subscription.take() {
                let generation = inner.generation;
                inner.pump = Some(self.spawn_pump(generation, subscription));
            }
        }
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Handle one push event
    ///
    /// Events for other scopes are ignored. While a fetch is in flight the
    /// refetch is queued and runs once it completes.
    pub async fn on_push_event(&self, event: &PushEvent) -> Result<()> {
        let matches = {
            let inner = self.inner.read();
            inner
                .scope
                .as_ref()
                .map(|scope| scope.matches(event))
                .unwrap_or(false)
        };
        if !matches {
            tracing::trace!(channel = %event.channel, "Ignoring event for another scope");
            return Ok(());
        }

        tracing::debug!(
            kind = event.kind.as_str(),
            item_id = event.item_id(),
            "Push event for active scope"
        );
        self.refresh().await
    }

    /// Refetch the loaded window as if a matching event arrived
    pub async fn refresh(&self) -> Result<()> {
        let generation = {
            let mut inner = self.inner.write();
            match inner.state {
                FeedState::Loading | FeedState::Refetching => {
                    inner.refetch_queued = true;
                    return Ok(());
                }
                FeedState::Synced => {
                    inner.state = FeedState::Refetching;
                    inner.generation
                }
                FeedState::Idle | FeedState::Failed | FeedState::Unsubscribed => return Ok(()),
            }
        };
        self.refetch_window(generation).await
    }

    // ========================================================================
    // PAGINATION
    // ========================================================================

    /// Load the page after the last loaded one
    ///
    /// No-op when there is no next page or a page load is already running.
    pub async fn fetch_next_page(&self) -> Result<()> {
        let generation = {
            let inner = self.inner.read();
            match inner.state {
                FeedState::Idle => return Err(Error::FeedNotStarted),
                FeedState::Unsubscribed => return Err(Error::FeedTornDown),
                FeedState::Failed => return Err(Error::FeedBlocked),
                FeedState::Loading | FeedState::Refetching => return Ok(()),
                FeedState::Synced => inner.generation,
            }
        };
        self.load_next_page(generation).await
    }

    /// Re-run the operation that failed
    pub async fn retry(&self) -> Result<()> {
        let (generation, action) = {
            let mut inner = self.inner.write();
            match inner.state {
                FeedState::Idle => return Err(Error::FeedNotStarted),
                FeedState::Unsubscribed => return Err(Error::FeedTornDown),
                FeedState::Failed => {}
                _ => return Ok(()),
            }
            let action = inner.retry.take().unwrap_or(RetryAction::InitialLoad);
            inner.error = None;
            inner.state = match action {
                RetryAction::InitialLoad => FeedState::Loading,
                RetryAction::Refetch => FeedState::Refetching,
                RetryAction::NextPage => FeedState::Synced,
            };
            (inner.generation, action)
        };

        tracing::debug!(generation, ?action, "Retrying feed operation");
        match action {
            RetryAction::InitialLoad => self.initial_load(generation).await,
            RetryAction::Refetch => self.refetch_window(generation).await,
            RetryAction::NextPage => self.load_next_page(generation).await,
        }
    }

    // ========================================================================
    // READ STATE
    // ========================================================================

    /// An item became visible in the viewport
    ///
    /// Marks it read when it is unread for the viewer. Rapid scrolling marks
    /// every crossed item; redundant calls are suppressed.
    pub async fn on_item_visible(&self, item_id: &str) -> MarkReadOutcome {
        let unread = {
            let inner = self.inner.read();
            inner
                .find(item_id)
                .map(|item| item.is_unread_for(&self.viewer_id))
                .unwrap_or(false)
        };
        if !unread {
            return MarkReadOutcome::Skipped;
        }
        self.mark_read(item_id).await
    }

    /// Fire-and-forget read mutation
    ///
    /// Skipped for items that are not loaded, not unread for the viewer
    /// (already read or sent by the viewer), or already in flight. Failures
    /// are logged and not retried.
    pub async fn mark_read(&self, item_id: &str) -> MarkReadOutcome {
        let generation = {
            let mut inner = self.inner.write();
            if matches!(inner.state, FeedState::Idle | FeedState::Unsubscribed) {
                return MarkReadOutcome::Skipped;
            }
            match inner.find(item_id) {
                Some(item) if item.is_unread_for(&self.viewer_id) => {}
                _ => return MarkReadOutcome::Skipped,
            }
            if !inner.read_in_flight.insert(item_id.to_string()) {
                return MarkReadOutcome::Skipped;
            }
            inner.generation
        };

        let result =
            tokio::time::timeout(
                self.config.mark_read_timeout,
                self.store.mark_read(item_id, &self.viewer_id),
            )
            .await;

        let mut inner = self.inner.write();
        inner.read_in_flight.remove(item_id);

        let error = match result {
            Ok(Ok(())) => {
                if inner.is_current(generation) {
                    for item in inner
                        .pages
                        .iter_mut()
                        .flat_map(|page| page.items.iter_mut())
                        .filter(|item| item.id() == item_id)
                    {
                        item.set_read();
                    }
                }
                tracing::debug!(item_id, "Marked read");
                return MarkReadOutcome::Marked;
            }
            Ok(Err(e)) => Error::MarkReadFailed(e.to_string()),
            Err(_) => Error::MarkReadFailed(format!(
                "timed out after {}ms",
                self.config.mark_read_timeout.as_millis()
            )),
        };

        tracing::warn!(item_id, error = %error, "Mark read failed");
        MarkReadOutcome::Failed
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Current state
    pub fn current_state(&self) -> FeedState {
        self.inner.read().state
    }

    /// Active scope
    pub fn scope(&self) -> Option<Scope> {
        self.inner.read().scope.clone()
    }

    /// Loaded items, newest first, unique by id
    pub fn items(&self) -> Vec<T> {
        self.inner.read().items()
    }

    /// Unread items for the viewer, folded over the loaded pages
    pub fn unread_count(&self) -> usize {
        self.inner.read().unread_count(&self.viewer_id)
    }

    /// Whether older items can be fetched
    pub fn has_next_page(&self) -> bool {
        self.inner.read().has_next_page()
    }

    /// Whether the initial page is still loading
    pub fn is_loading(&self) -> bool {
        self.inner.read().state == FeedState::Loading
    }

    /// The failure behind [`FeedState::Failed`]
    pub fn error(&self) -> Option<Error> {
        self.inner.read().error.clone()
    }

    /// Everything a renderer needs, taken under one lock
    pub fn snapshot(&self) -> FeedSnapshot<T> {
        let inner = self.inner.read();
        let items = inner.items();
        let unread_count = items
            .iter()
            .filter(|item| item.is_unread_for(&self.viewer_id))
            .count();

        FeedSnapshot {
            scope: inner.scope.clone(),
            state: inner.state,
            is_loading: inner.state == FeedState::Loading,
            has_next_page: inner.has_next_page(),
            next_page_token: inner.next_page_token(),
            unread_count,
            error: inner.error.clone(),
            items,
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn query(&self, scope: Scope, cursor: Option<super::cursor::Cursor>) -> PageQuery {
        PageQuery {
            scope,
            viewer_id: self.viewer_id.clone(),
            cursor,
            limit: self.config.page_size,
        }
    }

    async fn fetch(&self, query: &PageQuery) -> Result<Page<T>> {
        match tokio::time::timeout(self.config.fetch_timeout, self.store.fetch_page(query)).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e @ (Error::FetchFailed(_) | Error::Timeout(_)))) => Err(e),
            Ok(Err(e)) => Err(Error::FetchFailed(e.to_string())),
            Err(_) => Err(Error::Timeout(format!(
                "page fetch exceeded {}ms",
                self.config.fetch_timeout.as_millis()
            ))),
        }
    }

    /// Record a failure if `generation` is still current
    fn fail(&self, generation: u64, error: Error, action: RetryAction) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.is_current(generation) {
            tracing::debug!(generation, error = %error, "Discarding stale failure");
            return Ok(());
        }
        tracing::warn!(generation, error = %error, ?action, "Feed fetch failed");
        inner.fail(error.clone(), action);
        Err(error)
    }

    async fn ensure_subscription(&self, generation: u64, scope: &Scope) -> Result<()> {
        let needed = {
            let inner = self.inner.read();
            inner.is_current(generation) && inner.subscription.is_none() && inner.pump.is_none()
        };
        if !needed {
            return Ok(());
        }

        let subscription = self.channel.subscribe(&scope.channel_path()).await?;

        let mut inner = self.inner.write();
        if !inner.is_current(generation) {
            // Dropping unsubscribes.
            return Ok(());
        }
        if inner.auto_pump {
            inner.pump = Some(self.spawn_pump(generation, subscription));
        } else {
            inner.subscription = Some(subscription);
        }
        Ok(())
    }

    async fn initial_load(&self, generation: u64) -> Result<()> {
        let Some(scope) = self.scope_if_current(generation) else {
            return Ok(());
        };

        if let Err(e) = self.ensure_subscription(generation, &scope).await {
            return self.fail(generation, e, RetryAction::InitialLoad);
        }

        let result = self.fetch(&self.query(scope.clone(), None)).await;

        let queued = {
            let mut inner = self.inner.write();
            if !inner.is_current(generation) {
                tracing::debug!(scope = %scope, generation, "Discarding stale first page");
                return Ok(());
            }
            match result {
                Ok(page) => {
                    tracing::debug!(scope = %scope, count = page.items.len(), "First page loaded");
                    inner.replace_window(vec![page]);
                    if inner.refetch_queued {
                        inner.state = FeedState::Refetching;
                        true
                    } else {
                        inner.state = FeedState::Synced;
                        false
                    }
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "First page failed");
                    inner.fail(e.clone(), RetryAction::InitialLoad);
                    return Err(e);
                }
            }
        };

        if queued {
            self.refetch_window(generation).await
        } else {
            Ok(())
        }
    }

    async fn refetch_window(&self, generation: u64) -> Result<()> {
        loop {
            let (scope, page_count) = {
                let mut inner = self.inner.write();
                if !inner.is_current(generation) {
                    return Ok(());
                }
                let Some(scope) = inner.scope.clone() else {
                    return Ok(());
                };
                inner.refetch_queued = false;
                (scope, inner.pages.len().max(1))
            };

            let mut fresh = Vec::with_capacity(page_count);
            let mut cursor = None;
            for _ in 0..page_count {
                match self.fetch(&self.query(scope.clone(), cursor.take())).await {
                    Ok(page) => {
                        cursor = page.next_cursor.clone();
                        fresh.push(page);
                        if cursor.is_none() {
                            break;
                        }
                    }
                    Err(e) => return self.fail(generation, e, RetryAction::Refetch),
                }
            }

            let again = {
                let mut inner = self.inner.write();
                if !inner.is_current(generation) {
                    tracing::debug!(scope = %scope, generation, "Discarding stale refetch");
                    return Ok(());
                }
                inner.replace_window(fresh);
                if inner.refetch_queued {
                    true
                } else {
                    inner.state = FeedState::Synced;
                    false
                }
            };

            if !again {
                tracing::debug!(scope = %scope, pages = page_count, "Window refetched");
                return Ok(());
            }
        }
    }

    async fn load_next_page(&self, generation: u64) -> Result<()> {
        let (query, version) = {
            let mut inner = self.inner.write();
            if !inner.is_current(generation) || inner.next_page_in_flight {
                return Ok(());
            }
            let Some(scope) = inner.scope.clone() else {
                return Ok(());
            };
            let Some(cursor) = inner.pages.last().and_then(|page| page.next_cursor.clone()) else {
                return Ok(());
            };
            inner.next_page_in_flight = true;
            (self.query(scope, Some(cursor)), inner.window_version)
        };

        let result = self.fetch(&query).await;

        let mut inner = self.inner.write();
        if !inner.is_current(generation) {
            tracing::debug!(generation, "Discarding stale next page");
            return Ok(());
        }
        inner.next_page_in_flight = false;

        match result {
            Ok(page) => {
                if inner.window_version == version {
                    tracing::debug!(count = page.items.len(), "Next page loaded");
                    inner.pages.push(page);
                } else {
                    tracing::debug!("Window replaced during next page load; dropping page");
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Next page failed");
                inner.fail(e.clone(), RetryAction::NextPage);
                Err(e)
            }
        }
    }

    fn scope_if_current(&self, generation: u64) -> Option<Scope> {
        let inner = self.inner.read();
        if inner.is_current(generation) {
            inner.scope.clone()
        } else {
            None
        }
    }

    fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    fn spawn_pump(&self, generation: u64, mut subscription: Subscription) -> JoinHandle<()> {
        let feed = self.clone();

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if feed.generation() != generation {
                    break;
                }
                let outcome = match event {
                    SubscriptionEvent::Event(event) => feed.on_push_event(&event).await,
                    SubscriptionEvent::Lagged(missed) => {
                        tracing::warn!(missed, "Push subscription lagged; refetching");
                        feed.refresh().await
                    }
                };
                if let Err(e) = outcome {
                    tracing::debug!(error = %e, "Push-driven refetch failed");
                }
            }
            subscription.unsubscribe();
        })
    }
}

fn release((subscription, pump): (Option<Subscription>, Option<JoinHandle<()>>)) {
    if let Some(mut subscription) = subscription {
        subscription.unsubscribe();
    }
    if let Some(pump) = pump {
        pump.abort();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Cursor;
    use crate::realtime::{PushEventKind, PushHub};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestItem {
        id: String,
        created_at: i64,
        sender: String,
        read: bool,
    }

    impl FeedItem for TestItem {
        fn id(&self) -> &str {
            &self.id
        }
        fn created_at(&self) -> i64 {
            self.created_at
        }
        fn is_read(&self) -> bool {
            self.read
        }
        fn set_read(&mut self) {
            self.read = true;
        }
        fn is_unread_for(&self, viewer_id: &str) -> bool {
            !self.read && self.sender != viewer_id
        }
    }

    #[derive(Default)]
    struct FakeStore {
        items: Mutex<HashMap<String, Vec<TestItem>>>,
        fetch_calls: AtomicUsize,
        mark_calls: AtomicUsize,
        readers: Mutex<Vec<String>>,
        fail_fetches: AtomicUsize,
        fail_marks: AtomicBool,
        fetch_delay: Mutex<Option<Duration>>,
        mark_delay: Mutex<Option<Duration>>,
        gate: Mutex<Option<(String, Arc<Notify>)>>,
    }

    impl FakeStore {
        fn insert(&self, scope: &str, id: &str, created_at: i64, sender: &str, read: bool) {
            self.items
                .lock()
                .entry(scope.to_string())
                .or_default()
                .push(TestItem {
                    id: id.to_string(),
                    created_at,
                    sender: sender.to_string(),
                    read,
                });
        }

        fn block_scope(&self, scope: &str) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            *self.gate.lock() = Some((scope.to_string(), notify.clone()));
            notify
        }

        fn fetches(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }

        fn marks(&self) -> usize {
            self.mark_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedStore<TestItem> for FakeStore {
        async fn fetch_page(&self, query: &PageQuery) -> Result<Page<TestItem>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);

            let gate = self
                .gate
                .lock()
                .as_ref()
                .filter(|(scope, _)| scope == query.scope.id())
                .map(|(_, notify)| notify.clone());
            if let Some(notify) = gate {
                notify.notified().await;
            }

            let delay = *self.fetch_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self
                .fail_fetches
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::FetchFailed("scripted failure".into()));
            }

            let mut items: Vec<TestItem> = self
                .items
                .lock()
                .get(query.scope.id())
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|item| match &query.cursor {
                    Some(cursor) => cursor.admits(item.created_at, &item.id),
                    None => true,
                })
                .collect();
            items.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));

            let has_more = items.len() > query.limit;
            items.truncate(query.limit);
            let next_cursor = if has_more {
                items.last().map(|item| Cursor::new(item.created_at, item.id.clone()))
            } else {
                None
            };
            Ok(Page { items, next_cursor })
        }

        async fn mark_read(&self, item_id: &str, reader_id: &str) -> Result<()> {
            self.mark_calls.fetch_add(1, Ordering::SeqCst);
            self.readers.lock().push(reader_id.to_string());

            let delay = *self.mark_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_marks.load(Ordering::SeqCst) {
                return Err(Error::DatabaseError("scripted failure".into()));
            }

            for items in self.items.lock().values_mut() {
                for item in items.iter_mut().filter(|item| item.id == item_id) {
                    item.read = true;
                }
            }
            Ok(())
        }
    }

    fn conversation(id: &str) -> Scope {
        Scope::Conversation(id.to_string())
    }

    fn event_for(scope: &Scope, item_id: &str) -> PushEvent {
        PushEvent::new(PushEventKind::Create, scope.channel_path(), scope.id(), item_id)
    }

    fn setup(page_size: usize) -> (Arc<FakeStore>, PushHub, LiveFeed<TestItem>) {
        let store = Arc::new(FakeStore::default());
        let hub = PushHub::new();
        let feed = LiveFeed::new(
            store.clone() as Arc<dyn FeedStore<TestItem>>,
            Arc::new(hub.clone()) as Arc<dyn PushChannel>,
            "me",
            FeedConfig::default().with_page_size(page_size),
        );
        (store, hub, feed)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_start_loads_first_page() {
        let (store, hub, feed) = setup(3);
        for i in 1..=5 {
            store.insert("a", &format!("m{}", i), i, "other", false);
        }

        assert_eq!(feed.current_state(), FeedState::Idle);
        feed.start(conversation("a")).await.unwrap();

        assert_eq!(feed.current_state(), FeedState::Synced);
        let ids: Vec<_> = feed.items().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m5", "m4", "m3"]);
        assert!(feed.has_next_page());
        assert!(!feed.is_loading());
        assert_eq!(hub.subscriber_count(&conversation("a").channel_path()), 1);
    }

    #[tokio::test]
    async fn test_snapshot_exposes_next_page_token() {
        let (store, _hub, feed) = setup(10);
        for i in 1..=15 {
            store.insert("a", &format!("m{:02}", i), i, "other", true);
        }

        feed.start(conversation("a")).await.unwrap();
        let token = feed.snapshot().next_page_token.expect("more pages");
        assert_eq!(Cursor::decode(&token).unwrap(), Cursor::new(6, "m06"));

        feed.fetch_next_page().await.unwrap();
        assert!(feed.snapshot().next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_pagination_survives_insert_and_refetch() {
        let (store, _hub, feed) = setup(10);
        for i in 1..=25 {
            store.insert("a", &format!("m{:02}", i), i, "other", true);
        }
        let scope = conversation("a");

        feed.start(scope.clone()).await.unwrap();
        feed.fetch_next_page().await.unwrap();
        assert_eq!(feed.items().len(), 20);

        store.insert("a", "m26", 26, "other", true);
        feed.on_push_event(&event_for(&scope, "m26")).await.unwrap();
        assert_eq!(feed.current_state(), FeedState::Synced);

        let items = feed.items();
        assert_eq!(items.len(), 20);
        assert_eq!(items[0].id, "m26");

        feed.fetch_next_page().await.unwrap();
        let ids: Vec<_> = feed.items().into_iter().map(|m| m.id).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), 26);
        assert_eq!(unique.len(), 26);
        assert!(!feed.has_next_page());
    }

    #[tokio::test]
    async fn test_events_for_other_scopes_are_ignored() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        feed.start(conversation("a")).await.unwrap();
        let before = store.fetches();

        feed.on_push_event(&event_for(&conversation("b"), "x1"))
            .await
            .unwrap();
        assert_eq!(store.fetches(), before);
        assert_eq!(feed.current_state(), FeedState::Synced);

        feed.on_push_event(&event_for(&conversation("a"), "m1"))
            .await
            .unwrap();
        assert_eq!(store.fetches(), before + 1);
    }

    #[tokio::test]
    async fn test_stale_fetch_is_discarded_after_scope_switch() {
        let (store, hub, feed) = setup(10);
        store.insert("a", "a1", 1, "other", false);
        store.insert("b", "b1", 1, "other", false);
        let gate = store.block_scope("a");

        let background = feed.clone();
        let task = tokio::spawn(async move { background.start(conversation("a")).await });
        wait_until(|| store.fetches() >= 1).await;

        feed.start(conversation("b")).await.unwrap();
        assert_eq!(hub.subscriber_count(&conversation("a").channel_path()), 0);

        gate.notify_one();
        task.await.unwrap().unwrap();

        let ids: Vec<_> = feed.items().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b1"]);
        assert_eq!(feed.scope(), Some(conversation("b")));
        assert_eq!(feed.current_state(), FeedState::Synced);
    }

    #[tokio::test]
    async fn test_event_during_load_is_queued() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        let gate = store.block_scope("a");
        let scope = conversation("a");

        let background = feed.clone();
        let task = tokio::spawn({
            let scope = scope.clone();
            async move { background.start(scope).await }
        });
        wait_until(|| store.fetches() >= 1).await;

        store.insert("a", "m2", 2, "other", false);
        feed.on_push_event(&event_for(&scope, "m2")).await.unwrap();
        assert_eq!(feed.current_state(), FeedState::Loading);

        *store.gate.lock() = None;
        gate.notify_one();
        task.await.unwrap().unwrap();

        assert_eq!(store.fetches(), 2);
        assert_eq!(feed.items().len(), 2);
        assert_eq!(feed.current_state(), FeedState::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_fails_into_error_state() {
        let (store, _hub, feed) = setup(10);
        *store.fetch_delay.lock() = Some(Duration::from_secs(60));

        let result = feed.start(conversation("a")).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(feed.current_state(), FeedState::Failed);
        assert!(matches!(feed.error(), Some(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_failure_blocks_pagination_until_retry() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        store.fail_fetches.store(1, Ordering::SeqCst);

        assert!(matches!(
            feed.start(conversation("a")).await,
            Err(Error::FetchFailed(_))
        ));
        assert_eq!(feed.current_state(), FeedState::Failed);
        assert!(matches!(feed.fetch_next_page().await, Err(Error::FeedBlocked)));
        assert_eq!(store.fetches(), 1);

        feed.retry().await.unwrap();
        assert_eq!(feed.current_state(), FeedState::Synced);
        assert_eq!(feed.items().len(), 1);
        assert!(feed.error().is_none());
    }

    #[tokio::test]
    async fn test_next_page_failure_retries_next_page() {
        let (store, _hub, feed) = setup(2);
        for i in 1..=3 {
            store.insert("a", &format!("m{}", i), i, "other", true);
        }
        feed.start(conversation("a")).await.unwrap();

        store.fail_fetches.store(1, Ordering::SeqCst);
        assert!(feed.fetch_next_page().await.is_err());
        assert_eq!(feed.items().len(), 2);

        feed.retry().await.unwrap();
        assert_eq!(feed.items().len(), 3);
        assert_eq!(feed.current_state(), FeedState::Synced);
    }

    #[tokio::test]
    async fn test_unread_count_drops_after_mark_read() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        store.insert("a", "m2", 2, "other", true);
        store.insert("a", "m3", 3, "me", false);
        store.insert("a", "m4", 4, "other", false);
        store.insert("a", "m5", 5, "me", true);
        feed.start(conversation("a")).await.unwrap();

        assert_eq!(feed.unread_count(), 2);
        assert_eq!(feed.mark_read("m4").await, MarkReadOutcome::Marked);
        assert_eq!(feed.unread_count(), 1);
        assert_eq!(feed.snapshot().unread_count, 1);
    }

    #[tokio::test]
    async fn test_redundant_mark_read_is_suppressed() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        store.insert("a", "m2", 2, "me", false);
        feed.start(conversation("a")).await.unwrap();

        assert_eq!(feed.on_item_visible("m1").await, MarkReadOutcome::Marked);
        assert_eq!(feed.on_item_visible("m1").await, MarkReadOutcome::Skipped);
        assert_eq!(feed.mark_read("m1").await, MarkReadOutcome::Skipped);
        assert_eq!(feed.on_item_visible("m2").await, MarkReadOutcome::Skipped);
        assert_eq!(feed.on_item_visible("missing").await, MarkReadOutcome::Skipped);
        assert_eq!(store.marks(), 1);
    }

    #[tokio::test]
    async fn test_own_items_are_never_marked() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "me", false);
        store.insert("a", "m2", 2, "other", false);
        feed.start(conversation("a")).await.unwrap();

        assert_eq!(feed.mark_read("m1").await, MarkReadOutcome::Skipped);
        assert_eq!(store.marks(), 0);
        assert!(feed.items().iter().any(|item| item.id == "m1" && !item.read));

        assert_eq!(feed.mark_read("m2").await, MarkReadOutcome::Marked);
        assert_eq!(*store.readers.lock(), ["me"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_mark_read_is_not_duplicated() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        feed.start(conversation("a")).await.unwrap();
        *store.mark_delay.lock() = Some(Duration::from_millis(100));

        let (first, second) = tokio::join!(feed.mark_read("m1"), feed.mark_read("m1"));

        assert_eq!(first, MarkReadOutcome::Marked);
        assert_eq!(second, MarkReadOutcome::Skipped);
        assert_eq!(store.marks(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_failure_is_swallowed() {
        let (store, _hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        feed.start(conversation("a")).await.unwrap();
        store.fail_marks.store(true, Ordering::SeqCst);

        assert_eq!(feed.mark_read("m1").await, MarkReadOutcome::Failed);
        assert_eq!(feed.current_state(), FeedState::Synced);
        assert!(feed.error().is_none());
        assert_eq!(feed.unread_count(), 1);

        store.fail_marks.store(false, Ordering::SeqCst);
        assert_eq!(feed.on_item_visible("m1").await, MarkReadOutcome::Marked);
        assert_eq!(store.marks(), 2);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent_and_terminal() {
        let (store, hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        let scope = conversation("a");
        feed.start(scope.clone()).await.unwrap();

        feed.teardown();
        feed.teardown();

        assert_eq!(feed.current_state(), FeedState::Unsubscribed);
        assert_eq!(hub.subscriber_count(&scope.channel_path()), 0);
        assert!(feed.items().is_empty());
        assert!(matches!(feed.start(scope.clone()).await, Err(Error::FeedTornDown)));
        assert!(matches!(feed.fetch_next_page().await, Err(Error::FeedTornDown)));

        let before = store.fetches();
        feed.on_push_event(&event_for(&scope, "m1")).await.unwrap();
        assert_eq!(store.fetches(), before);
    }

    #[tokio::test]
    async fn test_not_started_feed_rejects_pagination() {
        let (_store, _hub, feed) = setup(10);
        assert!(matches!(feed.fetch_next_page().await, Err(Error::FeedNotStarted)));
        assert!(matches!(feed.retry().await, Err(Error::FeedNotStarted)));
        assert_eq!(feed.mark_read("m1").await, MarkReadOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_event_pump_drives_refetch() {
        let (store, hub, feed) = setup(10);
        store.insert("a", "m1", 1, "other", false);
        let scope = conversation("a");

        feed.spawn_event_pump();
        feed.start(scope.clone()).await.unwrap();
        assert_eq!(hub.subscriber_count(&scope.channel_path()), 1);

        store.insert("a", "m2", 2, "other", false);
        hub.publish(event_for(&scope, "m2"));

        wait_until(|| feed.items().len() == 2).await;
        assert_eq!(feed.unread_count(), 2);

        hub.publish(event_for(&conversation("b"), "x"));
        tokio::task::yield_now().await;
        assert_eq!(feed.items().len(), 2);

        feed.teardown();
        assert_eq!(feed.current_state(), FeedState::Unsubscribed);
    }
}
