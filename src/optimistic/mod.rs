//! Optimistic mutations against reactive state.
//!
//! Creates render a pending entity immediately and swap in the server's copy
//! when it arrives. Updates mutate the state in place and hand back an undo
//! that reverts only what they touched.

use crate::api::{ApiError, ServiceResult};
use crate::models::{EntityId, SyncState};
use crate::toast::Notifier;
use leptos::prelude::*;
use leptos::task::spawn_local;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub trait OptimisticEntity: Clone {
    fn entity_id(&self) -> &EntityId;
    fn sync_state(&self) -> SyncState;
    fn set_sync_state(&mut self, sync: SyncState);
}

/// A place optimistic entities live in.
pub trait Collection<T> {
    fn insert(&self, entity: T);

    /// Returns false if no entity has `id`.
    fn modify(&self, id: &EntityId, f: impl FnOnce(&mut T)) -> bool;

    fn remove(&self, id: &EntityId) -> bool;

    /// Replaces the entity with `id` in the same slot.
    fn replace(&self, id: &EntityId, entity: T) -> bool {
        self.modify(id, |slot| *slot = entity)
    }
}

impl<T> Collection<T> for RwSignal<Vec<T>>
where
    T: OptimisticEntity + Send + Sync + 'static,
{
    fn insert(&self, entity: T) {
        self.update(|items| items.push(entity));
    }

    fn modify(&self, id: &EntityId, f: impl FnOnce(&mut T)) -> bool {
        let mut found = false;
        self.update(|items| {
            if let Some(item) = items.iter_mut().find(|i| i.entity_id() == id) {
                f(item);
                found = true;
            }
        });
        found
    }

    fn remove(&self, id: &EntityId) -> bool {
        let mut removed = false;
        self.update(|items| {
            let before = items.len();
            items.retain(|i| i.entity_id() != id);
            removed = items.len() != before;
        });
        removed
    }
}

/// Reverts one optimistic update.
pub type Undo<S> = Box<dyn FnOnce(&mut S)>;

/// For updates that found nothing to change.
pub fn nothing_to_undo<S>() -> Undo<S> {
    Box::new(|_| {})
}

/// Logging and toast context for one optimistic operation.
#[derive(Clone, Debug)]
pub struct Operation {
    pub name: &'static str,
    /// Log label, e.g. `list:7`.
    pub entity: String,
    /// Shown to the user on failure.
    pub error_message: String,
}

impl Operation {
    pub fn new(
        name: &'static str,
        entity: impl std::fmt::Display,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            name,
            entity: entity.to_string(),
            error_message: error_message.into(),
        }
    }

    /// Requests race only against the same operation on the same entity,
    /// e.g. `rename:list:7`. A color change never makes a rename stale.
    pub fn sequence_key(&self) -> String {
        format!("{}:{}", self.name, self.entity)
    }
}

pub struct Callbacks<T> {
    on_success: Option<Box<dyn FnOnce(&T)>>,
    on_error: Option<Box<dyn FnOnce(&ApiError)>>,
}

impl<T> Callbacks<T> {
    pub fn none() -> Self {
        Self {
            on_success: None,
            on_error: None,
        }
    }

    pub fn on_success(mut self, f: impl FnOnce(&T) + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&ApiError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    fn succeed(self, value: &T) {
        if let Some(f) = self.on_success {
            f(value);
        }
    }

    fn fail(self, error: &ApiError) {
        if let Some(f) = self.on_error {
            f(error);
        }
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::none()
    }
}

/// Monotonic request numbers per sequence key.
#[derive(Clone, Default)]
pub struct Sequencer {
    next: Arc<AtomicU64>,
    latest: Arc<Mutex<HashMap<String, u64>>>,
}

impl Sequencer {
    pub fn issue(&self, key: &str) -> u64 {
        let seq = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut latest) = self.latest.lock() {
            latest.insert(key.to_string(), seq);
        }
        seq
    }

    pub fn is_latest(&self, key: &str, seq: u64) -> bool {
        match self.latest.lock() {
            Ok(latest) => latest.get(key).map_or(true, |&newest| newest == seq),
            Err(_) => true,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum UpdateOutcome<R> {
    Applied(R),
    RolledBack(ApiError),
    /// A newer request of the same operation on the same entity was issued
    /// meanwhile.
    Stale,
    /// Refused before any local change or request.
    Rejected(ApiError),
}

impl<R> UpdateOutcome<R> {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

#[derive(Clone)]
pub struct OptimisticEngine {
    notifier: Arc<dyn Notifier + Send + Sync>,
    sequencer: Sequencer,
}

impl OptimisticEngine {
    pub fn new(notifier: Arc<dyn Notifier + Send + Sync>) -> Self {
        Self {
            notifier,
            sequencer: Sequencer::default(),
        }
    }

    /// Renders `temp` immediately and swaps in the server's entity on success.
    pub async fn run_create<T, C, F>(
        &self,
        op: Operation,
        collection: C,
        mut temp: T,
        request: F,
        callbacks: Callbacks<T>,
    ) -> ServiceResult<T>
    where
        T: OptimisticEntity,
        C: Collection<T>,
        F: Future<Output = ServiceResult<T>>,
    {
        let temp_id = *temp.entity_id();
        temp.set_sync_state(SyncState::Temporary);
        collection.insert(temp);
        collection.modify(&temp_id, |e| e.set_sync_state(SyncState::Pending));

        match request.await {
            Ok(mut confirmed) => {
                confirmed.set_sync_state(SyncState::Confirmed);
                if !collection.replace(&temp_id, confirmed.clone()) {
                    log::warn!(
                        "{}: {temp_id} vanished before confirmation, appending {}",
                        op.name,
                        confirmed.entity_id()
                    );
                    collection.insert(confirmed.clone());
                }
                log::debug!("{}: {temp_id} confirmed as {}", op.name, confirmed.entity_id());
                callbacks.succeed(&confirmed);
                Ok(confirmed)
            }
            Err(e) => {
                collection.remove(&temp_id);
                self.report(&op, &e);
                callbacks.fail(&e);
                Err(e)
            }
        }
    }

    /// Applies `apply` immediately. If the request fails, the undo it
    /// returned is run against the state as it is by then.
    pub async fn run_update<S, R, F>(
        &self,
        op: Operation,
        state: RwSignal<S>,
        apply: impl FnOnce(&mut S) -> Undo<S>,
        request: F,
        callbacks: Callbacks<R>,
    ) -> UpdateOutcome<R>
    where
        S: Send + Sync + 'static,
        F: Future<Output = ServiceResult<R>>,
    {
        let key = op.sequence_key();
        let seq = self.sequencer.issue(&key);
        let mut undo = None;
        state.update(|s| undo = Some(apply(s)));

        let result = request.await;

        if !self.sequencer.is_latest(&key, seq) {
            log::debug!("{}: dropping stale response for {} (seq {seq})", op.name, op.entity);
            return UpdateOutcome::Stale;
        }

        match result {
            Ok(value) => {
                callbacks.succeed(&value);
                UpdateOutcome::Applied(value)
            }
            Err(e) => {
                if let Some(undo) = undo {
                    state.update(undo);
                }
                self.report(&op, &e);
                callbacks.fail(&e);
                UpdateOutcome::RolledBack(e)
            }
        }
    }

    /// Fire-and-forget form of `run_create`.
    pub fn execute_create<T, C, F>(
        &self,
        op: Operation,
        collection: C,
        temp: T,
        request: F,
        callbacks: Callbacks<T>,
    ) where
        T: OptimisticEntity + 'static,
        C: Collection<T> + 'static,
        F: Future<Output = ServiceResult<T>> + 'static,
    {
        let engine = self.clone();
        spawn_local(async move {
            let _ = engine
                .run_create(op, collection, temp, request, callbacks)
                .await;
        });
    }

    /// Fire-and-forget form of `run_update`.
    pub fn execute_update<S, R, F>(
        &self,
        op: Operation,
        state: RwSignal<S>,
        apply: impl FnOnce(&mut S) -> Undo<S> + 'static,
        request: F,
        callbacks: Callbacks<R>,
    ) where
        S: Send + Sync + 'static,
        R: 'static,
        F: Future<Output = ServiceResult<R>> + 'static,
    {
        let engine = self.clone();
        spawn_local(async move {
            engine
                .run_update(op, state, apply, request, callbacks)
                .await;
        });
    }

    pub fn notifier(&self) -> Arc<dyn Notifier + Send + Sync> {
        self.notifier.clone()
    }

    /// Logs the failure and shows the operation's message.
    pub fn report(&self, op: &Operation, e: &ApiError) {
        log::error!("{} failed for {}: {e}", op.name, op.entity);
        self.notifier.error(&op.error_message);
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::api::ApiErrorKind;
    use crate::toast::ToastKind;
    use std::cell::Cell;
    use std::pin::pin;
    use std::rc::Rc;
    use std::task::{Context, Poll, Wake, Waker};

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub messages: Mutex<Vec<(ToastKind, String)>>,
    }

    impl RecordingNotifier {
        pub fn errors(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == ToastKind::Error)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, kind: ToastKind, message: &str) {
            self.messages.lock().unwrap().push((kind, message.to_string()));
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Item {
        id: EntityId,
        label: &'static str,
        sync: SyncState,
    }

    impl OptimisticEntity for Item {
        fn entity_id(&self) -> &EntityId {
            &self.id
        }
        fn sync_state(&self) -> SyncState {
            self.sync
        }
        fn set_sync_state(&mut self, sync: SyncState) {
            self.sync = sync;
        }
    }

    fn item(id: i64, label: &'static str) -> Item {
        Item {
            id: EntityId::Confirmed(id),
            label,
            sync: SyncState::Confirmed,
        }
    }

    fn engine() -> (OptimisticEngine, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (OptimisticEngine::new(notifier.clone()), notifier)
    }

    fn network_error() -> ApiError {
        ApiError {
            kind: ApiErrorKind::Network,
            message: "offline".to_string(),
        }
    }

    struct NoopWake;

    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    /// Polls a parked request once, so tests can interleave operations.
    pub fn poll_once<F: Future>(future: std::pin::Pin<&mut F>) -> Poll<F::Output> {
        let waker = Waker::from(Arc::new(NoopWake));
        future.poll(&mut Context::from_waker(&waker))
    }

    #[tokio::test]
    async fn test_create_success_takes_the_temp_slot() {
        let (engine, notifier) = engine();
        let state = RwSignal::new(vec![item(1, "a")]);
        let temp = Item {
            id: EntityId::new_pending(),
            label: "new",
            sync: SyncState::Temporary,
        };
        let temp_id = temp.id;

        let request = async move {
            let visible = state.get_untracked();
            assert_eq!(visible.len(), 2);
            assert_eq!(visible[1].id, temp_id);
            assert_eq!(visible[1].sync, SyncState::Pending);
            // Another entity lands while the create is in flight.
            state.update(|v| v.push(item(3, "c")));
            Ok(Item {
                id: EntityId::Confirmed(2),
                label: "new",
                sync: SyncState::Pending,
            })
        };

        let succeeded = Rc::new(Cell::new(false));
        let succeeded2 = succeeded.clone();
        let result = engine
            .run_create(
                Operation::new("create_item", temp_id, "failed"),
                state,
                temp,
                request,
                Callbacks::none().on_success(move |_| succeeded2.set(true)),
            )
            .await;

        assert!(result.is_ok());
        assert!(succeeded.get());
        let labels: Vec<_> = state.get_untracked().iter().map(|i| i.id).collect();
        assert_eq!(
            labels,
            vec![
                EntityId::Confirmed(1),
                EntityId::Confirmed(2),
                EntityId::Confirmed(3)
            ]
        );
        assert_eq!(state.get_untracked()[1].sync, SyncState::Confirmed);
        assert!(notifier.errors().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_removes_temp_and_reports_once() {
        let (engine, notifier) = engine();
        let state = RwSignal::new(vec![item(1, "a")]);
        let temp = Item {
            id: EntityId::new_pending(),
            label: "new",
            sync: SyncState::Temporary,
        };

        let error_calls = Rc::new(Cell::new(0));
        let error_calls2 = error_calls.clone();
        let result = engine
            .run_create(
                Operation::new("create_item", temp.id, "생성에 실패했습니다"),
                state,
                temp,
                async { Err(network_error()) },
                Callbacks::none().on_error(move |_| error_calls2.set(error_calls2.get() + 1)),
            )
            .await;

        assert_eq!(result.map_err(|e| e.kind), Err(ApiErrorKind::Network));
        assert_eq!(state.get_untracked(), vec![item(1, "a")]);
        assert_eq!(error_calls.get(), 1);
        assert_eq!(notifier.errors(), vec!["생성에 실패했습니다".to_string()]);
    }

    fn relabel(id: i64, label: &'static str) -> impl FnOnce(&mut Vec<Item>) -> Undo<Vec<Item>> {
        move |items: &mut Vec<Item>| -> Undo<Vec<Item>> {
            let target = EntityId::Confirmed(id);
            let Some(item) = items.iter_mut().find(|i| i.id == target) else {
                return nothing_to_undo();
            };
            let before = std::mem::replace(&mut item.label, label);
            Box::new(move |items: &mut Vec<Item>| {
                if let Some(item) = items.iter_mut().find(|i| i.id == target) {
                    item.label = before;
                }
            })
        }
    }

    fn labels(state: RwSignal<Vec<Item>>) -> Vec<&'static str> {
        state.get_untracked().iter().map(|i| i.label).collect()
    }

    #[tokio::test]
    async fn test_update_failure_undoes_only_its_own_change() {
        let (engine, notifier) = engine();
        let state = RwSignal::new(vec![item(1, "a"), item(2, "b")]);

        let outcome = engine
            .run_update(
                Operation::new("rename", "item:1", "이름 변경에 실패했습니다. 다시 시도해주세요."),
                state,
                relabel(1, "renamed"),
                async move {
                    assert_eq!(labels(state), vec!["renamed", "b"]);
                    // Lands while the rename is in flight and must survive it.
                    state.update(|v| v.push(item(3, "c")));
                    state.update(|v| v[1].label = "b2");
                    Err::<(), _>(network_error())
                },
                Callbacks::none(),
            )
            .await;

        assert!(matches!(outcome, UpdateOutcome::RolledBack(_)));
        assert_eq!(labels(state), vec!["a", "b2", "c"]);
        assert_eq!(notifier.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_update_success_keeps_mutation() {
        let (engine, notifier) = engine();
        let state = RwSignal::new(vec![item(1, "a")]);

        let outcome = engine
            .run_update(
                Operation::new("rename", "item:1", "failed"),
                state,
                relabel(1, "renamed"),
                async { Ok(7) },
                Callbacks::none(),
            )
            .await;

        assert_eq!(outcome, UpdateOutcome::Applied(7));
        assert_eq!(labels(state), vec!["renamed"]);
        assert!(notifier.errors().is_empty());
    }

    #[tokio::test]
    async fn test_stale_failure_is_discarded_without_rollback() {
        let (engine, notifier) = engine();
        let state = RwSignal::new(vec![item(1, "a")]);
        let (tx, rx) = tokio::sync::oneshot::channel::<ServiceResult<()>>();

        let mut first = pin!(engine.run_update(
            Operation::new("rename", "item:1", "first failed"),
            state,
            relabel(1, "first"),
            async move { rx.await.unwrap_or_else(|_| Err(network_error())) },
            Callbacks::none(),
        ));

        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        assert!(first.as_mut().poll(&mut cx).is_pending());

        let second = engine
            .run_update(
                Operation::new("rename", "item:1", "second failed"),
                state,
                relabel(1, "second"),
                async { Ok(()) },
                Callbacks::none(),
            )
            .await;
        assert!(second.is_applied());

        tx.send(Err(network_error())).unwrap();
        assert!(matches!(first.as_mut().poll(&mut cx), Poll::Ready(UpdateOutcome::Stale)));

        assert_eq!(labels(state), vec!["second"]);
        assert!(notifier.errors().is_empty());
    }

    #[tokio::test]
    async fn test_other_operations_on_the_entity_do_not_make_a_failure_stale() {
        let (engine, notifier) = engine();
        let state = RwSignal::new(vec![item(1, "a")]);
        let (tx, rx) = tokio::sync::oneshot::channel::<ServiceResult<()>>();

        let mut rename = pin!(engine.run_update(
            Operation::new("rename", "item:1", "rename failed"),
            state,
            relabel(1, "renamed"),
            async move { rx.await.unwrap_or_else(|_| Err(network_error())) },
            Callbacks::none(),
        ));

        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        assert!(rename.as_mut().poll(&mut cx).is_pending());

        let recolor = engine
            .run_update(
                Operation::new("set_color", "item:1", "color failed"),
                state,
                |_: &mut Vec<Item>| -> Undo<Vec<Item>> { nothing_to_undo() },
                async { Ok(()) },
                Callbacks::none(),
            )
            .await;
        assert!(recolor.is_applied());

        tx.send(Err(network_error())).unwrap();
        assert!(matches!(
            rename.as_mut().poll(&mut cx),
            Poll::Ready(UpdateOutcome::RolledBack(_))
        ));
        assert_eq!(labels(state), vec!["a"]);
        assert_eq!(notifier.errors(), vec!["rename failed".to_string()]);
    }

    #[test]
    fn test_sequence_key_separates_operations() {
        let rename = Operation::new("rename", "list:12", "x");
        let recolor = Operation::new("set_color", "list:12", "x");
        assert_eq!(rename.sequence_key(), "rename:list:12");
        assert_ne!(rename.sequence_key(), recolor.sequence_key());
    }

    #[test]
    fn test_sequencer_is_per_key() {
        let seq = Sequencer::default();
        let a1 = seq.issue("list:1");
        let b1 = seq.issue("list:2");
        let a2 = seq.issue("list:1");

        assert!(!seq.is_latest("list:1", a1));
        assert!(seq.is_latest("list:1", a2));
        assert!(seq.is_latest("list:2", b1));
        assert!(seq.is_latest("group:9", 42));
    }
}
