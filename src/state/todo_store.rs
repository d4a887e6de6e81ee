use super::GatewaySource;
use crate::api::todo::preview_position;
use crate::api::{require_text, ApiError, MoveTarget, NewTodo, ServiceResult, TodoGateway, TodoPatch};
use crate::models::{EntityId, SyncState, TodoItem};
use crate::optimistic::{
    nothing_to_undo, Callbacks, Collection, OptimisticEngine, Operation, Undo, UpdateOutcome,
};
use crate::position::START_KEY;
use crate::recurrence::RepeatConfig;
use crate::storage::save_last_list_id;
use crate::toast::{Notifier, ToastKind};
use crate::util::today;
use chrono::NaiveDate;
use leptos::prelude::*;
use leptos::task::spawn_local;
use std::future::Future;

pub const LOAD_FAILED: &str = "할 일 목록을 불러올 수 없습니다.";
pub const CREATED: &str = "할 일이 추가되었습니다";
pub const CREATE_FAILED: &str = "할 일 추가에 실패했습니다";
pub const DUPLICATE_FAILED: &str = "할 일 복제에 실패했습니다";
pub const TOGGLE_FAILED: &str = "상태 변경에 실패했습니다";
pub const IMPORTANT_FAILED: &str = "중요도 변경에 실패했습니다";
pub const UPDATE_FAILED: &str = "수정에 실패했습니다";
pub const TITLE_REQUIRED: &str = "제목을 입력해주세요";
pub const MOVE_FAILED: &str = "순서 변경에 실패했습니다";
pub const DELETED: &str = "할 일이 삭제되었습니다";
pub const DELETE_FAILED: &str = "삭제에 실패했습니다";

type Items = Vec<TodoItem>;

fn sort_by_position(items: &mut [TodoItem]) {
    items.sort_by(|a, b| a.position.cmp(&b.position));
}

fn find(items: &[TodoItem], id: &EntityId) -> Option<usize> {
    items.iter().position(|i| i.id == *id)
}

/// Items of the open list (or system view) in position order.
pub struct TodoStore<G> {
    gateway: GatewaySource<G>,
    engine: OptimisticEngine,
    pub items: RwSignal<Vec<TodoItem>>,
    /// `None` for the today and important views.
    pub list_id: RwSignal<Option<i64>>,
    pub loading: RwSignal<bool>,
    pub error: RwSignal<Option<String>>,
    request_id: RwSignal<u64>,
}

impl<G> Clone for TodoStore<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            engine: self.engine.clone(),
            items: self.items,
            list_id: self.list_id,
            loading: self.loading,
            error: self.error,
            request_id: self.request_id,
        }
    }
}

impl<G: TodoGateway + 'static> TodoStore<G> {
    pub fn new(gateway: GatewaySource<G>, engine: OptimisticEngine) -> Self {
        Self {
            gateway,
            engine,
            items: RwSignal::new(Vec::new()),
            list_id: RwSignal::new(None),
            loading: RwSignal::new(false),
            error: RwSignal::new(None),
            request_id: RwSignal::new(0),
        }
    }

    fn item(&self, item_id: i64) -> Option<TodoItem> {
        let id = EntityId::from(item_id);
        self.items
            .with_untracked(|items| items.iter().find(|i| i.id == id).cloned())
    }

    fn require_item(&self, item_id: i64) -> ServiceResult<TodoItem> {
        self.item(item_id).ok_or_else(|| {
            log::error!("todo: item {item_id} is not loaded");
            ApiError::validation(format!("unknown todo item {item_id}"))
        })
    }

    /// Position just past the last loaded item.
    fn tail_position(&self) -> String {
        let last = self
            .items
            .with_untracked(|items| items.iter().map(|i| i.position.clone()).max());
        preview_position(last.as_deref(), None).unwrap_or_else(|e| {
            log::warn!("todo: cannot place after {last:?}: {e}");
            START_KEY.to_string()
        })
    }

    async fn run_fetch<F>(&self, list_id: Option<i64>, request: F) -> ServiceResult<()>
    where
        F: Future<Output = ServiceResult<Vec<TodoItem>>>,
    {
        let request_id = self.request_id.get_untracked() + 1;
        self.request_id.set(request_id);
        self.list_id.set(list_id);
        self.loading.set(true);
        self.error.set(None);

        let result = request.await;

        if self.request_id.get_untracked() != request_id {
            log::debug!("load_items: ignoring superseded response #{request_id}");
            return Ok(());
        }
        self.loading.set(false);

        match result {
            Ok(items) => {
                self.items.set(items);
                Ok(())
            }
            Err(e) => {
                log::error!("load_items failed for list {list_id:?}: {e}");
                self.error.set(Some(LOAD_FAILED.to_string()));
                Err(e)
            }
        }
    }

    pub fn load(&self, list_id: i64) {
        let store = self.clone();
        spawn_local(async move {
            let _ = store.run_load(list_id).await;
        });
    }

    /// Also remembers the list for the next visit.
    pub async fn run_load(&self, list_id: i64) -> ServiceResult<()> {
        save_last_list_id(list_id);
        let gateway = (self.gateway)();
        self.run_fetch(Some(list_id), async move { gateway.get_todo_items(list_id).await })
            .await
    }

    pub fn load_today(&self) {
        let store = self.clone();
        spawn_local(async move {
            let _ = store.run_load_today().await;
        });
    }

    pub async fn run_load_today(&self) -> ServiceResult<()> {
        let gateway = (self.gateway)();
        self.run_fetch(None, async move { gateway.get_today_items(today()).await })
            .await
    }

    pub fn load_important(&self) {
        let store = self.clone();
        spawn_local(async move {
            let _ = store.run_load_important().await;
        });
    }

    pub async fn run_load_important(&self) -> ServiceResult<()> {
        let gateway = (self.gateway)();
        self.run_fetch(None, async move { gateway.get_important_items().await })
            .await
    }

    pub fn create(&self, title: &str) {
        let store = self.clone();
        let title = title.to_string();
        spawn_local(async move {
            let _ = store.run_create(&title).await;
        });
    }

    /// Appends a new item to the open list.
    pub async fn run_create(&self, title: &str) -> ServiceResult<TodoItem> {
        let title = require_text("title", title)?;
        let list_id = self
            .list_id
            .get_untracked()
            .ok_or_else(|| ApiError::validation("no list is open"))?;

        let temp = TodoItem {
            id: EntityId::new_pending(),
            list_id,
            title: title.clone(),
            description: None,
            is_completed: false,
            is_important: false,
            position: self.tail_position(),
            due_date: None,
            scheduled_date: None,
            recurrence_id: None,
            completed_at: None,
            repeat_config: None,
            sync: SyncState::Temporary,
        };
        let new = NewTodo {
            list_id,
            title,
            ..Default::default()
        };
        let gateway = (self.gateway)();
        let notifier = self.engine.notifier();

        self.engine
            .run_create(
                Operation::new("create_item", temp.id, CREATE_FAILED),
                self.items,
                temp,
                async move { gateway.create_todo_item(&new).await },
                Callbacks::none().on_success(move |_| notifier.notify(ToastKind::Success, CREATED)),
            )
            .await
    }

    pub fn duplicate(&self, item_id: i64) {
        let store = self.clone();
        spawn_local(async move {
            let _ = store.run_duplicate(item_id).await;
        });
    }

    pub async fn run_duplicate(&self, item_id: i64) -> ServiceResult<TodoItem> {
        let original = self.require_item(item_id)?;
        let temp = TodoItem {
            id: EntityId::new_pending(),
            title: format!("{}{}", original.title, crate::api::todo::COPY_SUFFIX),
            is_completed: false,
            is_important: false,
            position: self.tail_position(),
            due_date: None,
            scheduled_date: None,
            recurrence_id: None,
            completed_at: None,
            repeat_config: None,
            sync: SyncState::Temporary,
            ..original
        };
        let gateway = (self.gateway)();

        self.engine
            .run_create(
                Operation::new("duplicate_item", temp.id, DUPLICATE_FAILED),
                self.items,
                temp,
                async move { gateway.duplicate_todo_item(item_id).await },
                Callbacks::none(),
            )
            .await
    }

    /// Positions only order items within one list, so the today and
    /// important views keep the order they were loaded in.
    fn reorder(&self) -> bool {
        self.list_id.get_untracked().is_some()
    }

    /// Applies `local` right away and swaps in the server's copy on success.
    /// A failure puts back only the fields `local` touched.
    async fn run_item_update<F>(
        &self,
        op: Operation,
        item_id: i64,
        local: TodoPatch,
        request: F,
    ) -> UpdateOutcome<TodoItem>
    where
        F: Future<Output = ServiceResult<TodoItem>>,
    {
        let id = EntityId::from(item_id);
        let reorder = self.reorder();
        let outcome = self
            .engine
            .run_update(
                op,
                self.items,
                move |items: &mut Items| -> Undo<Items> {
                    let Some(at) = find(items, &id) else {
                        return nothing_to_undo();
                    };
                    let before = items[at].clone();
                    local.apply_to(&mut items[at]);
                    if reorder {
                        sort_by_position(items);
                    }
                    Box::new(move |items: &mut Items| {
                        if let Some(at) = find(items, &id) {
                            local.revert(&mut items[at], &before);
                            if reorder {
                                sort_by_position(items);
                            }
                        }
                    })
                },
                request,
                Callbacks::none(),
            )
            .await;

        if let UpdateOutcome::Applied(server) = &outcome {
            if Collection::replace(&self.items, &id, server.clone()) && reorder {
                self.items.update(|items| sort_by_position(items));
            }
        }
        outcome
    }

    async fn run_patch(
        &self,
        name: &'static str,
        item_id: i64,
        patch: TodoPatch,
        error_message: &str,
    ) -> UpdateOutcome<TodoItem> {
        if let Err(e) = self.require_item(item_id) {
            return UpdateOutcome::Rejected(e);
        }
        let gateway = (self.gateway)();
        let local = patch.clone();
        self.run_item_update(
            Operation::new(name, format!("todo:{item_id}"), error_message),
            item_id,
            local,
            async move { gateway.update_todo_item(item_id, &patch).await },
        )
        .await
    }

    pub fn toggle_completed(&self, item_id: i64) {
        let store = self.clone();
        spawn_local(async move {
            store.run_toggle_completed(item_id).await;
        });
    }

    /// Completing a recurring item reloads the list to pick up the next
    /// occurrence.
    pub async fn run_toggle_completed(&self, item_id: i64) -> UpdateOutcome<TodoItem> {
        let item = match self.require_item(item_id) {
            Ok(item) => item,
            Err(e) => return UpdateOutcome::Rejected(e),
        };
        let completed = !item.is_completed;
        let gateway = (self.gateway)();

        let outcome = self
            .run_item_update(
                Operation::new("toggle_completed", format!("todo:{item_id}"), TOGGLE_FAILED),
                item_id,
                TodoPatch {
                    is_completed: Some(completed),
                    ..Default::default()
                },
                async move { gateway.toggle_completion(item_id, completed).await },
            )
            .await;

        if let UpdateOutcome::Applied(server) = &outcome {
            if completed && server.recurrence_id.is_some() {
                if let Some(list_id) = self.list_id.get_untracked() {
                    let _ = self.run_load(list_id).await;
                }
            }
        }
        outcome
    }

    pub fn toggle_important(&self, item_id: i64) {
        let store = self.clone();
        spawn_local(async move {
            store.run_toggle_important(item_id).await;
        });
    }

    pub async fn run_toggle_important(&self, item_id: i64) -> UpdateOutcome<TodoItem> {
        let important = match self.require_item(item_id) {
            Ok(item) => !item.is_important,
            Err(e) => return UpdateOutcome::Rejected(e),
        };
        self.run_patch(
            "toggle_important",
            item_id,
            TodoPatch {
                is_important: Some(important),
                ..Default::default()
            },
            IMPORTANT_FAILED,
        )
        .await
    }

    pub fn rename(&self, item_id: i64, title: &str) {
        let store = self.clone();
        let title = title.to_string();
        spawn_local(async move {
            store.run_rename(item_id, &title).await;
        });
    }

    /// A blank title is refused with a toast and never sent.
    pub async fn run_rename(&self, item_id: i64, title: &str) -> UpdateOutcome<TodoItem> {
        let title = match require_text("title", title) {
            Ok(title) => title,
            Err(e) => {
                self.engine.notifier().error(TITLE_REQUIRED);
                return UpdateOutcome::Rejected(e);
            }
        };
        self.run_patch(
            "rename_item",
            item_id,
            TodoPatch {
                title: Some(title),
                ..Default::default()
            },
            UPDATE_FAILED,
        )
        .await
    }

    pub fn set_description(&self, item_id: i64, description: &str) {
        let store = self.clone();
        let description = description.to_string();
        spawn_local(async move {
            store.run_set_description(item_id, &description).await;
        });
    }

    /// Blank text clears the description.
    pub async fn run_set_description(&self, item_id: i64, description: &str) -> UpdateOutcome<TodoItem> {
        let description = Some(description.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        self.run_patch(
            "set_description",
            item_id,
            TodoPatch {
                description: Some(description),
                ..Default::default()
            },
            UPDATE_FAILED,
        )
        .await
    }

    pub fn set_due_date(&self, item_id: i64, due_date: Option<NaiveDate>) {
        let store = self.clone();
        spawn_local(async move {
            store.run_set_due_date(item_id, due_date).await;
        });
    }

    pub async fn run_set_due_date(&self, item_id: i64, due_date: Option<NaiveDate>) -> UpdateOutcome<TodoItem> {
        self.run_patch(
            "set_due_date",
            item_id,
            TodoPatch {
                due_date: Some(due_date),
                ..Default::default()
            },
            UPDATE_FAILED,
        )
        .await
    }

    pub fn set_my_day(&self, item_id: i64, on: bool) {
        let store = self.clone();
        spawn_local(async move {
            store.run_set_my_day(item_id, on).await;
        });
    }

    /// Adds the item to today's "my day", or takes it out.
    pub async fn run_set_my_day(&self, item_id: i64, on: bool) -> UpdateOutcome<TodoItem> {
        self.run_patch(
            "set_my_day",
            item_id,
            TodoPatch {
                scheduled_date: Some(on.then(today)),
                ..Default::default()
            },
            UPDATE_FAILED,
        )
        .await
    }

    pub fn set_repeat(&self, item_id: i64, config: RepeatConfig) {
        let store = self.clone();
        spawn_local(async move {
            store.run_set_repeat(item_id, config).await;
        });
    }

    /// A `none` config stops the item from repeating.
    pub async fn run_set_repeat(&self, item_id: i64, config: RepeatConfig) -> UpdateOutcome<TodoItem> {
        self.run_patch(
            "set_repeat",
            item_id,
            TodoPatch {
                repeat: Some(config),
                ..Default::default()
            },
            UPDATE_FAILED,
        )
        .await
    }

    pub fn delete(&self, item_id: i64) {
        let store = self.clone();
        spawn_local(async move {
            store.run_delete(item_id).await;
        });
    }

    /// Recurring items leave a `deleted` exception behind so the series
    /// skips that date.
    pub async fn run_delete(&self, item_id: i64) -> UpdateOutcome<()> {
        let item = match self.require_item(item_id) {
            Ok(item) => item,
            Err(e) => return UpdateOutcome::Rejected(e),
        };
        let recurring = item.recurrence_id.is_some();
        let gateway = (self.gateway)();
        let notifier = self.engine.notifier();

        self.engine
            .run_update(
                Operation::new("delete_item", format!("todo:{item_id}"), DELETE_FAILED),
                self.items,
                move |items: &mut Items| -> Undo<Items> {
                    let Some(at) = find(items, &item.id) else {
                        return nothing_to_undo();
                    };
                    let removed = items.remove(at);
                    Box::new(move |items: &mut Items| {
                        if find(items, &removed.id).is_none() {
                            items.insert(at.min(items.len()), removed);
                        }
                    })
                },
                async move {
                    if recurring {
                        gateway.delete_recurring_instance(item_id).await
                    } else {
                        gateway.delete_todo_item(item_id).await
                    }
                },
                Callbacks::none().on_success(move |_| notifier.notify(ToastKind::Success, DELETED)),
            )
            .await
    }

    pub fn move_between(&self, item_id: i64, above: Option<i64>, below: Option<i64>) {
        let store = self.clone();
        spawn_local(async move {
            store.run_move_between(item_id, above, below).await;
        });
    }

    /// Drops the item between `above` and `below`. The list is reordered
    /// with a locally computed position; the server assigns the final one.
    pub async fn run_move_between(
        &self,
        item_id: i64,
        above: Option<i64>,
        below: Option<i64>,
    ) -> UpdateOutcome<TodoItem> {
        let neighbour = |id: Option<i64>| -> ServiceResult<Option<String>> {
            id.map(|id| self.require_item(id).map(|i| i.position))
                .transpose()
        };
        let preview = self.require_item(item_id).and_then(|_| {
            let above_pos = neighbour(above)?;
            let below_pos = neighbour(below)?;
            let target = MoveTarget::Between {
                after: above,
                before: below,
            };
            if above.is_none() && below.is_none() {
                return Err(ApiError::validation("a move needs a neighbouring item"));
            }
            preview_position(above_pos.as_deref(), below_pos.as_deref()).map(|p| (p, target))
        });
        let (position, target) = match preview {
            Ok(preview) => preview,
            Err(e) => return UpdateOutcome::Rejected(e),
        };
        log::debug!("move_between: todo {item_id} previewed at {position}");

        let gateway = (self.gateway)();
        self.run_item_update(
            Operation::new("move_item", format!("todo:{item_id}"), MOVE_FAILED),
            item_id,
            TodoPatch {
                position: Some(position),
                ..Default::default()
            },
            async move { gateway.move_todo_item(item_id, &target).await },
        )
        .await
    }
}
