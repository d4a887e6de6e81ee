use super::GatewaySource;
use crate::api::{require_text, ApiError, MenuGateway, ServiceResult};
use crate::models::{
    EntityId, Group, List, ListColor, ListRow, MenuEntry, MenuKind, SyncState, SystemMenuCounts,
};
use crate::optimistic::{
    nothing_to_undo, Callbacks, Collection, OptimisticEngine, Operation, Undo, UpdateOutcome,
};
use crate::tree;
use leptos::prelude::*;
use leptos::task::spawn_local;
use std::future::Future;

pub const GROUP_CREATE_FAILED: &str = "그룹 생성에 실패했습니다";
pub const LIST_CREATE_FAILED: &str = "목록 생성에 실패했습니다";
pub const COLOR_FAILED: &str = "색상 변경에 실패했습니다. 다시 시도해주세요.";
pub const RENAME_FAILED: &str = "이름 변경에 실패했습니다. 다시 시도해주세요.";
pub const DELETE_FAILED: &str = "목록 삭제에 실패했습니다. 다시 시도해주세요.";
pub const DISSOLVE_FAILED: &str = "그룹 해제에 실패했습니다. 다시 시도해주세요.";
pub const MOVE_FAILED: &str = "순서 변경에 실패했습니다. 다시 시도해주세요.";
pub const LOAD_FAILED: &str = "메뉴 데이터를 불러오는데 실패했습니다.";

/// The sidebar tree as an optimistic collection.
///
/// A list carrying a `group_id` lives in that group's children. Ids are only
/// unique per kind, so lookups here are meant for pending ids.
#[derive(Clone, Copy)]
pub struct MenuEntries(pub RwSignal<Vec<MenuEntry>>);

impl Collection<MenuEntry> for MenuEntries {
    fn insert(&self, entity: MenuEntry) {
        self.0.update(|entries| match entity {
            MenuEntry::List(list) if list.group_id.is_some() => {
                let parent = list.group_id.map(EntityId::from);
                match parent.and_then(|id| tree::find_group_mut(entries, &id)) {
                    Some(group) => group.children.push(list),
                    None => {
                        log::warn!("menu: group {:?} not loaded, placing list {} at top level", list.group_id, list.id);
                        entries.push(MenuEntry::List(list));
                    }
                }
            }
            other => entries.push(other),
        });
    }

    fn modify(&self, id: &EntityId, f: impl FnOnce(&mut MenuEntry)) -> bool {
        let mut found = false;
        self.0.update(|entries| {
            if let Some(entry) = entries.iter_mut().find(|e| e.id() == id) {
                f(entry);
                found = true;
                return;
            }
            if let Some(list) = tree::find_list_mut(entries, id) {
                let mut entry = MenuEntry::List(list.clone());
                f(&mut entry);
                match entry {
                    MenuEntry::List(updated) => *list = updated,
                    MenuEntry::Group(g) => log::error!("menu: refusing to nest group {} in a group", g.id),
                }
                found = true;
            }
        });
        found
    }

    fn remove(&self, id: &EntityId) -> bool {
        let mut removed = false;
        self.0.update(|entries| {
            if let Some(i) = entries.iter().position(|e| e.id() == id) {
                entries.remove(i);
                removed = true;
            } else {
                removed = tree::remove_list(entries, id).is_some();
            }
        });
        removed
    }
}

struct CreatePlan<F> {
    op: Operation,
    temp: MenuEntry,
    request: F,
}

type Entries = Vec<MenuEntry>;

struct UpdatePlan<M, F> {
    op: Operation,
    apply: M,
    request: F,
}

fn confirmed_list(row: ListRow) -> MenuEntry {
    MenuEntry::List(List {
        id: row.id.into(),
        label: row.name,
        color: row.color,
        item_count: 0,
        position: None,
        group_id: row.group_id,
        sync: SyncState::Confirmed,
    })
}

/// Sidebar menu state and the optimistic actions on it.
pub struct MenuStore<G> {
    gateway: GatewaySource<G>,
    engine: OptimisticEngine,
    pub entries: RwSignal<Vec<MenuEntry>>,
    pub loading: RwSignal<bool>,
    pub error: RwSignal<Option<String>>,
    pub system_counts: RwSignal<SystemMenuCounts>,
    /// Responses of superseded loads are ignored.
    request_id: RwSignal<u64>,
}

impl<G> Clone for MenuStore<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            engine: self.engine.clone(),
            entries: self.entries,
            loading: self.loading,
            error: self.error,
            system_counts: self.system_counts,
            request_id: self.request_id,
        }
    }
}

impl<G: MenuGateway + 'static> MenuStore<G> {
    pub fn new(gateway: GatewaySource<G>, engine: OptimisticEngine) -> Self {
        Self {
            gateway,
            engine,
            entries: RwSignal::new(Vec::new()),
            loading: RwSignal::new(false),
            error: RwSignal::new(None),
            system_counts: RwSignal::new(SystemMenuCounts::default()),
            request_id: RwSignal::new(0),
        }
    }

    fn collection(&self) -> MenuEntries {
        MenuEntries(self.entries)
    }

    fn has(&self, kind: MenuKind, id: i64) -> bool {
        let id = EntityId::from(id);
        self.entries.with_untracked(|entries| match kind {
            MenuKind::Group => entries.iter().any(|e| e.is(MenuKind::Group, &id)),
            MenuKind::List => entries.iter().any(|e| match e {
                MenuEntry::List(l) => l.id == id,
                MenuEntry::Group(g) => g.children.iter().any(|l| l.id == id),
            }),
        })
    }

    pub fn load(&self) {
        let store = self.clone();
        spawn_local(async move {
            let _ = store.run_load().await;
        });
    }

    pub async fn run_load(&self) -> ServiceResult<()> {
        let request_id = self.request_id.get_untracked() + 1;
        self.request_id.set(request_id);
        self.loading.set(true);
        self.error.set(None);

        let result = (self.gateway)().get_user_menus().await;

        if self.request_id.get_untracked() != request_id {
            log::debug!("load_menus: ignoring superseded response #{request_id}");
            return Ok(());
        }
        self.loading.set(false);

        match result {
            Ok(rows) => {
                self.entries.set(tree::project(&rows));
                Ok(())
            }
            Err(e) => {
                self.error.set(Some(LOAD_FAILED.to_string()));
                self.engine
                    .report(&Operation::new("load_menus", "menus", LOAD_FAILED), &e);
                Err(e)
            }
        }
    }

    pub fn load_system_counts(&self) {
        let store = self.clone();
        spawn_local(async move {
            let _ = store.run_load_system_counts().await;
        });
    }

    /// Count failures only log; the badges keep their last values.
    pub async fn run_load_system_counts(&self) -> ServiceResult<SystemMenuCounts> {
        let counts = (self.gateway)()
            .get_system_menu_counts()
            .await
            .inspect_err(|e| log::warn!("load_system_counts failed: {e}"))?;
        self.system_counts.set(counts);
        Ok(counts)
    }

    fn plan_create_group(
        &self,
        name: &str,
    ) -> ServiceResult<CreatePlan<impl Future<Output = ServiceResult<MenuEntry>> + 'static>> {
        let name = require_text("group name", name)?;
        let temp = MenuEntry::Group(Group {
            id: EntityId::new_pending(),
            label: name.clone(),
            position: None,
            children: Vec::new(),
            sync: SyncState::Temporary,
        });
        let gateway = (self.gateway)();
        Ok(CreatePlan {
            op: Operation::new("create_group", temp.id(), GROUP_CREATE_FAILED),
            temp,
            request: async move {
                let row = gateway.create_group(&name, None).await?;
                Ok(MenuEntry::Group(Group {
                    id: row.id.into(),
                    label: row.name,
                    position: None,
                    children: Vec::new(),
                    sync: SyncState::Confirmed,
                }))
            },
        })
    }

    fn plan_create_list(
        &self,
        name: &str,
        color: Option<ListColor>,
        group_id: Option<i64>,
    ) -> ServiceResult<CreatePlan<impl Future<Output = ServiceResult<MenuEntry>> + 'static>> {
        let name = require_text("list name", name)?;
        let temp = MenuEntry::List(List {
            id: EntityId::new_pending(),
            label: name.clone(),
            color,
            item_count: 0,
            position: None,
            group_id,
            sync: SyncState::Temporary,
        });
        let gateway = (self.gateway)();
        Ok(CreatePlan {
            op: Operation::new("create_list", temp.id(), LIST_CREATE_FAILED),
            temp,
            request: async move {
                let row = gateway.create_list(&name, color, group_id, None).await?;
                Ok(confirmed_list(row))
            },
        })
    }

    fn spawn_create<F>(
        &self,
        plan: ServiceResult<CreatePlan<F>>,
        callbacks: Callbacks<MenuEntry>,
    ) where
        F: Future<Output = ServiceResult<MenuEntry>> + 'static,
    {
        match plan {
            Ok(plan) => self.engine.execute_create(
                plan.op,
                self.collection(),
                plan.temp,
                plan.request,
                callbacks,
            ),
            Err(e) => log::debug!("menu create skipped: {e}"),
        }
    }

    async fn await_create<F>(&self, plan: ServiceResult<CreatePlan<F>>) -> ServiceResult<MenuEntry>
    where
        F: Future<Output = ServiceResult<MenuEntry>>,
    {
        let plan = plan?;
        self.engine
            .run_create(plan.op, self.collection(), plan.temp, plan.request, Callbacks::none())
            .await
    }

    pub fn create_group(&self, name: &str, callbacks: Callbacks<MenuEntry>) {
        self.spawn_create(self.plan_create_group(name), callbacks);
    }

    pub async fn run_create_group(&self, name: &str) -> ServiceResult<MenuEntry> {
        self.await_create(self.plan_create_group(name)).await
    }

    pub fn create_list(
        &self,
        name: &str,
        color: Option<ListColor>,
        group_id: Option<i64>,
        callbacks: Callbacks<MenuEntry>,
    ) {
        self.spawn_create(self.plan_create_list(name, color, group_id), callbacks);
    }

    pub async fn run_create_list(
        &self,
        name: &str,
        color: Option<ListColor>,
        group_id: Option<i64>,
    ) -> ServiceResult<MenuEntry> {
        self.await_create(self.plan_create_list(name, color, group_id))
            .await
    }

    fn spawn_update<M, F>(&self, plan: ServiceResult<UpdatePlan<M, F>>)
    where
        M: FnOnce(&mut Entries) -> Undo<Entries> + 'static,
        F: Future<Output = ServiceResult<()>> + 'static,
    {
        match plan {
            Ok(plan) => self.engine.execute_update(
                plan.op,
                self.entries,
                plan.apply,
                plan.request,
                Callbacks::none(),
            ),
            Err(e) => log::debug!("menu update skipped: {e}"),
        }
    }

    async fn await_update<M, F>(&self, plan: ServiceResult<UpdatePlan<M, F>>) -> UpdateOutcome<()>
    where
        M: FnOnce(&mut Entries) -> Undo<Entries>,
        F: Future<Output = ServiceResult<()>>,
    {
        match plan {
            Ok(plan) => {
                self.engine
                    .run_update(plan.op, self.entries, plan.apply, plan.request, Callbacks::none())
                    .await
            }
            Err(e) => UpdateOutcome::Rejected(e),
        }
    }

    fn require(&self, kind: MenuKind, id: i64) -> ServiceResult<()> {
        if self.has(kind, id) {
            Ok(())
        } else {
            log::error!("menu: {kind} {id} is not loaded");
            Err(ApiError::validation(format!("unknown {kind} {id}")))
        }
    }

    fn plan_rename(
        &self,
        kind: MenuKind,
        id: i64,
        name: &str,
    ) -> ServiceResult<
        UpdatePlan<impl FnOnce(&mut Entries) -> Undo<Entries> + 'static, impl Future<Output = ServiceResult<()>> + 'static>,
    > {
        let name = require_text("name", name)?;
        self.require(kind, id)?;
        let label = name.clone();
        let gateway = (self.gateway)();
        Ok(UpdatePlan {
            op: Operation::new("rename", format!("{kind}:{id}"), RENAME_FAILED),
            apply: move |entries: &mut Entries| -> Undo<Entries> {
                let id = EntityId::from(id);
                let slot = match kind {
                    MenuKind::Group => tree::find_group_mut(entries, &id).map(|g| &mut g.label),
                    MenuKind::List => tree::find_list_mut(entries, &id).map(|l| &mut l.label),
                };
                let Some(slot) = slot else {
                    return nothing_to_undo();
                };
                let before = std::mem::replace(slot, label);
                Box::new(move |entries: &mut Entries| {
                    let slot = match kind {
                        MenuKind::Group => tree::find_group_mut(entries, &id).map(|g| &mut g.label),
                        MenuKind::List => tree::find_list_mut(entries, &id).map(|l| &mut l.label),
                    };
                    if let Some(slot) = slot {
                        *slot = before;
                    }
                })
            },
            request: async move {
                match kind {
                    MenuKind::Group => gateway.update_group_name(id, &name).await.map(|_| ()),
                    MenuKind::List => gateway.update_list_name(id, &name).await.map(|_| ()),
                }
            },
        })
    }

    pub fn rename(&self, kind: MenuKind, id: i64, name: &str) {
        self.spawn_update(self.plan_rename(kind, id, name));
    }

    pub async fn run_rename(&self, kind: MenuKind, id: i64, name: &str) -> UpdateOutcome<()> {
        self.await_update(self.plan_rename(kind, id, name)).await
    }

    fn plan_set_color(
        &self,
        list_id: i64,
        color: ListColor,
    ) -> ServiceResult<
        UpdatePlan<impl FnOnce(&mut Entries) -> Undo<Entries> + 'static, impl Future<Output = ServiceResult<()>> + 'static>,
    > {
        self.require(MenuKind::List, list_id)?;
        let gateway = (self.gateway)();
        Ok(UpdatePlan {
            op: Operation::new("set_color", format!("list:{list_id}"), COLOR_FAILED),
            apply: move |entries: &mut Entries| -> Undo<Entries> {
                let id = EntityId::from(list_id);
                let Some(list) = tree::find_list_mut(entries, &id) else {
                    return nothing_to_undo();
                };
                let before = list.color.replace(color);
                Box::new(move |entries: &mut Entries| {
                    if let Some(list) = tree::find_list_mut(entries, &id) {
                        list.color = before;
                    }
                })
            },
            request: async move { gateway.update_list_color(list_id, color).await.map(|_| ()) },
        })
    }

    pub fn set_color(&self, list_id: i64, color: ListColor) {
        self.spawn_update(self.plan_set_color(list_id, color));
    }

    pub async fn run_set_color(&self, list_id: i64, color: ListColor) -> UpdateOutcome<()> {
        self.await_update(self.plan_set_color(list_id, color)).await
    }

    fn plan_delete_list(
        &self,
        list_id: i64,
    ) -> ServiceResult<
        UpdatePlan<impl FnOnce(&mut Entries) -> Undo<Entries> + 'static, impl Future<Output = ServiceResult<()>> + 'static>,
    > {
        self.require(MenuKind::List, list_id)?;
        let gateway = (self.gateway)();
        Ok(UpdatePlan {
            op: Operation::new("delete_list", format!("list:{list_id}"), DELETE_FAILED),
            apply: move |entries: &mut Entries| -> Undo<Entries> {
                match tree::detach_list(entries, &list_id.into()) {
                    Some((slot, list)) => Box::new(move |entries: &mut Entries| {
                        tree::restore_list(entries, slot, list)
                    }),
                    None => nothing_to_undo(),
                }
            },
            request: async move { gateway.delete_list(list_id).await },
        })
    }

    pub fn delete_list(&self, list_id: i64) {
        self.spawn_update(self.plan_delete_list(list_id));
    }

    pub async fn run_delete_list(&self, list_id: i64) -> UpdateOutcome<()> {
        self.await_update(self.plan_delete_list(list_id)).await
    }

    fn plan_dissolve_group(
        &self,
        group_id: i64,
    ) -> ServiceResult<
        UpdatePlan<impl FnOnce(&mut Entries) -> Undo<Entries> + 'static, impl Future<Output = ServiceResult<()>> + 'static>,
    > {
        self.require(MenuKind::Group, group_id)?;
        let gateway = (self.gateway)();
        Ok(UpdatePlan {
            op: Operation::new("dissolve_group", format!("group:{group_id}"), DISSOLVE_FAILED),
            apply: move |entries: &mut Entries| -> Undo<Entries> {
                let id = EntityId::from(group_id);
                let found = entries.iter().enumerate().find_map(|(i, e)| match e {
                    MenuEntry::Group(g) if g.id == id => Some((i, g.clone())),
                    _ => None,
                });
                let Some((index, group)) = found else {
                    return nothing_to_undo();
                };
                tree::dissolve_group(entries, &id);
                Box::new(move |entries: &mut Entries| tree::restore_group(entries, index, group))
            },
            request: async move {
                let detached = gateway.dissolve_group(group_id).await?;
                log::debug!("dissolve_group: {group_id} detached {detached:?}");
                Ok(())
            },
        })
    }

    pub fn dissolve_group(&self, group_id: i64) {
        self.spawn_update(self.plan_dissolve_group(group_id));
    }

    pub async fn run_dissolve_group(&self, group_id: i64) -> UpdateOutcome<()> {
        self.await_update(self.plan_dissolve_group(group_id)).await
    }

    fn plan_move_entry(
        &self,
        kind: MenuKind,
        id: i64,
        index: usize,
    ) -> ServiceResult<
        UpdatePlan<impl FnOnce(&mut Entries) -> Undo<Entries> + 'static, impl Future<Output = ServiceResult<()>> + 'static>,
    > {
        let entity = EntityId::from(id);
        let top_level = self
            .entries
            .with_untracked(|entries| entries.iter().any(|e| e.is(kind, &entity)));
        if !top_level {
            return Err(ApiError::validation(format!("{kind} {id} is not a top-level entry")));
        }
        let gateway = (self.gateway)();
        Ok(UpdatePlan {
            op: Operation::new("move_entry", format!("{kind}:{id}"), MOVE_FAILED),
            apply: move |entries: &mut Entries| -> Undo<Entries> {
                let Some(from) = entries.iter().position(|e| e.is(kind, &entity)) else {
                    return nothing_to_undo();
                };
                tree::move_entry(entries, kind, &entity, index);
                Box::new(move |entries: &mut Entries| {
                    tree::move_entry(entries, kind, &entity, from);
                })
            },
            request: async move { gateway.move_menu_item(kind, id, index).await },
        })
    }

    /// Moves a top-level entry to `index`.
    pub fn move_entry(&self, kind: MenuKind, id: i64, index: usize) {
        self.spawn_update(self.plan_move_entry(kind, id, index));
    }

    pub async fn run_move_entry(&self, kind: MenuKind, id: i64, index: usize) -> UpdateOutcome<()> {
        self.await_update(self.plan_move_entry(kind, id, index)).await
    }
}
