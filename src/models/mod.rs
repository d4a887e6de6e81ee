use crate::optimistic::OptimisticEntity;
use crate::recurrence::RepeatConfig;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a row that may not exist on the backend yet.
///
/// Serialized untagged: confirmed ids are plain numbers, pending ids are
/// UUID strings generated on the client.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum EntityId {
    Confirmed(i64),
    Pending(Uuid),
}

impl EntityId {
    pub fn new_pending() -> Self {
        EntityId::Pending(Uuid::new_v4())
    }

    pub fn confirmed(&self) -> Option<i64> {
        match self {
            EntityId::Confirmed(id) => Some(*id),
            EntityId::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, EntityId::Pending(_))
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Confirmed(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Confirmed(id) => write!(f, "{id}"),
            EntityId::Pending(uuid) => write!(f, "temp-{uuid}"),
        }
    }
}

/// Where an optimistically created entity is in its lifecycle.
///
/// `Temporary -> Pending -> Confirmed`, or removed on failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    /// Rendered locally, request not started.
    Temporary,
    /// Request in flight.
    Pending,
    #[default]
    Confirmed,
}

impl SyncState {
    pub fn is_temporary(self) -> bool {
        !matches!(self, SyncState::Confirmed)
    }

    pub fn is_pending(self) -> bool {
        matches!(self, SyncState::Pending)
    }
}

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ListColor {
    Slate,
    Gray,
    Zinc,
    Neutral,
    Stone,
    Red,
    Orange,
    Amber,
    Yellow,
    Lime,
    Green,
    Emerald,
    Teal,
    Cyan,
    Sky,
    Blue,
    Indigo,
    Violet,
    Purple,
    Fuchsia,
    Pink,
    Rose,
}

#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MenuKind {
    Group,
    List,
}

#[derive(Clone, Debug, PartialEq)]
pub struct List {
    pub id: EntityId,
    pub label: String,
    pub color: Option<ListColor>,
    pub item_count: u32,
    pub position: Option<String>,
    /// Owning group, if the list lives inside one.
    pub group_id: Option<i64>,
    pub sync: SyncState,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub id: EntityId,
    pub label: String,
    pub position: Option<String>,
    pub children: Vec<List>,
    pub sync: SyncState,
}

/// A sidebar entry. Groups only ever contain lists, so the tree is at most
/// two levels deep.
#[derive(Clone, Debug, PartialEq)]
pub enum MenuEntry {
    Group(Group),
    List(List),
}

impl MenuEntry {
    pub fn id(&self) -> &EntityId {
        match self {
            MenuEntry::Group(g) => &g.id,
            MenuEntry::List(l) => &l.id,
        }
    }

    pub fn kind(&self) -> MenuKind {
        match self {
            MenuEntry::Group(_) => MenuKind::Group,
            MenuEntry::List(_) => MenuKind::List,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            MenuEntry::Group(g) => &g.label,
            MenuEntry::List(l) => &l.label,
        }
    }

    pub fn is(&self, kind: MenuKind, id: &EntityId) -> bool {
        self.kind() == kind && self.id() == id
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            MenuEntry::Group(g) => Some(g),
            MenuEntry::List(_) => None,
        }
    }
}

impl OptimisticEntity for MenuEntry {
    fn entity_id(&self) -> &EntityId {
        self.id()
    }

    fn sync_state(&self) -> SyncState {
        match self {
            MenuEntry::Group(g) => g.sync,
            MenuEntry::List(l) => l.sync,
        }
    }

    fn set_sync_state(&mut self, sync: SyncState) {
        match self {
            MenuEntry::Group(g) => g.sync = sync,
            MenuEntry::List(l) => l.sync = sync,
        }
    }
}

/// One row of `get_user_menus_with_positions`, already in position order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MenuRow {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MenuKind,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub item_count: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ListRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub color: Option<ListColor>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub is_system: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemMenuCounts {
    #[serde(default)]
    pub today: u32,
    #[serde(default)]
    pub important: u32,
    #[serde(default)]
    pub tasks: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TodoItem {
    pub id: EntityId,
    pub list_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_important: bool,
    /// Sort key, unique within `list_id`.
    pub position: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// "My day" membership for the given calendar date.
    #[serde(default, rename = "added_to_my_day_date")]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub recurrence_id: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Derived from the active recurrence rule; never written back.
    #[serde(skip)]
    pub repeat_config: Option<RepeatConfig>,
    #[serde(skip)]
    pub sync: SyncState,
}

impl OptimisticEntity for TodoItem {
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

/// Authenticated backend session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_entity_id_serde_is_untagged() {
        let confirmed: EntityId = serde_json::from_str("42").expect("number id");
        assert_eq!(confirmed, EntityId::Confirmed(42));

        let pending = EntityId::new_pending();
        let json = serde_json::to_string(&pending).expect("serialize");
        let back: EntityId = serde_json::from_str(&json).expect("uuid id");
        assert_eq!(back, pending);
        assert!(back.is_pending());
        assert_eq!(back.confirmed(), None);
    }

    #[test]
    fn test_pending_ids_are_unique() {
        assert_ne!(EntityId::new_pending(), EntityId::new_pending());
    }

    #[test]
    fn test_sync_state_flags() {
        assert!(SyncState::Temporary.is_temporary());
        assert!(!SyncState::Temporary.is_pending());
        assert!(SyncState::Pending.is_temporary());
        assert!(SyncState::Pending.is_pending());
        assert!(!SyncState::Confirmed.is_temporary());
        assert!(!SyncState::Confirmed.is_pending());
    }

    #[test]
    fn test_list_color_names() {
        assert_eq!(ListColor::iter().count(), 22);
        assert_eq!(ListColor::from_str("emerald"), Ok(ListColor::Emerald));
        assert_eq!(ListColor::Fuchsia.to_string(), "fuchsia");
        assert!(ListColor::from_str("mauve").is_err());
    }

    #[test]
    fn test_menu_row_contract_deserialize() {
        let json = r#"[
            {"id": 1, "name": "Work", "type": "group", "position": "a0"},
            {"id": 7, "name": "Frontend", "type": "list", "color": "purple",
             "position": "a1", "parent_id": 1, "item_count": 2}
        ]"#;
        let rows: Vec<MenuRow> = serde_json::from_str(json).expect("rows should parse");
        assert_eq!(rows[0].kind, MenuKind::Group);
        assert_eq!(rows[0].parent_id, None);
        assert_eq!(rows[1].kind, MenuKind::List);
        assert_eq!(rows[1].parent_id, Some(1));
        assert_eq!(rows[1].item_count, Some(2));
    }

    #[test]
    fn test_todo_item_contract_deserialize() {
        let json = r#"{
            "id": 10,
            "user_id": "u-1",
            "list_id": 3,
            "title": "Buy milk",
            "description": null,
            "is_completed": true,
            "is_important": false,
            "position": "a0V",
            "due_date": "2026-10-20",
            "added_to_my_day_date": "2026-10-16",
            "recurrence_id": null,
            "completed_at": "2026-10-16T09:30:00+00:00",
            "created_at": "2026-10-01T00:00:00+00:00"
        }"#;
        let item: TodoItem = serde_json::from_str(json).expect("todo row should parse");
        assert_eq!(item.id, EntityId::Confirmed(10));
        assert_eq!(item.position, "a0V");
        assert_eq!(item.scheduled_date, NaiveDate::from_ymd_opt(2026, 10, 16));
        assert!(item.completed_at.is_some());
        assert_eq!(item.sync, SyncState::Confirmed);
        assert!(item.repeat_config.is_none());
    }
}
