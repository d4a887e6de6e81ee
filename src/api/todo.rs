use super::recurrence::RecurrenceGateway;
use super::{eq, require_text, ApiClient, ApiError, ApiErrorKind, ServiceResult};
use crate::models::TodoItem;
use crate::position::{generate_key_between, validate_key};
use crate::recurrence::{to_config, ExceptionType, RepeatConfig};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const ITEMS: &str = "todo_items";

/// Suffix appended to the title of a duplicated item.
pub const COPY_SUFFIX: &str = " 복사본";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewTodo {
    pub list_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub scheduled_date: Option<NaiveDate>,
    pub is_important: bool,
    pub repeat: Option<RepeatConfig>,
}

/// Partial update. `None` leaves a field alone; `Some(None)` clears it.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_important: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(
        rename = "added_to_my_day_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduled_date: Option<Option<NaiveDate>>,
    /// Handled through the recurrence table; a `none` config stops repeating.
    #[serde(skip)]
    pub repeat: Option<RepeatConfig>,
}

impl TodoPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the local part of the patch to `item`.
    pub fn apply_to(&self, item: &mut TodoItem) {
        if let Some(title) = &self.title {
            item.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            item.description = description.clone();
        }
        if let Some(done) = self.is_completed {
            item.is_completed = done;
            item.completed_at = done.then(Utc::now);
        }
        if let Some(important) = self.is_important {
            item.is_important = important;
        }
        if let Some(position) = &self.position {
            item.position = position.clone();
        }
        if let Some(due) = self.due_date {
            item.due_date = due;
        }
        if let Some(scheduled) = self.scheduled_date {
            item.scheduled_date = scheduled;
        }
        if let Some(repeat) = &self.repeat {
            item.repeat_config = (!repeat.is_none()).then(|| repeat.clone());
        }
    }

    /// Puts back the fields this patch touches as they were in `before`.
    /// Fields outside the patch keep whatever they hold now.
    pub fn revert(&self, item: &mut TodoItem, before: &TodoItem) {
        if self.title.is_some() {
            item.title = before.title.clone();
        }
        if self.description.is_some() {
            item.description = before.description.clone();
        }
        if self.is_completed.is_some() {
            item.is_completed = before.is_completed;
            item.completed_at = before.completed_at;
        }
        if self.is_important.is_some() {
            item.is_important = before.is_important;
        }
        if self.position.is_some() {
            item.position = before.position.clone();
        }
        if self.due_date.is_some() {
            item.due_date = before.due_date;
        }
        if self.scheduled_date.is_some() {
            item.scheduled_date = before.scheduled_date;
        }
        if self.repeat.is_some() {
            item.repeat_config = before.repeat_config.clone();
        }
    }
}

/// Where a moved item should land.
#[derive(Clone, Debug, PartialEq)]
pub enum MoveTarget {
    Position(String),
    /// `after` is the item directly above the destination, `before` the one
    /// directly below. At least one must be given.
    Between {
        after: Option<i64>,
        before: Option<i64>,
    },
}

#[derive(Serialize, Debug, PartialEq)]
struct MoveRequest {
    item_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    before_item_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after_item_id: Option<i64>,
}

fn move_request(item_id: i64, target: &MoveTarget) -> ServiceResult<MoveRequest> {
    match target {
        MoveTarget::Position(position) => {
            validate_key(position).map_err(|e| ApiError::validation(e.to_string()))?;
            Ok(MoveRequest {
                item_id,
                target_position: Some(position.clone()),
                before_item_id: None,
                after_item_id: None,
            })
        }
        MoveTarget::Between {
            after: None,
            before: None,
        } => Err(ApiError::validation(
            "a move needs a target position or a neighbouring item",
        )),
        MoveTarget::Between { after, before } => Ok(MoveRequest {
            item_id,
            target_position: None,
            before_item_id: *before,
            after_item_id: *after,
        }),
    }
}

/// Column updates for `patch`. Empty when only the repeat rule changes.
fn patch_fields(patch: &TodoPatch) -> ServiceResult<Map<String, Value>> {
    let Value::Object(mut fields) = serde_json::to_value(patch).map_err(ApiError::parse)? else {
        return Err(ApiError::parse("patch did not serialize to an object"));
    };
    if let Some(done) = patch.is_completed {
        fields.insert(
            "completed_at".to_string(),
            if done { json!(Utc::now()) } else { json!(null) },
        );
    }
    Ok(fields)
}

#[async_trait(?Send)]
pub trait TodoGateway {
    /// Appends the item at the end of its list.
    async fn create_todo_item(&self, new: &NewTodo) -> ServiceResult<TodoItem>;
    /// Ordered by position, with `repeat_config` filled from active rules.
    async fn get_todo_items(&self, list_id: i64) -> ServiceResult<Vec<TodoItem>>;
    async fn update_todo_item(&self, item_id: i64, patch: &TodoPatch) -> ServiceResult<TodoItem>;
    async fn delete_todo_item(&self, item_id: i64) -> ServiceResult<()>;
    async fn duplicate_todo_item(&self, item_id: i64) -> ServiceResult<TodoItem>;
    /// Completing a recurring item also asks the server for the next one.
    async fn toggle_completion(&self, item_id: i64, completed: bool) -> ServiceResult<TodoItem>;
    /// Records a `deleted` exception for the item's date before deleting it.
    async fn delete_recurring_instance(&self, item_id: i64) -> ServiceResult<()>;
    async fn move_todo_item(&self, item_id: i64, target: &MoveTarget) -> ServiceResult<TodoItem>;
    async fn get_today_items(&self, today: NaiveDate) -> ServiceResult<Vec<TodoItem>>;
    async fn get_important_items(&self) -> ServiceResult<Vec<TodoItem>>;
}

#[derive(Deserialize)]
struct PositionRow {
    position: String,
}

#[derive(Deserialize)]
struct RecurrenceRef {
    recurrence_id: Option<i64>,
    #[serde(default)]
    due_date: Option<NaiveDate>,
}

impl ApiClient {
    async fn last_position(&self, user_id: &str, list_id: i64) -> ServiceResult<Option<String>> {
        let row: Option<PositionRow> = self
            .select_maybe(
                ITEMS,
                &[
                    ("user_id", eq(user_id)),
                    ("list_id", eq(list_id)),
                    ("select", "position".to_string()),
                    ("order", "position.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(row.map(|r| r.position))
    }

    /// Server-assigned position after `last`; computed locally if the RPC
    /// is unavailable.
    async fn next_position(&self, last: Option<&str>) -> ServiceResult<String> {
        match self
            .rpc::<String>(
                "generate_position_between",
                &json!({ "p_before": last, "p_after": null }),
            )
            .await
        {
            Ok(position) => Ok(position),
            Err(e) if e.kind == ApiErrorKind::Unauthorized => Err(e),
            Err(e) => {
                log::warn!("generate_position_between failed, allocating locally: {e}");
                generate_key_between(last, None).map_err(ApiError::parse)
            }
        }
    }

    async fn enrich(&self, mut items: Vec<TodoItem>) -> Vec<TodoItem> {
        let mut ids: Vec<i64> = items.iter().filter_map(|i| i.recurrence_id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return items;
        }

        let configs: HashMap<i64, RepeatConfig> = match self.get_active_rules(&ids).await {
            Ok(rules) => rules
                .iter()
                .filter_map(|r| r.id.map(|id| (id, to_config(r))))
                .collect(),
            Err(e) => {
                log::warn!("enrich: could not load recurrence rules {ids:?}: {e}");
                return items;
            }
        };
        for item in &mut items {
            item.repeat_config = item.recurrence_id.and_then(|id| configs.get(&id).cloned());
        }
        items
    }

    async fn list_items(&self, filters: &[super::Filter]) -> ServiceResult<Vec<TodoItem>> {
        let items: Vec<TodoItem> = self.select(ITEMS, filters).await?;
        Ok(self.enrich(items).await)
    }
}

#[async_trait(?Send)]
impl TodoGateway for ApiClient {
    async fn create_todo_item(&self, new: &NewTodo) -> ServiceResult<TodoItem> {
        let title = require_text("title", &new.title)?;
        let user_id = self.user_id()?;

        let repeat = new.repeat.as_ref().filter(|r| !r.is_none());
        let recurrence_id = match repeat {
            Some(config) => self.create_rule(config).await?.id,
            None => None,
        };

        let inserted = async {
            let last = self.last_position(user_id, new.list_id).await?;
            let position = self.next_position(last.as_deref()).await?;
            let body = json!({
                "user_id": user_id,
                "list_id": new.list_id,
                "title": title,
                "description": new.description,
                "is_important": new.is_important,
                "is_completed": false,
                "due_date": new.due_date,
                "added_to_my_day_date": new.scheduled_date,
                "position": position,
                "recurrence_id": recurrence_id,
            });
            self.insert_one::<TodoItem>(ITEMS, &body).await
        }
        .await;

        match inserted {
            Ok(mut item) => {
                item.repeat_config = repeat.cloned();
                log::debug!("create_todo_item: {} at {} in list {}", item.id, item.position, item.list_id);
                Ok(item)
            }
            Err(e) => {
                if let Some(rule_id) = recurrence_id {
                    if let Err(cleanup) = self.delete_rule(rule_id).await {
                        log::warn!("create_todo_item: orphaned recurrence rule {rule_id}: {cleanup}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn get_todo_items(&self, list_id: i64) -> ServiceResult<Vec<TodoItem>> {
        let user_id = self.user_id()?;
        self.list_items(&[
            ("user_id", eq(user_id)),
            ("list_id", eq(list_id)),
            ("select", "*".to_string()),
            ("order", "position.asc".to_string()),
        ])
        .await
    }

    async fn update_todo_item(&self, item_id: i64, patch: &TodoPatch) -> ServiceResult<TodoItem> {
        if patch.is_empty() {
            return Err(ApiError::validation("nothing to update"));
        }
        let mut patch = patch.clone();
        if let Some(title) = &patch.title {
            patch.title = Some(require_text("title", title)?);
        }
        if let Some(position) = &patch.position {
            validate_key(position).map_err(|e| ApiError::validation(e.to_string()))?;
        }
        let user_id = self.user_id()?;
        let row_filter = [("id", eq(item_id)), ("user_id", eq(user_id))];

        let mut fields = patch_fields(&patch)?;
        let mut created_rule = None;

        if let Some(repeat) = &patch.repeat {
            let existing: RecurrenceRef = self
                .select_one(
                    ITEMS,
                    &[
                        row_filter[0].clone(),
                        row_filter[1].clone(),
                        ("select", "recurrence_id".to_string()),
                    ],
                )
                .await?;
            match (repeat.is_none(), existing.recurrence_id) {
                (true, Some(rule_id)) => self.deactivate_rule(rule_id).await?,
                (true, None) => {}
                (false, Some(rule_id)) => {
                    self.update_rule(rule_id, repeat).await?;
                }
                (false, None) => {
                    let rule = self.create_rule(repeat).await?;
                    created_rule = rule.id;
                    fields.insert("recurrence_id".to_string(), json!(rule.id));
                }
            }
        }

        let row_query = [
            row_filter[0].clone(),
            row_filter[1].clone(),
            ("select", "*".to_string()),
        ];
        let written = if fields.is_empty() {
            self.select_one::<TodoItem>(ITEMS, &row_query).await
        } else {
            self.update_one::<TodoItem>(ITEMS, &row_query, &Value::Object(fields))
                .await
        };
        let mut item = match written {
            Ok(item) => item,
            Err(e) => {
                if let Some(rule_id) = created_rule {
                    if let Err(cleanup) = self.delete_rule(rule_id).await {
                        log::warn!("update_todo_item: orphaned recurrence rule {rule_id}: {cleanup}");
                    }
                }
                return Err(e);
            }
        };

        if let Some(rule_id) = item.recurrence_id {
            item.repeat_config = match self.get_active_rule(rule_id).await {
                Ok(rule) => rule.as_ref().map(to_config),
                Err(e) => {
                    log::warn!("update_todo_item: rule {rule_id} unavailable: {e}");
                    None
                }
            };
        }
        Ok(item)
    }

    async fn delete_todo_item(&self, item_id: i64) -> ServiceResult<()> {
        let user_id = self.user_id()?;
        self.delete(ITEMS, &[("id", eq(item_id)), ("user_id", eq(user_id))])
            .await
    }

    async fn duplicate_todo_item(&self, item_id: i64) -> ServiceResult<TodoItem> {
        let user_id = self.user_id()?;
        let original: TodoItem = self
            .select_one(
                ITEMS,
                &[
                    ("id", eq(item_id)),
                    ("user_id", eq(user_id)),
                    ("select", "*".to_string()),
                ],
            )
            .await?;

        self.create_todo_item(&NewTodo {
            list_id: original.list_id,
            title: format!("{}{COPY_SUFFIX}", original.title),
            description: original.description,
            ..Default::default()
        })
        .await
    }

    async fn toggle_completion(&self, item_id: i64, completed: bool) -> ServiceResult<TodoItem> {
        let item = self
            .update_todo_item(
                item_id,
                &TodoPatch {
                    is_completed: Some(completed),
                    ..Default::default()
                },
            )
            .await?;

        if completed && item.recurrence_id.is_some() {
            match self
                .rpc::<serde_json::Value>(
                    "create_next_recurring_task",
                    &json!({ "original_item_id": item_id }),
                )
                .await
            {
                Ok(_) => log::info!("toggle_completion: queued next occurrence of {item_id}"),
                Err(e) => log::error!("toggle_completion: next occurrence of {item_id} failed: {e}"),
            }
        }
        Ok(item)
    }

    async fn delete_recurring_instance(&self, item_id: i64) -> ServiceResult<()> {
        let user_id = self.user_id()?;
        let row_filter = [("id", eq(item_id)), ("user_id", eq(user_id))];

        let existing: RecurrenceRef = self
            .select_one(
                ITEMS,
                &[
                    row_filter[0].clone(),
                    row_filter[1].clone(),
                    ("select", "recurrence_id,due_date".to_string()),
                ],
            )
            .await?;

        if let (Some(rule_id), Some(date)) = (existing.recurrence_id, existing.due_date) {
            if let Err(e) = self.add_exception(rule_id, date, ExceptionType::Deleted).await {
                log::error!("delete_recurring_instance: exception for rule {rule_id} on {date} failed: {e}");
            }
        }

        self.delete(ITEMS, &row_filter).await
    }

    async fn move_todo_item(&self, item_id: i64, target: &MoveTarget) -> ServiceResult<TodoItem> {
        let body = move_request(item_id, target)?;
        self.invoke("todo-move", &body).await
    }

    async fn get_today_items(&self, today: NaiveDate) -> ServiceResult<Vec<TodoItem>> {
        let user_id = self.user_id()?;
        self.list_items(&[
            ("user_id", eq(user_id)),
            ("added_to_my_day_date", eq(today)),
            ("select", "*".to_string()),
            ("order", "position.asc".to_string()),
        ])
        .await
    }

    async fn get_important_items(&self) -> ServiceResult<Vec<TodoItem>> {
        let user_id = self.user_id()?;
        self.list_items(&[
            ("user_id", eq(user_id)),
            ("is_important", eq(true)),
            ("select", "*".to_string()),
            ("order", "position.asc".to_string()),
        ])
        .await
    }
}

/// Client-side preview of where an item lands between two neighbours.
pub fn preview_position(above: Option<&str>, below: Option<&str>) -> ServiceResult<String> {
    generate_key_between(above, below).map_err(|e| ApiError::validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_client;
    use crate::models::EntityId;
    use crate::recurrence::RepeatType;

    #[test]
    fn test_move_request_shapes() {
        let to_slot = move_request(
            7,
            &MoveTarget::Between {
                after: Some(3),
                before: None,
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&to_slot).unwrap(),
            json!({ "item_id": 7, "after_item_id": 3 })
        );

        let exact = move_request(7, &MoveTarget::Position("a0V".to_string())).unwrap();
        assert_eq!(
            serde_json::to_value(&exact).unwrap(),
            json!({ "item_id": 7, "target_position": "a0V" })
        );
    }

    #[test]
    fn test_move_request_needs_a_target() {
        let err = move_request(
            7,
            &MoveTarget::Between {
                after: None,
                before: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);

        let err = move_request(7, &MoveTarget::Position("a10".to_string())).unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);
    }

    #[test]
    fn test_patch_body_only_carries_set_fields() {
        let patch = TodoPatch {
            is_important: Some(true),
            due_date: Some(None),
            repeat: Some(RepeatConfig::preset(RepeatType::Daily)),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({ "is_important": true, "due_date": null })
        );
        assert!(!patch.is_empty());
        assert!(TodoPatch::default().is_empty());
    }

    #[test]
    fn test_repeat_only_patch_writes_no_columns() {
        let repeat_only = TodoPatch {
            repeat: Some(RepeatConfig::preset(RepeatType::Daily)),
            ..Default::default()
        };
        assert!(patch_fields(&repeat_only).unwrap().is_empty());

        let done = patch_fields(&TodoPatch {
            is_completed: Some(false),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(done.get("is_completed"), Some(&json!(false)));
        assert_eq!(done.get("completed_at"), Some(&Value::Null));
    }

    #[test]
    fn test_patch_revert_only_touches_patched_fields() {
        let before = TodoItem {
            id: EntityId::Confirmed(1),
            list_id: 2,
            title: "Buy milk".to_string(),
            description: None,
            is_completed: false,
            is_important: false,
            position: "a0".to_string(),
            due_date: None,
            scheduled_date: None,
            recurrence_id: None,
            completed_at: None,
            repeat_config: None,
            sync: Default::default(),
        };
        let rename = TodoPatch {
            title: Some("Buy oat milk".to_string()),
            ..Default::default()
        };
        let mut item = before.clone();
        rename.apply_to(&mut item);
        item.is_important = true;

        rename.revert(&mut item, &before);
        assert_eq!(item.title, "Buy milk");
        assert!(item.is_important);
    }

    #[test]
    fn test_patch_apply_to_item() {
        let mut item = TodoItem {
            id: EntityId::Confirmed(1),
            list_id: 2,
            title: "Buy milk".to_string(),
            description: Some("2L".to_string()),
            is_completed: false,
            is_important: false,
            position: "a0".to_string(),
            due_date: None,
            scheduled_date: None,
            recurrence_id: None,
            completed_at: None,
            repeat_config: Some(RepeatConfig::preset(RepeatType::Weekly)),
            sync: Default::default(),
        };

        TodoPatch {
            title: Some("  Buy oat milk ".to_string()),
            description: Some(None),
            is_completed: Some(true),
            repeat: Some(RepeatConfig::default()),
            ..Default::default()
        }
        .apply_to(&mut item);

        assert_eq!(item.title, "Buy oat milk");
        assert_eq!(item.description, None);
        assert!(item.is_completed);
        assert!(item.completed_at.is_some());
        assert_eq!(item.repeat_config, None);
    }

    #[test]
    fn test_preview_position() {
        assert_eq!(preview_position(Some("a0"), Some("a1")).unwrap(), "a0V");
        assert_eq!(preview_position(None, None).unwrap(), "a0");
        assert_eq!(
            preview_position(Some("a1"), Some("a0")).unwrap_err().kind,
            ApiErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn test_validation_happens_before_network() {
        let client = test_client();

        let err = client
            .create_todo_item(&NewTodo {
                list_id: 1,
                title: "   ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);

        let err = client
            .update_todo_item(1, &TodoPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);

        let err = client
            .move_todo_item(
                1,
                &MoveTarget::Between {
                    after: None,
                    before: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ApiErrorKind::Validation);
    }
}
