use super::{eq, require_text, ApiClient, ServiceResult};
use crate::models::{GroupRow, ListColor, ListRow, MenuKind, MenuRow, SystemMenuCounts};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

const LIST_COLUMNS: &str = "id,name,color,group_id,is_system";

/// Sidebar groups and lists. Ordering lives in server-side routines, so
/// creates and deletes also update the menu position table.
#[async_trait(?Send)]
pub trait MenuGateway {
    async fn create_group(&self, name: &str, index: Option<usize>) -> ServiceResult<GroupRow>;
    async fn update_group_name(&self, group_id: i64, name: &str) -> ServiceResult<GroupRow>;
    /// Detaches every list of the group to the top level, then deletes the
    /// group. Returns the detached list ids in their previous order.
    async fn dissolve_group(&self, group_id: i64) -> ServiceResult<Vec<i64>>;

    async fn create_list(
        &self,
        name: &str,
        color: Option<ListColor>,
        group_id: Option<i64>,
        index: Option<usize>,
    ) -> ServiceResult<ListRow>;
    /// System lists are not part of the sidebar ordering.
    async fn create_system_list(&self, name: &str) -> ServiceResult<ListRow>;
    async fn get_list(&self, list_id: i64) -> ServiceResult<ListRow>;
    async fn delete_list(&self, list_id: i64) -> ServiceResult<()>;
    async fn update_list_color(&self, list_id: i64, color: ListColor) -> ServiceResult<ListRow>;
    async fn update_list_name(&self, list_id: i64, name: &str) -> ServiceResult<ListRow>;

    /// Flat rows in position order.
    async fn get_user_menus(&self) -> ServiceResult<Vec<MenuRow>>;
    async fn get_system_menu_counts(&self) -> ServiceResult<SystemMenuCounts>;
    async fn move_menu_item(&self, kind: MenuKind, item_id: i64, index: usize) -> ServiceResult<()>;
}

#[derive(Serialize, Debug)]
struct MenuItemRef<'a> {
    p_user_id: &'a str,
    p_item_type: MenuKind,
    p_item_id: i64,
}

#[derive(Serialize, Debug)]
struct MenuItemAt<'a> {
    #[serde(flatten)]
    item: MenuItemRef<'a>,
    /// `null` appends at the end.
    p_index: Option<usize>,
}

#[derive(Deserialize)]
struct IdRow {
    id: i64,
}

impl ApiClient {
    async fn add_menu_item_at_index(
        &self,
        user_id: &str,
        kind: MenuKind,
        item_id: i64,
        index: Option<usize>,
    ) -> ServiceResult<()> {
        let params = MenuItemAt {
            item: MenuItemRef {
                p_user_id: user_id,
                p_item_type: kind,
                p_item_id: item_id,
            },
            p_index: index,
        };
        self.rpc_void("add_menu_item_at_index", &params)
            .await
            .inspect_err(|e| log::error!("add_menu_item_at_index failed for {kind}:{item_id} at {index:?}: {e}"))
    }
}

#[async_trait(?Send)]
impl MenuGateway for ApiClient {
    async fn create_group(&self, name: &str, index: Option<usize>) -> ServiceResult<GroupRow> {
        let name = require_text("group name", name)?;
        let user_id = self.user_id()?;

        let group: GroupRow = self
            .insert_one("groups", &json!({ "user_id": user_id, "name": name }))
            .await?;
        self.add_menu_item_at_index(user_id, MenuKind::Group, group.id, index)
            .await?;
        Ok(group)
    }

    async fn update_group_name(&self, group_id: i64, name: &str) -> ServiceResult<GroupRow> {
        let name = require_text("group name", name)?;
        let user_id = self.user_id()?;
        self.update_one(
            "groups",
            &[
                ("id", eq(group_id)),
                ("user_id", eq(user_id)),
                ("select", "id,name".to_string()),
            ],
            &json!({ "name": name }),
        )
        .await
    }

    async fn dissolve_group(&self, group_id: i64) -> ServiceResult<Vec<i64>> {
        let user_id = self.user_id()?;
        let menu = self.get_user_menus().await?;

        let detached: Vec<IdRow> = self
            .update_many(
                "lists",
                &[
                    ("user_id", eq(user_id)),
                    ("group_id", eq(group_id)),
                    ("select", "id".to_string()),
                ],
                &json!({ "group_id": null }),
            )
            .await?;

        let detached = in_menu_order(&menu, group_id, detached.into_iter().map(|r| r.id).collect());
        for &list_id in &detached {
            self.add_menu_item_at_index(user_id, MenuKind::List, list_id, None)
                .await?;
        }

        self.delete("groups", &[("id", eq(group_id)), ("user_id", eq(user_id))])
            .await?;

        log::info!("dissolve_group: group {group_id} released {} lists", detached.len());
        Ok(detached)
    }

    async fn create_list(
        &self,
        name: &str,
        color: Option<ListColor>,
        group_id: Option<i64>,
        index: Option<usize>,
    ) -> ServiceResult<ListRow> {
        let name = require_text("list name", name)?;
        let user_id = self.user_id()?;

        let list: ListRow = self
            .insert_one(
                "lists",
                &json!({
                    "user_id": user_id,
                    "group_id": group_id,
                    "color": color,
                    "name": name,
                    "is_system": false,
                }),
            )
            .await?;
        self.add_menu_item_at_index(user_id, MenuKind::List, list.id, index)
            .await?;
        Ok(list)
    }

    async fn create_system_list(&self, name: &str) -> ServiceResult<ListRow> {
        let name = require_text("list name", name)?;
        let user_id = self.user_id()?;
        self.insert_one(
            "lists",
            &json!({ "user_id": user_id, "name": name, "is_system": true }),
        )
        .await
    }

    async fn get_list(&self, list_id: i64) -> ServiceResult<ListRow> {
        let user_id = self.user_id()?;
        self.select_one(
            "lists",
            &[
                ("id", eq(list_id)),
                ("user_id", eq(user_id)),
                ("select", LIST_COLUMNS.to_string()),
            ],
        )
        .await
    }

    async fn delete_list(&self, list_id: i64) -> ServiceResult<()> {
        let user_id = self.user_id()?;
        let item = MenuItemRef {
            p_user_id: user_id,
            p_item_type: MenuKind::List,
            p_item_id: list_id,
        };
        self.rpc_void("remove_menu_item", &item).await?;
        self.delete("lists", &[("id", eq(list_id)), ("user_id", eq(user_id))])
            .await
    }

    async fn update_list_color(&self, list_id: i64, color: ListColor) -> ServiceResult<ListRow> {
        let user_id = self.user_id()?;
        self.update_one(
            "lists",
            &[
                ("id", eq(list_id)),
                ("user_id", eq(user_id)),
                ("select", LIST_COLUMNS.to_string()),
            ],
            &json!({ "color": color }),
        )
        .await
    }

    async fn update_list_name(&self, list_id: i64, name: &str) -> ServiceResult<ListRow> {
        let name = require_text("list name", name)?;
        let user_id = self.user_id()?;
        self.update_one(
            "lists",
            &[
                ("id", eq(list_id)),
                ("user_id", eq(user_id)),
                ("select", LIST_COLUMNS.to_string()),
            ],
            &json!({ "name": name }),
        )
        .await
    }

    async fn get_user_menus(&self) -> ServiceResult<Vec<MenuRow>> {
        let user_id = self.user_id()?;
        let rows: Option<Vec<MenuRow>> = self
            .rpc("get_user_menus_with_positions", &json!({ "p_user_id": user_id }))
            .await?;
        Ok(rows.unwrap_or_default())
    }

    async fn get_system_menu_counts(&self) -> ServiceResult<SystemMenuCounts> {
        let user_id = self.user_id()?;
        let raw: serde_json::Value = self
            .rpc("get_system_menu_counts", &json!({ "p_user_id": user_id }))
            .await?;
        parse_counts(raw)
    }

    async fn move_menu_item(&self, kind: MenuKind, item_id: i64, index: usize) -> ServiceResult<()> {
        let user_id = self.user_id()?;
        let params = MenuItemAt {
            item: MenuItemRef {
                p_user_id: user_id,
                p_item_type: kind,
                p_item_id: item_id,
            },
            p_index: Some(index),
        };
        self.rpc_void("move_menu_item_to_index", &params).await
    }
}

/// Orders `detached` the way the group listed them. Lists the menu did not
/// show keep the update's order, after the rest.
fn in_menu_order(menu: &[MenuRow], group_id: i64, detached: Vec<i64>) -> Vec<i64> {
    let mut ordered: Vec<i64> = menu
        .iter()
        .filter(|r| r.kind == MenuKind::List && r.parent_id == Some(group_id))
        .map(|r| r.id)
        .filter(|id| detached.contains(id))
        .collect();
    let rest: Vec<i64> = detached
        .into_iter()
        .filter(|id| !ordered.contains(id))
        .collect();
    ordered.extend(rest);
    ordered
}

/// Table-returning functions answer with a one-row array; scalar ones with
/// an object.
fn parse_counts(raw: serde_json::Value) -> ServiceResult<SystemMenuCounts> {
    let row = match raw {
        serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
        serde_json::Value::Array(_) | serde_json::Value::Null => return Ok(SystemMenuCounts::default()),
        other => other,
    };
    serde_json::from_value(row).map_err(super::ApiError::parse)
}
