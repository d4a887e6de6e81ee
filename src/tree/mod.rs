use crate::models::{EntityId, Group, List, ListColor, MenuEntry, MenuKind, MenuRow, SyncState};
use std::collections::{HashMap, HashSet};

fn parse_color(row: &MenuRow) -> Option<ListColor> {
    let raw = row.color.as_deref()?;
    match raw.parse::<ListColor>() {
        Ok(color) => Some(color),
        Err(_) => {
            log::warn!("project: list {} has unknown color {raw:?}", row.id);
            None
        }
    }
}

fn list_from_row(row: &MenuRow) -> List {
    List {
        id: EntityId::Confirmed(row.id),
        label: row.name.clone(),
        color: parse_color(row),
        item_count: row.item_count.unwrap_or(0),
        position: row.position.clone(),
        group_id: row.parent_id,
        sync: SyncState::Confirmed,
    }
}

/// Builds the sidebar tree from rows already sorted by position.
///
/// Row order is preserved. A list whose `parent_id` does not name an earlier
/// group row is dropped.
pub fn project(rows: &[MenuRow]) -> Vec<MenuEntry> {
    let mut out: Vec<MenuEntry> = Vec::with_capacity(rows.len());
    let mut groups: HashMap<i64, usize> = HashMap::new();
    let mut lists: HashSet<i64> = HashSet::new();

    for row in rows {
        match row.kind {
            MenuKind::Group => {
                if groups.contains_key(&row.id) {
                    log::error!("project: duplicate group id {}", row.id);
                    continue;
                }
                groups.insert(row.id, out.len());
                out.push(MenuEntry::Group(Group {
                    id: EntityId::Confirmed(row.id),
                    label: row.name.clone(),
                    position: row.position.clone(),
                    children: Vec::new(),
                    sync: SyncState::Confirmed,
                }));
            }
            MenuKind::List => {
                if !lists.insert(row.id) {
                    log::error!("project: duplicate list id {}", row.id);
                    continue;
                }
                let list = list_from_row(row);
                let Some(parent_id) = row.parent_id else {
                    out.push(MenuEntry::List(list));
                    continue;
                };
                match groups.get(&parent_id).and_then(|&i| out.get_mut(i)) {
                    Some(MenuEntry::Group(group)) => group.children.push(list),
                    _ => log::warn!(
                        "project: dropping list {} with unknown parent group {parent_id}",
                        row.id
                    ),
                }
            }
        }
    }

    log::debug!("project: {} rows -> {} top-level entries", rows.len(), out.len());
    out
}

pub fn find_group_mut<'a>(entries: &'a mut [MenuEntry], id: &EntityId) -> Option<&'a mut Group> {
    entries.iter_mut().find_map(|e| match e {
        MenuEntry::Group(g) if g.id == *id => Some(g),
        _ => None,
    })
}

/// Looks at top-level lists and group children.
pub fn find_list_mut<'a>(entries: &'a mut [MenuEntry], id: &EntityId) -> Option<&'a mut List> {
    for entry in entries.iter_mut() {
        match entry {
            MenuEntry::List(l) if l.id == *id => return Some(l),
            MenuEntry::Group(g) => {
                if let Some(l) = g.children.iter_mut().find(|l| l.id == *id) {
                    return Some(l);
                }
            }
            MenuEntry::List(_) => {}
        }
    }
    None
}

pub fn remove_list(entries: &mut Vec<MenuEntry>, id: &EntityId) -> Option<List> {
    if let Some(i) = entries
        .iter()
        .position(|e| matches!(e, MenuEntry::List(l) if l.id == *id))
    {
        return match entries.remove(i) {
            MenuEntry::List(l) => Some(l),
            MenuEntry::Group(_) => None,
        };
    }
    entries.iter_mut().find_map(|e| match e {
        MenuEntry::Group(g) => g
            .children
            .iter()
            .position(|l| l.id == *id)
            .map(|i| g.children.remove(i)),
        MenuEntry::List(_) => None,
    })
}

pub fn remove_group(entries: &mut Vec<MenuEntry>, id: &EntityId) -> Option<Group> {
    let i = entries
        .iter()
        .position(|e| matches!(e, MenuEntry::Group(g) if g.id == *id))?;
    match entries.remove(i) {
        MenuEntry::Group(g) => Some(g),
        MenuEntry::List(_) => None,
    }
}

/// Removes the group and appends its lists at the end of the top level,
/// keeping their order. Mirrors the server, which re-adds each detached list
/// with no explicit index.
pub fn dissolve_group(entries: &mut Vec<MenuEntry>, id: &EntityId) -> bool {
    let Some(group) = remove_group(entries, id) else {
        return false;
    };
    entries.extend(group.children.into_iter().map(|mut l| {
        l.group_id = None;
        MenuEntry::List(l)
    }));
    true
}

/// Where a list sat before it was taken out.
#[derive(Clone, Debug, PartialEq)]
pub struct ListSlot {
    pub group: Option<EntityId>,
    pub index: usize,
}

/// Like `remove_list`, but also reports the slot for `restore_list`.
pub fn detach_list(entries: &mut Vec<MenuEntry>, id: &EntityId) -> Option<(ListSlot, List)> {
    if let Some(index) = entries.iter().position(|e| e.is(MenuKind::List, id)) {
        return match entries.remove(index) {
            MenuEntry::List(l) => Some((ListSlot { group: None, index }, l)),
            MenuEntry::Group(_) => None,
        };
    }
    entries.iter_mut().find_map(|e| match e {
        MenuEntry::Group(g) => {
            let index = g.children.iter().position(|l| l.id == *id)?;
            let list = g.children.remove(index);
            Some((ListSlot { group: Some(g.id), index }, list))
        }
        MenuEntry::List(_) => None,
    })
}

/// Puts a detached list back. Falls back to the end of the top level when its
/// group is gone; does nothing if the list is already present.
pub fn restore_list(entries: &mut Vec<MenuEntry>, slot: ListSlot, mut list: List) {
    if find_list_mut(entries, &list.id).is_some() {
        return;
    }
    if let Some(group_id) = slot.group {
        if let Some(group) = find_group_mut(entries, &group_id) {
            let at = slot.index.min(group.children.len());
            group.children.insert(at, list);
            return;
        }
        log::warn!("restore_list: group {group_id} is gone, placing list {} at top level", list.id);
        list.group_id = None;
        entries.push(MenuEntry::List(list));
        return;
    }
    let at = slot.index.min(entries.len());
    entries.insert(at, MenuEntry::List(list));
}

/// Reverses `dissolve_group`: the group's former lists are pulled back out of
/// the top level and the group is reinserted at `index`. Lists deleted in the
/// meantime stay deleted.
pub fn restore_group(entries: &mut Vec<MenuEntry>, index: usize, mut group: Group) {
    if entries.iter().any(|e| e.is(MenuKind::Group, &group.id)) {
        return;
    }
    let parent = group.id.confirmed();
    let children: Vec<List> = group
        .children
        .iter()
        .filter_map(|child| {
            let at = entries.iter().position(|e| e.is(MenuKind::List, &child.id))?;
            match entries.remove(at) {
                MenuEntry::List(mut l) => {
                    l.group_id = parent;
                    Some(l)
                }
                MenuEntry::Group(_) => None,
            }
        })
        .collect();
    group.children = children;
    let at = index.min(entries.len());
    entries.insert(at, MenuEntry::Group(group));
}

/// Moves a top-level entry to `index` (clamped).
pub fn move_entry(entries: &mut Vec<MenuEntry>, kind: MenuKind, id: &EntityId, index: usize) -> bool {
    let Some(from) = entries.iter().position(|e| e.is(kind, id)) else {
        return false;
    };
    let entry = entries.remove(from);
    let to = index.min(entries.len());
    entries.insert(to, entry);
    true
}
