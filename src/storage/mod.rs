use crate::models::Session;
use serde::{Deserialize, Serialize};

pub const SESSION_KEY: &str = "todolist_session";
pub const LAST_LIST_KEY: &str = "todolist_last_list_id";

#[cfg(target_arch = "wasm32")]
fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

// No browser storage outside wasm; reads miss and writes are dropped.
#[cfg(not(target_arch = "wasm32"))]
fn local_storage() -> Option<web_sys::Storage> {
    None
}

pub fn load_json_from_storage<T: for<'de> Deserialize<'de>>(key: &str) -> Option<T> {
    let storage = local_storage()?;
    let json = storage.get_item(key).ok().flatten()?;
    match serde_json::from_str(&json) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("storage: ignoring unreadable {key}: {e}");
            None
        }
    }
}

pub fn save_json_to_storage<T: Serialize>(key: &str, value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        if let Some(storage) = local_storage() {
            if storage.set_item(key, &json).is_err() {
                log::warn!("storage: could not write {key}");
            }
        }
    }
}

pub fn remove_from_storage(key: &str) {
    if let Some(storage) = local_storage() {
        let _ = storage.remove_item(key);
    }
}

pub fn load_session() -> Option<Session> {
    load_json_from_storage(SESSION_KEY)
}

pub fn save_session(session: &Session) {
    save_json_to_storage(SESSION_KEY, session);
}

pub fn clear_session() {
    remove_from_storage(SESSION_KEY);
}

pub fn load_last_list_id() -> Option<i64> {
    load_json_from_storage(LAST_LIST_KEY)
}

pub fn save_last_list_id(list_id: i64) {
    save_json_to_storage(LAST_LIST_KEY, &list_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_storage_is_inert() {
        save_session(&Session {
            access_token: "t".to_string(),
            user_id: "u".to_string(),
        });
        assert_eq!(load_session(), None);
        clear_session();
        assert_eq!(load_last_list_id(), None);
    }
}
