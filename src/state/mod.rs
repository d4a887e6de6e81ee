pub mod menu_store;
pub mod todo_store;

use crate::api::{ApiClient, EnvConfig};
use crate::models::Session;
use crate::optimistic::OptimisticEngine;
use crate::storage::load_last_list_id;
use crate::toast::ToastBus;
use leptos::prelude::*;
use std::sync::Arc;

pub use menu_store::MenuStore;
pub use todo_store::TodoStore;

/// Produces the gateway for one operation. Called per operation, so a login
/// or logout applies to the next request.
pub type GatewaySource<G> = Arc<dyn Fn() -> G + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub config: EnvConfig,
    pub api_client: RwSignal<ApiClient>,
    pub session: RwSignal<Option<Session>>,
    pub toasts: ToastBus,

    /// Sidebar groups and lists.
    pub menu: MenuStore<ApiClient>,
    /// Items of the open list.
    pub todos: TodoStore<ApiClient>,

    /// Restored from storage so the last list can be reopened.
    pub last_list_id: RwSignal<Option<i64>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(EnvConfig::new())
    }

    pub fn with_config(config: EnvConfig) -> Self {
        let client = ApiClient::load_from_storage(&config);
        let session = RwSignal::new(client.session.clone());
        let api_client = RwSignal::new(client);

        let toasts = ToastBus::new();
        let engine = OptimisticEngine::new(Arc::new(toasts.clone()));
        let gateway: GatewaySource<ApiClient> = Arc::new(move || api_client.get_untracked());

        Self {
            config,
            api_client,
            session,
            toasts,
            menu: MenuStore::new(gateway.clone(), engine.clone()),
            todos: TodoStore::new(gateway, engine),
            last_list_id: RwSignal::new(load_last_list_id()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.with_untracked(Option::is_some)
    }

    /// Stores the session and makes it active for every later request.
    pub fn login(&self, session: Session) {
        log::info!("session started for {}", session.user_id);
        self.api_client.update(|client| {
            client.set_session(session.clone());
            client.save_to_storage();
        });
        self.session.set(Some(session));
    }

    /// Drops the session and everything loaded with it.
    pub fn logout(&self) {
        self.api_client.update(ApiClient::logout);
        self.session.set(None);
        self.menu.entries.set(Vec::new());
        self.todos.items.set(Vec::new());
        self.todos.list_id.set(None);
        self.toasts.clear();
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppContext(pub AppState);

/// Builds the app state and installs it as context for the component tree.
pub fn provide_app_state() -> AppState {
    let state = AppState::new();
    provide_context(AppContext(state.clone()));
    state
}

pub fn use_app_state() -> Option<AppState> {
    use_context::<AppContext>().map(|AppContext(state)| state)
}
