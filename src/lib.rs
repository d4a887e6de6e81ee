pub mod api;
pub mod logging;
pub mod models;
pub mod optimistic;
pub mod position;
pub mod recurrence;
pub mod state;
pub mod storage;
pub mod toast;
pub mod tree;
pub mod util;

use crate::api::EnvConfig;

// Needed for `#[wasm_bindgen(start)]` on the wasm entrypoint.
#[cfg(all(target_arch = "wasm32", not(test)))]
use wasm_bindgen::prelude::wasm_bindgen;


// Only register the WASM start function for normal builds (not for tests),
// otherwise wasm-bindgen-test will end up with multiple entry symbols.
#[cfg_attr(all(target_arch = "wasm32", not(test)), wasm_bindgen(start))]
pub fn main() {
    console_error_panic_hook::set_once();
    let config = EnvConfig::new();
    logging::init(logging::parse_level(config.log_level.as_deref()));
    log::info!("todolist core started against {}", config.supabase_url);
}
