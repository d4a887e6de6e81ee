use leptos::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
    Warning,
}

impl ToastKind {
    pub fn default_duration_ms(self) -> i32 {
        match self {
            ToastKind::Success => 3000,
            ToastKind::Error => 5000,
            ToastKind::Info => 3000,
            ToastKind::Warning => 4000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub message: String,
    /// 0 keeps the toast until dismissed.
    pub duration_ms: i32,
}

/// Sink for user-facing messages.
pub trait Notifier {
    fn notify(&self, kind: ToastKind, message: &str);

    fn error(&self, message: &str) {
        self.notify(ToastKind::Error, message);
    }
}

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&[Toast]) + Send + Sync>;

/// Active toasts plus change listeners.
///
/// Cloning shares the same bus. The UI reads `toasts()`; non-reactive
/// consumers register with `subscribe`.
#[derive(Clone)]
pub struct ToastBus {
    toasts: RwSignal<Vec<Toast>>,
    listeners: Arc<Mutex<Vec<(SubscriptionId, Listener)>>>,
    next_id: Arc<AtomicU64>,
}

impl ToastBus {
    pub fn new() -> Self {
        Self {
            toasts: RwSignal::new(Vec::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn toasts(&self) -> ReadSignal<Vec<Toast>> {
        self.toasts.read_only()
    }

    /// The listener is called with the full toast list after every change.
    pub fn subscribe(&self, listener: impl Fn(&[Toast]) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn show(&self, kind: ToastKind, message: impl Into<String>, duration_ms: i32) -> u64 {
        let toast = Toast {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            message: message.into(),
            duration_ms,
        };
        let id = toast.id;

        self.toasts.update(|toasts| toasts.push(toast));
        self.emit();

        if duration_ms > 0 {
            self.schedule_dismiss(id, duration_ms);
        }
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.show(ToastKind::Success, message, ToastKind::Success.default_duration_ms())
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.show(ToastKind::Error, message, ToastKind::Error.default_duration_ms())
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.show(ToastKind::Info, message, ToastKind::Info.default_duration_ms())
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.show(ToastKind::Warning, message, ToastKind::Warning.default_duration_ms())
    }

    pub fn dismiss(&self, id: u64) {
        let mut removed = false;
        self.toasts.update(|toasts| {
            let before = toasts.len();
            toasts.retain(|t| t.id != id);
            removed = toasts.len() != before;
        });
        if removed {
            self.emit();
        }
    }

    pub fn clear(&self) {
        self.toasts.set(Vec::new());
        self.emit();
    }

    fn emit(&self) {
        // Listeners run outside the lock so they may unsubscribe themselves.
        let listeners: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };
        let toasts = self.toasts.get_untracked();
        for listener in listeners {
            listener(&toasts);
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn schedule_dismiss(&self, id: u64, duration_ms: i32) {
        use wasm_bindgen::JsCast;

        let Some(win) = web_sys::window() else {
            return;
        };
        let bus = self.clone();
        let cb = wasm_bindgen::closure::Closure::once_into_js(move || bus.dismiss(id));
        if win
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                cb.as_ref().unchecked_ref(),
                duration_ms,
            )
            .is_err()
        {
            log::warn!("toast {id}: failed to schedule auto-dismiss");
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn schedule_dismiss(&self, _id: u64, _duration_ms: i32) {}
}

impl Default for ToastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for ToastBus {
    fn notify(&self, kind: ToastKind, message: &str) {
        self.show(kind, message, kind.default_duration_ms());
    }
}
