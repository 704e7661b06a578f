//! Tauri adapter.
//!
//! Register the bridge as managed state and expose [`pty_invoke`]:
//!
//! ```rust,ignore
//! tauri::Builder::default()
//!     .manage(desktop::DesktopBridge::new(&config, resolver))
//!     .invoke_handler(tauri::generate_handler![desktop::webview::pty_invoke])
//!     .run(tauri::generate_context!())
//!     .expect("error while running tauri application");
//! ```

use std::sync::Arc;

use serde_json::Value;
use tauri::{AppHandle, Emitter, EventTarget, Manager, Runtime, WebviewWindow};

use crate::bridge::{DesktopBridge, IpcResult};
use crate::window::WindowHandle;

/// A webview window addressed by label.
///
/// Holding the label instead of the window lets `is_destroyed` notice when
/// the window has been closed.
pub struct TauriWindow<R: Runtime> {
    app: AppHandle<R>,
    label: String,
}

impl<R: Runtime> TauriWindow<R> {
    pub fn new(window: &WebviewWindow<R>) -> Self {
        Self {
            app: window.app_handle().clone(),
            label: window.label().to_string(),
        }
    }
}

impl<R: Runtime> WindowHandle for TauriWindow<R> {
    fn is_destroyed(&self) -> bool {
        self.app.get_webview_window(&self.label).is_none()
    }

    fn emit(&self, channel: &str, payload: Value) {
        let target = EventTarget::webview_window(self.label.clone());
        if let Err(e) = self.app.emit_to(target, channel, payload) {
            tracing::warn!(window = %self.label, channel, error = %e, "Failed to emit event");
        }
    }
}

/// Forwards a renderer request to the bridge.
#[tauri::command]
pub async fn pty_invoke<R: Runtime>(
    channel: String,
    payload: Option<Value>,
    window: WebviewWindow<R>,
    bridge: tauri::State<'_, DesktopBridge>,
) -> IpcResult<Option<Value>> {
    let handle: Arc<dyn WindowHandle> = Arc::new(TauriWindow::new(&window));
    bridge
        .invoke(&channel, payload.unwrap_or(Value::Null), handle)
        .await
}
