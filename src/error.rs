//! Error channel - phase-tagged capture and propagation of user-code
//! failures.
//!
//! User callbacks (render bodies, lifecycle and vnode hooks, watch
//! getters/callbacks/cleanups, scheduler jobs) run through
//! [`call_guarded`], which catches unwinds and routes them: up the
//! component chain via error-captured hooks, then to the app-level
//! handler, and finally to the log. The reactive graph stays consistent
//! regardless of where an error fires; finalization is the caller's
//! drop-guard responsibility.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::renderer::component::ComponentInstance;

/// Where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SetupFunction,
    RenderFunction,
    WatchGetter,
    WatchCallback,
    WatchCleanup,
    NativeEventHandler,
    ComponentEventHandler,
    LifecycleHook,
    VnodeHook,
    DirectiveHook,
    AppErrorHandler,
    Scheduler,
}

impl ErrorKind {
    pub fn phase(&self) -> &'static str {
        match self {
            ErrorKind::SetupFunction => "setup function",
            ErrorKind::RenderFunction => "render function",
            ErrorKind::WatchGetter => "watcher getter",
            ErrorKind::WatchCallback => "watcher callback",
            ErrorKind::WatchCleanup => "watcher cleanup function",
            ErrorKind::NativeEventHandler => "native event handler",
            ErrorKind::ComponentEventHandler => "component event handler",
            ErrorKind::LifecycleHook => "lifecycle hook",
            ErrorKind::VnodeHook => "vnode hook",
            ErrorKind::DirectiveHook => "directive hook",
            ErrorKind::AppErrorHandler => "app error handler",
            ErrorKind::Scheduler => "scheduler flush",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase())
    }
}

/// A captured failure, with the phase it escaped from.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub(crate) fn from_payload(kind: ErrorKind, payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self { kind, message }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unhandled error in {}: {}", self.kind, self.message)
    }
}

thread_local! {
    static APP_ERROR_HANDLER: RefCell<Option<Rc<dyn Fn(&ErrorInfo)>>> = const { RefCell::new(None) };
}

/// Install the app-level error handler, returning the previous one.
pub fn set_app_error_handler(
    handler: impl Fn(&ErrorInfo) + 'static,
) -> Option<Rc<dyn Fn(&ErrorInfo)>> {
    APP_ERROR_HANDLER.with(|h| h.replace(Some(Rc::new(handler))))
}

/// Remove the app-level error handler.
pub fn clear_app_error_handler() {
    APP_ERROR_HANDLER.with(|h| *h.borrow_mut() = None);
}

/// Run `f`, converting an unwind into a routed [`ErrorInfo`]. Returns
/// `None` when `f` panicked.
pub(crate) fn call_guarded<R>(
    kind: ErrorKind,
    instance: Option<&ComponentInstance>,
    f: impl FnOnce() -> R,
) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            handle_error(ErrorInfo::from_payload(kind, payload), instance);
            None
        }
    }
}

/// Run one instance's error-captured hooks; true when one claimed the
/// error.
fn run_captured_hooks(instance: &ComponentInstance, info: &ErrorInfo) -> bool {
    for hook in instance.error_captured_hooks() {
        let propagate = catch_unwind(AssertUnwindSafe(|| hook(info)));
        match propagate {
            Ok(false) => return true,
            Ok(true) => {}
            Err(payload) => {
                // An error-captured hook that itself fails is reported
                // directly; no further propagation for it.
                let nested = ErrorInfo::from_payload(ErrorKind::AppErrorHandler, payload);
                log::error!("{nested}");
            }
        }
    }
    false
}

/// Route an error: error-captured hooks up the component chain (a hook
/// returning `false` stops propagation), then the app handler, then the
/// log.
pub fn handle_error(info: ErrorInfo, instance: Option<&ComponentInstance>) {
    if let Some(first) = instance {
        if run_captured_hooks(first, &info) {
            return;
        }
        let mut cursor = first.parent();
        while let Some(current) = cursor {
            if run_captured_hooks(&current, &info) {
                return;
            }
            cursor = current.parent();
        }
    }

    let handler = APP_ERROR_HANDLER.with(|h| h.borrow().clone());
    if let Some(handler) = handler {
        let result = catch_unwind(AssertUnwindSafe(|| handler(&info)));
        if let Err(payload) = result {
            let nested = ErrorInfo::from_payload(ErrorKind::AppErrorHandler, payload);
            log::error!("{nested}");
        }
        return;
    }

    log::error!("{info}");
}
