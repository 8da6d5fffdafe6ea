//! Capture of messages printed by the engine.
//!
//! Every session is created with [`print_callback`]. Messages are forwarded
//! to `tracing` under the `gmt::native` target and, while a native call is
//! in flight on this thread, collected so a failure can carry them.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void, CStr};

use tracing::{debug, warn};

thread_local! {
    static CAPTURE: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// `print_func` handed to `GMT_Create_Session`.
pub(crate) unsafe extern "C" fn print_callback(_stream: *mut c_void, message: *const c_char) -> c_int {
    if message.is_null() {
        return 0;
    }
    // Safety: the engine passes a NUL-terminated string valid for the call.
    let text = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    let text = text.trim_end();
    if text.is_empty() {
        return 0;
    }
    if text.contains("[ERROR]") || text.contains("[WARNING]") {
        warn!(target: "gmt::native", "{}", text);
    } else {
        debug!(target: "gmt::native", "{}", text);
    }
    CAPTURE.with(|capture| {
        if let Some(lines) = capture.borrow_mut().as_mut() {
            lines.push(text.to_string());
        }
    });
    0
}

/// Runs `f`, returning its result and everything the engine printed.
///
/// Nested captures are independent; the outer capture resumes afterwards.
pub(crate) fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
    let outer = CAPTURE.with(|capture| capture.replace(Some(Vec::new())));
    let result = f();
    let lines = CAPTURE.with(|capture| capture.replace(outer)).unwrap_or_default();
    (result, lines.join("\n"))
}
