//! Window lookup and minimization for launched programs
//!
//! The backend is chosen once at startup. Callers always talk to a
//! [`WindowLocator`]; on hosts without a usable window system they get
//! [`NoWindows`], which finds nothing.

use std::sync::Arc;
use tracing::{info, warn};

#[cfg(target_os = "linux")]
pub mod x11;

/// Opaque handle of a top-level window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Query and command capability over the host's top-level windows
pub trait WindowLocator: Send + Sync {
    /// Visible, titled top-level windows owned by `pid`. Empty when none
    /// are found.
    fn find_windows(&self, pid: u32) -> Vec<WindowHandle>;

    /// Ask the window system to minimize `window`. Returns whether the
    /// request was accepted, not whether it took effect.
    fn set_minimized(&self, window: WindowHandle) -> bool;

    /// Current placement of `window`. Fails if the window is gone.
    fn is_minimized(&self, window: WindowHandle) -> eyre::Result<bool>;

    /// Short name for logs
    fn backend_name(&self) -> &'static str;
}

/// Backend for hosts without window access
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWindows;

impl WindowLocator for NoWindows {
    fn find_windows(&self, _pid: u32) -> Vec<WindowHandle> {
        Vec::new()
    }

    fn set_minimized(&self, _window: WindowHandle) -> bool {
        false
    }

    fn is_minimized(&self, window: WindowHandle) -> eyre::Result<bool> {
        eyre::bail!("window {} is not managed by any backend", window)
    }

    fn backend_name(&self) -> &'static str {
        "none"
    }
}

/// Pick the window backend for this host
pub fn detect_window_backend() -> Arc<dyn WindowLocator> {
    #[cfg(target_os = "linux")]
    {
        if std::env::var_os("DISPLAY").is_some() {
            match x11::X11Windows::connect() {
                Ok(backend) => {
                    info!("Window backend: X11");
                    return Arc::new(backend);
                }
                Err(e) => {
                    warn!("X11 unavailable ({:#}), windows will not be minimized", e);
                }
            }
        }
    }

    warn!("No window system available, helper windows will not be minimized");
    Arc::new(NoWindows)
}
