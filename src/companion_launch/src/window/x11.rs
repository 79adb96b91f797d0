//! X11 window backend (EWMH/ICCCM)

use super::{WindowHandle, WindowLocator};
use eyre::{eyre, Result, WrapErr};
use tracing::debug;
use x11rb::{
    connection::Connection,
    protocol::xproto::{
        AtomEnum, ClientMessageEvent, ConnectionExt, EventMask, MapState, Window,
    },
    rust_connection::RustConnection,
};

/// ICCCM `IconicState` value of `WM_STATE` / `WM_CHANGE_STATE`
const ICONIC_STATE: u32 = 3;

struct Atoms {
    net_client_list: u32,
    net_wm_pid: u32,
    net_wm_name: u32,
    net_wm_state: u32,
    net_wm_state_hidden: u32,
    wm_state: u32,
    wm_change_state: u32,
}

pub struct X11Windows {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
}

impl X11Windows {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).wrap_err("Failed to connect to X server")?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| eyre!("X server reported no screen {}", screen_num))?;

        let intern = |name: &str| -> Result<u32> {
            Ok(conn
                .intern_atom(false, name.as_bytes())?
                .reply()
                .wrap_err_with(|| format!("Failed to intern atom {}", name))?
                .atom)
        };
        let atoms = Atoms {
            net_client_list: intern("_NET_CLIENT_LIST")?,
            net_wm_pid: intern("_NET_WM_PID")?,
            net_wm_name: intern("_NET_WM_NAME")?,
            net_wm_state: intern("_NET_WM_STATE")?,
            net_wm_state_hidden: intern("_NET_WM_STATE_HIDDEN")?,
            wm_state: intern("WM_STATE")?,
            wm_change_state: intern("WM_CHANGE_STATE")?,
        };

        Ok(Self { conn, root, atoms })
    }

    fn property32(&self, window: Window, atom: u32, kind: impl Into<u32>) -> Result<Vec<u32>> {
        let reply = self
            .conn
            .get_property(false, window, atom, kind.into(), 0, u32::MAX / 4)?
            .reply()?;
        Ok(reply
            .value32()
            .map(|values| values.collect())
            .unwrap_or_default())
    }

    fn has_title(&self, window: Window) -> bool {
        [self.atoms.net_wm_name, AtomEnum::WM_NAME.into()]
            .into_iter()
            .any(|atom| {
                self.conn
                    .get_property(false, window, atom, AtomEnum::ANY, 0, 1)
                    .ok()
                    .and_then(|cookie| cookie.reply().ok())
                    .is_some_and(|reply| !reply.value.is_empty())
            })
    }

    fn is_viewable(&self, window: Window) -> bool {
        self.conn
            .get_window_attributes(window)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some_and(|attrs| attrs.map_state == MapState::VIEWABLE)
    }

    fn owner_pid(&self, window: Window) -> Option<u32> {
        self.property32(window, self.atoms.net_wm_pid, AtomEnum::CARDINAL)
            .ok()?
            .first()
            .copied()
    }

    fn client_windows(&self) -> Result<Vec<Window>> {
        self.property32(self.root, self.atoms.net_client_list, AtomEnum::WINDOW)
    }
}

impl WindowLocator for X11Windows {
    fn find_windows(&self, pid: u32) -> Vec<WindowHandle> {
        let clients = match self.client_windows() {
            Ok(clients) => clients,
            Err(e) => {
                debug!("Failed to read _NET_CLIENT_LIST: {:#}", e);
                return Vec::new();
            }
        };

        clients
            .into_iter()
            .filter(|&window| self.owner_pid(window) == Some(pid))
            .filter(|&window| self.is_viewable(window) && self.has_title(window))
            .map(|window| WindowHandle(u64::from(window)))
            .collect()
    }

    fn set_minimized(&self, window: WindowHandle) -> bool {
        let Ok(window) = Window::try_from(window.0) else {
            return false;
        };
        let event = ClientMessageEvent::new(
            32,
            window,
            self.atoms.wm_change_state,
            [ICONIC_STATE, 0, 0, 0, 0],
        );
        let sent = self
            .conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )
            .and_then(|_| self.conn.flush());
        match sent {
            Ok(()) => true,
            Err(e) => {
                debug!("Failed to send WM_CHANGE_STATE to {}: {}", window, e);
                false
            }
        }
    }

    fn is_minimized(&self, window: WindowHandle) -> Result<bool> {
        let window = Window::try_from(window.0)?;

        let wm_state = self.property32(window, self.atoms.wm_state, self.atoms.wm_state)?;
        if wm_state.first() == Some(&ICONIC_STATE) {
            return Ok(true);
        }

        let net_state = self.property32(window, self.atoms.net_wm_state, AtomEnum::ATOM)?;
        Ok(net_state.contains(&self.atoms.net_wm_state_hidden))
    }

    fn backend_name(&self) -> &'static str {
        "x11"
    }
}
