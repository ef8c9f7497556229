#![allow(unsafe_code)]

//! Device interface arrival and removal on Windows.
//!
//! `RegisterDeviceNotificationW` only reports to a window, so a dedicated
//! thread owns a message-only window and pumps its queue. Closing the window
//! ends the loop.

use std::{
    cell::RefCell,
    ffi::c_void,
    mem,
    sync::mpsc,
    thread::{self, JoinHandle},
};

use tracing::{debug, trace, warn};
use windows::{
    Win32::{
        Foundation::{HANDLE, HWND, LPARAM, LRESULT, WPARAM},
        System::LibraryLoader::GetModuleHandleW,
        UI::WindowsAndMessaging::{
            CreateWindowExW, DBT_DEVICEARRIVAL, DBT_DEVICEREMOVECOMPLETE,
            DBT_DEVTYP_DEVICEINTERFACE, DEV_BROADCAST_DEVICEINTERFACE_W, DEV_BROADCAST_HDR,
            DEVICE_NOTIFY_WINDOW_HANDLE, DefWindowProcW, DestroyWindow, DispatchMessageW,
            GetMessageW, HDEVNOTIFY, HWND_MESSAGE, MSG, PostMessageW, PostQuitMessage,
            RegisterClassW, RegisterDeviceNotificationW, TranslateMessage,
            UnregisterDeviceNotification, WINDOW_EX_STYLE, WINDOW_STYLE, WM_CLOSE,
            WM_DEVICECHANGE, WNDCLASSW,
        },
    },
    core::{GUID, PCWSTR, w},
};

/// Arrival or removal of a device interface, by symbolic link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceChange {
    /// Interface became available
    Arrived(String),
    /// Interface was removed
    Removed(String),
}

type ChangeCallback = Box<dyn FnMut(InterfaceChange)>;

thread_local! {
    static CALLBACK: RefCell<Option<ChangeCallback>> = const { RefCell::new(None) };
    static REGISTRATION: RefCell<Option<HDEVNOTIFY>> = const { RefCell::new(None) };
}

/// Window handle passed back to the owner; only used with `PostMessageW`.
#[derive(Debug, Clone, Copy)]
struct WindowHandle(HWND);

// SAFETY: window handles are process-wide values, posting to them is
// allowed from any thread.
unsafe impl Send for WindowHandle {}

/// Running notifier thread. Dropping it closes the window and joins.
pub struct DeviceNotifier {
    window: WindowHandle,
    thread: Option<JoinHandle<()>>,
}

impl DeviceNotifier {
    /// Starts a notifier thread for interfaces of `class`.
    ///
    /// `on_change` runs on the notifier thread.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned or the window cannot be
    /// registered for notifications
    pub fn spawn<F>(name: &str, class: GUID, on_change: F) -> Result<Self, String>
    where
        F: FnMut(InterfaceChange) + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<WindowHandle, String>>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                CALLBACK.with(|cell| *cell.borrow_mut() = Some(Box::new(on_change)));

                match create_window(class) {
                    Ok(window) => {
                        let _ = ready_tx.send(Ok(window));
                        pump_messages();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }

                CALLBACK.with(|cell| cell.borrow_mut().take());
                debug!("Device notifier stopped");
            })
            .map_err(|e| e.to_string())?;

        let window = match ready_rx.recv() {
            Ok(Ok(window)) => window,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(String::from("notifier thread exited during startup"));
            }
        };

        Ok(Self {
            window,
            thread: Some(thread),
        })
    }
}

impl Drop for DeviceNotifier {
    fn drop(&mut self) {
        // SAFETY: posting to a window owned by the notifier thread.
        if let Err(e) = unsafe { PostMessageW(self.window.0, WM_CLOSE, WPARAM(0), LPARAM(0)) } {
            warn!(error = %e, "Cannot close notifier window");
            return;
        }

        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                warn!("Notifier dropped on its own thread, not joining");
            } else if handle.join().is_err() {
                warn!("Notifier thread panicked");
            }
        }
    }
}

fn create_window(class: GUID) -> Result<WindowHandle, String> {
    let class_name = w!("AvdevDeviceNotifier");

    // SAFETY: standard window class registration and creation on this
    // thread; the filter outlives the registration call.
    unsafe {
        let instance = GetModuleHandleW(None).map_err(|e| e.to_string())?;

        let window_class = WNDCLASSW {
            lpfnWndProc: Some(window_proc),
            hInstance: instance.into(),
            lpszClassName: class_name,
            ..Default::default()
        };
        // A second manager finds the class already registered.
        RegisterClassW(&window_class);

        let hwnd = CreateWindowExW(
            WINDOW_EX_STYLE(0),
            class_name,
            PCWSTR::null(),
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            None,
            instance,
            None,
        );
        if hwnd.0 == 0 {
            return Err(windows::core::Error::from_win32().to_string());
        }

        let mut filter: DEV_BROADCAST_DEVICEINTERFACE_W = mem::zeroed();
        filter.dbcc_size = mem::size_of::<DEV_BROADCAST_DEVICEINTERFACE_W>() as u32;
        filter.dbcc_devicetype = DBT_DEVTYP_DEVICEINTERFACE.0;
        filter.dbcc_classguid = class;

        let registration = RegisterDeviceNotificationW(
            HANDLE(hwnd.0),
            (&filter as *const DEV_BROADCAST_DEVICEINTERFACE_W).cast::<c_void>(),
            DEVICE_NOTIFY_WINDOW_HANDLE,
        );
        match registration {
            Ok(registration) => {
                REGISTRATION.with(|cell| *cell.borrow_mut() = Some(registration));
            }
            Err(e) => {
                let _ = DestroyWindow(hwnd);
                return Err(e.to_string());
            }
        }

        Ok(WindowHandle(hwnd))
    }
}

fn pump_messages() {
    let mut message = MSG::default();

    // SAFETY: standard message loop on the thread owning the window.
    unsafe {
        while GetMessageW(&mut message, None, 0, 0).0 > 0 {
            TranslateMessage(&message);
            DispatchMessageW(&message);
        }
    }
}

fn dispatch(change: InterfaceChange) {
    trace!(?change, "Device interface change");

    CALLBACK.with(|cell| {
        if let Some(callback) = cell.borrow_mut().as_mut() {
            callback(change);
        }
    });
}

/// Reads the symbolic link of a `WM_DEVICECHANGE` payload.
///
/// # Safety
/// `lparam` must be the `DEV_BROADCAST_HDR` pointer of an arrival or removal.
unsafe fn interface_link(lparam: LPARAM) -> Option<String> {
    let header = lparam.0 as *const DEV_BROADCAST_HDR;
    if header.is_null() {
        return None;
    }

    // SAFETY: upheld by the caller; the header tells which struct follows.
    unsafe {
        if (*header).dbch_devicetype != DBT_DEVTYP_DEVICEINTERFACE {
            return None;
        }

        let interface = header.cast::<DEV_BROADCAST_DEVICEINTERFACE_W>();
        PCWSTR((*interface).dbcc_name.as_ptr())
            .to_string()
            .ok()
            .map(|link| link.to_lowercase())
    }
}

extern "system" fn window_proc(hwnd: HWND, message: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match message {
        WM_DEVICECHANGE => {
            let event = wparam.0 as u32;
            if event == DBT_DEVICEARRIVAL || event == DBT_DEVICEREMOVECOMPLETE {
                // SAFETY: arrival and removal carry a broadcast header.
                if let Some(link) = unsafe { interface_link(lparam) } {
                    dispatch(if event == DBT_DEVICEARRIVAL {
                        InterfaceChange::Arrived(link)
                    } else {
                        InterfaceChange::Removed(link)
                    });
                }
            }
            LRESULT(1)
        }
        WM_CLOSE => {
            REGISTRATION.with(|cell| {
                if let Some(registration) = cell.borrow_mut().take() {
                    // SAFETY: registered on this thread in `create_window`.
                    if let Err(e) = unsafe { UnregisterDeviceNotification(registration) } {
                        warn!(error = %e, "Unregistering device notification failed");
                    }
                }
            });

            // SAFETY: the window belongs to this thread.
            unsafe {
                let _ = DestroyWindow(hwnd);
                PostQuitMessage(0);
            }
            LRESULT(0)
        }
        // SAFETY: default handling for everything else.
        _ => unsafe { DefWindowProcW(hwnd, message, wparam, lparam) },
    }
}
