#![allow(unsafe_code)]

use std::ops::Deref;

use windows::{
    Win32::System::Com::{
        CO_MTA_USAGE_COOKIE, CoDecrementMTAUsage, CoIncrementMTAUsage, CoTaskMemFree,
    },
    core::PWSTR,
};

/// Keeps the process-wide multithreaded apartment alive.
///
/// Threads that never initialized COM then run in the implicit MTA, so
/// free-threaded objects may be used from any of them.
#[derive(Debug)]
pub struct MtaUsage {
    cookie: CO_MTA_USAGE_COOKIE,
}

impl MtaUsage {
    /// Takes a reference on the MTA.
    ///
    /// # Errors
    /// Returns error if COM cannot create the apartment
    pub fn acquire() -> windows::core::Result<Self> {
        // SAFETY: paired with CoDecrementMTAUsage in Drop.
        let cookie = unsafe { CoIncrementMTAUsage() }?;
        Ok(Self { cookie })
    }
}

// SAFETY: the cookie is a plain token, valid on any thread.
unsafe impl Send for MtaUsage {}
// SAFETY: see above; the cookie is never mutated.
unsafe impl Sync for MtaUsage {}

impl Drop for MtaUsage {
    fn drop(&mut self) {
        // SAFETY: the cookie came from CoIncrementMTAUsage.
        if let Err(e) = unsafe { CoDecrementMTAUsage(self.cookie) } {
            tracing::warn!(error = %e, "Releasing the MTA failed");
        }
    }
}

/// Free-threaded COM object shared between threads.
///
/// Only for objects that live in the multithreaded apartment, such as the
/// MMDevice enumerator.
#[derive(Debug, Clone)]
pub struct Agile<T>(T);

impl<T> Agile<T> {
    /// Wraps a free-threaded object.
    pub fn new(inner: T) -> Self {
        Self(inner)
    }
}

// SAFETY: restricted to free-threaded objects, see type docs.
unsafe impl<T> Send for Agile<T> {}
// SAFETY: restricted to free-threaded objects, see type docs.
unsafe impl<T> Sync for Agile<T> {}

impl<T> Deref for Agile<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Copies and frees a COM allocated wide string.
pub fn take_co_string(value: PWSTR) -> Option<String> {
    if value.is_null() {
        return None;
    }

    // SAFETY: COM returned a NUL terminated string we now own.
    let text = unsafe { value.to_string() }.ok();
    // SAFETY: allocated by COM with CoTaskMemAlloc.
    unsafe { CoTaskMemFree(Some(value.0 as *const _)) };

    text
}
