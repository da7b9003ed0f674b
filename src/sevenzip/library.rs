use crate::error::{Error, Result};
use log::{debug, error, info};
use std::ffi::{CStr, CString};
use std::os::raw::c_void;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// A dynamically loaded module, unloaded on drop.
pub(crate) struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

// The module handle is only passed to dlsym / dlclose, both thread safe.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        info!(r#"Library::open(path: "{}")"#, path.display());
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::InvalidArgument("module path contains a NUL byte".into()))?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LOCAL | libc::RTLD_NOW) };
        match NonNull::new(handle) {
            Some(handle) => Ok(Library {
                handle,
                path: path.into(),
            }),
            None => {
                let reason = last_dl_error();
                error!(r#"dlopen("{}") failed: {reason}"#, path.display());
                Err(Error::ModuleLoad {
                    path: path.display().to_string(),
                    reason,
                })
            }
        }
    }

    /// Resolves an exported function.
    ///
    /// # Safety
    /// `T` must be a function pointer type matching the export's real signature.
    pub(crate) unsafe fn symbol<T: Copy>(&self, name: &CStr) -> Result<T> {
        debug_assert_eq!(size_of::<T>(), size_of::<*mut c_void>());
        let address = unsafe {
            libc::dlerror();
            libc::dlsym(self.handle.as_ptr(), name.as_ptr())
        };
        if address.is_null() {
            let symbol = name.to_string_lossy().into_owned();
            error!(r#"dlsym("{symbol}") failed in "{}""#, self.path.display());
            return Err(Error::MissingSymbol {
                symbol,
                path: self.path.display().to_string(),
            });
        }
        debug!(r#"dlsym("{}"): resolved"#, name.to_string_lossy());
        Ok(unsafe { std::mem::transmute_copy::<*mut c_void, T>(&address) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        debug!(r#"dlclose("{}")"#, self.path.display());
        if unsafe { libc::dlclose(self.handle.as_ptr()) } != 0 {
            error!("Failed to unload {}: {}", self.path.display(), last_dl_error());
        }
    }
}

fn last_dl_error() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    }
}
