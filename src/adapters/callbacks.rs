use super::OutStream;
use crate::com::{self, ComBox, ComObject, Implements, Interface};
use crate::sevenzip::{
    ASK_MODE_EXTRACT, Bstr, E_FAIL, E_OUTOFMEMORY, E_POINTER, Guid, HRESULT, IArchiveExtractCallback,
    IArchiveExtractCallbackVtbl, IArchiveOpenCallback, IArchiveOpenCallbackVtbl,
    ICryptoGetTextPassword, ICryptoGetTextPasswordVtbl, IProgress, IProgressVtbl,
    ISequentialOutStream, IUnknownVtbl, S_OK, WChar,
};
use log::debug;
use std::mem::offset_of;
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Answers `CryptoGetTextPassword`, failing when no password was supplied.
fn provide_password(password: Option<&str>, out: *mut *mut WChar) -> HRESULT {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe { *out = ptr::null_mut() };
    let Some(password) = password.filter(|password| !password.is_empty()) else {
        debug!("CryptoGetTextPassword: no password available");
        return E_FAIL;
    };
    match Bstr::new(password) {
        Some(bstr) => {
            unsafe { *out = bstr.into_raw() };
            S_OK
        }
        None => E_OUTOFMEMORY,
    }
}

/// `OpenCallback` hands the session password to the engine while it opens an archive.
#[repr(C)]
pub(crate) struct OpenCallback {
    vtbl: &'static IArchiveOpenCallbackVtbl,
    password_vtbl: &'static ICryptoGetTextPasswordVtbl,
    refs: AtomicU32,
    password: String,
}

static OPEN_VTBL: IArchiveOpenCallbackVtbl = IArchiveOpenCallbackVtbl {
    base: IUnknownVtbl::of::<OpenCallback, IArchiveOpenCallback>(),
    set_total: open_progress,
    set_completed: open_progress,
};

static OPEN_PASSWORD_VTBL: ICryptoGetTextPasswordVtbl = ICryptoGetTextPasswordVtbl {
    base: IUnknownVtbl::of::<OpenCallback, ICryptoGetTextPassword>(),
    crypto_get_text_password: open_password,
};

unsafe impl ComObject for OpenCallback {
    const INTERFACES: &'static [(Guid, usize)] = &[
        (IArchiveOpenCallback::IID, offset_of!(OpenCallback, vtbl)),
        (ICryptoGetTextPassword::IID, offset_of!(OpenCallback, password_vtbl)),
    ];

    fn refs(&self) -> &AtomicU32 {
        &self.refs
    }
}

unsafe impl Implements<IArchiveOpenCallback> for OpenCallback {
    const OFFSET: usize = offset_of!(OpenCallback, vtbl);
}

unsafe impl Implements<ICryptoGetTextPassword> for OpenCallback {
    const OFFSET: usize = offset_of!(OpenCallback, password_vtbl);
}

impl OpenCallback {
    pub(crate) fn new(password: &str) -> ComBox<Self> {
        ComBox::new(OpenCallback {
            vtbl: &OPEN_VTBL,
            password_vtbl: &OPEN_PASSWORD_VTBL,
            refs: AtomicU32::new(1),
            password: password.to_string(),
        })
    }
}

unsafe extern "C" fn open_progress(_this: *mut c_void, _files: *const u64, _bytes: *const u64) -> HRESULT {
    S_OK
}

unsafe extern "C" fn open_password(this: *mut c_void, out: *mut *mut WChar) -> HRESULT {
    let callback = unsafe { com::object::<OpenCallback, ICryptoGetTextPassword>(this) };
    provide_password(Some(&callback.password), out)
}

/// `ExtractCallback` routes one item's content into a destination buffer
/// and records the engine's verdict on it.
#[repr(C)]
pub(crate) struct ExtractCallback {
    vtbl: &'static IArchiveExtractCallbackVtbl,
    password_vtbl: &'static ICryptoGetTextPasswordVtbl,
    refs: AtomicU32,
    destination: ComBox<OutStream>,
    password: Option<String>,
    operation_result: AtomicI32,
}

static EXTRACT_VTBL: IArchiveExtractCallbackVtbl = IArchiveExtractCallbackVtbl {
    progress: IProgressVtbl {
        base: IUnknownVtbl::of::<ExtractCallback, IArchiveExtractCallback>(),
        set_total: extract_set_total,
        set_completed: extract_set_completed,
    },
    get_stream: extract_get_stream,
    prepare_operation: extract_prepare_operation,
    set_operation_result: extract_set_operation_result,
};

static EXTRACT_PASSWORD_VTBL: ICryptoGetTextPasswordVtbl = ICryptoGetTextPasswordVtbl {
    base: IUnknownVtbl::of::<ExtractCallback, ICryptoGetTextPassword>(),
    crypto_get_text_password: extract_password,
};

unsafe impl ComObject for ExtractCallback {
    const INTERFACES: &'static [(Guid, usize)] = &[
        (IArchiveExtractCallback::IID, offset_of!(ExtractCallback, vtbl)),
        (IProgress::IID, offset_of!(ExtractCallback, vtbl)),
        (ICryptoGetTextPassword::IID, offset_of!(ExtractCallback, password_vtbl)),
    ];

    fn refs(&self) -> &AtomicU32 {
        &self.refs
    }
}

unsafe impl Implements<IArchiveExtractCallback> for ExtractCallback {
    const OFFSET: usize = offset_of!(ExtractCallback, vtbl);
}

unsafe impl Implements<ICryptoGetTextPassword> for ExtractCallback {
    const OFFSET: usize = offset_of!(ExtractCallback, password_vtbl);
}

impl ExtractCallback {
    /// # Safety
    /// Same contract as [`OutStream::new`] for `destination`.
    pub(crate) unsafe fn new(destination: &mut [u8], password: Option<&str>) -> ComBox<Self> {
        ComBox::new(ExtractCallback {
            vtbl: &EXTRACT_VTBL,
            password_vtbl: &EXTRACT_PASSWORD_VTBL,
            refs: AtomicU32::new(1),
            destination: unsafe { OutStream::new(destination) },
            password: password.map(str::to_string),
            operation_result: AtomicI32::new(0),
        })
    }

    /// The last `NOperationResult` reported by the engine.
    pub(crate) fn operation_result(&self) -> i32 {
        self.operation_result.load(Ordering::Acquire)
    }

    pub(crate) fn written(&self) -> usize {
        self.destination.written()
    }
}

unsafe extern "C" fn extract_set_total(_this: *mut c_void, _total: u64) -> HRESULT {
    S_OK
}

unsafe extern "C" fn extract_set_completed(_this: *mut c_void, _completed: *const u64) -> HRESULT {
    S_OK
}

unsafe extern "C" fn extract_get_stream(
    this: *mut c_void,
    index: u32,
    out: *mut *mut c_void,
    ask_extract_mode: i32,
) -> HRESULT {
    if out.is_null() {
        return E_POINTER;
    }
    let callback = unsafe { com::object::<ExtractCallback, IArchiveExtractCallback>(this) };
    if ask_extract_mode != ASK_MODE_EXTRACT {
        unsafe { *out = ptr::null_mut() };
        return S_OK;
    }
    debug!("IArchiveExtractCallback::GetStream(index: {index})");
    let stream = callback.destination.interface::<ISequentialOutStream>();
    unsafe { *out = stream.into_raw() };
    S_OK
}

unsafe extern "C" fn extract_prepare_operation(_this: *mut c_void, _ask_extract_mode: i32) -> HRESULT {
    S_OK
}

unsafe extern "C" fn extract_set_operation_result(this: *mut c_void, result: i32) -> HRESULT {
    let callback = unsafe { com::object::<ExtractCallback, IArchiveExtractCallback>(this) };
    callback.operation_result.store(result, Ordering::Release);
    if result != 0 {
        debug!("IArchiveExtractCallback::SetOperationResult: {result}");
        return E_FAIL;
    }
    S_OK
}

unsafe extern "C" fn extract_password(this: *mut c_void, out: *mut *mut WChar) -> HRESULT {
    let callback = unsafe { com::object::<ExtractCallback, ICryptoGetTextPassword>(this) };
    provide_password(callback.password.as_deref(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::ComPtr;

    fn ask_password(object: &ComPtr<ICryptoGetTextPassword>) -> (HRESULT, Option<String>) {
        let mut out = ptr::null_mut();
        let hr = unsafe { (object.vtbl().crypto_get_text_password)(object.as_raw(), &mut out) };
        let text = unsafe { Bstr::from_raw(out) }.map(|bstr| bstr.to_string_lossy());
        (hr, text)
    }

    #[test]
    fn test_open_callback_supplies_password() {
        let callback = OpenCallback::new("secret").interface::<IArchiveOpenCallback>();
        let password = callback.query::<ICryptoGetTextPassword>().unwrap();
        assert_eq!(ask_password(&password), (S_OK, Some("secret".into())));
    }

    #[test]
    fn test_extract_callback_without_password_fails_request() {
        let mut destination = [0u8; 1];
        let object = unsafe { ExtractCallback::new(&mut destination, None) };
        let password = object.interface::<ICryptoGetTextPassword>();
        assert_eq!(ask_password(&password), (E_FAIL, None));
    }

    #[test]
    fn test_stream_only_offered_for_extraction() {
        let mut destination = [0u8; 4];
        let object = unsafe { ExtractCallback::new(&mut destination, None) };
        let callback = object.interface::<IArchiveExtractCallback>();
        let get_stream = callback.vtbl().get_stream;

        let mut out = ptr::null_mut();
        assert_eq!(unsafe { get_stream(callback.as_raw(), 0, &mut out, 1) }, S_OK);
        assert!(out.is_null());

        assert_eq!(unsafe { get_stream(callback.as_raw(), 0, &mut out, ASK_MODE_EXTRACT) }, S_OK);
        let stream = unsafe { ComPtr::<ISequentialOutStream>::from_raw(out) }.unwrap();
        let mut processed = 0;
        let hr = unsafe { (stream.vtbl().write)(stream.as_raw(), b"xy".as_ptr().cast(), 2, &mut processed) };
        assert_eq!(hr, S_OK);
        assert_eq!(object.written(), 2);
    }

    #[test]
    fn test_nonzero_operation_result_fails() {
        let mut destination = [0u8; 1];
        let object = unsafe { ExtractCallback::new(&mut destination, Some("pw")) };
        let callback = object.interface::<IArchiveExtractCallback>();
        let set_result = callback.vtbl().set_operation_result;
        assert_eq!(unsafe { set_result(callback.as_raw(), 0) }, S_OK);
        assert_eq!(unsafe { set_result(callback.as_raw(), 9) }, E_FAIL);
        assert_eq!(object.operation_result(), 9);
    }

    #[test]
    fn test_progress_is_reachable_by_query() {
        let mut destination = [0u8; 1];
        let object = unsafe { ExtractCallback::new(&mut destination, None) };
        let callback = object.interface::<IArchiveExtractCallback>();
        let progress = callback.query::<IProgress>().unwrap();
        assert_eq!(progress.as_raw(), callback.as_raw());
        assert_eq!(unsafe { (progress.vtbl().set_total)(progress.as_raw(), 10) }, S_OK);
    }
}
