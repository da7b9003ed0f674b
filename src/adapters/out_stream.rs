use crate::com::{self, ComBox, ComObject, Implements, Interface};
use crate::sevenzip::{
    E_POINTER, Guid, HRESULT, ISequentialOutStream, ISequentialOutStreamVtbl, IUnknownVtbl, S_OK,
};
use parking_lot::Mutex;
use std::mem::offset_of;
use std::os::raw::c_void;
use std::sync::atomic::AtomicU32;

/// `OutStream` writes sequentially into a caller-sized buffer.
/// Bytes past the buffer's capacity are accepted and dropped.
#[repr(C)]
pub(crate) struct OutStream {
    vtbl: &'static ISequentialOutStreamVtbl,
    refs: AtomicU32,
    data: *mut u8,
    capacity: usize,
    written: Mutex<usize>,
}

// Only the engine's extraction thread writes through `data`, under `written`.
unsafe impl Send for OutStream {}
unsafe impl Sync for OutStream {}

static VTBL: ISequentialOutStreamVtbl = ISequentialOutStreamVtbl {
    base: IUnknownVtbl::of::<OutStream, ISequentialOutStream>(),
    write,
};

unsafe impl ComObject for OutStream {
    const INTERFACES: &'static [(Guid, usize)] =
        &[(ISequentialOutStream::IID, offset_of!(OutStream, vtbl))];

    fn refs(&self) -> &AtomicU32 {
        &self.refs
    }
}

unsafe impl Implements<ISequentialOutStream> for OutStream {
    const OFFSET: usize = offset_of!(OutStream, vtbl);
}

impl OutStream {
    /// # Safety
    /// `destination` must stay valid, and otherwise untouched, until the engine
    /// releases its last reference.
    pub(crate) unsafe fn new(destination: &mut [u8]) -> ComBox<Self> {
        ComBox::new(OutStream {
            vtbl: &VTBL,
            refs: AtomicU32::new(1),
            data: destination.as_mut_ptr(),
            capacity: destination.len(),
            written: Mutex::new(0),
        })
    }

    /// Number of bytes stored in the destination so far.
    pub(crate) fn written(&self) -> usize {
        *self.written.lock()
    }

    fn store(&self, bytes: &[u8]) {
        let mut written = self.written.lock();
        let count = bytes.len().min(self.capacity - *written);
        if count > 0 {
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.add(*written), count) };
            *written += count;
        }
    }
}

unsafe extern "C" fn write(this: *mut c_void, data: *const c_void, size: u32, processed: *mut u32) -> HRESULT {
    let stream = unsafe { com::object::<OutStream, ISequentialOutStream>(this) };
    if size > 0 {
        if data.is_null() {
            return E_POINTER;
        }
        stream.store(unsafe { std::slice::from_raw_parts(data.cast::<u8>(), size as usize) });
    }
    if !processed.is_null() {
        unsafe { *processed = size };
    }
    S_OK
}
