use crate::com::{self, ComBox, ComObject, Implements, Interface};
use crate::sevenzip::{
    E_INVALIDARG, E_NEGATIVE_SEEK, E_POINTER, Guid, HRESULT, IInStream, IInStreamVtbl,
    IUnknownVtbl, S_OK, STG_E_INVALIDFUNCTION, STREAM_SEEK_CUR, STREAM_SEEK_END, STREAM_SEEK_SET,
};
use parking_lot::Mutex;
use std::mem::offset_of;
use std::os::raw::c_void;
use std::sync::atomic::AtomicU32;

/// `InStream` serves random-access reads over a fixed memory region.
#[repr(C)]
pub(crate) struct InStream {
    vtbl: &'static IInStreamVtbl,
    refs: AtomicU32,
    data: *const u8,
    len: u64,
    position: Mutex<u64>,
}

// The region is never written through `data`.
unsafe impl Send for InStream {}
unsafe impl Sync for InStream {}

static VTBL: IInStreamVtbl = IInStreamVtbl {
    base: IUnknownVtbl::of::<InStream, IInStream>(),
    read,
    seek,
};

unsafe impl ComObject for InStream {
    const INTERFACES: &'static [(Guid, usize)] = &[(IInStream::IID, offset_of!(InStream, vtbl))];

    fn refs(&self) -> &AtomicU32 {
        &self.refs
    }
}

unsafe impl Implements<IInStream> for InStream {
    const OFFSET: usize = offset_of!(InStream, vtbl);
}

impl InStream {
    /// # Safety
    /// `data` must stay valid until the engine releases its last reference.
    pub(crate) unsafe fn new(data: &[u8]) -> ComBox<Self> {
        ComBox::new(InStream {
            vtbl: &VTBL,
            refs: AtomicU32::new(1),
            data: data.as_ptr(),
            len: data.len() as u64,
            position: Mutex::new(0),
        })
    }

    fn read_into(&self, out: &mut [u8]) -> usize {
        let mut position = self.position.lock();
        let remaining = self.len.saturating_sub(*position);
        let count = remaining.min(out.len() as u64) as usize;
        if count > 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.data.add(*position as usize),
                    out.as_mut_ptr(),
                    count,
                );
            }
            *position += count as u64;
        }
        count
    }

    fn seek_to(&self, offset: i64, origin: u32) -> Result<u64, HRESULT> {
        let mut position = self.position.lock();
        let base = match origin {
            STREAM_SEEK_SET => 0,
            STREAM_SEEK_CUR => *position as i64,
            STREAM_SEEK_END => self.len as i64,
            _ => return Err(STG_E_INVALIDFUNCTION),
        };
        let target = base.checked_add(offset).ok_or(E_INVALIDARG)?;
        if target < 0 {
            return Err(E_NEGATIVE_SEEK);
        }
        *position = target as u64;
        Ok(*position)
    }
}

unsafe extern "C" fn read(this: *mut c_void, data: *mut c_void, size: u32, processed: *mut u32) -> HRESULT {
    let stream = unsafe { com::object::<InStream, IInStream>(this) };
    if !processed.is_null() {
        unsafe { *processed = 0 };
    }
    if size == 0 {
        return S_OK;
    }
    if data.is_null() {
        return E_POINTER;
    }
    let out = unsafe { std::slice::from_raw_parts_mut(data.cast::<u8>(), size as usize) };
    let count = stream.read_into(out);
    if !processed.is_null() {
        unsafe { *processed = count as u32 };
    }
    S_OK
}

unsafe extern "C" fn seek(this: *mut c_void, offset: i64, origin: u32, new_position: *mut u64) -> HRESULT {
    let stream = unsafe { com::object::<InStream, IInStream>(this) };
    match stream.seek_to(offset, origin) {
        Ok(position) => {
            if !new_position.is_null() {
                unsafe { *new_position = position };
            }
            S_OK
        }
        Err(hr) => hr,
    }
}
