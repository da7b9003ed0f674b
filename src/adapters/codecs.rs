use crate::com::{self, ComBox, ComObject, Implements, Interface};
use crate::engine::CodecModule;
use crate::sevenzip::{
    E_NOTIMPL, E_POINTER, Guid, HRESULT, ICompressCodecsInfo, ICompressCodecsInfoVtbl,
    IUnknownVtbl, PROPID, PROPVARIANT,
};
use std::mem::offset_of;
use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;

/// `CodecsInfo` exposes an attached codec module to an engine archive object.
#[repr(C)]
pub(crate) struct CodecsInfo {
    vtbl: &'static ICompressCodecsInfoVtbl,
    refs: AtomicU32,
    module: Arc<CodecModule>,
}

static VTBL: ICompressCodecsInfoVtbl = ICompressCodecsInfoVtbl {
    base: IUnknownVtbl::of::<CodecsInfo, ICompressCodecsInfo>(),
    get_num_methods,
    get_property,
    create_decoder,
    create_encoder,
};

unsafe impl ComObject for CodecsInfo {
    const INTERFACES: &'static [(Guid, usize)] =
        &[(ICompressCodecsInfo::IID, offset_of!(CodecsInfo, vtbl))];

    fn refs(&self) -> &AtomicU32 {
        &self.refs
    }
}

unsafe impl Implements<ICompressCodecsInfo> for CodecsInfo {
    const OFFSET: usize = offset_of!(CodecsInfo, vtbl);
}

impl CodecsInfo {
    pub(crate) fn new(module: Arc<CodecModule>) -> ComBox<Self> {
        ComBox::new(CodecsInfo {
            vtbl: &VTBL,
            refs: AtomicU32::new(1),
            module,
        })
    }
}

unsafe extern "C" fn get_num_methods(this: *mut c_void, count: *mut u32) -> HRESULT {
    let info = unsafe { com::object::<CodecsInfo, ICompressCodecsInfo>(this) };
    if count.is_null() {
        return E_POINTER;
    }
    unsafe { (info.module.entry_points().get_number_of_methods)(count) }
}

unsafe extern "C" fn get_property(
    this: *mut c_void,
    index: u32,
    property: PROPID,
    value: *mut PROPVARIANT,
) -> HRESULT {
    let info = unsafe { com::object::<CodecsInfo, ICompressCodecsInfo>(this) };
    if value.is_null() {
        return E_POINTER;
    }
    unsafe { (info.module.entry_points().get_method_property)(index, property, value) }
}

unsafe extern "C" fn create_decoder(
    this: *mut c_void,
    index: u32,
    iid: *const Guid,
    coder: *mut *mut c_void,
) -> HRESULT {
    let info = unsafe { com::object::<CodecsInfo, ICompressCodecsInfo>(this) };
    if coder.is_null() {
        return E_POINTER;
    }
    unsafe { (info.module.entry_points().create_decoder)(index, iid, coder) }
}

unsafe extern "C" fn create_encoder(
    _this: *mut c_void,
    _index: u32,
    _iid: *const Guid,
    coder: *mut *mut c_void,
) -> HRESULT {
    if !coder.is_null() {
        unsafe { *coder = ptr::null_mut() };
    }
    E_NOTIMPL
}
