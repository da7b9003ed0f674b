use super::{Guid, HRESULT, PROPID, PROPVARIANT, VARTYPE, Variant, WChar, failed};
use crate::com::{self, ComPtr, Implements, Interface};
use std::os::raw::c_void;
use std::ptr;

type This = *mut c_void;

/// First entries of every vtable.
#[repr(C)]
pub(crate) struct IUnknownVtbl {
    pub(crate) query_interface: unsafe extern "C" fn(This, *const Guid, *mut *mut c_void) -> HRESULT,
    pub(crate) add_ref: unsafe extern "C" fn(This) -> u32,
    pub(crate) release: unsafe extern "C" fn(This) -> u32,
    /// Complete and deleting destructors of the Itanium C++ ABI.
    /// Engines release objects through `Release` only, so ours do nothing.
    #[cfg(feature = "p7zip-vtable")]
    pub(crate) destructors: [unsafe extern "C" fn(This); 2],
}

#[cfg(feature = "p7zip-vtable")]
unsafe extern "C" fn no_destructor(_this: This) {}

impl IUnknownVtbl {
    /// Builds the `IUnknown` part of `I`'s vtable for an object of type `T`.
    pub(crate) const fn of<T: Implements<I>, I: Interface>() -> Self {
        IUnknownVtbl {
            query_interface: com::query_interface::<T, I>,
            add_ref: com::add_ref::<T, I>,
            release: com::release::<T, I>,
            #[cfg(feature = "p7zip-vtable")]
            destructors: [no_destructor, no_destructor],
        }
    }
}

#[repr(C)]
pub(crate) struct IInStreamVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) read: unsafe extern "C" fn(This, *mut c_void, u32, *mut u32) -> HRESULT,
    pub(crate) seek: unsafe extern "C" fn(This, i64, u32, *mut u64) -> HRESULT,
}

#[repr(C)]
pub(crate) struct ISequentialOutStreamVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) write: unsafe extern "C" fn(This, *const c_void, u32, *mut u32) -> HRESULT,
}

#[repr(C)]
pub(crate) struct IProgressVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) set_total: unsafe extern "C" fn(This, u64) -> HRESULT,
    pub(crate) set_completed: unsafe extern "C" fn(This, *const u64) -> HRESULT,
}

#[repr(C)]
pub(crate) struct IArchiveExtractCallbackVtbl {
    pub(crate) progress: IProgressVtbl,
    pub(crate) get_stream: unsafe extern "C" fn(This, u32, *mut This, i32) -> HRESULT,
    pub(crate) prepare_operation: unsafe extern "C" fn(This, i32) -> HRESULT,
    pub(crate) set_operation_result: unsafe extern "C" fn(This, i32) -> HRESULT,
}

#[repr(C)]
pub(crate) struct IArchiveOpenCallbackVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) set_total: unsafe extern "C" fn(This, *const u64, *const u64) -> HRESULT,
    pub(crate) set_completed: unsafe extern "C" fn(This, *const u64, *const u64) -> HRESULT,
}

#[repr(C)]
pub(crate) struct ICryptoGetTextPasswordVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) crypto_get_text_password: unsafe extern "C" fn(This, *mut *mut WChar) -> HRESULT,
}

#[repr(C)]
pub(crate) struct ICompressCodecsInfoVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) get_num_methods: unsafe extern "C" fn(This, *mut u32) -> HRESULT,
    pub(crate) get_property: unsafe extern "C" fn(This, u32, PROPID, *mut PROPVARIANT) -> HRESULT,
    pub(crate) create_decoder: unsafe extern "C" fn(This, u32, *const Guid, *mut This) -> HRESULT,
    pub(crate) create_encoder: unsafe extern "C" fn(This, u32, *const Guid, *mut This) -> HRESULT,
}

#[repr(C)]
pub(crate) struct ISetCompressCodecsInfoVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) set_compress_codecs_info: unsafe extern "C" fn(This, This) -> HRESULT,
}

#[repr(C)]
pub(crate) struct IInArchiveVtbl {
    pub(crate) base: IUnknownVtbl,
    pub(crate) open: unsafe extern "C" fn(This, This, *const u64, This) -> HRESULT,
    pub(crate) close: unsafe extern "C" fn(This) -> HRESULT,
    pub(crate) get_number_of_items: unsafe extern "C" fn(This, *mut u32) -> HRESULT,
    pub(crate) get_property: unsafe extern "C" fn(This, u32, PROPID, *mut PROPVARIANT) -> HRESULT,
    pub(crate) extract: unsafe extern "C" fn(This, *const u32, u32, i32, This) -> HRESULT,
    pub(crate) get_archive_property: unsafe extern "C" fn(This, PROPID, *mut PROPVARIANT) -> HRESULT,
    pub(crate) get_number_of_properties: unsafe extern "C" fn(This, *mut u32) -> HRESULT,
    pub(crate) get_property_info:
        unsafe extern "C" fn(This, u32, *mut *mut WChar, *mut PROPID, *mut VARTYPE) -> HRESULT,
    pub(crate) get_number_of_archive_properties: unsafe extern "C" fn(This, *mut u32) -> HRESULT,
    pub(crate) get_archive_property_info:
        unsafe extern "C" fn(This, u32, *mut *mut WChar, *mut PROPID, *mut VARTYPE) -> HRESULT,
}

macro_rules! interfaces {
    ($($name:ident => $iid:ident, $vtbl:ty;)*) => {
        $(
            pub(crate) enum $name {}

            unsafe impl Interface for $name {
                const IID: Guid = super::$iid;
                type Vtbl = $vtbl;
            }
        )*
    };
}

interfaces! {
    IUnknown => IID_IUNKNOWN, IUnknownVtbl;
    IInStream => IID_IIN_STREAM, IInStreamVtbl;
    ISequentialOutStream => IID_ISEQUENTIAL_OUT_STREAM, ISequentialOutStreamVtbl;
    IProgress => IID_IPROGRESS, IProgressVtbl;
    IArchiveExtractCallback => IID_IARCHIVE_EXTRACT_CALLBACK, IArchiveExtractCallbackVtbl;
    IArchiveOpenCallback => IID_IARCHIVE_OPEN_CALLBACK, IArchiveOpenCallbackVtbl;
    ICryptoGetTextPassword => IID_ICRYPTO_GET_TEXT_PASSWORD, ICryptoGetTextPasswordVtbl;
    ICompressCodecsInfo => IID_ICOMPRESS_CODECS_INFO, ICompressCodecsInfoVtbl;
    ISetCompressCodecsInfo => IID_ISET_COMPRESS_CODECS_INFO, ISetCompressCodecsInfoVtbl;
    IInArchive => IID_IIN_ARCHIVE, IInArchiveVtbl;
}

fn raw_or_null<I: Interface>(pointer: Option<&ComPtr<I>>) -> This {
    pointer.map_or(ptr::null_mut(), ComPtr::as_raw)
}

impl ComPtr<IInArchive> {
    pub(crate) fn open(
        &self,
        stream: &ComPtr<IInStream>,
        max_check_start_position: Option<u64>,
        callback: Option<&ComPtr<IArchiveOpenCallback>>,
    ) -> HRESULT {
        let max_check = max_check_start_position
            .as_ref()
            .map_or(ptr::null(), |position| position as *const u64);
        unsafe {
            (self.vtbl().open)(
                self.as_raw(),
                stream.as_raw(),
                max_check,
                raw_or_null(callback),
            )
        }
    }

    pub(crate) fn close(&self) -> HRESULT {
        unsafe { (self.vtbl().close)(self.as_raw()) }
    }

    pub(crate) fn number_of_items(&self) -> Result<u32, HRESULT> {
        let mut count = 0;
        let hr = unsafe { (self.vtbl().get_number_of_items)(self.as_raw(), &mut count) };
        if failed(hr) { Err(hr) } else { Ok(count) }
    }

    pub(crate) fn property(&self, index: u32, property: PROPID) -> Result<Variant, HRESULT> {
        let mut value = PROPVARIANT::empty();
        let hr = unsafe { (self.vtbl().get_property)(self.as_raw(), index, property, &mut value) };
        if failed(hr) {
            return Err(hr);
        }
        Ok(unsafe { value.into_variant() })
    }

    pub(crate) fn extract(
        &self,
        indices: &[u32],
        test_mode: bool,
        callback: &ComPtr<IArchiveExtractCallback>,
    ) -> HRESULT {
        let Ok(count) = u32::try_from(indices.len()) else {
            return super::E_INVALIDARG;
        };
        unsafe {
            (self.vtbl().extract)(
                self.as_raw(),
                indices.as_ptr(),
                count,
                i32::from(test_mode),
                callback.as_raw(),
            )
        }
    }
}

impl ComPtr<ISetCompressCodecsInfo> {
    pub(crate) fn set_compress_codecs_info(&self, info: &ComPtr<ICompressCodecsInfo>) -> HRESULT {
        unsafe { (self.vtbl().set_compress_codecs_info)(self.as_raw(), info.as_raw()) }
    }
}
