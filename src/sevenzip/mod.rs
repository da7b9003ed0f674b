//! Binary contract of 7-Zip-compatible engine and codec modules.
#![allow(non_camel_case_types)]

mod interfaces;
mod library;
mod variant;

pub(crate) use interfaces::*;
pub(crate) use library::Library;
pub use variant::FileTime;
pub(crate) use variant::{Bstr, PROPVARIANT, Variant};

use std::os::raw::c_void;

pub(crate) type HRESULT = i32;
pub(crate) type PROPID = u32;
pub(crate) type VARTYPE = u16;
pub(crate) type WChar = libc::wchar_t;

pub(crate) const S_OK: HRESULT = 0;
pub(crate) const S_FALSE: HRESULT = 1;
pub(crate) const E_NOTIMPL: HRESULT = 0x8000_4001_u32 as HRESULT;
pub(crate) const E_NOINTERFACE: HRESULT = 0x8000_4002_u32 as HRESULT;
pub(crate) const E_POINTER: HRESULT = 0x8000_4003_u32 as HRESULT;
pub(crate) const E_FAIL: HRESULT = 0x8000_4005_u32 as HRESULT;
pub(crate) const E_OUTOFMEMORY: HRESULT = 0x8007_000E_u32 as HRESULT;
pub(crate) const E_INVALIDARG: HRESULT = 0x8007_0057_u32 as HRESULT;
pub(crate) const E_NEGATIVE_SEEK: HRESULT = 0x8007_0083_u32 as HRESULT;
pub(crate) const STG_E_INVALIDFUNCTION: HRESULT = 0x8003_0001_u32 as HRESULT;

pub(crate) const fn failed(hr: HRESULT) -> bool {
    hr < 0
}

pub(crate) const STREAM_SEEK_SET: u32 = 0;
pub(crate) const STREAM_SEEK_CUR: u32 = 1;
pub(crate) const STREAM_SEEK_END: u32 = 2;

/// `NArchive::NExtract::NAskMode::kExtract`
pub(crate) const ASK_MODE_EXTRACT: i32 = 0;

// Item properties (kpid*)
pub(crate) const KPID_PATH: PROPID = 3;
pub(crate) const KPID_IS_DIR: PROPID = 6;
pub(crate) const KPID_SIZE: PROPID = 7;
pub(crate) const KPID_MTIME: PROPID = 12;

/// Handler properties reported by `GetHandlerProperty2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum HandlerProperty {
    Name = 0,
    ClassId = 1,
    Signature = 6,
    MultiSignature = 7,
    SignatureOffset = 8,
}

impl HandlerProperty {
    pub(crate) fn label(self) -> &'static str {
        match self {
            HandlerProperty::Name => "kName",
            HandlerProperty::ClassId => "kClassID",
            HandlerProperty::Signature => "kSignature",
            HandlerProperty::MultiSignature => "kMultiSignature",
            HandlerProperty::SignatureOffset => "kSignatureOffset",
        }
    }
}

/// 128-bit interface / class identifier in its in-memory layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Reads a GUID stored as raw bytes, as engines report `kClassID`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; 16] = bytes.get(..16)?.try_into().ok()?;
        let mut data4 = [0; 8];
        data4.copy_from_slice(&bytes[8..]);
        Some(Self {
            data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_le_bytes([bytes[4], bytes[5]]),
            data3: u16::from_le_bytes([bytes[6], bytes[7]]),
            data4,
        })
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// All 7-Zip interfaces share the `{23170F69-40C1-278A-0000-00gg00ii0000}` pattern.
const fn sevenzip_iid(group: u8, id: u8) -> Guid {
    Guid::new(0x23170F69, 0x40C1, 0x278A, [0, 0, 0, group, 0, id, 0, 0])
}

pub(crate) const IID_IUNKNOWN: Guid = Guid::new(0, 0, 0, [0xC0, 0, 0, 0, 0, 0, 0, 0x46]);
pub(crate) const IID_IPROGRESS: Guid = sevenzip_iid(0x00, 0x05);
pub(crate) const IID_ISEQUENTIAL_OUT_STREAM: Guid = sevenzip_iid(0x03, 0x02);
pub(crate) const IID_IIN_STREAM: Guid = sevenzip_iid(0x03, 0x03);
pub(crate) const IID_ICOMPRESS_CODECS_INFO: Guid = sevenzip_iid(0x04, 0x60);
pub(crate) const IID_ISET_COMPRESS_CODECS_INFO: Guid = sevenzip_iid(0x04, 0x61);
pub(crate) const IID_ICRYPTO_GET_TEXT_PASSWORD: Guid = sevenzip_iid(0x05, 0x10);
pub(crate) const IID_IARCHIVE_OPEN_CALLBACK: Guid = sevenzip_iid(0x06, 0x10);
pub(crate) const IID_IARCHIVE_EXTRACT_CALLBACK: Guid = sevenzip_iid(0x06, 0x20);
pub(crate) const IID_IIN_ARCHIVE: Guid = sevenzip_iid(0x06, 0x60);

// Engine module exports.
pub(crate) type CreateObjectFn =
    unsafe extern "C" fn(*const Guid, *const Guid, *mut *mut c_void) -> HRESULT;
pub(crate) type GetNumberOfFormatsFn = unsafe extern "C" fn(*mut u32) -> HRESULT;
pub(crate) type GetHandlerProperty2Fn =
    unsafe extern "C" fn(u32, PROPID, *mut PROPVARIANT) -> HRESULT;

// Codec module exports.
pub(crate) type GetNumberOfMethodsFn = unsafe extern "C" fn(*mut u32) -> HRESULT;
pub(crate) type GetMethodPropertyFn =
    unsafe extern "C" fn(u32, PROPID, *mut PROPVARIANT) -> HRESULT;
pub(crate) type CreateDecoderFn =
    unsafe extern "C" fn(u32, *const Guid, *mut *mut c_void) -> HRESULT;
