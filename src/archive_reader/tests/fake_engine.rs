//! An engine module implemented in this process, over a small text archive format:
//!
//! ```text
//! FAKE                        signature line, skipped by the parser
//! password=secret             optional: file contents need this password
//! header-password=secret      optional: opening needs this password
//! f<TAB>docs/readme.txt<TAB>hello
//! d<TAB>docs
//! ```
//!
//! Entry kinds: `f` file, `d` directory, `n` file without a path, `x` file whose path
//! cannot be read, `b` file whose directory flag cannot be read, `s` directory whose
//! size and modification time cannot be read, `c` file that fails its CRC check after
//! being written out.

use crate::com::{self, ComBox, ComObject, ComPtr, Implements, Interface};
use crate::engine::{CodecEntryPoints, EngineEntryPoints};
use crate::sevenzip::{
    ASK_MODE_EXTRACT, Bstr, E_FAIL, E_INVALIDARG, E_NOINTERFACE, E_NOTIMPL, E_POINTER, FileTime,
    Guid, HRESULT, HandlerProperty, IArchiveExtractCallback, IArchiveOpenCallback,
    ICompressCodecsInfo, ICryptoGetTextPassword, IInArchive, IInArchiveVtbl, IInStream,
    ISequentialOutStream, ISetCompressCodecsInfo, ISetCompressCodecsInfoVtbl, IUnknownVtbl,
    KPID_IS_DIR, KPID_MTIME, KPID_PATH, KPID_SIZE, PROPID, PROPVARIANT, S_FALSE, S_OK,
    STREAM_SEEK_END, STREAM_SEEK_SET, Variant, WChar, failed,
};
use parking_lot::RwLock;
use std::mem::{ManuallyDrop, offset_of};
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU32, Ordering};

const CLASS_E_CLASSNOTAVAILABLE: HRESULT = 0x8004_0111_u32 as HRESULT;

/// Modification time of entry 0; entry `i` is `i` ticks later.
pub(crate) const FAKE_MTIME: u64 = 133_000_000_000_000_000;

pub(crate) const FAKE_CLASS_ID: Guid = Guid::new(0x23170F69, 0x40C1, 0x278A, [0x10, 0, 0, 0x01, 0x10, 0xF0, 0, 0]);
pub(crate) const MULTI_CLASS_ID: Guid = Guid::new(0x23170F69, 0x40C1, 0x278A, [0x10, 0, 0, 0x01, 0x10, 0xF1, 0, 0]);
pub(crate) const BARE_CLASS_ID: Guid = Guid::new(0x23170F69, 0x40C1, 0x278A, [0x10, 0, 0, 0x01, 0x10, 0xF2, 0, 0]);

struct FakeFormat {
    name: &'static str,
    class_id: Guid,
    signature: &'static [u8],
    multi_signature: &'static [u8],
    offset: Option<u64>,
}

const FORMATS: [FakeFormat; 3] = [
    FakeFormat {
        name: "Fake",
        class_id: FAKE_CLASS_ID,
        signature: b"FAKE",
        multi_signature: b"",
        offset: Some(0),
    },
    FakeFormat {
        name: "Multi",
        class_id: MULTI_CLASS_ID,
        signature: b"",
        multi_signature: b"\x03MZ1\x04MZ22",
        offset: Some(2),
    },
    FakeFormat {
        name: "Bare",
        class_id: BARE_CLASS_ID,
        signature: b"",
        multi_signature: b"",
        offset: None,
    },
];

/// Archive objects currently alive.
pub(crate) static LIVE_ARCHIVES: AtomicIsize = AtomicIsize::new(0);
/// Whether the last `Open` call received an open callback.
pub(crate) static OPENED_WITH_CALLBACK: AtomicBool = AtomicBool::new(false);
/// Method count reported by the last codec provider given to an archive object.
pub(crate) static CODEC_METHODS: AtomicU32 = AtomicU32::new(0);

pub(crate) fn entry_points() -> EngineEntryPoints {
    EngineEntryPoints {
        create_object,
        get_number_of_formats,
        get_handler_property2,
    }
}

/// An engine whose second format reports a multi-signature blob running past its end.
pub(crate) fn malformed_entry_points() -> EngineEntryPoints {
    EngineEntryPoints {
        get_handler_property2: get_handler_property2_malformed,
        ..entry_points()
    }
}

/// An engine that supports no formats at all.
pub(crate) fn empty_entry_points() -> EngineEntryPoints {
    EngineEntryPoints {
        get_number_of_formats: get_number_of_formats_empty,
        ..entry_points()
    }
}

pub(crate) fn codec_entry_points() -> CodecEntryPoints {
    CodecEntryPoints {
        get_number_of_methods: codec_get_number_of_methods,
        get_method_property: codec_get_method_property,
        create_decoder: codec_create_decoder,
    }
}

fn guid_bytes(guid: &Guid) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16);
    bytes.extend_from_slice(&guid.data1.to_le_bytes());
    bytes.extend_from_slice(&guid.data2.to_le_bytes());
    bytes.extend_from_slice(&guid.data3.to_le_bytes());
    bytes.extend_from_slice(&guid.data4);
    bytes
}

fn binary(bytes: &[u8]) -> Variant {
    if bytes.is_empty() {
        Variant::Empty
    } else {
        Variant::Bstr(Bstr::from_bytes(bytes).unwrap())
    }
}

unsafe fn write_value(value: *mut PROPVARIANT, variant: Variant) -> HRESULT {
    if value.is_null() {
        return E_POINTER;
    }
    unsafe { value.write(PROPVARIANT::from_variant(variant)) };
    S_OK
}

/// Takes a reference of our own on a pointer the caller keeps owning.
unsafe fn borrow<I: Interface>(raw: *mut c_void) -> Option<ComPtr<I>> {
    let borrowed = ManuallyDrop::new(unsafe { ComPtr::<I>::from_raw(raw) }?);
    Some((*borrowed).clone())
}

unsafe extern "C" fn get_number_of_formats(count: *mut u32) -> HRESULT {
    unsafe { *count = FORMATS.len() as u32 };
    S_OK
}

unsafe extern "C" fn get_number_of_formats_empty(count: *mut u32) -> HRESULT {
    unsafe { *count = 0 };
    S_OK
}

unsafe extern "C" fn get_handler_property2(index: u32, property: PROPID, value: *mut PROPVARIANT) -> HRESULT {
    let Some(format) = FORMATS.get(index as usize) else {
        return E_INVALIDARG;
    };
    let variant = match property {
        p if p == HandlerProperty::Name as PROPID => Variant::Bstr(Bstr::new(format.name).unwrap()),
        p if p == HandlerProperty::ClassId as PROPID => binary(&guid_bytes(&format.class_id)),
        p if p == HandlerProperty::Signature as PROPID => binary(format.signature),
        p if p == HandlerProperty::MultiSignature as PROPID => binary(format.multi_signature),
        p if p == HandlerProperty::SignatureOffset as PROPID => {
            format.offset.map_or(Variant::Empty, Variant::UInt)
        }
        _ => Variant::Empty,
    };
    unsafe { write_value(value, variant) }
}

unsafe extern "C" fn get_handler_property2_malformed(
    index: u32,
    property: PROPID,
    value: *mut PROPVARIANT,
) -> HRESULT {
    if index == 1 && property == HandlerProperty::MultiSignature as PROPID {
        return unsafe { write_value(value, binary(b"\x02MZ\x05MZ")) };
    }
    unsafe { get_handler_property2(index, property, value) }
}

unsafe extern "C" fn create_object(class_id: *const Guid, iid: *const Guid, out: *mut *mut c_void) -> HRESULT {
    if class_id.is_null() || iid.is_null() || out.is_null() {
        return E_POINTER;
    }
    unsafe { *out = ptr::null_mut() };
    if unsafe { *iid } != IInArchive::IID {
        return E_NOINTERFACE;
    }
    let class_id = unsafe { *class_id };
    if !FORMATS.iter().any(|format| format.class_id == class_id) {
        return CLASS_E_CLASSNOTAVAILABLE;
    }
    let archive = FakeArchive::new();
    unsafe { *out = archive.interface::<IInArchive>().into_raw() };
    S_OK
}

unsafe extern "C" fn codec_get_number_of_methods(count: *mut u32) -> HRESULT {
    unsafe { *count = 2 };
    S_OK
}

unsafe extern "C" fn codec_get_method_property(_index: u32, _property: PROPID, value: *mut PROPVARIANT) -> HRESULT {
    unsafe { write_value(value, Variant::Empty) }
}

unsafe extern "C" fn codec_create_decoder(_index: u32, _iid: *const Guid, coder: *mut *mut c_void) -> HRESULT {
    unsafe { *coder = ptr::null_mut() };
    E_NOTIMPL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Directory,
    Unnamed,
    UnreadablePath,
    UnreadableFlags,
    /// A directory with no readable size or timestamp.
    SparseDirectory,
    Corrupt,
}

struct Entry {
    kind: Kind,
    path: String,
    data: Vec<u8>,
}

struct Contents {
    password: Option<String>,
    entries: Vec<Entry>,
}

fn parse(bytes: &[u8]) -> Option<(Contents, Option<String>)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut lines = text.lines();
    lines.next()?;
    let mut contents = Contents {
        password: None,
        entries: Vec::new(),
    };
    let mut header_password = None;
    for line in lines.filter(|line| !line.is_empty()) {
        if let Some(password) = line.strip_prefix("password=") {
            contents.password = Some(password.to_string());
            continue;
        }
        if let Some(password) = line.strip_prefix("header-password=") {
            header_password = Some(password.to_string());
            continue;
        }
        let mut fields = line.splitn(3, '\t');
        let kind = match fields.next()? {
            "f" => Kind::File,
            "d" => Kind::Directory,
            "n" => Kind::Unnamed,
            "x" => Kind::UnreadablePath,
            "b" => Kind::UnreadableFlags,
            "s" => Kind::SparseDirectory,
            "c" => Kind::Corrupt,
            _ => return None,
        };
        let path = fields.next().unwrap_or_default().to_string();
        let data = fields.next().unwrap_or_default().as_bytes().to_vec();
        contents.entries.push(Entry { kind, path, data });
    }
    Some((contents, header_password))
}

#[repr(C)]
struct FakeArchive {
    vtbl: &'static IInArchiveVtbl,
    codecs_vtbl: &'static ISetCompressCodecsInfoVtbl,
    refs: AtomicU32,
    contents: RwLock<Option<Contents>>,
}

static ARCHIVE_VTBL: IInArchiveVtbl = IInArchiveVtbl {
    base: IUnknownVtbl::of::<FakeArchive, IInArchive>(),
    open: archive_open,
    close: archive_close,
    get_number_of_items: archive_get_number_of_items,
    get_property: archive_get_property,
    extract: archive_extract,
    get_archive_property: archive_get_archive_property,
    get_number_of_properties: archive_no_properties,
    get_property_info: archive_property_info,
    get_number_of_archive_properties: archive_no_properties,
    get_archive_property_info: archive_property_info,
};

static CODECS_VTBL: ISetCompressCodecsInfoVtbl = ISetCompressCodecsInfoVtbl {
    base: IUnknownVtbl::of::<FakeArchive, ISetCompressCodecsInfo>(),
    set_compress_codecs_info: archive_set_compress_codecs_info,
};

unsafe impl ComObject for FakeArchive {
    const INTERFACES: &'static [(Guid, usize)] = &[
        (IInArchive::IID, offset_of!(FakeArchive, vtbl)),
        (ISetCompressCodecsInfo::IID, offset_of!(FakeArchive, codecs_vtbl)),
    ];

    fn refs(&self) -> &AtomicU32 {
        &self.refs
    }
}

unsafe impl Implements<IInArchive> for FakeArchive {
    const OFFSET: usize = offset_of!(FakeArchive, vtbl);
}

unsafe impl Implements<ISetCompressCodecsInfo> for FakeArchive {
    const OFFSET: usize = offset_of!(FakeArchive, codecs_vtbl);
}

impl FakeArchive {
    fn new() -> ComBox<Self> {
        LIVE_ARCHIVES.fetch_add(1, Ordering::SeqCst);
        ComBox::new(FakeArchive {
            vtbl: &ARCHIVE_VTBL,
            codecs_vtbl: &CODECS_VTBL,
            refs: AtomicU32::new(1),
            contents: RwLock::new(None),
        })
    }
}

impl Drop for FakeArchive {
    fn drop(&mut self) {
        LIVE_ARCHIVES.fetch_sub(1, Ordering::SeqCst);
    }
}

fn read_stream(stream: &ComPtr<IInStream>) -> Result<Vec<u8>, HRESULT> {
    let vtbl = stream.vtbl();
    let mut size = 0;
    let hr = unsafe { (vtbl.seek)(stream.as_raw(), 0, STREAM_SEEK_END, &mut size) };
    if failed(hr) {
        return Err(hr);
    }
    let hr = unsafe { (vtbl.seek)(stream.as_raw(), 0, STREAM_SEEK_SET, ptr::null_mut()) };
    if failed(hr) {
        return Err(hr);
    }
    let mut bytes = Vec::with_capacity(size as usize);
    let mut chunk = [0u8; 7];
    loop {
        let mut processed = 0;
        let hr = unsafe { (vtbl.read)(stream.as_raw(), chunk.as_mut_ptr().cast(), chunk.len() as u32, &mut processed) };
        if failed(hr) {
            return Err(hr);
        }
        if processed == 0 {
            return Ok(bytes);
        }
        bytes.extend_from_slice(&chunk[..processed as usize]);
    }
}

fn ask_password(provider: Option<ComPtr<ICryptoGetTextPassword>>) -> Option<String> {
    let provider = provider?;
    let mut raw: *mut WChar = ptr::null_mut();
    let hr = unsafe { (provider.vtbl().crypto_get_text_password)(provider.as_raw(), &mut raw) };
    let password = unsafe { Bstr::from_raw(raw) }?;
    (!failed(hr)).then(|| password.to_string_lossy())
}

unsafe extern "C" fn archive_open(
    this: *mut c_void,
    stream: *mut c_void,
    _max_check_start_position: *const u64,
    callback: *mut c_void,
) -> HRESULT {
    let archive = unsafe { com::object::<FakeArchive, IInArchive>(this) };
    OPENED_WITH_CALLBACK.store(!callback.is_null(), Ordering::SeqCst);
    let Some(stream) = (unsafe { borrow::<IInStream>(stream) }) else {
        return E_POINTER;
    };
    let bytes = match read_stream(&stream) {
        Ok(bytes) => bytes,
        Err(hr) => return hr,
    };
    let Some((contents, header_password)) = parse(&bytes) else {
        return S_FALSE;
    };
    if let Some(expected) = header_password {
        let callback = unsafe { borrow::<IArchiveOpenCallback>(callback) };
        let provider = callback.and_then(|callback| callback.query::<ICryptoGetTextPassword>().ok());
        if ask_password(provider).as_deref() != Some(expected.as_str()) {
            return E_FAIL;
        }
    }
    *archive.contents.write() = Some(contents);
    S_OK
}

unsafe extern "C" fn archive_close(this: *mut c_void) -> HRESULT {
    let archive = unsafe { com::object::<FakeArchive, IInArchive>(this) };
    archive.contents.write().take();
    S_OK
}

unsafe extern "C" fn archive_get_number_of_items(this: *mut c_void, count: *mut u32) -> HRESULT {
    let archive = unsafe { com::object::<FakeArchive, IInArchive>(this) };
    let contents = archive.contents.read();
    unsafe { *count = contents.as_ref().map_or(0, |contents| contents.entries.len() as u32) };
    S_OK
}

unsafe extern "C" fn archive_get_property(
    this: *mut c_void,
    index: u32,
    property: PROPID,
    value: *mut PROPVARIANT,
) -> HRESULT {
    let archive = unsafe { com::object::<FakeArchive, IInArchive>(this) };
    let contents = archive.contents.read();
    let Some(entry) = contents.as_ref().and_then(|contents| contents.entries.get(index as usize)) else {
        return E_INVALIDARG;
    };
    let variant = match property {
        KPID_PATH => match entry.kind {
            Kind::UnreadablePath => return E_FAIL,
            Kind::Unnamed => Variant::Empty,
            _ => Variant::Bstr(Bstr::new(&entry.path).unwrap()),
        },
        KPID_IS_DIR => match entry.kind {
            Kind::UnreadableFlags => return E_FAIL,
            kind => Variant::Bool(matches!(kind, Kind::Directory | Kind::SparseDirectory)),
        },
        KPID_SIZE | KPID_MTIME if entry.kind == Kind::SparseDirectory => return E_FAIL,
        KPID_SIZE => Variant::UInt(entry.data.len() as u64),
        KPID_MTIME => Variant::FileTime(FileTime(FAKE_MTIME + u64::from(index))),
        _ => Variant::Empty,
    };
    unsafe { write_value(value, variant) }
}

fn extract_entry(entry: &Entry, index: u32, password: Option<&str>, callback: &ComPtr<IArchiveExtractCallback>) -> HRESULT {
    let vtbl = callback.vtbl();
    let mut raw = ptr::null_mut();
    let hr = unsafe { (vtbl.get_stream)(callback.as_raw(), index, &mut raw, ASK_MODE_EXTRACT) };
    if failed(hr) {
        return hr;
    }
    let stream = unsafe { ComPtr::<ISequentialOutStream>::from_raw(raw) };
    unsafe { (vtbl.prepare_operation)(callback.as_raw(), ASK_MODE_EXTRACT) };

    let encrypted = password.is_some() && !matches!(entry.kind, Kind::Directory | Kind::SparseDirectory);
    if encrypted {
        let provider = callback.query::<ICryptoGetTextPassword>().ok();
        if ask_password(provider).as_deref() != password {
            drop(stream);
            return unsafe { (vtbl.set_operation_result)(callback.as_raw(), 9) };
        }
    }
    if let Some(stream) = &stream {
        for chunk in entry.data.chunks(3) {
            let mut processed = 0;
            let hr = unsafe {
                (stream.vtbl().write)(stream.as_raw(), chunk.as_ptr().cast(), chunk.len() as u32, &mut processed)
            };
            if failed(hr) {
                return hr;
            }
        }
    }
    drop(stream);
    let result = if entry.kind == Kind::Corrupt { 3 } else { 0 };
    unsafe { (vtbl.set_operation_result)(callback.as_raw(), result) }
}

unsafe extern "C" fn archive_extract(
    this: *mut c_void,
    indices: *const u32,
    count: u32,
    _test_mode: i32,
    callback: *mut c_void,
) -> HRESULT {
    let archive = unsafe { com::object::<FakeArchive, IInArchive>(this) };
    let Some(callback) = (unsafe { borrow::<IArchiveExtractCallback>(callback) }) else {
        return E_POINTER;
    };
    let contents = archive.contents.read();
    let Some(contents) = contents.as_ref() else {
        return E_FAIL;
    };
    let indices = unsafe { std::slice::from_raw_parts(indices, count as usize) };
    for &index in indices {
        let Some(entry) = contents.entries.get(index as usize) else {
            return E_INVALIDARG;
        };
        let hr = extract_entry(entry, index, contents.password.as_deref(), &callback);
        if failed(hr) {
            return hr;
        }
    }
    S_OK
}

unsafe extern "C" fn archive_get_archive_property(
    _this: *mut c_void,
    _property: PROPID,
    value: *mut PROPVARIANT,
) -> HRESULT {
    unsafe { write_value(value, Variant::Empty) }
}

unsafe extern "C" fn archive_no_properties(_this: *mut c_void, count: *mut u32) -> HRESULT {
    unsafe { *count = 0 };
    S_OK
}

unsafe extern "C" fn archive_property_info(
    _this: *mut c_void,
    _index: u32,
    _name: *mut *mut WChar,
    _property: *mut PROPID,
    _kind: *mut u16,
) -> HRESULT {
    E_NOTIMPL
}

unsafe extern "C" fn archive_set_compress_codecs_info(_this: *mut c_void, info: *mut c_void) -> HRESULT {
    let Some(info) = (unsafe { borrow::<ICompressCodecsInfo>(info) }) else {
        return E_POINTER;
    };
    let mut methods = 0;
    let hr = unsafe { (info.vtbl().get_num_methods)(info.as_raw(), &mut methods) };
    if failed(hr) {
        return hr;
    }
    CODEC_METHODS.store(methods, Ordering::SeqCst);
    S_OK
}
