use super::{VARTYPE, WChar};
use std::ptr::NonNull;
use std::time::{Duration, SystemTime};

pub(crate) const VT_EMPTY: VARTYPE = 0;
pub(crate) const VT_I4: VARTYPE = 3;
pub(crate) const VT_BSTR: VARTYPE = 8;
pub(crate) const VT_BOOL: VARTYPE = 11;
pub(crate) const VT_UI1: VARTYPE = 17;
pub(crate) const VT_UI2: VARTYPE = 18;
pub(crate) const VT_UI4: VARTYPE = 19;
pub(crate) const VT_I8: VARTYPE = 20;
pub(crate) const VT_UI8: VARTYPE = 21;
pub(crate) const VT_UINT: VARTYPE = 23;
pub(crate) const VT_FILETIME: VARTYPE = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FILETIME {
    pub(crate) low: u32,
    pub(crate) high: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union PropValue {
    pub(crate) b_val: u8,
    pub(crate) ui_val: u16,
    pub(crate) bool_val: i16,
    pub(crate) l_val: i32,
    pub(crate) ul_val: u32,
    pub(crate) h_val: i64,
    pub(crate) uh_val: u64,
    pub(crate) filetime: FILETIME,
    pub(crate) bstr_val: *mut WChar,
    // Room for the blob members of the full Windows layout.
    _pad: [usize; 2],
}

/// The engine's tagged property value.
#[repr(C)]
pub(crate) struct PROPVARIANT {
    pub(crate) vt: VARTYPE,
    pub(crate) reserved: [u16; 3],
    pub(crate) value: PropValue,
}

impl PROPVARIANT {
    pub(crate) fn empty() -> Self {
        Self {
            vt: VT_EMPTY,
            reserved: [0; 3],
            value: PropValue { _pad: [0; 2] },
        }
    }

    /// Moves an owned value into the C layout; BSTR ownership passes to the receiver.
    #[cfg(test)]
    pub(crate) fn from_variant(variant: Variant) -> Self {
        let mut raw = Self::empty();
        match variant {
            Variant::Empty | Variant::Other(_) => {}
            Variant::Bool(value) => {
                raw.vt = VT_BOOL;
                raw.value.bool_val = if value { -1 } else { 0 };
            }
            Variant::UInt(value) => {
                raw.vt = VT_UI8;
                raw.value.uh_val = value;
            }
            Variant::Int(value) => {
                raw.vt = VT_I8;
                raw.value.h_val = value;
            }
            Variant::FileTime(time) => {
                raw.vt = VT_FILETIME;
                raw.value.filetime = FILETIME {
                    low: time.0 as u32,
                    high: (time.0 >> 32) as u32,
                };
            }
            Variant::Bstr(bstr) => {
                raw.vt = VT_BSTR;
                raw.value.bstr_val = bstr.into_raw();
            }
        }
        raw
    }

    /// Takes ownership of the value written by the engine.
    ///
    /// # Safety
    /// `self` must have been filled in by a successful engine property call,
    /// so that a `VT_BSTR` value owns a BSTR allocated in the engine's layout.
    pub(crate) unsafe fn into_variant(self) -> Variant {
        unsafe {
            match self.vt {
                VT_EMPTY => Variant::Empty,
                VT_BOOL => Variant::Bool(self.value.bool_val != 0),
                VT_UI1 => Variant::UInt(self.value.b_val.into()),
                VT_UI2 => Variant::UInt(self.value.ui_val.into()),
                VT_UI4 | VT_UINT => Variant::UInt(self.value.ul_val.into()),
                VT_UI8 => Variant::UInt(self.value.uh_val),
                VT_I4 => Variant::Int(self.value.l_val.into()),
                VT_I8 => Variant::Int(self.value.h_val),
                VT_FILETIME => {
                    let FILETIME { low, high } = self.value.filetime;
                    Variant::FileTime(FileTime((u64::from(high) << 32) | u64::from(low)))
                }
                VT_BSTR => match Bstr::from_raw(self.value.bstr_val) {
                    Some(bstr) => Variant::Bstr(bstr),
                    None => Variant::Empty,
                },
                other => Variant::Other(other),
            }
        }
    }
}

/// Owned form of a property value read from the engine.
#[derive(Debug)]
pub(crate) enum Variant {
    Empty,
    Bool(bool),
    UInt(u64),
    Int(i64),
    FileTime(FileTime),
    Bstr(Bstr),
    Other(VARTYPE),
}

impl Variant {
    pub(crate) fn as_bool(&self) -> bool {
        matches!(self, Variant::Bool(true))
    }

    pub(crate) fn as_u64(&self) -> u64 {
        match self {
            Variant::UInt(value) => *value,
            Variant::Int(value) => *value as u64,
            _ => 0,
        }
    }

    pub(crate) fn as_file_time(&self) -> Option<FileTime> {
        match self {
            Variant::FileTime(time) => Some(*time),
            _ => None,
        }
    }

    pub(crate) fn as_bstr(&self) -> Option<&Bstr> {
        match self {
            Variant::Bstr(bstr) => Some(bstr),
            _ => None,
        }
    }

    /// Raw bytes of a binary BSTR, empty for other kinds.
    pub(crate) fn bytes(&self) -> &[u8] {
        self.as_bstr().map(Bstr::as_bytes).unwrap_or_default()
    }
}

const PREFIX: usize = std::mem::size_of::<u32>();

/// A length-prefixed wide string in the engine's allocation layout.
///
/// The 32-bit byte length sits right before the first unit, the block comes
/// from the C allocator and the data is followed by a NUL unit.
pub(crate) struct Bstr(NonNull<WChar>);

unsafe impl Send for Bstr {}
unsafe impl Sync for Bstr {}

impl Bstr {
    pub(crate) fn new(text: &str) -> Option<Self> {
        let units: Vec<WChar> = text.chars().map(|c| c as u32 as WChar).collect();
        let bytes = unsafe {
            std::slice::from_raw_parts(units.as_ptr().cast::<u8>(), units.len() * size_of::<WChar>())
        };
        Self::from_bytes(bytes)
    }

    /// Builds a binary BSTR holding exactly `bytes`.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let byte_len = u32::try_from(bytes.len()).ok()?;
        let total = PREFIX + bytes.len() + size_of::<WChar>();
        unsafe {
            let block = libc::malloc(total).cast::<u8>();
            if block.is_null() {
                return None;
            }
            block.cast::<u32>().write_unaligned(byte_len);
            let data = block.add(PREFIX);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
            std::ptr::write_bytes(data.add(bytes.len()), 0, size_of::<WChar>());
            NonNull::new(data.cast::<WChar>()).map(Bstr)
        }
    }

    /// # Safety
    /// `ptr` must be null or a BSTR allocated in the layout described on [`Bstr`].
    pub(crate) unsafe fn from_raw(ptr: *mut WChar) -> Option<Self> {
        NonNull::new(ptr).map(Bstr)
    }

    pub(crate) fn into_raw(self) -> *mut WChar {
        let ptr = self.0.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub(crate) fn byte_len(&self) -> usize {
        unsafe {
            self.0
                .as_ptr()
                .cast::<u8>()
                .sub(PREFIX)
                .cast::<u32>()
                .read_unaligned() as usize
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.0.as_ptr().cast::<u8>(), self.byte_len()) }
    }

    /// Decodes the wide units up to the first NUL, replacing invalid code points.
    pub(crate) fn to_string_lossy(&self) -> String {
        let units = self.byte_len() / size_of::<WChar>();
        let data = unsafe { std::slice::from_raw_parts(self.0.as_ptr(), units) };
        data.iter()
            .take_while(|&&unit| unit != 0)
            .map(|&unit| char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

impl Drop for Bstr {
    fn drop(&mut self) {
        unsafe { libc::free(self.0.as_ptr().cast::<u8>().sub(PREFIX).cast()) }
    }
}

impl std::fmt::Debug for Bstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bstr({:?})", self.to_string_lossy())
    }
}

/// Difference between 1601-01-01 and 1970-01-01 in 100 ns ticks.
const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

/// Timestamp in 100 ns ticks since 1601-01-01 UTC, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(pub u64);

impl FileTime {
    pub fn ticks(self) -> u64 {
        self.0
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= UNIX_EPOCH_TICKS {
            SystemTime::UNIX_EPOCH + ticks_to_duration(self.0 - UNIX_EPOCH_TICKS)
        } else {
            SystemTime::UNIX_EPOCH - ticks_to_duration(UNIX_EPOCH_TICKS - self.0)
        }
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::new(ticks / 10_000_000, ((ticks % 10_000_000) * 100) as u32)
}

impl From<FileTime> for SystemTime {
    fn from(time: FileTime) -> Self {
        time.to_system_time()
    }
}
