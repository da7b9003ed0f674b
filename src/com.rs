//! Reference-counted objects in the engine's COM-style binary layout.
//!
//! Objects implemented here are boxed, start with a reference count of one and
//! are freed by the `Release` call that brings the count back to zero, whoever
//! makes it. Each implemented interface is a vtable pointer field inside the
//! object; the interface pointer handed to the engine is the address of that field.

use crate::sevenzip::{E_NOINTERFACE, E_POINTER, Guid, HRESULT, IUnknown, IUnknownVtbl, S_OK};
use std::marker::PhantomData;
use std::os::raw::c_void;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering, fence};

/// A binary interface: its identifier and its vtable layout.
///
/// # Safety
/// `Vtbl` must be `#[repr(C)]` and start with an [`IUnknownVtbl`].
pub(crate) unsafe trait Interface {
    const IID: Guid;
    type Vtbl;
}

/// An object whose address can be handed to the engine.
///
/// # Safety
/// `INTERFACES` must list, for every interface the object answers to, the byte
/// offset of a field holding a pointer to that interface's vtable. The first
/// entry is the identity returned for `IUnknown`.
pub(crate) unsafe trait ComObject: Sized + Send + Sync {
    const INTERFACES: &'static [(Guid, usize)];

    fn refs(&self) -> &AtomicU32;
}

/// `T` carries a vtable pointer for `I` at `OFFSET`.
///
/// # Safety
/// `OFFSET` must be one of the offsets listed in `T::INTERFACES` under `I::IID`.
pub(crate) unsafe trait Implements<I: Interface>: ComObject {
    const OFFSET: usize;
}

/// Recovers the object behind an interface pointer.
///
/// # Safety
/// `this` must be an interface pointer for `I` obtained from a live `T`.
pub(crate) unsafe fn object<'a, T: Implements<I>, I: Interface>(this: *mut c_void) -> &'a T {
    unsafe { &*this.cast::<u8>().sub(T::OFFSET).cast::<T>() }
}

pub(crate) unsafe extern "C" fn query_interface<T: Implements<I>, I: Interface>(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HRESULT {
    if out.is_null() {
        return E_POINTER;
    }
    if iid.is_null() {
        unsafe { *out = ptr::null_mut() };
        return E_POINTER;
    }
    let base = unsafe { this.cast::<u8>().sub(T::OFFSET) };
    let iid = unsafe { &*iid };
    let found = if *iid == IUnknown::IID {
        T::INTERFACES.first()
    } else {
        T::INTERFACES.iter().find(|(candidate, _)| candidate == iid)
    };
    match found {
        Some((_, offset)) => unsafe {
            (*base.cast::<T>()).refs().fetch_add(1, Ordering::Relaxed);
            *out = base.add(*offset).cast();
            S_OK
        },
        None => {
            unsafe { *out = ptr::null_mut() };
            E_NOINTERFACE
        }
    }
}

pub(crate) unsafe extern "C" fn add_ref<T: Implements<I>, I: Interface>(this: *mut c_void) -> u32 {
    let object = unsafe { object::<T, I>(this) };
    object.refs().fetch_add(1, Ordering::Relaxed) + 1
}

pub(crate) unsafe extern "C" fn release<T: Implements<I>, I: Interface>(this: *mut c_void) -> u32 {
    let base = unsafe { this.cast::<u8>().sub(T::OFFSET).cast::<T>() };
    unsafe { release_object(base) }
}

unsafe fn release_object<T: ComObject>(base: *mut T) -> u32 {
    let remaining = unsafe { (*base).refs().fetch_sub(1, Ordering::Release) } - 1;
    if remaining == 0 {
        fence(Ordering::Acquire);
        drop(unsafe { Box::from_raw(base) });
    }
    remaining
}

/// Owning reference to an object implemented in this crate.
pub(crate) struct ComBox<T: ComObject> {
    ptr: NonNull<T>,
}

unsafe impl<T: ComObject> Send for ComBox<T> {}
unsafe impl<T: ComObject> Sync for ComBox<T> {}

impl<T: ComObject> ComBox<T> {
    /// `new` boxes `object`, whose reference count must start at one.
    pub(crate) fn new(object: T) -> Self {
        debug_assert_eq!(object.refs().load(Ordering::Relaxed), 1);
        let ptr = NonNull::from(Box::leak(Box::new(object)));
        ComBox { ptr }
    }

    /// Adds a reference and returns it as an interface pointer.
    pub(crate) fn interface<I: Interface>(&self) -> ComPtr<I>
    where
        T: Implements<I>,
    {
        self.refs().fetch_add(1, Ordering::Relaxed);
        let raw = unsafe { self.ptr.as_ptr().cast::<u8>().add(T::OFFSET) };
        ComPtr {
            ptr: unsafe { NonNull::new_unchecked(raw.cast()) },
            _interface: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> u32 {
        self.refs().load(Ordering::Relaxed)
    }
}

impl<T: ComObject> std::ops::Deref for ComBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ComObject> Clone for ComBox<T> {
    fn clone(&self) -> Self {
        self.refs().fetch_add(1, Ordering::Relaxed);
        ComBox { ptr: self.ptr }
    }
}

impl<T: ComObject> Drop for ComBox<T> {
    fn drop(&mut self) {
        unsafe { release_object(self.ptr.as_ptr()) };
    }
}

/// Owning interface pointer, released on drop.
pub(crate) struct ComPtr<I: Interface> {
    ptr: NonNull<c_void>,
    _interface: PhantomData<I>,
}

// Engine objects are required to tolerate calls from any thread.
unsafe impl<I: Interface> Send for ComPtr<I> {}
unsafe impl<I: Interface> Sync for ComPtr<I> {}

impl<I: Interface> ComPtr<I> {
    /// Takes over one reference.
    ///
    /// # Safety
    /// `raw` must be null or a live interface pointer for `I` carrying a reference
    /// the caller owns.
    pub(crate) unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw).map(|ptr| ComPtr {
            ptr,
            _interface: PhantomData,
        })
    }

    pub(crate) fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Gives up ownership of the reference without releasing it.
    pub(crate) fn into_raw(self) -> *mut c_void {
        let raw = self.ptr.as_ptr();
        std::mem::forget(self);
        raw
    }

    pub(crate) fn vtbl(&self) -> &I::Vtbl {
        unsafe { &**self.ptr.as_ptr().cast::<*const I::Vtbl>() }
    }

    fn unknown(&self) -> &IUnknownVtbl {
        unsafe { &**self.ptr.as_ptr().cast::<*const IUnknownVtbl>() }
    }

    /// Asks the object for another interface.
    pub(crate) fn query<J: Interface>(&self) -> Result<ComPtr<J>, HRESULT> {
        let mut out = ptr::null_mut();
        let hr = unsafe { (self.unknown().query_interface)(self.as_raw(), &J::IID, &mut out) };
        if crate::sevenzip::failed(hr) {
            return Err(hr);
        }
        unsafe { ComPtr::from_raw(out) }.ok_or(E_NOINTERFACE)
    }
}

impl<I: Interface> Clone for ComPtr<I> {
    fn clone(&self) -> Self {
        unsafe { (self.unknown().add_ref)(self.as_raw()) };
        ComPtr {
            ptr: self.ptr,
            _interface: PhantomData,
        }
    }
}

impl<I: Interface> Drop for ComPtr<I> {
    fn drop(&mut self) {
        unsafe { (self.unknown().release)(self.as_raw()) };
    }
}

impl<I: Interface> std::fmt::Debug for ComPtr<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComPtr({:p})", self.ptr)
    }
}
