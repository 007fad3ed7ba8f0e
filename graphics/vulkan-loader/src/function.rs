//! Untyped function pointers
//!
//! Unknown functions have signatures the loader cannot know ahead of time.
//! Everything that moves through registries and layer chains is a
//! [`RawFunction`]; turning one back into a callable signature happens in
//! exactly one place, [`RawFunction::cast`].

use core::fmt;
use core::mem;

/// `PFN_vkVoidFunction`
pub type VoidFunction = unsafe extern "system" fn();

/// An opaque, untyped function pointer
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct RawFunction(VoidFunction);

impl RawFunction {
    /// Erase the signature of `f`
    pub fn new<F: FunctionPointer>(f: F) -> Self {
        Self(f.into_void())
    }

    /// Reinterpret the pointer with the signature `F`.
    ///
    /// # Safety
    /// `F` must be the signature the pointee was defined with. Calling the
    /// result with any other signature is undefined behaviour.
    pub unsafe fn cast<F: FunctionPointer>(self) -> F {
        F::from_void(self.0)
    }

    /// Address of the pointee, for identity comparisons and diagnostics
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

impl PartialEq for RawFunction {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for RawFunction {}

impl fmt::Debug for RawFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawFunction({:#x})", self.addr())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Function pointer types that can round-trip through [`RawFunction`].
///
/// Implemented for `extern "system"` and `unsafe extern "system"` function
/// pointers of up to twelve arguments.
///
/// # Safety
/// Implementors must be plain, pointer-sized function pointers.
pub unsafe trait FunctionPointer: Copy + sealed::Sealed {
    #[doc(hidden)]
    fn into_void(self) -> VoidFunction;

    #[doc(hidden)]
    unsafe fn from_void(f: VoidFunction) -> Self;
}

macro_rules! impl_function_pointer {
    (@one [$($ty:tt)*] $($arg:ident),*) => {
        impl<R, $($arg),*> sealed::Sealed for $($ty)* {}

        unsafe impl<R, $($arg),*> FunctionPointer for $($ty)* {
            fn into_void(self) -> VoidFunction {
                debug_assert_eq!(mem::size_of::<Self>(), mem::size_of::<VoidFunction>());
                // SAFETY: both sides are function pointers of the same size.
                unsafe { mem::transmute_copy::<Self, VoidFunction>(&self) }
            }

            unsafe fn from_void(f: VoidFunction) -> Self {
                mem::transmute_copy::<VoidFunction, Self>(&f)
            }
        }
    };
    ($($arg:ident),*) => {
        impl_function_pointer!(@one [unsafe extern "system" fn($($arg),*) -> R] $($arg),*);
        impl_function_pointer!(@one [extern "system" fn($($arg),*) -> R] $($arg),*);
    };
}

impl_function_pointer!();
impl_function_pointer!(A);
impl_function_pointer!(A, B);
impl_function_pointer!(A, B, C);
impl_function_pointer!(A, B, C, D);
impl_function_pointer!(A, B, C, D, E);
impl_function_pointer!(A, B, C, D, E, F);
impl_function_pointer!(A, B, C, D, E, F, G);
impl_function_pointer!(A, B, C, D, E, F, G, H);
impl_function_pointer!(A, B, C, D, E, F, G, H, I);
impl_function_pointer!(A, B, C, D, E, F, G, H, I, J);
impl_function_pointer!(A, B, C, D, E, F, G, H, I, J, K);
impl_function_pointer!(A, B, C, D, E, F, G, H, I, J, K, L);
