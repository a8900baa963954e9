//! Byte views of on-flash records.
//!
//! The records kept in flash by the bootloader (image headers, the update
//! state) are `repr(C)` structures made of `u32` words, stored in the byte
//! order of the target.  `AsRaw` views such a record as its bytes so it can be
//! programmed directly.  `AsMutRaw` is the unsafe inverse, letting a read from
//! flash land straight in an existing value.  Both are only meaningful for
//! `repr(C)` structures without padding whose fields accept any bit pattern.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use core::{mem, slice};

pub trait AsRaw: Sized {
    fn as_raw(&self) -> &[u8] {
        unsafe {
            slice::from_raw_parts(self as *const _ as *const u8,
                                  mem::size_of::<Self>())
        }
    }
}

/// Provide a mutable view into a structure.  This is an unsafe trait, because,
/// in general, it isn't safe to interpret arbitrary bytes as another type.
/// However, if the struct is `repr(C)`, and all types used are valid for all
/// possible values, this will be safe.
pub unsafe trait AsMutRaw: Sized {
    fn as_mut_raw(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(self as *mut _ as *mut u8,
                                      mem::size_of::<Self>())
        }
    }
}
