// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Raw bindings to the subset of libsrt's epoll API the reactor needs.
//!
//! These are hand-written rather than generated: the surface used here is small and stable
//! (`srt_epoll_create`/`_add_usock`/`_update_usock`/`_remove_usock`/`_uwait`/`_release`, plus
//! `srt_getlasterror` and `srt_close`), and pinning it down explicitly keeps the `unsafe` boundary
//! auditable in one place.

#![allow(non_camel_case_types, reason = "mirrors libsrt's C type names")]
#![allow(missing_docs, reason = "raw extern bindings document themselves by name; see srt.h")]

use std::os::raw::c_int;

/// `SRTSOCKET` is a plain `int` in the C API; sockets and listen-backlog handles share the same
/// type.
pub type SrtSocket = c_int;

/// Readiness edge bits used by `srt_epoll_*`. Mirrors `SRT_EPOLL_OPT` in `srt.h`.
pub const SRT_EPOLL_IN: c_int = 0x1;
pub const SRT_EPOLL_OUT: c_int = 0x4;
pub const SRT_EPOLL_ERR: c_int = 0x8;

/// Sentinel returned by most `srt_*` entry points on failure.
pub const SRT_ERROR: c_int = -1;

/// Mirrors `SRT_EPOLL_EVENT` in `srt.h`: one readiness edge for one socket.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SrtEpollEvent {
    pub fd: SrtSocket,
    pub events: c_int,
}

unsafe extern "C" {
    pub fn srt_epoll_create() -> c_int;
    pub fn srt_epoll_add_usock(eid: c_int, socket: SrtSocket, events: *const c_int) -> c_int;
    pub fn srt_epoll_update_usock(eid: c_int, socket: SrtSocket, events: *const c_int) -> c_int;
    pub fn srt_epoll_remove_usock(eid: c_int, socket: SrtSocket) -> c_int;
    pub fn srt_epoll_uwait(eid: c_int, fdset: *mut SrtEpollEvent, fdset_size: c_int, ms_timeout: i64) -> c_int;
    pub fn srt_epoll_release(eid: c_int) -> c_int;
    pub fn srt_getlasterror(errno_loc: *mut c_int) -> c_int;
    pub fn srt_getlasterror_str() -> *const std::os::raw::c_char;
    pub fn srt_close(socket: SrtSocket) -> c_int;
}

/// Reads the current thread-local SRT error as an owned message, for attaching to a failed
/// operation.
pub fn last_error_message() -> String {
    // SAFETY: `srt_getlasterror_str` always returns a pointer to a static, NUL-terminated buffer
    // owned by libsrt; it is never null per the library's documented contract.
    let message = unsafe { std::ffi::CStr::from_ptr(srt_getlasterror_str()) };
    message.to_string_lossy().into_owned()
}

/// Reads the current thread-local SRT error code.
pub fn last_error_code() -> c_int {
    let mut sys_errno: c_int = 0;
    // SAFETY: `errno_loc` is a valid, non-null pointer to a live `c_int` for the duration of the
    // call; libsrt writes through it and returns the SRT-level error code.
    unsafe { srt_getlasterror(std::ptr::addr_of_mut!(sys_errno)) }
}
