// io 与 socket 函数的 trampoline：转发到原函数，记录描述符名称并输出一行追踪记录

use crate::fd_cache::{resolve_descriptor, DESCRIPTORS};
use crate::registry;
use crate::report::{self, c_str, Value};
use libc::{c_char, c_int, c_void, mode_t, msghdr, size_t, sockaddr, socklen_t, ssize_t};
use srx_trace::HookRecord;
use std::net::{Ipv4Addr, Ipv6Addr};

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int;
type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type WriteFn = unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
type ConnectFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;
type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
type SendToFn =
    unsafe extern "C" fn(c_int, *const c_void, size_t, c_int, *const sockaddr, socklen_t) -> ssize_t;
type SendMsgFn = unsafe extern "C" fn(c_int, *const msghdr, c_int) -> ssize_t;
type RecvFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;
type RecvFromFn =
    unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int, *mut sockaddr, *mut socklen_t) -> ssize_t;
type RecvMsgFn = unsafe extern "C" fn(c_int, *mut msghdr, c_int) -> ssize_t;
type ShutdownFn = unsafe extern "C" fn(c_int, c_int) -> c_int;

#[cfg(target_os = "android")]
unsafe fn errno_ptr() -> *mut c_int {
    libc::__errno()
}

#[cfg(not(target_os = "android"))]
unsafe fn errno_ptr() -> *mut c_int {
    libc::__errno_location()
}

// 原函数返回后保存 errno，记录完成后恢复，调用方看到的 errno 与未 hook 时一致
struct SavedErrno(c_int);

impl SavedErrno {
    unsafe fn save() -> Self {
        Self(*errno_ptr())
    }

    unsafe fn restore(self) {
        *errno_ptr() = self.0;
    }
}

// 取原函数并调用；找不到原函数时返回 fail 并置 ENOSYS
macro_rules! forward {
    ($symbol:literal, $ty:ty, $fail:expr, |$orig:ident| $call:expr) => {
        match registry::original($symbol) {
            Some(addr) => {
                let $orig = std::mem::transmute::<usize, $ty>(addr);
                $call
            }
            None => {
                *errno_ptr() = libc::ENOSYS;
                $fail
            }
        }
    };
}

pub unsafe extern "C" fn hook_open(pathname: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let fd = forward!("open", OpenFn, -1, |open| open(pathname, flags, mode));
    let saved = SavedErrno::save();
    let path = c_str(pathname);
    if fd >= 0 {
        DESCRIPTORS.add(fd, &path);
    }
    report::add(
        "open",
        &[("pathname", Value::Str(path)), ("flags", Value::Int(flags as i64))],
        Value::Int(fd as i64),
    );
    saved.restore();
    fd
}

pub unsafe extern "C" fn hook_read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    let ret = forward!("read", ReadFn, -1, |read| read(fd, buf, count));
    let saved = SavedErrno::save();
    report::add(
        "read",
        &[
            ("fd", Value::Str(resolve_descriptor(fd).into())),
            ("count", Value::Unsigned(count as u64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    let ret = forward!("write", WriteFn, -1, |write| write(fd, buf, count));
    let saved = SavedErrno::save();
    report::add(
        "write",
        &[
            ("fd", Value::Str(resolve_descriptor(fd).into())),
            ("count", Value::Unsigned(count as u64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_close(fd: c_int) -> c_int {
    let name = resolve_descriptor(fd);
    let ret = forward!("close", CloseFn, -1, |close| close(fd));
    let saved = SavedErrno::save();
    DESCRIPTORS.remove(fd);
    report::add("close", &[("fd", Value::Str(name.into()))], Value::Int(ret as i64));
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_connect(fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int {
    let ret = forward!("connect", ConnectFn, -1, |connect| connect(fd, addr, len));
    let saved = SavedErrno::save();
    let peer = sockaddr_name(addr, len);
    if let Some(peer) = &peer {
        if ret == 0 || saved.0 == libc::EINPROGRESS {
            DESCRIPTORS.add(fd, peer);
        }
    }
    report::add(
        "connect",
        &[
            ("fd", Value::Int(fd as i64)),
            ("addr", Value::Str(peer.unwrap_or_else(|| "(unknown)".to_string()).into())),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_send(fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t {
    let ret = forward!("send", SendFn, -1, |send| send(fd, buf, len, flags));
    let saved = SavedErrno::save();
    report::add(
        "send",
        &[
            ("fd", Value::Str(resolve_descriptor(fd).into())),
            ("len", Value::Unsigned(len as u64)),
            ("flags", Value::Int(flags as i64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_sendto(
    fd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
    dest: *const sockaddr,
    dest_len: socklen_t,
) -> ssize_t {
    let ret = forward!("sendto", SendToFn, -1, |sendto| sendto(fd, buf, len, flags, dest, dest_len));
    let saved = SavedErrno::save();
    let target = sockaddr_name(dest, dest_len).unwrap_or_else(|| resolve_descriptor(fd));
    report::add(
        "sendto",
        &[
            ("fd", Value::Int(fd as i64)),
            ("to", Value::Str(target.into())),
            ("len", Value::Unsigned(len as u64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_sendmsg(fd: c_int, msg: *const msghdr, flags: c_int) -> ssize_t {
    let ret = forward!("sendmsg", SendMsgFn, -1, |sendmsg| sendmsg(fd, msg, flags));
    let saved = SavedErrno::save();
    report::add(
        "sendmsg",
        &[
            ("fd", Value::Str(resolve_descriptor(fd).into())),
            ("msg", Value::Pointer(msg as usize)),
            ("flags", Value::Int(flags as i64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_recv(fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t {
    let ret = forward!("recv", RecvFn, -1, |recv| recv(fd, buf, len, flags));
    let saved = SavedErrno::save();
    report::add(
        "recv",
        &[
            ("fd", Value::Str(resolve_descriptor(fd).into())),
            ("len", Value::Unsigned(len as u64)),
            ("flags", Value::Int(flags as i64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_recvfrom(
    fd: c_int,
    buf: *mut c_void,
    len: size_t,
    flags: c_int,
    src: *mut sockaddr,
    src_len: *mut socklen_t,
) -> ssize_t {
    let ret = forward!("recvfrom", RecvFromFn, -1, |recvfrom| recvfrom(fd, buf, len, flags, src, src_len));
    let saved = SavedErrno::save();
    let source = if ret >= 0 && !src_len.is_null() {
        sockaddr_name(src, *src_len)
    } else {
        None
    };
    report::add(
        "recvfrom",
        &[
            ("fd", Value::Int(fd as i64)),
            ("from", Value::Str(source.unwrap_or_else(|| resolve_descriptor(fd)).into())),
            ("len", Value::Unsigned(len as u64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_recvmsg(fd: c_int, msg: *mut msghdr, flags: c_int) -> ssize_t {
    let ret = forward!("recvmsg", RecvMsgFn, -1, |recvmsg| recvmsg(fd, msg, flags));
    let saved = SavedErrno::save();
    report::add(
        "recvmsg",
        &[
            ("fd", Value::Str(resolve_descriptor(fd).into())),
            ("msg", Value::Pointer(msg as usize)),
            ("flags", Value::Int(flags as i64)),
        ],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

pub unsafe extern "C" fn hook_shutdown(fd: c_int, how: c_int) -> c_int {
    let ret = forward!("shutdown", ShutdownFn, -1, |shutdown| shutdown(fd, how));
    let saved = SavedErrno::save();
    report::add(
        "shutdown",
        &[("fd", Value::Str(resolve_descriptor(fd).into())), ("how", Value::Int(how as i64))],
        Value::Int(ret as i64),
    );
    saved.restore();
    ret
}

// 套接字地址转为 unix://<path>、ip://<a.b.c.d> 或 ip6://<addr>
pub unsafe fn sockaddr_name(addr: *const sockaddr, len: socklen_t) -> Option<String> {
    let len = len as usize;
    if addr.is_null() || len < std::mem::size_of::<libc::sa_family_t>() {
        return None;
    }
    match (*addr).sa_family as c_int {
        libc::AF_UNIX => {
            let un = &*(addr as *const libc::sockaddr_un);
            let path_offset = std::mem::size_of::<libc::sa_family_t>();
            let max = len.saturating_sub(path_offset).min(un.sun_path.len());
            let raw: Vec<u8> = un.sun_path[..max].iter().map(|&ch| ch as u8).collect();
            // 首字节为 0 的是抽象命名空间地址
            let (prefix, body) = match raw.split_first() {
                Some((0, rest)) => ("@", rest),
                _ => ("", raw.as_slice()),
            };
            let end = body.iter().position(|&ch| ch == 0).unwrap_or(body.len());
            Some(format!("unix://{prefix}{}", String::from_utf8_lossy(&body[..end])))
        }
        libc::AF_INET if len >= std::mem::size_of::<libc::sockaddr_in>() => {
            let sin = &*(addr as *const libc::sockaddr_in);
            Some(format!("ip://{}", Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))))
        }
        libc::AF_INET6 if len >= std::mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = &*(addr as *const libc::sockaddr_in6);
            Some(format!("ip6://{}", Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

// agent 安装的全部 hook
pub fn hook_table() -> Vec<HookRecord> {
    vec![
        HookRecord::new("open", hook_open as usize),
        HookRecord::new("read", hook_read as usize),
        HookRecord::new("write", hook_write as usize),
        HookRecord::new("close", hook_close as usize),
        HookRecord::new("connect", hook_connect as usize),
        HookRecord::new("send", hook_send as usize),
        HookRecord::new("sendto", hook_sendto as usize),
        HookRecord::new("sendmsg", hook_sendmsg as usize),
        HookRecord::new("recv", hook_recv as usize),
        HookRecord::new("recvfrom", hook_recvfrom as usize),
        HookRecord::new("recvmsg", hook_recvmsg as usize),
        HookRecord::new("shutdown", hook_shutdown as usize),
    ]
}
