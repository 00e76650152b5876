// 调用追踪记录：[ ts=<ms> pid=<pid>, tid=<tid> ] name( k=v ... ) -> ret

use once_cell::sync::Lazy;
use srx_trace::log;
use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt::{self, Write};
use std::time::Instant;

static LOADED_AT: Lazy<Instant> = Lazy::new(Instant::now);

pub fn mark_loaded() {
    Lazy::force(&LOADED_AT);
}

pub enum Value<'a> {
    Int(i64),
    Unsigned(u64),
    Pointer(usize),
    Str(Cow<'a, str>),
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Unsigned(value) => write!(f, "{value}"),
            Self::Pointer(value) => write!(f, "{value:#x}"),
            Self::Str(value) => write!(f, "\"{value}\""),
        }
    }
}

// 空指针显示为 (null)
pub unsafe fn c_str<'a>(ptr: *const libc::c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        return Cow::Borrowed("(null)");
    }
    CStr::from_ptr(ptr).to_string_lossy()
}

pub fn format_line(ts_ms: u128, pid: i32, tid: i64, name: &str, args: &[(&str, Value)], ret: &Value) -> String {
    let mut line = format!("[ ts={ts_ms} pid={pid}, tid={tid} ] {name}( ");
    for (key, value) in args {
        let _ = write!(line, "{key}={value} ");
    }
    let _ = write!(line, ") -> {ret}");
    line
}

pub fn add(name: &str, args: &[(&str, Value)], ret: Value) {
    let ts_ms = LOADED_AT.elapsed().as_millis();
    let pid = unsafe { libc::getpid() };
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as i64;
    let line = format_line(ts_ms, pid, tid, name, args, &ret);
    log::emit(format_args!("{line}"));
}
