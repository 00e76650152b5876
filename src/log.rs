use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

pub const LOG_DEBUG: i32 = 3;
pub const LOG_INFO: i32 = 4;
pub const LOG_WARN: i32 = 5;
pub const LOG_ERROR: i32 = 6;

#[cfg(target_os = "android")]
const LOG_TAG_ANDROID: &[u8] = b"srx_trace\0";
#[cfg(not(target_os = "android"))]
const LOG_TAG: &str = "srx_trace";

static LOG_PRIORITY: AtomicI32 = AtomicI32::new(LOG_INFO);

#[cfg(target_os = "android")]
#[link(name = "log")]
unsafe extern "C" {
    fn __android_log_write(prio: i32, tag: *const libc::c_char, text: *const libc::c_char) -> i32;
}

// 设置日志级别，启用时输出 DEBUG 及以上，禁用时输出 INFO 及以上
pub fn set_debug_enabled(enabled: bool) {
    let priority = if enabled { LOG_DEBUG } else { LOG_INFO };
    LOG_PRIORITY.store(priority, Ordering::SeqCst);
}

pub fn debug_enabled() -> bool {
    LOG_PRIORITY.load(Ordering::Relaxed) <= LOG_DEBUG
}

fn enabled(priority: i32) -> bool {
    LOG_PRIORITY.load(Ordering::Relaxed) <= priority
}

#[cfg(target_os = "android")]
fn write_line(priority: i32, text: String) {
    let mut text = text.into_bytes();
    for byte in &mut text {
        if *byte == 0 {
            *byte = b' ';
        }
    }
    text.push(0);

    unsafe {
        __android_log_write(
            priority,
            LOG_TAG_ANDROID.as_ptr() as *const libc::c_char,
            text.as_ptr() as *const libc::c_char,
        );
    }
}

#[cfg(not(target_os = "android"))]
fn write_line(priority: i32, text: String) {
    use std::io::Write;

    let level = match priority {
        LOG_DEBUG => 'D',
        LOG_INFO => 'I',
        LOG_WARN => 'W',
        _ => 'E',
    };
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{level} {LOG_TAG}: {text}");
}

fn write_log(priority: i32, args: fmt::Arguments) {
    if !enabled(priority) {
        return;
    }
    write_line(priority, format!("{args}"));
}

// 不受日志级别限制的输出，用于调用追踪记录
pub fn emit(args: fmt::Arguments) {
    write_line(LOG_INFO, format!("{args}"));
}

pub fn info(args: fmt::Arguments) {
    write_log(LOG_INFO, args);
}

pub fn debug(args: fmt::Arguments) {
    write_log(LOG_DEBUG, args);
}

pub fn warn(args: fmt::Arguments) {
    write_log(LOG_WARN, args);
}

pub fn error(args: fmt::Arguments) {
    write_log(LOG_ERROR, args);
}
