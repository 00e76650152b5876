use std::ffi::{CString, c_char, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};

pub static STRLEN_COUNT: AtomicUsize = AtomicUsize::new(0);
pub static STRLEN_PREV: AtomicUsize = AtomicUsize::new(0);

pub const HOOK_TEST_LIB: &str = "libhook_test.so";
pub const FAKE_STRLEN_RESULT: usize = 4242;

pub type StrlenFn = extern "C" fn(*const c_char) -> usize;

pub unsafe extern "C" fn fake_strlen(_s: *const c_char) -> usize {
    STRLEN_COUNT.fetch_add(1, Ordering::Relaxed);
    FAKE_STRLEN_RESULT
}

// 计数后转发给安装时记录的原函数
pub unsafe extern "C" fn counting_strlen(s: *const c_char) -> usize {
    STRLEN_COUNT.fetch_add(1, Ordering::Relaxed);
    let prev = STRLEN_PREV.load(Ordering::Relaxed);
    if prev == 0 {
        return 0;
    }
    let prev_fn: unsafe extern "C" fn(*const c_char) -> usize = std::mem::transmute(prev);
    prev_fn(s)
}

// libhook_test.so 与测试程序位于同一目录
pub fn hook_test_path() -> String {
    let exe = std::env::current_exe().expect("current_exe failed");
    let dir = exe.parent().expect("exe has no parent dir");
    dir.join(HOOK_TEST_LIB)
        .to_str()
        .expect("non utf-8 hook_test path")
        .to_string()
}

pub unsafe fn load_hook_test() -> *mut c_void {
    let path = CString::new(hook_test_path()).expect("cstring failed");
    let handle = libc::dlopen(path.as_ptr(), libc::RTLD_NOW);
    assert!(!handle.is_null(), "dlopen {HOOK_TEST_LIB} failed");
    handle
}

pub unsafe fn hook_test_symbol(handle: *mut c_void, name: &str) -> *mut c_void {
    let sym_name = CString::new(name).expect("cstring failed");
    let sym = libc::dlsym(handle, sym_name.as_ptr());
    assert!(!sym.is_null(), "dlsym {name} failed");
    sym
}

pub unsafe fn hook_test_strlen(handle: *mut c_void, msg: &CString) -> usize {
    let trigger: StrlenFn = std::mem::transmute(hook_test_symbol(handle, "hook_test_strlen"));
    trigger(msg.as_ptr())
}

// 轮询 sleep 的子进程，作为远程注入目标
pub unsafe fn spawn_sleeper() -> libc::pid_t {
    let pid = libc::fork();
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        loop {
            libc::usleep(100_000);
        }
    }
    pid
}

pub unsafe fn reap(pid: libc::pid_t) {
    libc::kill(pid, libc::SIGKILL);
    let mut status = 0;
    libc::waitpid(pid, &mut status, 0);
}
