use std::ffi::c_char;

#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn hook_test_strlen(msg: *const c_char) -> usize {
    if msg.is_null() {
        return 0;
    }
    unsafe { libc::strlen(msg) }
}

#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn hook_test_open_close(path: *const c_char) -> i32 {
    if path.is_null() {
        return -1;
    }
    unsafe {
        let fd = libc::open(path, libc::O_RDONLY);
        if fd >= 0 {
            libc::close(fd);
        }
        fd
    }
}

// 参数按位置加权求和，用于确认远程调用的参数顺序
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn hook_test_weighted8(
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
    a6: usize,
    a7: usize,
) -> usize {
    [a0, a1, a2, a3, a4, a5, a6, a7]
        .iter()
        .enumerate()
        .map(|(i, value)| (i + 1) * value)
        .sum()
}
