// 本进程动态加载器访问：RTLD_NOLOAD 句柄与全局符号地址

use crate::errno::Errno;
use crate::log;
use std::ffi::{CStr, CString};

pub(crate) fn last_dlerror() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown dl error".to_string();
    }
    unsafe { CStr::from_ptr(message) }
        .to_string_lossy()
        .into_owned()
}

// 已加载模块的句柄，句柄在 drop 时 dlclose 以抵消 RTLD_NOLOAD 增加的引用计数
pub(crate) struct NoloadHandle {
    raw: *mut libc::c_void,
}

impl NoloadHandle {
    pub(crate) fn open(name: &str) -> Result<Self, Errno> {
        let c_name = CString::new(name).map_err(|_| Errno::InvalidArg)?;
        let raw = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD) };
        if raw.is_null() {
            log::debug(format_args!("dlopen {name} (RTLD_NOLOAD) failed: {}", last_dlerror()));
            return Err(Errno::NoModule);
        }
        Ok(Self { raw })
    }

    pub(crate) fn addr(&self) -> usize {
        self.raw as usize
    }
}

impl Drop for NoloadHandle {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.raw);
        }
    }
}

// 在全局作用域中查找符号，返回本进程内的地址
pub(crate) fn local_symbol(name: &str) -> Result<usize, Errno> {
    let c_name = CString::new(name).map_err(|_| Errno::InvalidArg)?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c_name.as_ptr()) };
    if addr.is_null() {
        log::debug(format_args!("dlsym {name} failed: {}", last_dlerror()));
        return Err(Errno::NoSym);
    }
    Ok(addr as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_symbol_resolves_libc() {
        assert_ne!(local_symbol("strlen").unwrap(), 0);
        assert_eq!(local_symbol("srx_trace_no_such_symbol"), Err(Errno::NoSym));
        assert_eq!(local_symbol("bad\0name"), Err(Errno::InvalidArg));
    }
}
