// 内存访问抽象：ELF 元数据读取、重定位 slot 写入与页面保护修改

use crate::errno::Errno;
use crate::log;
use once_cell::sync::Lazy;
use std::sync::atomic::{Ordering, fence};

pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

const FALLBACK_PAGE_SIZE: usize = 0x1000;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        FALLBACK_PAGE_SIZE
    } else {
        size as usize
    }
});

// slot 所在页面的保护属性
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
}

impl Protection {
    pub const fn as_prot(self) -> i32 {
        match self {
            Self::ReadOnly => libc::PROT_READ,
            Self::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

// 某个地址空间的读写接口，元数据解析和 slot 替换都经由它访问内存
pub trait MemoryAccess {
    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), Errno>;

    fn write_word(&mut self, addr: usize, value: usize) -> Result<(), Errno>;

    fn protect(&mut self, page_start: usize, len: usize, prot: Protection) -> Result<(), Errno>;

    fn page_size(&self) -> usize;

    fn read_word(&self, addr: usize) -> Result<usize, Errno> {
        let mut raw = [0u8; WORD_SIZE];
        self.read(addr, &mut raw)?;
        Ok(usize::from_ne_bytes(raw))
    }

    fn read_u32(&self, addr: usize) -> Result<u32, Errno> {
        let mut raw = [0u8; 4];
        self.read(addr, &mut raw)?;
        Ok(u32::from_ne_bytes(raw))
    }

    fn read_vec(&self, addr: usize, len: usize) -> Result<Vec<u8>, Errno> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }

    // 逐字节比较 addr 处以 NUL 结尾的字符串与 name
    fn cstr_eq(&self, addr: usize, name: &[u8]) -> Result<bool, Errno> {
        let mut byte = [0u8; 1];
        for (offset, &expected) in name.iter().enumerate() {
            self.read(addr.wrapping_add(offset), &mut byte)?;
            if byte[0] != expected {
                return Ok(false);
            }
        }
        self.read(addr.wrapping_add(name.len()), &mut byte)?;
        Ok(byte[0] == 0)
    }
}

// 页面对齐：返回地址所在页面的起始地址
pub fn page_start(addr: usize, page_size: usize) -> usize {
    addr & !(page_size - 1)
}

// 当前进程地址空间
pub struct LocalMemory {
    _private: (),
}

impl LocalMemory {
    // 调用方保证之后传入的地址都指向本进程内已映射的内存
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl MemoryAccess for LocalMemory {
    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), Errno> {
        if addr == 0 {
            return Err(Errno::ReadMem);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write_word(&mut self, addr: usize, value: usize) -> Result<(), Errno> {
        if addr == 0 || addr % WORD_SIZE != 0 {
            return Err(Errno::InvalidArg);
        }
        unsafe {
            std::ptr::write_volatile(addr as *mut usize, value);
        }
        fence(Ordering::SeqCst);
        Ok(())
    }

    fn protect(&mut self, page_start: usize, len: usize, prot: Protection) -> Result<(), Errno> {
        let result =
            unsafe { libc::mprotect(page_start as *mut libc::c_void, len, prot.as_prot()) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            log::error(format_args!(
                "mprotect {page_start:#x}+{len:#x} {prot:?} failed: {err}"
            ));
            return Err(Errno::SetProt);
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        *PAGE_SIZE
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::BTreeMap;

    // 稀疏字节地址空间，未写入的地址读取失败
    pub(crate) struct FakeMemory {
        bytes: BTreeMap<usize, u8>,
        pub(crate) protects: Vec<(usize, usize, Protection)>,
        pub(crate) fail_protect: bool,
    }

    impl FakeMemory {
        pub(crate) fn new() -> Self {
            Self {
                bytes: BTreeMap::new(),
                protects: Vec::new(),
                fail_protect: false,
            }
        }

        pub(crate) fn put(&mut self, addr: usize, data: &[u8]) {
            for (offset, &byte) in data.iter().enumerate() {
                self.bytes.insert(addr + offset, byte);
            }
        }

        pub(crate) fn put_word(&mut self, addr: usize, value: usize) {
            self.put(addr, &value.to_ne_bytes());
        }

        pub(crate) fn put_u32(&mut self, addr: usize, value: u32) {
            self.put(addr, &value.to_ne_bytes());
        }

        pub(crate) fn word(&self, addr: usize) -> usize {
            self.read_word(addr).expect("word mapped")
        }
    }

    impl MemoryAccess for FakeMemory {
        fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), Errno> {
            for (offset, slot) in buf.iter_mut().enumerate() {
                *slot = *self.bytes.get(&(addr + offset)).ok_or(Errno::ReadMem)?;
            }
            Ok(())
        }

        fn write_word(&mut self, addr: usize, value: usize) -> Result<(), Errno> {
            self.put_word(addr, value);
            Ok(())
        }

        fn protect(&mut self, page_start: usize, len: usize, prot: Protection) -> Result<(), Errno> {
            if self.fail_protect {
                return Err(Errno::SetProt);
            }
            self.protects.push((page_start, len, prot));
            Ok(())
        }

        fn page_size(&self) -> usize {
            0x1000
        }
    }
}
