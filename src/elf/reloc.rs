// 重定位条目解析：REL/RELA 两种格式，r_info 拆分为符号下标和重定位类型

use super::field_word;
use crate::errno::Errno;
use crate::memory::{MemoryAccess, WORD_SIZE};

// ARM 重定位类型
#[cfg(target_arch = "arm")]
const R_GENERIC_JUMP_SLOT: u32 = 22;
#[cfg(target_arch = "arm")]
const R_GENERIC_GLOB_DAT: u32 = 21;
#[cfg(target_arch = "arm")]
const R_GENERIC_ABS: u32 = 2;

// AArch64 重定位类型
#[cfg(target_arch = "aarch64")]
const R_GENERIC_JUMP_SLOT: u32 = 1026;
#[cfg(target_arch = "aarch64")]
const R_GENERIC_GLOB_DAT: u32 = 1025;
#[cfg(target_arch = "aarch64")]
const R_GENERIC_ABS: u32 = 257;

// x86_64 重定位类型
#[cfg(target_arch = "x86_64")]
const R_GENERIC_JUMP_SLOT: u32 = 7;
#[cfg(target_arch = "x86_64")]
const R_GENERIC_GLOB_DAT: u32 = 6;
#[cfg(target_arch = "x86_64")]
const R_GENERIC_ABS: u32 = 1;

#[cfg(target_pointer_width = "64")]
pub(crate) fn elf_r_sym(info: usize) -> u32 {
    (info >> 32) as u32
}

#[cfg(target_pointer_width = "64")]
pub(crate) fn elf_r_type(info: usize) -> u32 {
    (info & 0xffff_ffff) as u32
}

#[cfg(target_pointer_width = "32")]
pub(crate) fn elf_r_sym(info: usize) -> u32 {
    (info >> 8) as u32
}

#[cfg(target_pointer_width = "32")]
pub(crate) fn elf_r_type(info: usize) -> u32 {
    (info & 0xff) as u32
}

#[cfg(all(test, target_pointer_width = "64"))]
pub(crate) fn elf_r_info(sym: u32, r_type: u32) -> usize {
    ((sym as usize) << 32) | r_type as usize
}

#[cfg(all(test, target_pointer_width = "32"))]
pub(crate) fn elf_r_info(sym: u32, r_type: u32) -> usize {
    ((sym as usize) << 8) | (r_type as usize & 0xff)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelocKind {
    JumpSlot,
    GlobDat,
    Absolute,
    Other(u32),
}

impl RelocKind {
    pub const JUMP_SLOT: u32 = R_GENERIC_JUMP_SLOT;
    pub const GLOB_DAT: u32 = R_GENERIC_GLOB_DAT;
    pub const ABS: u32 = R_GENERIC_ABS;

    pub const fn classify(r_type: u32) -> Self {
        match r_type {
            R_GENERIC_JUMP_SLOT => Self::JumpSlot,
            R_GENERIC_GLOB_DAT => Self::GlobDat,
            R_GENERIC_ABS => Self::Absolute,
            other => Self::Other(other),
        }
    }
}

// REL 条目两个字长（offset, info），RELA 额外带一个 addend
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RelocFormat {
    Rel,
    Rela,
}

impl RelocFormat {
    // 32 位目标使用 REL，64 位目标使用 RELA
    #[cfg(target_pointer_width = "32")]
    pub const NATIVE: Self = Self::Rel;
    #[cfg(target_pointer_width = "64")]
    pub const NATIVE: Self = Self::Rela;

    pub const fn entry_size(self) -> usize {
        match self {
            Self::Rel => 2 * WORD_SIZE,
            Self::Rela => 3 * WORD_SIZE,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RelocEntry {
    pub offset: usize,
    pub info: usize,
}

impl RelocEntry {
    pub fn sym(&self) -> u32 {
        elf_r_sym(self.info)
    }

    pub fn r_type(&self) -> u32 {
        elf_r_type(self.info)
    }

    pub fn kind(&self) -> RelocKind {
        RelocKind::classify(self.r_type())
    }
}

// 一张重定位表：起始地址与条目数
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RelocTable {
    pub addr: usize,
    pub count: usize,
    pub format: RelocFormat,
}

impl Default for RelocTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl RelocTable {
    pub const fn empty() -> Self {
        Self {
            addr: 0,
            count: 0,
            format: RelocFormat::NATIVE,
        }
    }

    // 由 dynamic section 中的字节大小换算条目数
    pub const fn from_size(addr: usize, size: usize, format: RelocFormat) -> Self {
        if addr == 0 {
            return Self::empty();
        }
        Self {
            addr,
            count: size / format.entry_size(),
            format,
        }
    }

    pub fn entry<M: MemoryAccess + ?Sized>(&self, mem: &M, index: usize) -> Result<RelocEntry, Errno> {
        if index >= self.count {
            return Err(Errno::InvalidArg);
        }
        let addr = self.addr + index * self.format.entry_size();
        let raw = mem.read_vec(addr, 2 * WORD_SIZE)?;
        Ok(RelocEntry {
            offset: field_word(&raw, 0),
            info: field_word(&raw, WORD_SIZE),
        })
    }
}
