// ELF 动态符号查找与 PLT/GOT 重定位 slot 替换

use crate::errno::Errno;
use crate::log;
use crate::memory::{MemoryAccess, Protection, WORD_SIZE, page_start};

// ELF 符号哈希算法
mod hash;
// 重定位条目的 r_sym / r_type 提取与类型分类
mod reloc;
// 旧版 Android 加载器 soinfo 记录的字段布局
mod soinfo;

pub use hash::{elf_gnu_hash, elf_hash};
pub use reloc::{RelocEntry, RelocFormat, RelocKind, RelocTable};
pub use soinfo::{GnuHashLayout, SoinfoLayout, SoinfoView};
#[cfg(test)]
pub(crate) use reloc::elf_r_info;

#[cfg(test)]
mod tests;

const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EI_CLASS: usize = 4;
#[cfg(target_pointer_width = "32")]
const ELFCLASS_NATIVE: u8 = 1;
#[cfg(target_pointer_width = "64")]
const ELFCLASS_NATIVE: u8 = 2;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;

// dynamic section 标签常量
const DT_NULL: usize = 0;
const DT_PLTRELSZ: usize = 2;
const DT_HASH: usize = 4;
const DT_STRTAB: usize = 5;
const DT_SYMTAB: usize = 6;
const DT_RELA: usize = 7;
const DT_RELASZ: usize = 8;
const DT_REL: usize = 17;
const DT_RELSZ: usize = 18;
const DT_PLTREL: usize = 20;
const DT_JMPREL: usize = 23;
const DT_GNU_HASH: usize = 0x6fff_fef5;

// dynamic section 最多遍历的条目数
const MAX_DYNAMIC_ENTRIES: usize = 1024;

#[cfg(target_arch = "arm")]
const EXPECTED_MACHINE: u16 = 40;
#[cfg(target_arch = "aarch64")]
const EXPECTED_MACHINE: u16 = 183;
#[cfg(target_arch = "x86_64")]
const EXPECTED_MACHINE: u16 = 62;

// ELF 文件头与程序头中用到的字段偏移
#[cfg(target_pointer_width = "64")]
mod layout {
    pub(super) const EHDR_SIZE: usize = 64;
    pub(super) const E_MACHINE: usize = 18;
    pub(super) const E_PHOFF: usize = 32;
    pub(super) const E_PHENTSIZE: usize = 54;
    pub(super) const E_PHNUM: usize = 56;
    pub(super) const PHDR_SIZE: usize = 56;
    pub(super) const P_TYPE: usize = 0;
    pub(super) const P_OFFSET: usize = 8;
    pub(super) const P_VADDR: usize = 16;
    pub(super) const SYM_SIZE: usize = 24;
}

#[cfg(target_pointer_width = "32")]
mod layout {
    pub(super) const EHDR_SIZE: usize = 52;
    pub(super) const E_MACHINE: usize = 18;
    pub(super) const E_PHOFF: usize = 28;
    pub(super) const E_PHENTSIZE: usize = 42;
    pub(super) const E_PHNUM: usize = 44;
    pub(super) const PHDR_SIZE: usize = 32;
    pub(super) const P_TYPE: usize = 0;
    pub(super) const P_OFFSET: usize = 4;
    pub(super) const P_VADDR: usize = 8;
    pub(super) const SYM_SIZE: usize = 16;
}

pub const SYM_ENTRY_SIZE: usize = layout::SYM_SIZE;

pub(crate) fn field_u16(raw: &[u8], offset: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&raw[offset..offset + 2]);
    u16::from_ne_bytes(bytes)
}

pub(crate) fn field_u32(raw: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&raw[offset..offset + 4]);
    u32::from_ne_bytes(bytes)
}

pub(crate) fn field_word(raw: &[u8], offset: usize) -> usize {
    let mut bytes = [0u8; WORD_SIZE];
    bytes.copy_from_slice(&raw[offset..offset + WORD_SIZE]);
    usize::from_ne_bytes(bytes)
}

// 动态符号表中的一项，index 为其在符号表中的下标
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SymbolEntry {
    pub index: u32,
    pub name_offset: u32,
    pub value: usize,
    pub size: usize,
    pub info: u8,
    pub shndx: u16,
}

impl SymbolEntry {
    // raw 长度必须为 SYM_ENTRY_SIZE
    #[cfg(target_pointer_width = "64")]
    fn parse(index: u32, raw: &[u8]) -> Self {
        Self {
            index,
            name_offset: field_u32(raw, 0),
            info: raw[4],
            shndx: field_u16(raw, 6),
            value: field_word(raw, 8),
            size: field_word(raw, 16),
        }
    }

    #[cfg(target_pointer_width = "32")]
    fn parse(index: u32, raw: &[u8]) -> Self {
        Self {
            index,
            name_offset: field_u32(raw, 0),
            value: field_word(raw, 4),
            size: field_word(raw, 8),
            info: raw[12],
            shndx: field_u16(raw, 14),
        }
    }
}

// 模块携带的符号哈希表
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashTable {
    Sysv {
        nbucket: u32,
        bucket: usize,
        chain: usize,
    },
    // chain 已减去 symoffset 对应的偏移，可直接用符号下标索引
    Gnu {
        nbucket: u32,
        bucket: usize,
        chain: usize,
        bloom: usize,
        bloom_mask: u32,
        shift2: u32,
    },
}

impl HashTable {
    pub const fn is_gnu(&self) -> bool {
        matches!(self, Self::Gnu { .. })
    }
}

// 单个已加载模块的动态链接元数据，所有地址均为本进程内的绝对地址
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleMetadata {
    pub name: String,
    pub load_bias: usize,
    pub symtab: usize,
    pub strtab: usize,
    pub hash: HashTable,
    pub plt_rel: RelocTable,
    pub rel: RelocTable,
}

include!("elf/image.inc.rs");
include!("elf/lookup.inc.rs");
include!("elf/patch.inc.rs");
