// 加载器内部 soinfo 记录的只读视图
// 布局必须与目标加载器版本完全一致，所有读取都做越界检查

use super::{HashTable, ModuleMetadata, RelocFormat, RelocTable, field_u32, field_word};
use crate::errno::Errno;
use crate::log;
use crate::memory::{MemoryAccess, WORD_SIZE};

// GNU hash 相关字段偏移，nbucket/bloom/bucket/chain 为字长，maskwords/shift2 为 u32
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GnuHashLayout {
    pub nbucket: usize,
    pub maskwords: usize,
    pub shift2: usize,
    pub bloom_filter: usize,
    pub bucket: usize,
    pub chain: usize,
}

// soinfo 字段偏移表，flags 为 u32，其余字段为字长
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SoinfoLayout {
    pub size: usize,
    pub load_bias: usize,
    pub flags: usize,
    pub strtab: usize,
    pub symtab: usize,
    pub nbucket: usize,
    pub bucket: usize,
    pub chain: usize,
    pub plt_rel: usize,
    pub plt_rel_count: usize,
    pub rel: usize,
    pub rel_count: usize,
    pub flag_gnu_hash: u32,
    pub gnu: Option<GnuHashLayout>,
}

impl SoinfoLayout {
    // Android 4.x 32 位加载器：name[128] 之后依次为 phdr、phnum、entry、base 等字段
    // 该版本没有 GNU hash，load bias 取 base 字段
    pub const ANDROID_LEGACY_ARM: SoinfoLayout = SoinfoLayout {
        size: 216,
        load_bias: 140,
        flags: 168,
        strtab: 172,
        symtab: 176,
        nbucket: 180,
        bucket: 188,
        chain: 192,
        plt_rel: 200,
        plt_rel_count: 204,
        rel: 208,
        rel_count: 212,
        flag_gnu_hash: 0x40,
        gnu: None,
    };
}

pub struct SoinfoView<'a> {
    bytes: &'a [u8],
    layout: &'a SoinfoLayout,
}

impl<'a> SoinfoView<'a> {
    pub fn new(bytes: &'a [u8], layout: &'a SoinfoLayout) -> Result<Self, Errno> {
        if bytes.len() < layout.size {
            log::error(format_args!(
                "soinfo record too short: {} < {}",
                bytes.len(),
                layout.size
            ));
            return Err(Errno::Format);
        }
        Ok(Self { bytes, layout })
    }

    fn word(&self, offset: usize) -> Result<usize, Errno> {
        let end = offset.checked_add(WORD_SIZE).ok_or(Errno::Format)?;
        if end > self.bytes.len() {
            return Err(Errno::Format);
        }
        Ok(field_word(self.bytes, offset))
    }

    fn u32_at(&self, offset: usize) -> Result<u32, Errno> {
        let end = offset.checked_add(4).ok_or(Errno::Format)?;
        if end > self.bytes.len() {
            return Err(Errno::Format);
        }
        Ok(field_u32(self.bytes, offset))
    }

    pub fn flags(&self) -> Result<u32, Errno> {
        self.u32_at(self.layout.flags)
    }

    fn hash_table(&self) -> Result<HashTable, Errno> {
        let flags = self.flags()?;
        if flags & self.layout.flag_gnu_hash != 0 {
            let Some(gnu) = self.layout.gnu else {
                log::error(format_args!("soinfo has gnu hash flag but layout has no gnu fields"));
                return Err(Errno::Format);
            };
            let nbucket = self.word(gnu.nbucket)?;
            return Ok(HashTable::Gnu {
                nbucket: u32::try_from(nbucket).map_err(|_| Errno::Format)?,
                bucket: self.word(gnu.bucket)?,
                chain: self.word(gnu.chain)?,
                bloom: self.word(gnu.bloom_filter)?,
                bloom_mask: self.u32_at(gnu.maskwords)?,
                shift2: self.u32_at(gnu.shift2)?,
            });
        }
        let nbucket = self.word(self.layout.nbucket)?;
        Ok(HashTable::Sysv {
            nbucket: u32::try_from(nbucket).map_err(|_| Errno::Format)?,
            bucket: self.word(self.layout.bucket)?,
            chain: self.word(self.layout.chain)?,
        })
    }

    pub fn metadata(&self, name: &str) -> Result<ModuleMetadata, Errno> {
        let strtab = self.word(self.layout.strtab)?;
        let symtab = self.word(self.layout.symtab)?;
        if strtab == 0 || symtab == 0 {
            return Err(Errno::Format);
        }
        let plt_rel = self.word(self.layout.plt_rel)?;
        let rel = self.word(self.layout.rel)?;
        Ok(ModuleMetadata {
            name: name.to_string(),
            load_bias: self.word(self.layout.load_bias)?,
            symtab,
            strtab,
            hash: self.hash_table()?,
            plt_rel: RelocTable {
                addr: plt_rel,
                count: if plt_rel == 0 { 0 } else { self.word(self.layout.plt_rel_count)? },
                format: RelocFormat::NATIVE,
            },
            rel: RelocTable {
                addr: rel,
                count: if rel == 0 { 0 } else { self.word(self.layout.rel_count)? },
                format: RelocFormat::NATIVE,
            },
        })
    }
}

impl ModuleMetadata {
    // 从加载器句柄指向的 soinfo 记录构建元数据
    pub fn from_soinfo<M: MemoryAccess + ?Sized>(
        mem: &M,
        handle: usize,
        layout: &SoinfoLayout,
        name: &str,
    ) -> Result<Self, Errno> {
        let bytes = mem.read_vec(handle, layout.size)?;
        SoinfoView::new(&bytes, layout)?.metadata(name)
    }
}
