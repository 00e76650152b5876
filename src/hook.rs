// hook 引擎：符号查找 + 重定位 slot 替换，按 hook 表遍历所有已加载模块

use crate::config::AgentConfig;
use crate::elf::{ModuleMetadata, SoinfoLayout};
use crate::errno::Errno;
use crate::loader::NoloadHandle;
use crate::log;
use crate::maps::{self, ModuleMapping};
use crate::memory::{LocalMemory, MemoryAccess};

// 一条 hook：符号名、替换函数地址、首次捕获到的原始地址（0 表示尚未捕获）
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HookRecord {
    pub symbol: String,
    pub replacement: usize,
    pub original: usize,
}

impl HookRecord {
    pub fn new(symbol: &str, replacement: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            replacement,
            original: 0,
        }
    }

    // 只记录第一个非零且不是替换函数本身的旧值
    pub fn record_original(&mut self, previous: usize) -> bool {
        if self.original != 0 || previous == 0 || previous == self.replacement {
            return false;
        }
        self.original = previous;
        true
    }
}

// 模块元数据来源
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MetadataSource {
    // RTLD_NOLOAD 句柄指向旧版 Android 加载器的 soinfo 记录
    Soinfo(SoinfoLayout),
    // RTLD_NOLOAD 句柄指向 glibc link_map，失败时退回 Image
    LinkMap,
    // 解析模块首个映射处的 ELF 文件头
    Image,
}

impl Default for MetadataSource {
    #[cfg(target_os = "android")]
    fn default() -> Self {
        Self::Image
    }

    #[cfg(not(target_os = "android"))]
    fn default() -> Self {
        Self::LinkMap
    }
}

impl MetadataSource {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "soinfo" => Some(Self::Soinfo(SoinfoLayout::ANDROID_LEGACY_ARM)),
            "link_map" | "linkmap" => Some(Self::LinkMap),
            "image" => Some(Self::Image),
            _ => None,
        }
    }

    // 为本进程内已加载的模块构建元数据
    pub fn load(&self, mem: &LocalMemory, name: &str) -> Result<ModuleMetadata, Errno> {
        match self {
            Self::Soinfo(layout) => {
                let handle = NoloadHandle::open(name)?;
                ModuleMetadata::from_soinfo(mem, handle.addr(), layout, name)
            }
            Self::LinkMap => {
                let from_link_map = NoloadHandle::open(name)
                    .and_then(|handle| ModuleMetadata::from_link_map(mem, handle.addr(), name));
                match from_link_map {
                    Ok(meta) => Ok(meta),
                    Err(err) => {
                        log::debug(format_args!("{name}: link_map unavailable ({err}), parsing image"));
                        Self::Image.load(mem, name)
                    }
                }
            }
            Self::Image => {
                let base = maps::find_module_base(name, None).ok_or(Errno::NoModule)?;
                ModuleMetadata::from_loaded_image(mem, base, name)
            }
        }
    }
}

pub struct HookEngine<M: MemoryAccess> {
    mem: M,
    source: MetadataSource,
}

impl<M: MemoryAccess> HookEngine<M> {
    pub fn new(mem: M, source: MetadataSource) -> Self {
        Self { mem, source }
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    pub fn source(&self) -> MetadataSource {
        self.source
    }

    // 在单个模块内替换 symbol 的重定位 slot，返回被替换的旧值
    // GNU hash 查找失败时退回按名称扫描重定位表
    pub fn install_in(
        &mut self,
        meta: &ModuleMetadata,
        symbol: &str,
        replacement: usize,
    ) -> Result<usize, Errno> {
        let symbol_index = match meta.lookup(&self.mem, symbol) {
            Ok(entry) => Some(entry.index),
            Err(Errno::NotFound) if meta.hash.is_gnu() => None,
            Err(err) => return Err(err),
        };
        meta.patch(&mut self.mem, symbol_index, symbol, replacement)
    }

    // 对每个未被跳过的模块安装 hook 表中的所有条目，返回实际改变了内容的 slot 数
    pub fn install_all_with<F>(
        &mut self,
        modules: &[ModuleMapping],
        table: &mut [HookRecord],
        config: &AgentConfig,
        mut locate: F,
    ) -> usize
    where
        F: FnMut(&M, &ModuleMapping) -> Result<ModuleMetadata, Errno>,
    {
        let mut patched = 0;
        for module in modules {
            if config.should_skip(&module.name) {
                log::debug(format_args!("[{:#x}] skipping {}", module.base_addr, module.name));
                continue;
            }
            let meta = match locate(&self.mem, module) {
                Ok(meta) => meta,
                Err(err) => {
                    log::warn(format_args!(
                        "[{:#x}] {}: no metadata ({err})",
                        module.base_addr, module.name
                    ));
                    continue;
                }
            };
            log::info(format_args!("[{:#x}] hooking {}", module.base_addr, module.name));

            for record in table.iter_mut() {
                match self.install_in(&meta, &record.symbol, record.replacement) {
                    Ok(previous) => {
                        // 同一模块的重复映射会再次命中已替换的 slot，不计数
                        if previous != record.replacement {
                            patched += 1;
                        }
                        if record.record_original(previous) {
                            log::info(format_args!(
                                "  {} - {:#x} -> {:#x}",
                                record.symbol, previous, record.replacement
                            ));
                        }
                    }
                    Err(Errno::NotFound) | Err(Errno::NoReloc) => {}
                    Err(err) => log::warn(format_args!(
                        "  {} in {}: {err}",
                        record.symbol, module.name
                    )),
                }
            }
        }
        patched
    }
}

impl HookEngine<LocalMemory> {
    pub fn local(source: MetadataSource) -> Self {
        // 仅访问加载器登记的模块映像
        Self::new(unsafe { LocalMemory::new() }, source)
    }

    pub fn install_one(
        &mut self,
        module_name: &str,
        symbol: &str,
        replacement: usize,
    ) -> Result<usize, Errno> {
        let meta = self.source.load(&self.mem, module_name)?;
        self.install_in(&meta, symbol, replacement)
    }

    pub fn install_all(&mut self, table: &mut [HookRecord], config: &AgentConfig) -> usize {
        let modules = maps::enumerate_with(None, config.map_filter);
        log::info(format_args!(
            "installing {} hooks into {} modules",
            table.len(),
            modules.len()
        ));
        let source = self.source;
        self.install_all_with(&modules, table, config, |mem, module| {
            source.load(mem, &module.name)
        })
    }
}
