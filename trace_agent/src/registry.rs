// hook 表注册：初始化时构建一次，trampoline 通过引用读取原函数地址

use crate::MutexPoisonRecover;
use once_cell::sync::{Lazy, OnceCell};
use srx_trace::{log, HookRecord};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::Mutex;

pub struct HookRegistry {
    records: Vec<HookRecord>,
}

impl HookRegistry {
    pub fn new(records: Vec<HookRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[HookRecord] {
        &self.records
    }

    // 安装时捕获到的原函数地址
    pub fn original(&self, symbol: &str) -> Option<usize> {
        self.records
            .iter()
            .find(|record| record.symbol == symbol)
            .map(|record| record.original)
            .filter(|&addr| addr != 0)
    }
}

static REGISTRY: OnceCell<HookRegistry> = OnceCell::new();

// 回退查找结果缓存，0 表示加载器也找不到
static FALLBACKS: Lazy<Mutex<BTreeMap<&'static str, usize>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

pub fn publish(registry: HookRegistry) -> bool {
    REGISTRY.set(registry).is_ok()
}

pub fn get() -> Option<&'static HookRegistry> {
    REGISTRY.get()
}

// trampoline 转发目标：优先使用注册表中的地址，缺失时经加载器按 RTLD_NEXT 查找
pub fn original(symbol: &'static str) -> Option<usize> {
    if let Some(addr) = get().and_then(|registry| registry.original(symbol)) {
        return Some(addr);
    }
    let mut fallbacks = FALLBACKS.lock_or_poison();
    let addr = *fallbacks.entry(symbol).or_insert_with(|| {
        log::warn(format_args!("no original recorded for {symbol}, asking the loader"));
        next_symbol(symbol).unwrap_or(0)
    });
    (addr != 0).then_some(addr)
}

pub(crate) fn next_symbol(symbol: &str) -> Option<usize> {
    let name = CString::new(symbol).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    (!addr.is_null()).then_some(addr as usize)
}

fn is_symbol_start(addr: usize) -> bool {
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let found = unsafe { libc::dladdr(addr as *const libc::c_void, &mut info) };
    found != 0 && !info.dli_saddr.is_null() && info.dli_saddr as usize == addr
}

// 惰性绑定时 GOT 中保存的是 PLT 解析桩而非函数入口，这类地址改用加载器查找的结果
pub fn settle_originals(records: &mut [HookRecord]) {
    for record in records.iter_mut() {
        if record.original != 0 && is_symbol_start(record.original) {
            continue;
        }
        if let Some(addr) = next_symbol(&record.symbol) {
            if record.original != 0 {
                log::debug(format_args!(
                    "{}: {:#x} is not a function entry, using {addr:#x}",
                    record.symbol, record.original
                ));
            }
            record.original = addr;
        }
    }
}
