// 注入目标进程后的追踪 agent：加载时为所有已加载模块安装 io/socket hook

// 描述符到名称的缓存
mod fd_cache;
// trampoline 实现
mod hooks;
// hook 表与原函数地址
mod registry;
// 追踪记录输出
mod report;

use srx_trace::{get_version, log, AgentConfig, HookEngine};
use std::sync::{Mutex, MutexGuard};

pub(crate) trait MutexPoisonRecover<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexPoisonRecover<T> for Mutex<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[ctor::ctor]
fn agent_main() {
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::warn(format_args!("agent config rejected ({err}), using defaults"));
            AgentConfig::default()
        }
    };
    log::set_debug_enabled(config.debug);
    report::mark_loaded();
    log::info(format_args!("{} loaded into pid {}", get_version(), std::process::id()));

    let mut table = hooks::hook_table();
    let mut engine = HookEngine::local(config.metadata_source);
    let patched = engine.install_all(&mut table, &config);
    registry::settle_originals(&mut table);
    log::info(format_args!("{patched} slots patched"));
    if !registry::publish(registry::HookRegistry::new(table)) {
        log::warn(format_args!("hook registry already published"));
    }
    if let Some(registry) = registry::get() {
        for record in registry.records() {
            log::debug(format_args!("{} -> original {:#x}", record.symbol, record.original));
        }
    }
}
