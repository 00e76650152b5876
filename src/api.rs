use crate::config::{ENV_DEBUG, ENV_METADATA, env_flag};
use crate::hook::{HookEngine, MetadataSource};
use crate::log;
use crate::version;

// 在本进程的指定模块内替换 symbol 的重定位 slot
// 返回被替换的旧地址，任何失败都返回 0
pub fn install(module_name: &str, symbol: &str, replacement: usize) -> usize {
    let source = std::env::var(ENV_METADATA)
        .ok()
        .and_then(|value| MetadataSource::parse(&value))
        .unwrap_or_default();
    let mut engine = HookEngine::local(source);
    match engine.install_one(module_name, symbol, replacement) {
        Ok(previous) => previous,
        Err(err) => {
            log::debug(format_args!("install {symbol} in {module_name} failed: {err}"));
            0
        }
    }
}

pub fn set_debug(enabled: bool) {
    log::set_debug_enabled(enabled || env_flag(ENV_DEBUG));
}

pub fn get_version() -> String {
    version::version_str_full()
}
