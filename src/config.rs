// 环境变量驱动的注入器与 agent 配置
use crate::errno::Errno;
use crate::hook::MetadataSource;
use crate::log;
use crate::maps::MapFilter;
use regex::Regex;

pub const ENV_DEBUG: &str = "SRX_TRACE_DEBUG";
pub const ENV_LINKER_MODULE: &str = "SRX_TRACE_LINKER_MODULE";
pub const ENV_LIBC_MODULE: &str = "SRX_TRACE_LIBC_MODULE";
pub const ENV_DLOPEN_MODE: &str = "SRX_TRACE_DLOPEN_MODE";
pub const ENV_IGNORE: &str = "SRX_TRACE_IGNORE";
pub const ENV_SELF: &str = "SRX_TRACE_SELF";
pub const ENV_METADATA: &str = "SRX_TRACE_METADATA";
pub const ENV_ALL_EXEC: &str = "SRX_TRACE_ALL_EXEC";

pub const DEFAULT_SELF_NAME: &str = "libtrace_agent.so";

#[cfg(all(target_os = "android", target_pointer_width = "32"))]
const DEFAULT_LINKER_MODULE: &str = "/system/bin/linker";
#[cfg(all(target_os = "android", target_pointer_width = "32"))]
const DEFAULT_LIBC_MODULE: &str = "/system/lib/libc.so";
#[cfg(all(target_os = "android", target_pointer_width = "64"))]
const DEFAULT_LINKER_MODULE: &str = "linker64";
#[cfg(all(target_os = "android", target_pointer_width = "64"))]
const DEFAULT_LIBC_MODULE: &str = "libc.so";
// glibc 2.34 起 dl* 系列函数并入 libc
#[cfg(not(target_os = "android"))]
const DEFAULT_LINKER_MODULE: &str = "libc.so";
#[cfg(not(target_os = "android"))]
const DEFAULT_LIBC_MODULE: &str = "libc.so";

// bionic 接受 0，glibc 要求 RTLD_LAZY 或 RTLD_NOW 之一
#[cfg(target_os = "android")]
const DEFAULT_DLOPEN_MODE: usize = 0;
#[cfg(not(target_os = "android"))]
const DEFAULT_DLOPEN_MODE: usize = libc::RTLD_NOW as usize;

// 读取布尔开关，接受 1/true/yes/on
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| {
            let value = value.trim().to_ascii_lowercase();
            matches!(value.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}

fn env_string(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

// 注入器配置：远程 dl* 与内存分配函数所在模块
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InjectorConfig {
    pub linker_module: String,
    pub libc_module: String,
    pub dlopen_mode: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            linker_module: DEFAULT_LINKER_MODULE.to_string(),
            libc_module: DEFAULT_LIBC_MODULE.to_string(),
            dlopen_mode: DEFAULT_DLOPEN_MODE,
        }
    }
}

impl InjectorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(module) = env_string(ENV_LINKER_MODULE) {
            config.linker_module = module;
        }
        if let Some(module) = env_string(ENV_LIBC_MODULE) {
            config.libc_module = module;
        }
        if let Some(mode) = env_string(ENV_DLOPEN_MODE) {
            match parse_number(&mode) {
                Some(mode) => config.dlopen_mode = mode,
                None => log::warn(format_args!("ignoring {ENV_DLOPEN_MODE}={mode}")),
            }
        }
        config
    }
}

fn parse_number(text: &str) -> Option<usize> {
    match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => text.parse::<usize>().ok(),
    }
}

// agent 配置：模块过滤规则与元数据来源
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub self_name: String,
    pub ignore: Option<Regex>,
    pub debug: bool,
    pub metadata_source: MetadataSource,
    pub map_filter: MapFilter,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            self_name: DEFAULT_SELF_NAME.to_string(),
            ignore: None,
            debug: false,
            metadata_source: MetadataSource::default(),
            map_filter: MapFilter::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, Errno> {
        let mut config = Self {
            debug: env_flag(ENV_DEBUG),
            ..Self::default()
        };
        if let Some(name) = env_string(ENV_SELF) {
            config.self_name = name;
        }
        if let Some(pattern) = env_string(ENV_IGNORE) {
            let regex = Regex::new(&pattern).map_err(|err| {
                log::error(format_args!("bad {ENV_IGNORE} pattern {pattern}: {err}"));
                Errno::InvalidArg
            })?;
            config.ignore = Some(regex);
        }
        if let Some(source) = env_string(ENV_METADATA) {
            config.metadata_source = MetadataSource::parse(&source).ok_or_else(|| {
                log::error(format_args!("bad {ENV_METADATA} value {source}"));
                Errno::InvalidArg
            })?;
        }
        if env_flag(ENV_ALL_EXEC) {
            config.map_filter = MapFilter::Executable;
        }
        Ok(config)
    }

    // 判断模块是否跳过 hook
    // 空路径、伪映射（以 '[' 开头）和 agent 自身始终跳过
    pub fn should_skip(&self, module_name: &str) -> bool {
        if module_name.is_empty() || module_name.starts_with('[') {
            return true;
        }
        // 子串匹配，名称包含 agent 名的其它模块也会被跳过
        if module_name.contains(self.self_name.as_str()) {
            return true;
        }
        self.ignore
            .as_ref()
            .is_some_and(|regex| regex.is_match(module_name))
    }
}
