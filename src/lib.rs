#![allow(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)]

#[cfg(not(any(target_os = "android", target_os = "linux")))]
compile_error!("srx_trace supports Android and Linux only (ptrace + ELF dynamic linking)");

#[cfg(not(any(target_arch = "arm", target_arch = "aarch64", target_arch = "x86_64")))]
compile_error!("srx_trace supports only arm, aarch64 and x86_64");

// 对外 API：本进程内安装 hook、版本与调试开关
mod api;
// 环境变量驱动的配置
pub mod config;
// ELF 符号查找与重定位 slot 替换
pub mod elf;
// 错误码定义
mod errno;
// hook 引擎：组合符号查找与重定位替换，遍历所有已加载模块
pub mod hook;
// 本进程动态加载器访问：RTLD_NOLOAD 句柄、符号地址
mod loader;
// 日志输出：Android 走 logcat，Linux 走 stderr
pub mod log;
// /proc/<pid>/maps 解析
pub mod maps;
// 内存读写与页面保护抽象
pub mod memory;
// ptrace 远程进程控制：附加、内存读写、远程函数调用
pub mod remote;
// 版本信息
mod version;

pub use api::{get_version, install, set_debug};
pub use config::{AgentConfig, InjectorConfig, env_flag};
pub use errno::Errno as SrxTraceErrno;
pub use hook::{HookEngine, HookRecord, MetadataSource};
pub use maps::{MapFilter, ModuleMapping};
pub use memory::{LocalMemory, MemoryAccess, Protection};
pub use remote::Tracee;
