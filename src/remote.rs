// ptrace 远程进程控制：附加、内存读写、寄存器帧远程调用与 dl* 系列函数调用

use crate::config::InjectorConfig;
use crate::errno::Errno;
use crate::log;
use crate::maps;
use crate::memory::WORD_SIZE;
use nix::sys::ptrace;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

// 按架构装填远程调用寄存器帧
pub mod regs;
// 按字读写远程内存
mod words;

use regs::{CallRegisters, NativeRegs, build_frame, read_regs, write_regs};
use words::{PtraceWords, read_words, write_words};

// 远程 dlerror 字符串的最大读取长度
const MAX_REMOTE_CSTRING: usize = 4096;

// 按 ASLR 偏移把本进程内的地址换算为目标进程内的地址
pub fn translate(local_addr: usize, local_base: usize, remote_base: usize) -> usize {
    local_addr.wrapping_add(remote_base).wrapping_sub(local_base)
}

// 函数在本进程内的地址换算为目标进程中同名模块内的地址
pub fn find_function(module: &str, local_addr: usize, pid: i32) -> Result<usize, Errno> {
    let local_base = maps::find_module_base(module, None).ok_or(Errno::NoModule)?;
    let remote_base = maps::find_module_base(module, Some(pid)).ok_or(Errno::NoModule)?;
    let remote_addr = translate(local_addr, local_base, remote_base);
    log::debug(format_args!(
        "{module}: local {local_addr:#x} (base {local_base:#x}) -> remote {remote_addr:#x} (base {remote_base:#x})"
    ));
    Ok(remote_addr)
}

// 目标进程中 dl* 与内存分配函数的地址，0 表示未解析
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteSymbols {
    pub dlopen: usize,
    pub dlsym: usize,
    pub dlerror: usize,
    pub calloc: usize,
    pub free: usize,
}

impl RemoteSymbols {
    // 单个符号解析失败时记录错误并保留 0，后续对该函数的远程调用直接失败
    pub fn resolve(pid: i32, config: &InjectorConfig) -> Self {
        let resolve = |name: &str, module: &str| -> usize {
            match crate::loader::local_symbol(name).and_then(|local| find_function(module, local, pid)) {
                Ok(addr) => addr,
                Err(err) => {
                    log::error(format_args!("could not find {name} in {module}: {err}"));
                    0
                }
            }
        };
        let symbols = Self {
            dlopen: resolve("dlopen", &config.linker_module),
            dlsym: resolve("dlsym", &config.linker_module),
            dlerror: resolve("dlerror", &config.linker_module),
            calloc: resolve("calloc", &config.libc_module),
            free: resolve("free", &config.libc_module),
        };
        log::debug(format_args!("remote symbols for {pid}: {symbols:x?}"));
        symbols
    }
}

// 一个被 ptrace 附加的目标进程，drop 时自动分离
pub struct Tracee {
    pid: Pid,
    attached: bool,
    dlopen_mode: usize,
    symbols: RemoteSymbols,
    // 远程调用期间到达、暂缓投递的信号
    deferred: Vec<Signal>,
}

// 远程调用期间一次信号停止的处理方式
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum CallStop {
    // 返回到地址 0 触发的 SIGSEGV，调用完成
    Returned,
    // 被调函数内部的 SIGSEGV
    Faulted(usize),
    // 其它信号，寄存器恢复后重新发给目标
    Deferred(Signal),
}

fn classify_stop(signal: Signal, pc: usize) -> CallStop {
    match signal {
        Signal::SIGSEGV if pc == 0 => CallStop::Returned,
        Signal::SIGSEGV => CallStop::Faulted(pc),
        other => CallStop::Deferred(other),
    }
}

impl Tracee {
    pub fn attach(pid: i32, config: &InjectorConfig) -> Result<Self, Errno> {
        if pid <= 0 {
            return Err(Errno::InvalidPid);
        }
        let raw_pid = pid;
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid).map_err(|err| {
            log::error(format_args!("PTRACE_ATTACH {pid} failed: {err}"));
            Errno::Attach
        })?;

        let mut tracee = Self {
            pid,
            attached: true,
            dlopen_mode: config.dlopen_mode,
            symbols: RemoteSymbols::default(),
            deferred: Vec::new(),
        };
        match waitpid(pid, Some(WaitPidFlag::__WALL)) {
            Ok(WaitStatus::Stopped(_, signal)) => {
                log::debug(format_args!("{pid} stopped by {signal:?}"));
            }
            Ok(status) => {
                log::error(format_args!("unexpected wait status after attach: {status:?}"));
                if matches!(status, WaitStatus::Exited(..) | WaitStatus::Signaled(..)) {
                    tracee.attached = false;
                }
                return Err(Errno::Attach);
            }
            Err(err) => {
                log::error(format_args!("waitpid {pid} failed: {err}"));
                return Err(Errno::Attach);
            }
        }

        tracee.symbols = RemoteSymbols::resolve(raw_pid, config);
        Ok(tracee)
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn symbols(&self) -> &RemoteSymbols {
        &self.symbols
    }

    pub fn set_symbols(&mut self, symbols: RemoteSymbols) {
        self.symbols = symbols;
    }

    pub fn detach(&mut self) -> Result<(), Errno> {
        if !self.attached {
            return Ok(());
        }
        ptrace::detach(self.pid, None).map_err(|err| {
            log::error(format_args!("PTRACE_DETACH {} failed: {err}", self.pid));
            Errno::Detach
        })?;
        self.attached = false;
        Ok(())
    }

    fn ensure_attached(&self) -> Result<(), Errno> {
        if self.attached {
            Ok(())
        } else {
            Err(Errno::NotAttached)
        }
    }

    fn words(&self) -> PtraceWords {
        PtraceWords { pid: self.pid }
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<Vec<u8>, Errno> {
        self.ensure_attached()?;
        read_words(&self.words(), addr, len)
    }

    // 尾部按字补 0 写入
    pub fn write_bytes(&self, addr: usize, bytes: &[u8]) -> Result<(), Errno> {
        self.ensure_attached()?;
        write_words(&self.words(), addr, bytes)
    }

    // 逐字读取以 NUL 结尾的字符串，最多 max 字节
    pub fn read_cstring(&self, addr: usize, max: usize) -> Result<String, Errno> {
        self.ensure_attached()?;
        let io = self.words();
        let mut bytes = Vec::new();
        let mut offset = 0;
        while offset < max {
            let word = read_words(&io, addr + offset, WORD_SIZE)?;
            if let Some(end) = word.iter().position(|&byte| byte == 0) {
                bytes.extend_from_slice(&word[..end]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&word);
            offset += WORD_SIZE;
        }
        bytes.truncate(max);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // 以目标线程当前上下文调用 func，返回值取自返回寄存器，调用前后寄存器保持不变
    pub fn call(&mut self, func: usize, args: &[usize]) -> Result<usize, Errno> {
        self.ensure_attached()?;
        if func == 0 {
            return Err(Errno::Unresolved);
        }
        let backup: NativeRegs = read_regs(self.pid)?;
        let frame = build_frame(&backup, func, args);
        let result = self.run_frame(&frame);
        let restored = if self.attached {
            write_regs(self.pid, &backup)
        } else {
            Ok(())
        };
        self.redeliver_deferred();
        let value = result?;
        restored?;
        log::debug(format_args!("remote call {func:#x} returned {value:#x}"));
        Ok(value)
    }

    fn run_frame(&mut self, frame: &regs::CallFrame<NativeRegs>) -> Result<usize, Errno> {
        if !frame.stack.is_empty() {
            self.write_bytes(frame.stack_top(), &frame.stack)?;
        }
        write_regs(self.pid, &frame.regs)?;
        self.resume()?;
        self.wait_return()?;
        let after: NativeRegs = read_regs(self.pid)?;
        Ok(after.return_value())
    }

    // 等待被调函数返回到地址 0 触发的 SIGSEGV，该 SIGSEGV 不投递给目标
    // 调用途中到达的其它信号先压下，让被调函数执行完，寄存器恢复后再发给目标
    fn wait_return(&mut self) -> Result<(), Errno> {
        loop {
            let signal = match waitpid(self.pid, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Stopped(_, signal)) => signal,
                Ok(WaitStatus::PtraceEvent(..)) | Ok(WaitStatus::PtraceSyscall(_)) => {
                    self.resume()?;
                    continue;
                }
                Ok(status) => {
                    log::error(format_args!("remote call ended with {status:?}"));
                    if matches!(status, WaitStatus::Exited(..) | WaitStatus::Signaled(..)) {
                        self.attached = false;
                    }
                    return Err(Errno::RemoteCall);
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => {
                    log::error(format_args!("waitpid {} failed: {err}", self.pid));
                    return Err(Errno::Wait);
                }
            };
            let pc = read_regs::<NativeRegs>(self.pid)?.pc();
            match classify_stop(signal, pc) {
                CallStop::Returned => return Ok(()),
                CallStop::Faulted(pc) => {
                    log::error(format_args!("remote call faulted at {pc:#x}"));
                    return Err(Errno::RemoteCall);
                }
                CallStop::Deferred(signal) => {
                    log::debug(format_args!("{signal:?} during remote call, deferred"));
                    if !self.deferred.contains(&signal) {
                        self.deferred.push(signal);
                    }
                    self.resume()?;
                }
            }
        }
    }

    fn resume(&self) -> Result<(), Errno> {
        ptrace::cont(self.pid, None).map_err(|err| {
            log::error(format_args!("PTRACE_CONT {} failed: {err}", self.pid));
            Errno::RemoteCall
        })
    }

    // 目标恢复运行（下一次远程调用或分离）时收到暂缓的信号
    fn redeliver_deferred(&mut self) {
        if !self.attached {
            self.deferred.clear();
            return;
        }
        for signal in std::mem::take(&mut self.deferred) {
            if let Err(err) = kill(self.pid, signal) {
                log::warn(format_args!("re-sending {signal:?} to {} failed: {err}", self.pid));
            }
        }
    }

    // 在目标中 calloc 一块内存并写入带 NUL 的字符串
    pub fn copy_string(&mut self, text: &str) -> Result<usize, Errno> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let addr = self.call(self.symbols.calloc, &[bytes.len(), 1])?;
        if addr == 0 {
            log::error(format_args!("remote calloc({}) returned NULL", bytes.len()));
            return Err(Errno::RemoteCall);
        }
        self.write_bytes(addr, &bytes)?;
        Ok(addr)
    }

    pub fn free_remote(&mut self, addr: usize) -> Result<(), Errno> {
        self.call(self.symbols.free, &[addr]).map(|_| ())
    }

    // 远程 dlopen，返回句柄（0 表示加载失败）
    pub fn dlopen_remote(&mut self, path: &str) -> Result<usize, Errno> {
        let remote_path = self.copy_string(path)?;
        let handle = self.call(self.symbols.dlopen, &[remote_path, self.dlopen_mode]);
        if let Err(err) = self.free_remote(remote_path) {
            log::warn(format_args!("free remote path failed: {err}"));
        }
        handle
    }

    // 远程 dlsym，返回目标中的符号地址（0 表示未找到）
    pub fn dlsym_remote(&mut self, handle: usize, name: &str) -> Result<usize, Errno> {
        let remote_name = self.copy_string(name)?;
        let addr = self.call(self.symbols.dlsym, &[handle, remote_name]);
        if let Err(err) = self.free_remote(remote_name) {
            log::warn(format_args!("free remote name failed: {err}"));
        }
        addr
    }

    // 远程 dlerror，目标中没有待报告的错误时返回 None
    pub fn dlerror_remote(&mut self) -> Result<Option<String>, Errno> {
        let message = self.call(self.symbols.dlerror, &[])?;
        if message == 0 {
            return Ok(None);
        }
        self.read_cstring(message, MAX_REMOTE_CSTRING).map(Some)
    }
}

impl Drop for Tracee {
    fn drop(&mut self) {
        if let Err(err) = self.detach() {
            log::warn(format_args!("detach on drop failed: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_preserves_offset() {
        assert_eq!(translate(0x4000_1234, 0x4000_0000, 0x7000_0000), 0x7000_1234);
        assert_eq!(translate(0x7000_1234, 0x7000_0000, 0x4000_0000), 0x4000_1234);
    }

    #[test]
    fn translate_is_linear() {
        let (local_base, remote_base) = (0x7f12_3400_0000usize, 0x7fab_cd00_0000usize);
        for offset in [0usize, 1, 0x1000, 0xfffff] {
            let remote = translate(local_base + offset, local_base, remote_base);
            assert_eq!(remote - remote_base, offset);
        }
        assert_eq!(translate(0x1000, 0x1000, 0x1000), 0x1000);
    }

    #[test]
    fn find_function_in_own_process_is_identity() {
        let Some(base) = maps::find_module_base("libc", None) else {
            return;
        };
        let pid = std::process::id() as i32;
        assert_eq!(find_function("libc", base + 0x10, pid), Ok(base + 0x10));
        assert_eq!(find_function("libsrx_no_such.so", base, pid), Err(Errno::NoModule));
    }

    #[test]
    fn only_fault_at_zero_completes_call() {
        assert_eq!(classify_stop(Signal::SIGSEGV, 0), CallStop::Returned);
        assert_eq!(classify_stop(Signal::SIGSEGV, 0x7f00_1234), CallStop::Faulted(0x7f00_1234));
        assert_eq!(classify_stop(Signal::SIGUSR1, 0), CallStop::Deferred(Signal::SIGUSR1));
        assert_eq!(classify_stop(Signal::SIGCHLD, 0x4000), CallStop::Deferred(Signal::SIGCHLD));
    }

    #[test]
    fn attach_rejects_invalid_pid() {
        let config = InjectorConfig::default();
        assert!(matches!(Tracee::attach(0, &config), Err(Errno::InvalidPid)));
        assert!(matches!(Tracee::attach(-5, &config), Err(Errno::InvalidPid)));
    }
}
