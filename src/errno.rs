use std::fmt;

// 注入与 hook 操作错误码，0 表示成功
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Errno {
    Ok = 0,            // 成功
    InvalidArg = 1,    // 参数无效
    InvalidPid = 2,    // 目标进程 id 无效
    Attach = 3,        // ptrace 附加失败
    Detach = 4,        // ptrace 分离失败
    NotAttached = 5,   // 尚未附加目标进程
    NoModule = 6,      // maps 中找不到模块
    NoSym = 7,         // 本进程内符号解析失败
    Unresolved = 8,    // 远程函数地址未解析
    PeekText = 9,      // 读取远程内存失败
    PokeText = 10,     // 写入远程内存失败
    GetRegs = 11,      // 读取寄存器失败
    SetRegs = 12,      // 写入寄存器失败
    Wait = 13,         // waitpid 失败
    RemoteCall = 14,   // 远程调用未按预期返回
    NotFound = 15,     // 符号表中找不到符号
    NoReloc = 16,      // 重定位表中没有匹配项
    SetProt = 17,      // 设置内存保护属性失败
    Format = 18,       // ELF 或加载器记录格式错误
    BadMaps = 19,      // maps 读取或解析失败
    ReadMem = 20,      // 本进程内存读取失败
    Unknown = 1001,    // 未知错误
}

impl Errno {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "success",
            Self::InvalidArg => "invalid argument",
            Self::InvalidPid => "invalid pid",
            Self::Attach => "ptrace attach failed",
            Self::Detach => "ptrace detach failed",
            Self::NotAttached => "process not attached",
            Self::NoModule => "module not mapped",
            Self::NoSym => "local symbol not found",
            Self::Unresolved => "remote function unresolved",
            Self::PeekText => "remote read failed",
            Self::PokeText => "remote write failed",
            Self::GetRegs => "get registers failed",
            Self::SetRegs => "set registers failed",
            Self::Wait => "waitpid failed",
            Self::RemoteCall => "remote call failed",
            Self::NotFound => "symbol not found",
            Self::NoReloc => "no matching relocation",
            Self::SetProt => "mprotect failed",
            Self::Format => "bad format",
            Self::BadMaps => "bad maps",
            Self::ReadMem => "memory read failed",
            Self::Unknown => "unknown error",
        }
    }
}

impl From<Errno> for i32 {
    fn from(value: Errno) -> Self {
        value as i32
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}

impl std::error::Error for Errno {}
