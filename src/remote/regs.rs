// 远程调用的寄存器帧：按架构装填参数、栈参数、入口地址与返回陷阱

use crate::errno::Errno;
use crate::log;
use nix::unistd::Pid;

const PTRACE_GETREGSET: libc::c_int = 0x4204;
const PTRACE_SETREGSET: libc::c_int = 0x4205;
const NT_PRSTATUS: usize = 1;

// 远程调用需要的寄存器操作，字长与调用约定由实现决定
pub trait CallRegisters: Copy + Default {
    // 通过寄存器传递的参数个数
    const REG_ARGS: usize;
    // 目标字长（字节）
    const WORD: usize;
    // 调用时栈指针的对齐要求
    const STACK_ALIGN: usize;
    // 栈指针以下不可覆盖的区域
    const RED_ZONE: usize;
    // 返回地址是否通过栈传递
    const RETURN_ON_STACK: bool;

    fn set_arg(&mut self, index: usize, value: usize);
    fn sp(&self) -> usize;
    fn set_sp(&mut self, sp: usize);
    fn pc(&self) -> usize;
    // 设置入口地址，处理指令集模式位
    fn set_entry(&mut self, func: usize);
    // 返回地址置 0，被调函数返回时触发 SIGSEGV
    fn set_return_trap(&mut self);
    fn return_value(&self) -> usize;
}

// ARM 用户态寄存器：r0-r15, cpsr, orig_r0
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ArmRegs {
    pub uregs: [u32; 18],
}

const ARM_SP: usize = 13;
const ARM_LR: usize = 14;
const ARM_PC: usize = 15;
const ARM_CPSR: usize = 16;
const CPSR_T_MASK: u32 = 1 << 5;

impl CallRegisters for ArmRegs {
    const REG_ARGS: usize = 4;
    const WORD: usize = 4;
    const STACK_ALIGN: usize = 8;
    const RED_ZONE: usize = 0;
    const RETURN_ON_STACK: bool = false;

    fn set_arg(&mut self, index: usize, value: usize) {
        self.uregs[index] = value as u32;
    }

    fn sp(&self) -> usize {
        self.uregs[ARM_SP] as usize
    }

    fn set_sp(&mut self, sp: usize) {
        self.uregs[ARM_SP] = sp as u32;
    }

    fn pc(&self) -> usize {
        self.uregs[ARM_PC] as usize
    }

    // 地址最低位为 1 表示 Thumb 函数：清除该位并置 CPSR.T
    fn set_entry(&mut self, func: usize) {
        if func & 1 != 0 {
            self.uregs[ARM_PC] = (func & !1) as u32;
            self.uregs[ARM_CPSR] |= CPSR_T_MASK;
        } else {
            self.uregs[ARM_PC] = func as u32;
            self.uregs[ARM_CPSR] &= !CPSR_T_MASK;
        }
    }

    fn set_return_trap(&mut self) {
        self.uregs[ARM_LR] = 0;
    }

    fn return_value(&self) -> usize {
        self.uregs[0] as usize
    }
}

// AArch64 user_pt_regs
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Aarch64Regs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

const AARCH64_LR: usize = 30;

impl CallRegisters for Aarch64Regs {
    const REG_ARGS: usize = 8;
    const WORD: usize = 8;
    const STACK_ALIGN: usize = 16;
    const RED_ZONE: usize = 0;
    const RETURN_ON_STACK: bool = false;

    fn set_arg(&mut self, index: usize, value: usize) {
        self.regs[index] = value as u64;
    }

    fn sp(&self) -> usize {
        self.sp as usize
    }

    fn set_sp(&mut self, sp: usize) {
        self.sp = sp as u64;
    }

    fn pc(&self) -> usize {
        self.pc as usize
    }

    fn set_entry(&mut self, func: usize) {
        self.pc = func as u64;
    }

    fn set_return_trap(&mut self) {
        self.regs[AARCH64_LR] = 0;
    }

    fn return_value(&self) -> usize {
        self.regs[0] as usize
    }
}

// x86_64 user_regs_struct
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct X86_64Regs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

impl CallRegisters for X86_64Regs {
    const REG_ARGS: usize = 6;
    const WORD: usize = 8;
    const STACK_ALIGN: usize = 16;
    const RED_ZONE: usize = 128;
    const RETURN_ON_STACK: bool = true;

    fn set_arg(&mut self, index: usize, value: usize) {
        let value = value as u64;
        match index {
            0 => self.rdi = value,
            1 => self.rsi = value,
            2 => self.rdx = value,
            3 => self.rcx = value,
            4 => self.r8 = value,
            5 => self.r9 = value,
            _ => {}
        }
    }

    fn sp(&self) -> usize {
        self.rsp as usize
    }

    fn set_sp(&mut self, sp: usize) {
        self.rsp = sp as u64;
    }

    fn pc(&self) -> usize {
        self.rip as usize
    }

    // orig_rax 置 -1，避免被中断的系统调用在恢复时重启到新的 rip 上；al 为变参向量寄存器个数
    fn set_entry(&mut self, func: usize) {
        self.rip = func as u64;
        self.orig_rax = u64::MAX;
        self.rax = 0;
    }

    // 返回地址 0 由栈帧中的第一个字提供
    fn set_return_trap(&mut self) {}

    fn return_value(&self) -> usize {
        self.rax as usize
    }
}

#[cfg(target_arch = "arm")]
pub type NativeRegs = ArmRegs;
#[cfg(target_arch = "aarch64")]
pub type NativeRegs = Aarch64Regs;
#[cfg(target_arch = "x86_64")]
pub type NativeRegs = X86_64Regs;

// 一次远程调用的准备结果：新寄存器与需写入新栈顶处的栈帧
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallFrame<R> {
    pub regs: R,
    pub stack: Vec<u8>,
}

impl<R: CallRegisters> CallFrame<R> {
    pub fn stack_top(&self) -> usize {
        self.regs.sp()
    }
}

fn word_bytes(value: usize, width: usize) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(&(value as u64).to_le_bytes()[..width]);
    raw
}

// 前 REG_ARGS 个参数放入寄存器，其余参数按顺序从新栈顶向高地址排列
// 即最后一个参数最先入栈，第一个栈参数位于最低地址
pub fn build_frame<R: CallRegisters>(snapshot: &R, func: usize, args: &[usize]) -> CallFrame<R> {
    let mut regs = *snapshot;
    let split = args.len().min(R::REG_ARGS);
    let (reg_args, stack_args) = args.split_at(split);
    for (index, &value) in reg_args.iter().enumerate() {
        regs.set_arg(index, value);
    }

    let args_size = stack_args.len() * R::WORD;
    let args_base = regs
        .sp()
        .wrapping_sub(R::RED_ZONE)
        .wrapping_sub(args_size)
        & !(R::STACK_ALIGN - 1);

    let mut stack = Vec::with_capacity(args_size + R::WORD);
    let mut top = args_base;
    if R::RETURN_ON_STACK {
        top = top.wrapping_sub(R::WORD);
        stack.extend_from_slice(&word_bytes(0, R::WORD)[..R::WORD]);
    }
    for &value in stack_args {
        stack.extend_from_slice(&word_bytes(value, R::WORD)[..R::WORD]);
    }
    if stack_args.is_empty() && !R::RETURN_ON_STACK {
        top = regs.sp();
    }

    regs.set_sp(top);
    regs.set_entry(func);
    regs.set_return_trap();
    CallFrame { regs, stack }
}

pub(crate) fn read_regs<R: CallRegisters>(pid: Pid) -> Result<R, Errno> {
    let mut regs = R::default();
    let mut iov = libc::iovec {
        iov_base: &mut regs as *mut R as *mut libc::c_void,
        iov_len: std::mem::size_of::<R>(),
    };
    let ret = unsafe {
        libc::ptrace(
            PTRACE_GETREGSET as _,
            pid.as_raw(),
            NT_PRSTATUS as *mut libc::c_void,
            &mut iov as *mut libc::iovec as *mut libc::c_void,
        )
    };
    if ret == -1 {
        let err = std::io::Error::last_os_error();
        log::error(format_args!("PTRACE_GETREGSET {pid} failed: {err}"));
        return Err(Errno::GetRegs);
    }
    Ok(regs)
}

pub(crate) fn write_regs<R: CallRegisters>(pid: Pid, regs: &R) -> Result<(), Errno> {
    let mut copy = *regs;
    let mut iov = libc::iovec {
        iov_base: &mut copy as *mut R as *mut libc::c_void,
        iov_len: std::mem::size_of::<R>(),
    };
    let ret = unsafe {
        libc::ptrace(
            PTRACE_SETREGSET as _,
            pid.as_raw(),
            NT_PRSTATUS as *mut libc::c_void,
            &mut iov as *mut libc::iovec as *mut libc::c_void,
        )
    };
    if ret == -1 {
        let err = std::io::Error::last_os_error();
        log::error(format_args!("PTRACE_SETREGSET {pid} failed: {err}"));
        return Err(Errno::SetRegs);
    }
    Ok(())
}
