// 按机器字长读写远程内存：PEEKTEXT / POKETEXT 每次一个字

use crate::errno::Errno;
use crate::log;
use crate::memory::WORD_SIZE;
use nix::sys::ptrace;
use nix::unistd::Pid;

pub(crate) trait WordIo {
    fn peek(&self, addr: usize) -> Result<usize, Errno>;
    fn poke(&self, addr: usize, word: usize) -> Result<(), Errno>;
}

pub(crate) struct PtraceWords {
    pub(crate) pid: Pid,
}

impl WordIo for PtraceWords {
    fn peek(&self, addr: usize) -> Result<usize, Errno> {
        ptrace::read(self.pid, addr as ptrace::AddressType)
            .map(|word| word as usize)
            .map_err(|err| {
                log::debug(format_args!("PEEKTEXT {addr:#x} in {} failed: {err}", self.pid));
                Errno::PeekText
            })
    }

    fn poke(&self, addr: usize, word: usize) -> Result<(), Errno> {
        ptrace::write(self.pid, addr as ptrace::AddressType, word as libc::c_long).map_err(|err| {
            log::debug(format_args!("POKETEXT {addr:#x} in {} failed: {err}", self.pid));
            Errno::PokeText
        })
    }
}

// 从 addr 起读取 len 字节，任一字读取失败即整体失败
pub(crate) fn read_words<W: WordIo + ?Sized>(io: &W, addr: usize, len: usize) -> Result<Vec<u8>, Errno> {
    let mut bytes = Vec::with_capacity(len.div_ceil(WORD_SIZE) * WORD_SIZE);
    let mut offset = 0;
    while offset < len {
        let word = io.peek(addr + offset)?;
        bytes.extend_from_slice(&word.to_ne_bytes());
        offset += WORD_SIZE;
    }
    bytes.truncate(len);
    Ok(bytes)
}

// 从 addr 起写入 bytes，不足一个字的尾部以 0 填充，会覆盖目标中紧随其后的字节
pub(crate) fn write_words<W: WordIo + ?Sized>(io: &W, addr: usize, bytes: &[u8]) -> Result<(), Errno> {
    for (index, chunk) in bytes.chunks(WORD_SIZE).enumerate() {
        let mut raw = [0u8; WORD_SIZE];
        raw[..chunk.len()].copy_from_slice(chunk);
        io.poke(addr + index * WORD_SIZE, usize::from_ne_bytes(raw))?;
    }
    Ok(())
}
