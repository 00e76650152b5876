// 符号查找：按哈希表类型选择 DT_HASH 或 DT_GNU_HASH 路径

impl ModuleMetadata {
    // 按名称查找动态符号，名称必须与字符串表中的条目完全一致
    pub fn lookup<M: MemoryAccess + ?Sized>(&self, mem: &M, name: &str) -> Result<SymbolEntry, Errno> {
        match self.hash {
            HashTable::Sysv {
                nbucket,
                bucket,
                chain,
            } => self.sysv_lookup(mem, name, nbucket, bucket, chain),
            HashTable::Gnu {
                nbucket,
                bucket,
                chain,
                bloom,
                bloom_mask,
                shift2,
            } => self.gnu_lookup(mem, name, nbucket, bucket, chain, bloom, bloom_mask, shift2),
        }
    }

    pub fn symbol<M: MemoryAccess + ?Sized>(&self, mem: &M, index: u32) -> Result<SymbolEntry, Errno> {
        let addr = self.symtab + index as usize * SYM_ENTRY_SIZE;
        let raw = mem.read_vec(addr, SYM_ENTRY_SIZE)?;
        Ok(SymbolEntry::parse(index, &raw))
    }

    pub fn symbol_name_eq<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        symbol: &SymbolEntry,
        name: &str,
    ) -> Result<bool, Errno> {
        mem.cstr_eq(self.strtab + symbol.name_offset as usize, name.as_bytes())
    }

    // DT_HASH：bucket[hash % nbucket] 给出链头，chain[n] 给出下一个下标，0 结束
    fn sysv_lookup<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        name: &str,
        nbucket: u32,
        bucket: usize,
        chain: usize,
    ) -> Result<SymbolEntry, Errno> {
        if nbucket == 0 {
            return Err(Errno::NotFound);
        }
        let hash = elf_hash(name.as_bytes());
        let mut index = mem.read_u32(bucket + (hash % nbucket) as usize * 4)?;
        while index != 0 {
            let symbol = self.symbol(mem, index)?;
            if self.symbol_name_eq(mem, &symbol, name)? {
                log::debug(format_args!(
                    "{}: found {name} at symbol index {index} (DT_HASH)",
                    self.name
                ));
                return Ok(symbol);
            }
            index = mem.read_u32(chain + index as usize * 4)?;
        }
        log::debug(format_args!("{}: {name} not found (DT_HASH)", self.name));
        Err(Errno::NotFound)
    }

    // DT_GNU_HASH：先过 bloom filter，再沿链比较哈希高 31 位与名称，链值最低位为 1 表示链尾
    #[allow(clippy::too_many_arguments)]
    fn gnu_lookup<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        name: &str,
        nbucket: u32,
        bucket: usize,
        chain: usize,
        bloom: usize,
        bloom_mask: u32,
        shift2: u32,
    ) -> Result<SymbolEntry, Errno> {
        if nbucket == 0 {
            return Err(Errno::NotFound);
        }
        let hash = elf_gnu_hash(name.as_bytes());
        let hash2 = hash >> shift2;
        let bits = (WORD_SIZE * 8) as u32;
        let word_index = (hash / bits) & bloom_mask;
        let word = mem.read_word(bloom + word_index as usize * WORD_SIZE)?;

        if (1 & (word >> (hash % bits)) & (word >> (hash2 % bits))) == 0 {
            log::debug(format_args!("{}: {name} rejected by bloom filter", self.name));
            return Err(Errno::NotFound);
        }

        let mut index = mem.read_u32(bucket + (hash % nbucket) as usize * 4)?;
        if index == 0 {
            return Err(Errno::NotFound);
        }
        loop {
            let chain_hash = mem.read_u32(chain + index as usize * 4)?;
            if ((chain_hash ^ hash) >> 1) == 0 {
                let symbol = self.symbol(mem, index)?;
                if self.symbol_name_eq(mem, &symbol, name)? {
                    log::debug(format_args!(
                        "{}: found {name} at symbol index {index} (DT_GNU_HASH)",
                        self.name
                    ));
                    return Ok(symbol);
                }
            }
            if chain_hash & 1 != 0 {
                break;
            }
            index += 1;
        }
        log::debug(format_args!("{}: {name} not found (DT_GNU_HASH)", self.name));
        Err(Errno::NotFound)
    }
}
