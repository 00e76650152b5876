// 重定位 slot 替换：PLT 表只处理 JUMP_SLOT，通用表处理 GLOB_DAT 与 ABS

impl ModuleMetadata {
    // 重定位条目是否指向目标符号：优先比较符号下标，否则比较符号名
    fn reloc_matches<M: MemoryAccess + ?Sized>(
        &self,
        mem: &M,
        entry: &RelocEntry,
        symbol_index: Option<u32>,
        symbol: &str,
    ) -> Result<bool, Errno> {
        let sym = entry.sym();
        if sym == 0 {
            return Ok(false);
        }
        if symbol_index == Some(sym) {
            return Ok(true);
        }
        let candidate = self.symbol(mem, sym)?;
        self.symbol_name_eq(mem, &candidate, symbol)
    }

    pub fn slot_addr(&self, entry: &RelocEntry) -> usize {
        self.load_bias.wrapping_add(entry.offset)
    }

    // 替换所有匹配 symbol 的 slot，返回第一个被替换的旧值
    // PLT 表命中 JUMP_SLOT 后立即返回，不再扫描通用表
    pub fn patch<M: MemoryAccess + ?Sized>(
        &self,
        mem: &mut M,
        symbol_index: Option<u32>,
        symbol: &str,
        replacement: usize,
    ) -> Result<usize, Errno> {
        for index in 0..self.plt_rel.count {
            let entry = self.plt_rel.entry(mem, index)?;
            if !self.reloc_matches(mem, &entry, symbol_index, symbol)? {
                continue;
            }
            match entry.kind() {
                RelocKind::JumpSlot => {
                    return patch_slot(mem, self.slot_addr(&entry), replacement);
                }
                kind => log::warn(format_args!(
                    "{}: expected JUMP_SLOT for {symbol} in plt relocs, found {kind:?}",
                    self.name
                )),
            }
        }

        let mut displaced = None;
        for index in 0..self.rel.count {
            let entry = self.rel.entry(mem, index)?;
            if !self.reloc_matches(mem, &entry, symbol_index, symbol)? {
                continue;
            }
            match entry.kind() {
                RelocKind::GlobDat | RelocKind::Absolute => {
                    let previous = patch_slot(mem, self.slot_addr(&entry), replacement)?;
                    displaced.get_or_insert(previous);
                }
                kind => log::warn(format_args!(
                    "{}: expected GLOB_DAT or ABS for {symbol} in relocs, found {kind:?}",
                    self.name
                )),
            }
        }

        displaced.ok_or_else(|| {
            log::debug(format_args!(
                "{}: no relocation for {symbol} (plt_rel_count={}, rel_count={})",
                self.name, self.plt_rel.count, self.rel.count
            ));
            Errno::NoReloc
        })
    }
}

// 页面改为可写，记录旧值后写入新值，再恢复为只读
pub fn patch_slot<M: MemoryAccess + ?Sized>(
    mem: &mut M,
    addr: usize,
    replacement: usize,
) -> Result<usize, Errno> {
    let page_size = mem.page_size();
    let page = page_start(addr, page_size);
    mem.protect(page, page_size, Protection::ReadWrite)?;
    let written = mem
        .read_word(addr)
        .and_then(|previous| mem.write_word(addr, replacement).map(|_| previous));
    mem.protect(page, page_size, Protection::ReadOnly)?;
    let previous = written?;
    log::debug(format_args!("{addr:#x}: {previous:#x} -> {replacement:#x}"));
    Ok(previous)
}
