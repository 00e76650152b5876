// 从内存中的 ELF 映像构建模块元数据：dynamic section、glibc link_map、ELF 文件头三种入口

// glibc 在加载时会把 dynamic section 中的地址类条目改写为绝对地址，bionic 不改写
fn dynamic_ptr(load_bias: usize, value: usize) -> usize {
    if value == 0 {
        return 0;
    }
    if load_bias != 0 && value >= load_bias {
        value
    } else {
        load_bias.wrapping_add(value)
    }
}

#[derive(Default)]
struct DynamicInfo {
    strtab: usize,
    symtab: usize,
    hash: usize,
    gnu_hash: usize,
    jmprel: usize,
    pltrelsz: usize,
    pltrel: usize,
    rel: usize,
    relsz: usize,
    rela: usize,
    relasz: usize,
}

impl ModuleMetadata {
    // 遍历 dynamic section，收集符号表、字符串表、哈希表与重定位表
    pub fn from_dynamic<M: MemoryAccess + ?Sized>(
        mem: &M,
        load_bias: usize,
        dynamic: usize,
        name: &str,
    ) -> Result<Self, Errno> {
        if dynamic == 0 {
            return Err(Errno::Format);
        }
        let mut info = DynamicInfo::default();
        let entry_size = 2 * WORD_SIZE;
        let mut terminated = false;
        for index in 0..MAX_DYNAMIC_ENTRIES {
            let addr = dynamic + index * entry_size;
            let tag = mem.read_word(addr)?;
            let value = mem.read_word(addr + WORD_SIZE)?;
            match tag {
                DT_NULL => {
                    terminated = true;
                    break;
                }
                DT_STRTAB => info.strtab = dynamic_ptr(load_bias, value),
                DT_SYMTAB => info.symtab = dynamic_ptr(load_bias, value),
                DT_HASH => info.hash = dynamic_ptr(load_bias, value),
                DT_GNU_HASH => info.gnu_hash = dynamic_ptr(load_bias, value),
                DT_JMPREL => info.jmprel = dynamic_ptr(load_bias, value),
                DT_PLTRELSZ => info.pltrelsz = value,
                DT_PLTREL => info.pltrel = value,
                DT_REL => info.rel = dynamic_ptr(load_bias, value),
                DT_RELSZ => info.relsz = value,
                DT_RELA => info.rela = dynamic_ptr(load_bias, value),
                DT_RELASZ => info.relasz = value,
                _ => {}
            }
        }
        if !terminated {
            log::error(format_args!("{name}: dynamic section not terminated"));
            return Err(Errno::Format);
        }
        if info.strtab == 0 || info.symtab == 0 {
            log::error(format_args!("{name}: missing DT_STRTAB/DT_SYMTAB"));
            return Err(Errno::Format);
        }

        let hash = if info.gnu_hash != 0 {
            gnu_hash_table(mem, info.gnu_hash)?
        } else if info.hash != 0 {
            HashTable::Sysv {
                nbucket: mem.read_u32(info.hash)?,
                bucket: info.hash + 8,
                chain: info.hash + 8 + mem.read_u32(info.hash)? as usize * 4,
            }
        } else {
            log::error(format_args!("{name}: missing DT_HASH/DT_GNU_HASH"));
            return Err(Errno::Format);
        };

        let plt_format = if info.pltrel == DT_RELA {
            RelocFormat::Rela
        } else {
            RelocFormat::Rel
        };
        let rel = if info.rela != 0 {
            RelocTable::from_size(info.rela, info.relasz, RelocFormat::Rela)
        } else {
            RelocTable::from_size(info.rel, info.relsz, RelocFormat::Rel)
        };

        Ok(Self {
            name: name.to_string(),
            load_bias,
            symtab: info.symtab,
            strtab: info.strtab,
            hash,
            plt_rel: RelocTable::from_size(info.jmprel, info.pltrelsz, plt_format),
            rel,
        })
    }

    // glibc 的 dlopen 句柄即 struct link_map*：l_addr, l_name, l_ld, l_next, l_prev
    pub fn from_link_map<M: MemoryAccess + ?Sized>(
        mem: &M,
        handle: usize,
        name: &str,
    ) -> Result<Self, Errno> {
        let load_bias = mem.read_word(handle)?;
        let dynamic = mem.read_word(handle + 2 * WORD_SIZE)?;
        Self::from_dynamic(mem, load_bias, dynamic, name)
    }

    // 从模块首个映射处的 ELF 文件头定位 PT_DYNAMIC
    pub fn from_loaded_image<M: MemoryAccess + ?Sized>(
        mem: &M,
        image_base: usize,
        name: &str,
    ) -> Result<Self, Errno> {
        let ehdr = mem.read_vec(image_base, layout::EHDR_SIZE)?;
        if ehdr[..4] != ELFMAG || ehdr[EI_CLASS] != ELFCLASS_NATIVE {
            log::error(format_args!("{name}: bad ELF header at {image_base:#x}"));
            return Err(Errno::Format);
        }
        if field_u16(&ehdr, layout::E_MACHINE) != EXPECTED_MACHINE {
            log::error(format_args!("{name}: unexpected e_machine"));
            return Err(Errno::Format);
        }
        let phoff = field_word(&ehdr, layout::E_PHOFF);
        let phentsize = field_u16(&ehdr, layout::E_PHENTSIZE) as usize;
        let phnum = field_u16(&ehdr, layout::E_PHNUM) as usize;
        if phoff == 0 || phnum == 0 || phentsize < layout::PHDR_SIZE {
            return Err(Errno::Format);
        }

        let mut load_bias = None;
        let mut dynamic_vaddr = None;
        for index in 0..phnum {
            let phdr = mem.read_vec(image_base + phoff + index * phentsize, layout::PHDR_SIZE)?;
            let p_type = field_u32(&phdr, layout::P_TYPE);
            let p_offset = field_word(&phdr, layout::P_OFFSET);
            let p_vaddr = field_word(&phdr, layout::P_VADDR);
            if p_type == PT_LOAD && p_offset == 0 && load_bias.is_none() {
                load_bias = Some(image_base.wrapping_sub(p_vaddr));
            } else if p_type == PT_DYNAMIC {
                dynamic_vaddr = Some(p_vaddr);
            }
        }
        let (Some(load_bias), Some(dynamic_vaddr)) = (load_bias, dynamic_vaddr) else {
            log::error(format_args!("{name}: no PT_LOAD at offset 0 or no PT_DYNAMIC"));
            return Err(Errno::Format);
        };
        Self::from_dynamic(mem, load_bias, load_bias.wrapping_add(dynamic_vaddr), name)
    }
}

// DT_GNU_HASH 表头：nbucket, symoffset, bloom_size, bloom_shift
fn gnu_hash_table<M: MemoryAccess + ?Sized>(mem: &M, addr: usize) -> Result<HashTable, Errno> {
    let nbucket = mem.read_u32(addr)?;
    let symoffset = mem.read_u32(addr + 4)?;
    let bloom_size = mem.read_u32(addr + 8)?;
    let shift2 = mem.read_u32(addr + 12)?;
    if bloom_size == 0 || !bloom_size.is_power_of_two() {
        return Err(Errno::Format);
    }
    let bloom = addr + 16;
    let bucket = bloom + bloom_size as usize * WORD_SIZE;
    let chain = bucket + nbucket as usize * 4;
    Ok(HashTable::Gnu {
        nbucket,
        bucket,
        chain: chain.wrapping_sub(symoffset as usize * 4),
        bloom,
        bloom_mask: bloom_size - 1,
        shift2,
    })
}
