
use super::*;
use crate::memory::fake::FakeMemory;

const SYMTAB: usize = 0x10_000;
const STRTAB: usize = 0x20_000;
const HASH: usize = 0x30_000;
const PLT_REL: usize = 0x40_000;
const REL: usize = 0x50_000;

fn sym_bytes(name_offset: u32, value: usize) -> Vec<u8> {
    let mut raw = vec![0u8; SYM_ENTRY_SIZE];
    raw[0..4].copy_from_slice(&name_offset.to_ne_bytes());
    #[cfg(target_pointer_width = "64")]
    raw[8..16].copy_from_slice(&value.to_ne_bytes());
    #[cfg(target_pointer_width = "32")]
    raw[4..8].copy_from_slice(&value.to_ne_bytes());
    raw
}

// 合成的模块映像：符号表、字符串表与重定位表都放在固定地址
struct Image {
    mem: FakeMemory,
    strtab_len: usize,
    nsyms: u32,
}

impl Image {
    fn new() -> Self {
        let mut mem = FakeMemory::new();
        mem.put(STRTAB, &[0]);
        mem.put(SYMTAB, &sym_bytes(0, 0));
        Self {
            mem,
            strtab_len: 1,
            nsyms: 1,
        }
    }

    fn add_symbol(&mut self, name: &str) -> u32 {
        let name_offset = self.strtab_len;
        self.mem.put(STRTAB + name_offset, name.as_bytes());
        self.mem.put(STRTAB + name_offset + name.len(), &[0]);
        self.strtab_len += name.len() + 1;

        let index = self.nsyms;
        self.mem.put(
            SYMTAB + index as usize * SYM_ENTRY_SIZE,
            &sym_bytes(name_offset as u32, 0x1000 * index as usize),
        );
        self.nsyms += 1;
        index
    }

    fn put_reloc(&mut self, table: usize, index: usize, offset: usize, sym: u32, r_type: u32) {
        let format = RelocFormat::NATIVE;
        let addr = table + index * format.entry_size();
        self.mem.put_word(addr, offset);
        self.mem.put_word(addr + WORD_SIZE, elf_r_info(sym, r_type));
        if format == RelocFormat::Rela {
            self.mem.put_word(addr + 2 * WORD_SIZE, 0);
        }
    }

    fn metadata(&self, hash: HashTable, load_bias: usize, plt_count: usize, rel_count: usize) -> ModuleMetadata {
        ModuleMetadata {
            name: "libtest.so".to_string(),
            load_bias,
            symtab: SYMTAB,
            strtab: STRTAB,
            hash,
            plt_rel: RelocTable {
                addr: PLT_REL,
                count: plt_count,
                format: RelocFormat::NATIVE,
            },
            rel: RelocTable {
                addr: REL,
                count: rel_count,
                format: RelocFormat::NATIVE,
            },
        }
    }
}

// nbucket=4 的 DT_HASH 表，foo 位于符号下标 3
fn sysv_image() -> (Image, HashTable) {
    let mut image = Image::new();
    image.add_symbol("puts");
    image.add_symbol("strlen");
    let foo = image.add_symbol("foo");
    assert_eq!(foo, 3);

    let nbucket = 4u32;
    let bucket = HASH + 8;
    let chain = bucket + nbucket as usize * 4;
    image.mem.put_u32(HASH, nbucket);
    image.mem.put_u32(HASH + 4, image.nsyms);
    for slot in 0..nbucket as usize {
        image.mem.put_u32(bucket + slot * 4, 0);
    }
    for index in 0..image.nsyms as usize {
        image.mem.put_u32(chain + index * 4, 0);
    }
    let slot = (elf_hash(b"foo") % nbucket) as usize;
    image.mem.put_u32(bucket + slot * 4, foo);

    (
        image,
        HashTable::Sysv {
            nbucket,
            bucket,
            chain,
        },
    )
}

// 单 bucket 的 DT_GNU_HASH 表，symoffset=1，puts/foo 依次位于下标 1/2
fn gnu_image(bloom_word: Option<usize>) -> (Image, HashTable) {
    let mut image = Image::new();
    let puts = image.add_symbol("puts");
    let foo = image.add_symbol("foo");
    let shift2 = 6u32;
    let bits = (WORD_SIZE * 8) as u32;

    let mut word = 0usize;
    for name in [b"puts".as_slice(), b"foo".as_slice()] {
        let hash = elf_gnu_hash(name);
        word |= 1usize << (hash % bits);
        word |= 1usize << ((hash >> shift2) % bits);
    }

    image.mem.put_u32(HASH, 1);
    image.mem.put_u32(HASH + 4, puts);
    image.mem.put_u32(HASH + 8, 1);
    image.mem.put_u32(HASH + 12, shift2);
    image.mem.put_word(HASH + 16, bloom_word.unwrap_or(word));
    let bucket = HASH + 16 + WORD_SIZE;
    image.mem.put_u32(bucket, puts);
    let chain = bucket + 4;
    image.mem.put_u32(chain, elf_gnu_hash(b"puts") & !1);
    image.mem.put_u32(chain + 4, elf_gnu_hash(b"foo") | 1);
    assert_eq!(foo, puts + 1);

    let hash = gnu_hash_table(&image.mem, HASH).expect("gnu hash header");
    (image, hash)
}

#[test]
fn elf_hash_ignores_trailing_nul() {
    assert_eq!(elf_hash(b"foo"), 0x6d5f);
    assert_eq!(elf_hash(b"foo\0"), elf_hash(b"foo"));
    assert_eq!(elf_gnu_hash(b"foo\0"), elf_gnu_hash(b"foo"));
    assert_eq!(elf_gnu_hash(b""), 5381);
    assert_eq!(elf_gnu_hash(b"a"), 5381 * 33 + 97);
    assert_eq!(elf_hash(b"open"), elf_hash(b"open"));
}

#[test]
fn elf_hash_long_name_stays_in_28_bits() {
    let hash = elf_hash(b"_ZNSt6__ndk112basic_stringIcNS_11char_traitsIcEENS_9allocatorIcEEE6appendEPKc");
    assert_eq!(hash & 0xf000_0000, 0);
}

#[test]
fn sysv_lookup_finds_symbol_in_bucket() {
    let (image, hash) = sysv_image();
    let meta = image.metadata(hash, 0, 0, 0);
    let symbol = meta.lookup(&image.mem, "foo").expect("foo should resolve");
    assert_eq!(symbol.index, 3);
    assert_eq!(symbol.value, 0x3000);
}

#[test]
fn sysv_lookup_missing_symbol() {
    let (image, hash) = sysv_image();
    let meta = image.metadata(hash, 0, 0, 0);
    assert_eq!(meta.lookup(&image.mem, "bar"), Err(Errno::NotFound));
}

#[test]
fn sysv_lookup_empty_table() {
    let (image, _) = sysv_image();
    let meta = image.metadata(
        HashTable::Sysv {
            nbucket: 0,
            bucket: HASH + 8,
            chain: HASH + 8,
        },
        0,
        0,
        0,
    );
    assert_eq!(meta.lookup(&image.mem, "foo"), Err(Errno::NotFound));
}

#[test]
fn gnu_lookup_walks_chain() {
    let (image, hash) = gnu_image(None);
    let meta = image.metadata(hash, 0, 0, 0);
    assert_eq!(meta.lookup(&image.mem, "puts").unwrap().index, 1);
    assert_eq!(meta.lookup(&image.mem, "foo").unwrap().index, 2);
    assert_eq!(meta.lookup(&image.mem, "bar"), Err(Errno::NotFound));
}

#[test]
fn gnu_lookup_bloom_rejects() {
    let (image, hash) = gnu_image(Some(0));
    let meta = image.metadata(hash, 0, 0, 0);
    assert_eq!(meta.lookup(&image.mem, "foo"), Err(Errno::NotFound));
}

#[test]
fn gnu_hash_header_validates_bloom_size() {
    let mut mem = FakeMemory::new();
    mem.put_u32(HASH, 1);
    mem.put_u32(HASH + 4, 1);
    mem.put_u32(HASH + 8, 3);
    mem.put_u32(HASH + 12, 6);
    assert_eq!(gnu_hash_table(&mem, HASH), Err(Errno::Format));
}

#[test]
fn patch_jump_slot_applies_load_bias() {
    let (mut image, hash) = sysv_image();
    image.put_reloc(PLT_REL, 0, 0x1000, 3, RelocKind::JUMP_SLOT);
    image.mem.put_word(0x3000, 0xdead);
    let meta = image.metadata(hash, 0x2000, 1, 0);

    let previous = meta.patch(&mut image.mem, Some(3), "foo", 0xbeef).unwrap();
    assert_eq!(previous, 0xdead);
    assert_eq!(image.mem.word(0x3000), 0xbeef);
    assert_eq!(
        image.mem.protects,
        vec![
            (0x3000, 0x1000, Protection::ReadWrite),
            (0x3000, 0x1000, Protection::ReadOnly),
        ]
    );

    let again = meta.patch(&mut image.mem, Some(3), "foo", 0xbeef).unwrap();
    assert_eq!(again, 0xbeef);
}

#[test]
fn patch_matches_by_name_without_index() {
    let (mut image, hash) = sysv_image();
    image.put_reloc(PLT_REL, 0, 0x10, 2, RelocKind::JUMP_SLOT);
    image.put_reloc(PLT_REL, 1, 0x18, 3, RelocKind::JUMP_SLOT);
    image.mem.put_word(0x5010, 0x1);
    image.mem.put_word(0x5018, 0x2);
    let meta = image.metadata(hash, 0x5000, 2, 0);

    assert_eq!(meta.patch(&mut image.mem, None, "foo", 0x99), Ok(0x2));
    assert_eq!(image.mem.word(0x5010), 0x1);
    assert_eq!(image.mem.word(0x5018), 0x99);
}

#[test]
fn patch_skips_unexpected_type_in_plt() {
    let (mut image, hash) = sysv_image();
    image.put_reloc(PLT_REL, 0, 0x1000, 3, RelocKind::GLOB_DAT);
    image.mem.put_word(0x3000, 0xdead);
    let meta = image.metadata(hash, 0x2000, 1, 0);

    assert_eq!(meta.patch(&mut image.mem, Some(3), "foo", 0xbeef), Err(Errno::NoReloc));
    assert_eq!(image.mem.word(0x3000), 0xdead);
    assert!(image.mem.protects.is_empty());
}

#[test]
fn patch_general_table_keeps_first_value() {
    let (mut image, hash) = sysv_image();
    image.put_reloc(REL, 0, 0x100, 0, 0);
    image.put_reloc(REL, 1, 0x1000, 3, RelocKind::GLOB_DAT);
    image.put_reloc(REL, 2, 0x1800, 3, RelocKind::ABS);
    image.put_reloc(REL, 3, 0x1900, 3, RelocKind::JUMP_SLOT);
    image.mem.put_word(0x3000, 0x11);
    image.mem.put_word(0x3800, 0x22);
    image.mem.put_word(0x3900, 0x33);
    let meta = image.metadata(hash, 0x2000, 0, 4);

    assert_eq!(meta.patch(&mut image.mem, Some(3), "foo", 0x77), Ok(0x11));
    assert_eq!(image.mem.word(0x3000), 0x77);
    assert_eq!(image.mem.word(0x3800), 0x77);
    assert_eq!(image.mem.word(0x3900), 0x33);
}

#[test]
fn patch_without_tables_reports_no_reloc() {
    let (mut image, hash) = sysv_image();
    let meta = image.metadata(hash, 0, 0, 0);
    assert_eq!(meta.patch(&mut image.mem, Some(3), "foo", 1), Err(Errno::NoReloc));
}

#[test]
fn patch_slot_fails_when_protect_fails() {
    let mut mem = FakeMemory::new();
    mem.put_word(0x3000, 0xdead);
    mem.fail_protect = true;
    assert_eq!(patch_slot(&mut mem, 0x3000, 0xbeef), Err(Errno::SetProt));
    assert_eq!(mem.word(0x3000), 0xdead);
}

#[test]
fn reloc_entry_split() {
    let entry = RelocEntry {
        offset: 0x40,
        info: elf_r_info(7, RelocKind::JUMP_SLOT),
    };
    assert_eq!(entry.sym(), 7);
    assert_eq!(entry.kind(), RelocKind::JumpSlot);
    assert_eq!(RelocKind::classify(0xfe), RelocKind::Other(0xfe));
}

// dynamic section 写入 (tag, value) 对，DT_NULL 结尾
fn put_dynamic(mem: &mut FakeMemory, addr: usize, entries: &[(usize, usize)]) {
    for (index, &(tag, value)) in entries.iter().enumerate() {
        mem.put_word(addr + index * 2 * WORD_SIZE, tag);
        mem.put_word(addr + index * 2 * WORD_SIZE + WORD_SIZE, value);
    }
    let end = addr + entries.len() * 2 * WORD_SIZE;
    mem.put_word(end, DT_NULL);
    mem.put_word(end + WORD_SIZE, 0);
}

fn native_dt_pltrel() -> usize {
    match RelocFormat::NATIVE {
        RelocFormat::Rel => DT_REL,
        RelocFormat::Rela => DT_RELA,
    }
}

#[test]
fn from_dynamic_relocates_relative_pointers() {
    let bias = 0x100_000;
    let (image, _) = gnu_image(None);
    let mut mem = FakeMemory::new();
    // 映像整体平移到 bias 之上
    let symtab = image.mem.read_vec(SYMTAB, image.nsyms as usize * SYM_ENTRY_SIZE).unwrap();
    mem.put(bias + SYMTAB, &symtab);
    let strtab = image.mem.read_vec(STRTAB, image.strtab_len).unwrap();
    mem.put(bias + STRTAB, &strtab);
    let hash = image.mem.read_vec(HASH, 16 + WORD_SIZE + 12).unwrap();
    mem.put(bias + HASH, &hash);

    let entry_size = RelocFormat::NATIVE.entry_size();
    let dynamic = bias + 0x60_000;
    put_dynamic(
        &mut mem,
        dynamic,
        &[
            (DT_STRTAB, STRTAB),
            (DT_SYMTAB, SYMTAB),
            (DT_GNU_HASH, HASH),
            (DT_JMPREL, PLT_REL),
            (DT_PLTRELSZ, 3 * entry_size),
            (DT_PLTREL, native_dt_pltrel()),
            (DT_RELA, REL),
            (DT_RELASZ, 4 * RelocFormat::Rela.entry_size()),
        ],
    );

    let meta = ModuleMetadata::from_dynamic(&mem, bias, dynamic, "libdyn.so").unwrap();
    assert_eq!(meta.symtab, bias + SYMTAB);
    assert_eq!(meta.strtab, bias + STRTAB);
    assert!(meta.hash.is_gnu());
    assert_eq!(meta.plt_rel.addr, bias + PLT_REL);
    assert_eq!(meta.plt_rel.count, 3);
    assert_eq!(meta.plt_rel.format, RelocFormat::NATIVE);
    assert_eq!(meta.rel.count, 4);
    assert_eq!(meta.rel.format, RelocFormat::Rela);
    assert_eq!(meta.lookup(&mem, "foo").unwrap().index, 2);
}

#[test]
fn from_link_map_keeps_absolute_pointers() {
    let (mut image, _) = sysv_image();
    let bias = 0x8000;
    let dynamic = 0x60_000;
    put_dynamic(
        &mut image.mem,
        dynamic,
        &[(DT_STRTAB, STRTAB), (DT_SYMTAB, SYMTAB), (DT_HASH, HASH)],
    );
    let link_map = 0x70_000;
    image.mem.put_word(link_map, bias);
    image.mem.put_word(link_map + WORD_SIZE, 0);
    image.mem.put_word(link_map + 2 * WORD_SIZE, dynamic);

    let meta = ModuleMetadata::from_link_map(&image.mem, link_map, "libglibc.so").unwrap();
    assert_eq!(meta.load_bias, bias);
    assert_eq!(meta.symtab, SYMTAB);
    assert_eq!(meta.plt_rel.count, 0);
    assert_eq!(meta.rel.count, 0);
    assert_eq!(meta.lookup(&image.mem, "foo").unwrap().index, 3);
}

#[test]
fn from_dynamic_requires_terminator_and_tables() {
    let mut mem = FakeMemory::new();
    put_dynamic(&mut mem, 0x1000, &[(DT_STRTAB, 0x10)]);
    assert_eq!(
        ModuleMetadata::from_dynamic(&mem, 0, 0x1000, "libbad.so"),
        Err(Errno::Format)
    );
    assert_eq!(
        ModuleMetadata::from_dynamic(&mem, 0, 0, "libbad.so"),
        Err(Errno::Format)
    );
}

#[cfg(target_pointer_width = "64")]
#[test]
fn from_loaded_image_finds_dynamic_segment() {
    let (mut image, _) = sysv_image();
    let base = 0x8000;
    let dynamic_vaddr = 0x400;

    let mut ehdr = vec![0u8; layout::EHDR_SIZE];
    ehdr[..4].copy_from_slice(&ELFMAG);
    ehdr[EI_CLASS] = ELFCLASS_NATIVE;
    ehdr[layout::E_MACHINE..layout::E_MACHINE + 2].copy_from_slice(&EXPECTED_MACHINE.to_ne_bytes());
    ehdr[layout::E_PHOFF..layout::E_PHOFF + 8].copy_from_slice(&(layout::EHDR_SIZE as u64).to_ne_bytes());
    ehdr[layout::E_PHENTSIZE..layout::E_PHENTSIZE + 2]
        .copy_from_slice(&(layout::PHDR_SIZE as u16).to_ne_bytes());
    ehdr[layout::E_PHNUM..layout::E_PHNUM + 2].copy_from_slice(&2u16.to_ne_bytes());
    image.mem.put(base, &ehdr);

    let mut load = vec![0u8; layout::PHDR_SIZE];
    load[..4].copy_from_slice(&PT_LOAD.to_ne_bytes());
    image.mem.put(base + layout::EHDR_SIZE, &load);
    let mut dynamic = vec![0u8; layout::PHDR_SIZE];
    dynamic[..4].copy_from_slice(&PT_DYNAMIC.to_ne_bytes());
    dynamic[layout::P_VADDR..layout::P_VADDR + 8].copy_from_slice(&(dynamic_vaddr as u64).to_ne_bytes());
    image.mem.put(base + layout::EHDR_SIZE + layout::PHDR_SIZE, &dynamic);

    // glibc 风格：dynamic 条目已是绝对地址
    put_dynamic(
        &mut image.mem,
        base + dynamic_vaddr,
        &[(DT_STRTAB, STRTAB), (DT_SYMTAB, SYMTAB), (DT_HASH, HASH)],
    );

    let meta = ModuleMetadata::from_loaded_image(&image.mem, base, "libimg.so").unwrap();
    assert_eq!(meta.load_bias, base);
    assert_eq!(meta.symtab, SYMTAB);
    assert_eq!(meta.lookup(&image.mem, "foo").unwrap().index, 3);
}

#[test]
fn from_loaded_image_rejects_bad_magic() {
    let mut mem = FakeMemory::new();
    mem.put(0x1000, &vec![0u8; layout::EHDR_SIZE]);
    assert_eq!(
        ModuleMetadata::from_loaded_image(&mem, 0x1000, "libnone.so"),
        Err(Errno::Format)
    );
}

#[cfg(target_pointer_width = "64")]
fn test_soinfo_layout() -> SoinfoLayout {
    SoinfoLayout {
        size: 0x80,
        load_bias: 0x00,
        flags: 0x08,
        strtab: 0x10,
        symtab: 0x18,
        nbucket: 0x20,
        bucket: 0x28,
        chain: 0x30,
        plt_rel: 0x38,
        plt_rel_count: 0x40,
        rel: 0x48,
        rel_count: 0x50,
        flag_gnu_hash: 0x40,
        gnu: Some(GnuHashLayout {
            nbucket: 0x58,
            maskwords: 0x60,
            shift2: 0x64,
            bloom_filter: 0x68,
            bucket: 0x70,
            chain: 0x78,
        }),
    }
}

#[cfg(target_pointer_width = "64")]
#[test]
fn soinfo_view_reads_sysv_record() {
    let layout = test_soinfo_layout();
    let mut record = vec![0u8; layout.size];
    let mut put = |offset: usize, value: usize| {
        record[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
    };
    put(layout.load_bias, 0x2000);
    put(layout.strtab, STRTAB);
    put(layout.symtab, SYMTAB);
    put(layout.nbucket, 4);
    put(layout.bucket, HASH + 8);
    put(layout.chain, HASH + 24);
    put(layout.plt_rel, PLT_REL);
    put(layout.plt_rel_count, 5);

    let meta = SoinfoView::new(&record, &layout).unwrap().metadata("libsoinfo.so").unwrap();
    assert_eq!(meta.load_bias, 0x2000);
    assert_eq!(
        meta.hash,
        HashTable::Sysv {
            nbucket: 4,
            bucket: HASH + 8,
            chain: HASH + 24,
        }
    );
    assert_eq!(meta.plt_rel.count, 5);
    assert_eq!(meta.rel, RelocTable { addr: 0, count: 0, format: RelocFormat::NATIVE });
}

#[cfg(target_pointer_width = "64")]
#[test]
fn soinfo_view_reads_gnu_record() {
    let layout = test_soinfo_layout();
    let mut record = vec![0u8; layout.size];
    record[layout.flags..layout.flags + 4].copy_from_slice(&0x40u32.to_ne_bytes());
    record[layout.strtab..layout.strtab + 8].copy_from_slice(&STRTAB.to_ne_bytes());
    record[layout.symtab..layout.symtab + 8].copy_from_slice(&SYMTAB.to_ne_bytes());
    let gnu = layout.gnu.unwrap();
    record[gnu.nbucket..gnu.nbucket + 8].copy_from_slice(&2usize.to_ne_bytes());
    record[gnu.maskwords..gnu.maskwords + 4].copy_from_slice(&3u32.to_ne_bytes());
    record[gnu.shift2..gnu.shift2 + 4].copy_from_slice(&6u32.to_ne_bytes());

    let mut mem = FakeMemory::new();
    mem.put(0x9000, &record);
    let meta = ModuleMetadata::from_soinfo(&mem, 0x9000, &layout, "libgnu.so").unwrap();
    match meta.hash {
        HashTable::Gnu {
            nbucket,
            bloom_mask,
            shift2,
            ..
        } => {
            assert_eq!(nbucket, 2);
            assert_eq!(bloom_mask, 3);
            assert_eq!(shift2, 6);
        }
        other => panic!("expected gnu hash, got {other:?}"),
    }
}

#[test]
fn soinfo_view_rejects_short_record() {
    let layout = SoinfoLayout::ANDROID_LEGACY_ARM;
    let record = vec![0u8; layout.size - 1];
    assert!(SoinfoView::new(&record, &layout).is_err());
}

#[test]
fn soinfo_gnu_flag_without_gnu_layout() {
    let layout = SoinfoLayout {
        gnu: None,
        ..SoinfoLayout::ANDROID_LEGACY_ARM
    };
    let mut record = vec![0u8; layout.size];
    record[layout.flags..layout.flags + 4].copy_from_slice(&layout.flag_gnu_hash.to_ne_bytes());
    record[layout.strtab..layout.strtab + WORD_SIZE].copy_from_slice(&STRTAB.to_ne_bytes());
    record[layout.symtab..layout.symtab + WORD_SIZE].copy_from_slice(&SYMTAB.to_ne_bytes());
    let view = SoinfoView::new(&record, &layout).unwrap();
    assert_eq!(view.metadata("libold.so"), Err(Errno::Format));
}
