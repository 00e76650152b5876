// /proc/<pid>/maps 解析：可执行模块枚举与按名称查找模块基址
use crate::log;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;

// Android 上的库文件名以 .so 结尾，glibc 的库带版本后缀，如 libc.so.6
#[cfg(target_os = "android")]
const SHARED_OBJECT_PATTERN: &str = r"\.so$";
#[cfg(not(target_os = "android"))]
const SHARED_OBJECT_PATTERN: &str = r"\.so(\.\d+)*$";

static SHARED_OBJECT_SUFFIX: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(SHARED_OBJECT_PATTERN).ok());

pub(crate) fn is_shared_object(name: &str) -> bool {
    match SHARED_OBJECT_SUFFIX.as_ref() {
        Some(regex) => regex.is_match(name),
        None => name.ends_with(".so"),
    }
}

// 一个可执行映射对应的模块，base_addr 为映射起始地址
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleMapping {
    pub base_addr: usize,
    pub name: String,
}

// 枚举时的映射筛选方式
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MapFilter {
    // 可执行且路径为共享库（.so，非 Android 上允许版本后缀）
    #[default]
    SharedObject,
    // 所有带路径的可执行映射，包含主程序
    Executable,
}

fn maps_path(pid: Option<i32>) -> String {
    match pid {
        Some(pid) => format!("/proc/{pid}/maps"),
        None => "/proc/self/maps".to_string(),
    }
}

fn read_maps(pid: Option<i32>) -> Option<String> {
    let path = maps_path(pid);
    match fs::read_to_string(&path) {
        Ok(content) => Some(content),
        Err(err) => {
            log::debug(format_args!("read {path} failed: {err}"));
            None
        }
    }
}

// 枚举进程内的可执行 .so 映射，无法读取 maps 时返回空列表
pub fn enumerate(pid: Option<i32>) -> Vec<ModuleMapping> {
    enumerate_with(pid, MapFilter::SharedObject)
}

pub fn enumerate_with(pid: Option<i32>, filter: MapFilter) -> Vec<ModuleMapping> {
    let Some(content) = read_maps(pid) else {
        return Vec::new();
    };
    parse_modules(&content, filter)
}

// 同一模块的多个可执行映射各自保留，不做合并
pub fn parse_modules(content: &str, filter: MapFilter) -> Vec<ModuleMapping> {
    content
        .lines()
        .filter_map(|line| parse_module_line(line, filter))
        .collect()
}

// 返回首个路径包含 needle 的映射起始地址，即模块最低地址的映射
pub fn find_module_base(needle: &str, pid: Option<i32>) -> Option<usize> {
    let content = read_maps(pid)?;
    let base = find_base_in(&content, needle);
    if base.is_none() {
        log::debug(format_args!("module {needle} not found in {}", maps_path(pid)));
    }
    base
}

pub fn find_base_in(content: &str, needle: &str) -> Option<usize> {
    content.lines().find_map(|line| {
        let fields = split_line(line)?;
        if !fields.path.contains(needle) {
            return None;
        }
        parse_range_start(fields.range)
    })
}

struct MapsFields<'a> {
    range: &'a str,
    perms: &'a str,
    path: &'a str,
}

// maps 行格式：range perms offset dev inode [path]
fn split_line(line: &str) -> Option<MapsFields<'_>> {
    let mut parts = line.splitn(6, char::is_whitespace).filter(|part| !part.is_empty());
    let range = parts.next()?;
    let perms = parts.next()?;
    let _offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let path = parts.next().map(str::trim).unwrap_or("");
    Some(MapsFields { range, perms, path })
}

pub(crate) fn parse_module_line(line: &str, filter: MapFilter) -> Option<ModuleMapping> {
    let fields = split_line(line)?;
    if fields.perms.as_bytes().get(2) != Some(&b'x') || fields.path.is_empty() {
        return None;
    }
    // 取路径的最后一个空格分隔段作为模块名
    let name = fields.path.rsplit(' ').next()?;
    if filter == MapFilter::SharedObject && !is_shared_object(name) {
        return None;
    }
    let base_addr = parse_range_start(fields.range)?;
    Some(ModuleMapping {
        base_addr,
        name: name.to_string(),
    })
}

fn parse_range_start(range: &str) -> Option<usize> {
    let (start, _) = range.split_once('-')?;
    usize::from_str_radix(start, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_keeps_only_executable_so() {
        let content = "aabb0000-aabc0000 r-xp 00000000 00:00 0 libc.so\n\
                       ccdd0000-ccde0000 rw-p 00000000 00:00 0 libc.so\n";
        let modules = parse_modules(content, MapFilter::SharedObject);
        assert_eq!(
            modules,
            vec![ModuleMapping {
                base_addr: 0xAABB0000,
                name: "libc.so".to_string(),
            }]
        );
    }

    #[test]
    fn shared_object_suffix() {
        assert!(is_shared_object("/system/lib64/libc.so"));
        assert!(!is_shared_object("/usr/bin/python3.11"));
        assert!(!is_shared_object("/data/app/base.apk"));
        assert!(!is_shared_object("/usr/lib/libfoo.so.bak"));
        #[cfg(not(target_os = "android"))]
        {
            assert!(is_shared_object("/usr/lib/libc.so.6"));
            assert!(is_shared_object("/usr/lib/libpython3.11.so.1.0"));
        }
    }

    #[test]
    #[cfg(not(target_os = "android"))]
    fn enumerate_keeps_versioned_sonames() {
        let content = "7f0000000000-7f0000001000 r-xp 00000000 08:01 11 /usr/lib/libc.so.6\n\
                       7f0000001000-7f0000002000 r--p 00001000 08:01 11 /usr/lib/libc.so.6\n\
                       7f0000006000-7f0000007000 r-xp 00000000 08:01 12 /usr/bin/python3.11\n";
        let modules = parse_modules(content, MapFilter::SharedObject);
        assert_eq!(
            modules,
            vec![ModuleMapping {
                base_addr: 0x7f0000000000,
                name: "/usr/lib/libc.so.6".to_string(),
            }]
        );
    }

    #[test]
    fn enumerate_skips_program_and_anonymous() {
        let content = "7f0000000000-7f0000001000 r-xp 00000000 08:01 11 /usr/bin/app_process\n\
                       7f0000002000-7f0000003000 r-xp 00000000 00:00 0 \n\
                       7f0000004000-7f0000005000 r-xp 00000000 00:00 0 [vdso]\n";
        assert!(parse_modules(content, MapFilter::SharedObject).is_empty());

        let all = parse_modules(content, MapFilter::Executable);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "/usr/bin/app_process");
        assert_eq!(all[1].name, "[vdso]");
    }

    #[test]
    fn enumerate_keeps_duplicate_mappings() {
        let content = "1000-2000 r-xp 00000000 08:01 7 /data/liba.so\n\
                       3000-4000 r-xp 00002000 08:01 7 /data/liba.so\n";
        let modules = parse_modules(content, MapFilter::SharedObject);
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[1].base_addr, 0x3000);
    }

    #[test]
    fn find_base_returns_first_match() {
        let content = "70000000-70001000 r--p 00000000 103:06 1 /system/lib/libc.so\n\
                       70001000-70040000 r-xp 00001000 103:06 1 /system/lib/libc.so\n\
                       71000000-71001000 r-xp 00000000 103:06 2 /system/bin/linker\n";
        assert_eq!(find_base_in(content, "libc.so"), Some(0x70000000));
        assert_eq!(find_base_in(content, "/system/bin/linker"), Some(0x71000000));
        assert_eq!(find_base_in(content, "libm.so"), None);
    }

    #[test]
    fn parse_rejects_bad_range() {
        assert!(parse_module_line("zzzz-1000 r-xp 0 0:0 0 liba.so", MapFilter::SharedObject).is_none());
        assert!(parse_module_line("1000-2000 r-xp", MapFilter::SharedObject).is_none());
    }

    #[test]
    fn enumerate_self_lists_mappings() {
        let content = read_maps(None).expect("self maps readable");
        assert!(!parse_modules(&content, MapFilter::Executable).is_empty());
    }
}
