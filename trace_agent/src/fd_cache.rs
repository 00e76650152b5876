// 文件描述符到可读名称的缓存，所有线程共享同一把锁

use crate::MutexPoisonRecover;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

pub struct DescriptorCache {
    names: Mutex<BTreeMap<i32, String>>,
}

impl Default for DescriptorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorCache {
    pub const fn new() -> Self {
        Self {
            names: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add(&self, fd: i32, name: &str) {
        if fd < 0 {
            return;
        }
        self.names.lock_or_poison().insert(fd, name.to_string());
    }

    pub fn remove(&self, fd: i32) {
        self.names.lock_or_poison().remove(&fd);
    }

    // 缓存未命中时读取 /proc/self/fd/<fd> 链接，仍失败则返回 (<fd>)
    pub fn resolve(&self, fd: i32) -> String {
        if let Some(name) = self.names.lock_or_poison().get(&fd) {
            return name.clone();
        }
        fs::read_link(format!("/proc/self/fd/{fd}"))
            .map(|target| target.to_string_lossy().into_owned())
            .unwrap_or_else(|_| format!("({fd})"))
    }
}

pub static DESCRIPTORS: DescriptorCache = DescriptorCache::new();

pub fn resolve_descriptor(fd: i32) -> String {
    DESCRIPTORS.resolve(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_name_wins() {
        let cache = DescriptorCache::new();
        cache.add(0, "unix:///dev/socket/logd");
        assert_eq!(cache.resolve(0), "unix:///dev/socket/logd");
        cache.remove(0);
        assert_ne!(cache.resolve(0), "unix:///dev/socket/logd");
    }

    #[test]
    fn unknown_descriptor_placeholder() {
        let cache = DescriptorCache::new();
        assert_eq!(cache.resolve(987_654), "(987654)");
        cache.add(-1, "bad");
        assert_eq!(cache.resolve(-1), "(-1)");
    }

    #[test]
    fn falls_back_to_proc_link() {
        let file = fs::File::open("/proc/self/maps").unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&file);
        let cache = DescriptorCache::new();
        assert!(cache.resolve(fd).ends_with("/maps"));
    }
}
