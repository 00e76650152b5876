use std::ffi::CString;
use std::sync::atomic::Ordering;

use regex::Regex;
use srx_trace::{AgentConfig, HookEngine, HookRecord, LocalMemory, MetadataSource, install, maps};

use crate::test_ctx::{
    FAKE_STRLEN_RESULT, HOOK_TEST_LIB, STRLEN_COUNT, STRLEN_PREV, counting_strlen, fake_strlen,
    hook_test_path, hook_test_strlen, load_hook_test,
};

pub unsafe fn scenario_single_install_restore() {
    let handle = load_hook_test();
    let path = hook_test_path();
    let msg = CString::new("single").expect("cstring failed");
    assert_eq!(hook_test_strlen(handle, &msg), 6);

    let previous = install(&path, "strlen", fake_strlen as usize);
    assert_ne!(previous, 0, "install strlen failed");

    STRLEN_COUNT.store(0, Ordering::Relaxed);
    assert_eq!(hook_test_strlen(handle, &msg), FAKE_STRLEN_RESULT);
    assert_eq!(STRLEN_COUNT.load(Ordering::Relaxed), 1, "hook not hit");

    // 恢复原值，返回的旧值应为替换函数
    let replaced = install(&path, "strlen", previous);
    assert_eq!(replaced, fake_strlen as usize);
    assert_eq!(hook_test_strlen(handle, &msg), 6);
    assert_eq!(STRLEN_COUNT.load(Ordering::Relaxed), 1, "hook still active after restore");
    libc::dlclose(handle);
}

pub unsafe fn scenario_missing_symbol() {
    let handle = load_hook_test();
    let path = hook_test_path();
    assert_eq!(install(&path, "srx_no_such_symbol", fake_strlen as usize), 0);
    assert_eq!(install("libdoes_not_exist.so", "strlen", fake_strlen as usize), 0);
    libc::dlclose(handle);
}

pub unsafe fn scenario_install_all_skip_rules() {
    let handle = load_hook_test();
    let msg = CString::new("install-all").expect("cstring failed");
    let modules: Vec<_> = maps::enumerate(None)
        .into_iter()
        .filter(|module| module.name.ends_with(HOOK_TEST_LIB))
        .collect();
    assert!(!modules.is_empty());

    let source = MetadataSource::default();
    let mut engine = HookEngine::local(source);
    let mut locate = |mem: &LocalMemory, module: &maps::ModuleMapping| source.load(mem, &module.name);

    // agent 自身与 ignore 规则命中的模块不做替换
    let mut table = vec![HookRecord::new("strlen", counting_strlen as usize)];
    let skip_self = AgentConfig {
        self_name: HOOK_TEST_LIB.to_string(),
        ..AgentConfig::default()
    };
    assert_eq!(engine.install_all_with(&modules, &mut table, &skip_self, &mut locate), 0);
    let ignore = AgentConfig {
        ignore: Some(Regex::new("hook_test").expect("regex failed")),
        ..AgentConfig::default()
    };
    assert_eq!(engine.install_all_with(&modules, &mut table, &ignore, &mut locate), 0);
    assert_eq!(table[0].original, 0);

    let config = AgentConfig::default();
    let patched = engine.install_all_with(&modules, &mut table, &config, &mut locate);
    assert!(patched >= 1, "install_all patched nothing");
    let original = table[0].original;
    assert_ne!(original, 0, "original not recorded");
    STRLEN_PREV.store(original, Ordering::Relaxed);

    STRLEN_COUNT.store(0, Ordering::Relaxed);
    assert_eq!(hook_test_strlen(handle, &msg), 11);
    assert!(STRLEN_COUNT.load(Ordering::Relaxed) >= 1, "install_all hook not hit");

    // 再次安装不会覆盖已记录的原函数，slot 内容未变也不计数
    assert_eq!(engine.install_all_with(&modules, &mut table, &config, &mut locate), 0);
    assert_eq!(table[0].original, original);

    let mut restore = vec![HookRecord::new("strlen", original)];
    engine.install_all_with(&modules, &mut restore, &config, &mut locate);
    STRLEN_COUNT.store(0, Ordering::Relaxed);
    assert_eq!(hook_test_strlen(handle, &msg), 11);
    assert_eq!(STRLEN_COUNT.load(Ordering::Relaxed), 0, "hook still active after restore");
    libc::dlclose(handle);
}
