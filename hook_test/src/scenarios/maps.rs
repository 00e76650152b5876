use srx_trace::maps::{self, MapFilter};

use crate::test_ctx::{HOOK_TEST_LIB, load_hook_test};

pub unsafe fn scenario_enumerate_modules() {
    let handle = load_hook_test();
    let modules = maps::enumerate(None);
    assert!(
        modules.iter().any(|module| module.name.ends_with(HOOK_TEST_LIB)),
        "{HOOK_TEST_LIB} missing from module list"
    );
    assert!(
        modules.iter().any(|module| module.name.contains("libc.so")),
        "libc missing from module list"
    );
    assert!(modules.iter().all(|module| module.name.contains(".so")));

    let all = maps::enumerate_with(None, MapFilter::Executable);
    assert!(all.len() > modules.len(), "executable filter did not include main program");
    libc::dlclose(handle);
}

pub unsafe fn scenario_find_module_base() {
    let handle = load_hook_test();
    let base = maps::find_module_base(HOOK_TEST_LIB, None).expect("module base not found");
    let magic = std::slice::from_raw_parts(base as *const u8, 4);
    assert_eq!(magic, b"\x7fELF", "module base is not an ELF header");
    assert_eq!(maps::find_module_base("libdoes_not_exist.so", None), None);
    libc::dlclose(handle);
}
