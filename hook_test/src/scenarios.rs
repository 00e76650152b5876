mod install;
mod maps;
mod remote;

use srx_trace::env_flag;

pub unsafe fn run_all() {
    run("maps-enumerate", maps::scenario_enumerate_modules);
    run("maps-find-base", maps::scenario_find_module_base);
    run("single-install-restore", install::scenario_single_install_restore);
    run("install-missing-symbol", install::scenario_missing_symbol);
    run("install-all-skip-rules", install::scenario_install_all_skip_rules);
    if env_flag("HOOK_TEST_SKIP_REMOTE") {
        println!("remote scenarios skipped");
        return;
    }
    run("remote-memory", remote::scenario_remote_memory);
    run("remote-dlopen-call", remote::scenario_remote_dlopen_call);
    run("remote-call-signal", remote::scenario_remote_call_survives_signal);
}

unsafe fn run(name: &str, scenario: unsafe fn()) {
    println!("scenario: {name}");
    scenario();
}
