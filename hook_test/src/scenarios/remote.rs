use std::ffi::CString;
use std::time::{Duration, Instant};

use srx_trace::remote::find_function;
use srx_trace::{InjectorConfig, SrxTraceErrno, Tracee};

use crate::test_ctx::{hook_test_path, reap, spawn_sleeper};

const SIGNAL_SLEEP_US: usize = 600_000;

pub unsafe fn scenario_remote_memory() {
    let child = spawn_sleeper();
    let config = InjectorConfig::from_env();
    {
        let mut tracee = Tracee::attach(child, &config).expect("attach child failed");
        assert!(tracee.is_attached());
        assert_ne!(tracee.symbols().calloc, 0, "calloc not resolved");

        let text = "srx remote string";
        let addr = tracee.copy_string(text).expect("copy_string failed");
        assert_eq!(tracee.read_cstring(addr, 64).expect("read_cstring failed"), text);
        assert_eq!(tracee.read_cstring(addr, 3).expect("read_cstring failed"), "srx");

        // 写入按字对齐，尾部补 0
        tracee.write_bytes(addr, b"XYZ").expect("write_bytes failed");
        assert_eq!(tracee.read_bytes(addr, 3).expect("read_bytes failed"), b"XYZ");
        assert_eq!(tracee.read_cstring(addr, 64).expect("read_cstring failed"), "XYZ");
        tracee.free_remote(addr).expect("free_remote failed");

        assert_eq!(tracee.call(0, &[]), Err(SrxTraceErrno::Unresolved));
        tracee.detach().expect("detach failed");
        assert!(!tracee.is_attached());
        tracee.detach().expect("second detach failed");
    }
    reap(child);
}

pub unsafe fn scenario_remote_dlopen_call() {
    let child = spawn_sleeper();
    let config = InjectorConfig::from_env();
    {
        let mut tracee = Tracee::attach(child, &config).expect("attach child failed");
        let handle = tracee.dlopen_remote(&hook_test_path()).expect("remote dlopen failed");
        if handle == 0 {
            let reason = tracee.dlerror_remote().ok().flatten();
            panic!("remote dlopen returned NULL: {reason:?}");
        }

        let strlen = tracee
            .dlsym_remote(handle, "hook_test_strlen")
            .expect("remote dlsym failed");
        assert_ne!(strlen, 0, "hook_test_strlen not found in child");
        let msg = tracee.copy_string("remote call").expect("copy_string failed");
        assert_eq!(tracee.call(strlen, &[msg]), Ok(11));
        tracee.free_remote(msg).expect("free_remote failed");

        // 寄存器参数与栈参数混合时顺序不变
        let weighted = tracee
            .dlsym_remote(handle, "hook_test_weighted8")
            .expect("remote dlsym failed");
        assert_ne!(weighted, 0);
        let args = [1, 2, 3, 4, 5, 6, 7, 8];
        let expected: usize = args.iter().enumerate().map(|(i, v)| (i + 1) * v).sum();
        assert_eq!(tracee.call(weighted, &args), Ok(expected));

        assert_eq!(tracee.dlsym_remote(handle, "srx_no_such_symbol"), Ok(0));
        let error = tracee.dlerror_remote().expect("remote dlerror failed");
        assert!(error.is_some(), "dlerror empty after failed dlsym");
    }
    reap(child);
}

// 远程调用期间目标收到的信号不打断调用，分离后再投递给目标
pub unsafe fn scenario_remote_call_survives_signal() {
    let child = spawn_sleeper();
    let config = InjectorConfig::from_env();
    let name = CString::new("usleep").expect("cstring failed");
    let local_usleep = libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr());
    assert!(!local_usleep.is_null(), "dlsym usleep failed");

    let mut tracee = Tracee::attach(child, &config).expect("attach child failed");
    let usleep = find_function(&config.libc_module, local_usleep as usize, child)
        .expect("usleep not found in child");

    let signaller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        unsafe { libc::kill(child, libc::SIGUSR1) };
    });
    let started = Instant::now();
    let result = tracee.call(usleep, &[SIGNAL_SLEEP_US]);
    let elapsed = started.elapsed();
    signaller.join().expect("signal thread panicked");

    assert_eq!(result, Ok(0), "usleep interrupted after {elapsed:?}");
    assert!(
        elapsed >= Duration::from_micros(SIGNAL_SLEEP_US as u64 - 50_000),
        "remote usleep returned early after {elapsed:?}"
    );
    assert!(tracee.is_attached());

    // SIGUSR1 默认终止进程，分离后应由它结束子进程
    tracee.detach().expect("detach failed");
    let mut status = 0;
    assert_eq!(libc::waitpid(child, &mut status, 0), child);
    assert!(
        libc::WIFSIGNALED(status) && libc::WTERMSIG(status) == libc::SIGUSR1,
        "deferred SIGUSR1 not delivered, status {status:#x}"
    );
}
