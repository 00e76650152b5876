use clap::Parser;
use srx_trace::config::{ENV_DEBUG, InjectorConfig, env_flag};
use srx_trace::{Tracee, get_version, log};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "srx_inject", version, about = "Load a shared library into a running process")]
struct Cli {
    /// Target process id
    pid: String,
    /// Path of the library to load, as seen by the target
    library: String,
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_pid(text: &str) -> Option<i32> {
    match text.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => None,
    }
}

fn inject(pid: i32, library: &str, config: &InjectorConfig) -> ExitCode {
    let mut tracee = match Tracee::attach(pid, config) {
        Ok(tracee) => tracee,
        Err(err) => {
            eprintln!("Failed to attach to process {pid}: {err}");
            return ExitCode::from(1);
        }
    };

    println!("  Calling dlopen in target process ...");
    match tracee.dlopen_remote(library) {
        Ok(handle) => {
            println!("  dlopen returned {handle:#x}");
            if handle == 0 {
                match tracee.dlerror_remote() {
                    Ok(Some(message)) => println!("  dlerror: {message}"),
                    Ok(None) => println!("  dlerror: (none)"),
                    Err(err) => eprintln!("  dlerror call failed: {err}"),
                }
            }
        }
        Err(err) => eprintln!("  remote dlopen failed: {err}"),
    }

    if let Err(err) = tracee.detach() {
        eprintln!("Failed to detach from process {pid}: {err}");
    }
    println!("@ Done.");
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    log::set_debug_enabled(cli.debug || env_flag(ENV_DEBUG));
    log::debug(format_args!("{}", get_version()));

    let Some(pid) = parse_pid(&cli.pid) else {
        eprintln!("Invalid PID {}", cli.pid);
        return ExitCode::from(1);
    };

    println!("@ Injecting library {} into process {pid}.", cli.library);
    let config = InjectorConfig::from_env();
    inject(pid, &cli.library, &config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_must_be_positive_integer() {
        assert_eq!(parse_pid("1234"), Some(1234));
        assert_eq!(parse_pid(" 42 "), Some(42));
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("-3"), None);
        assert_eq!(parse_pid("abc"), None);
    }

    #[test]
    fn cli_requires_two_positionals() {
        assert!(Cli::try_parse_from(["srx_inject", "1234"]).is_err());
        let cli = Cli::try_parse_from(["srx_inject", "1234", "/data/local/tmp/libtrace_agent.so"]).unwrap();
        assert_eq!(cli.pid, "1234");
        assert_eq!(cli.library, "/data/local/tmp/libtrace_agent.so");
    }
}
