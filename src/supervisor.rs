//! Pre-fork worker supervisor: brings up the worker pool, reaps dead
//! children, and reacts to operator commands and signals.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::StartupError;
use crate::worker;

/// How often the main loop wakes up to check the signal flags and the
/// stdin command channel. Not part of the external contract; just a
/// polling cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Command {
    Restart,
    Exit,
}

/// Runs the supervisor until an `exit` command or a fatal configuration
/// error. Returns the process exit code.
pub fn run(config_path: &str) -> i32 {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };
    config.log_summary();

    let shutdown = Arc::new(AtomicBool::new(false));
    let sigchld = Arc::new(AtomicBool::new(false));
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown)) {
        error!(error = %e, "failed to install SIGINT handler");
        return 1;
    }
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGCHLD, Arc::clone(&sigchld)) {
        error!(error = %e, "failed to install SIGCHLD handler");
        return 1;
    }

    let commands = spawn_command_reader();

    let mut config = config;
    let mut pids = fork_workers(&config);

    loop {
        std::thread::sleep(POLL_INTERVAL);

        if sigchld.swap(false, Ordering::AcqRel) {
            reap_exited(&mut pids);
        }

        if shutdown.swap(false, Ordering::AcqRel) {
            info!("SIGINT received, shutting down");
            break;
        }

        match commands.try_recv() {
            Ok(Command::Exit) => {
                info!("exit command received, shutting down");
                break;
            }
            Ok(Command::Restart) => {
                info!("restart command received");
                terminate_all(&pids);
                match Config::load(config_path) {
                    Ok(reloaded) => {
                        config = reloaded;
                        config.log_summary();
                        pids = fork_workers(&config);
                    }
                    Err(e) => {
                        error!(error = %e, "restart aborted: configuration reload failed");
                        return 1;
                    }
                }
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {}
        }
    }

    terminate_all(&pids);
    0
}

fn spawn_command_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "restart" => Some(Command::Restart),
                "exit" => Some(Command::Exit),
                other if !other.is_empty() => {
                    warn!(command = other, "unrecognized console command");
                    None
                }
                _ => None,
            };
            if let Some(command) = command {
                if tx.send(command).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

fn fork_workers(config: &Config) -> Vec<libc::pid_t> {
    let count = config.worker_count();
    let mut pids = Vec::with_capacity(count);
    for _ in 0..count {
        // SAFETY: fork() is async-signal-safe; the child immediately
        // calls worker::run and exits, doing no further work in the
        // parent's address space that could race with the parent.
        match unsafe { libc::fork() } {
            -1 => {
                error!("fork failed");
            }
            0 => {
                let code = match worker::run(config) {
                    Ok(()) => 0,
                    Err(e) => {
                        eprintln!("worker startup failed: {e}");
                        1
                    }
                };
                std::process::exit(code);
            }
            pid => pids.push(pid),
        }
    }
    info!(workers = pids.len(), "worker pool started");
    pids
}

/// Drain every exited child non-blocking, logging exit status/signal.
/// A worker that dies is not replaced (§4.1 failure semantics).
fn reap_exited(pids: &mut Vec<libc::pid_t>) {
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        pids.retain(|&p| p != pid);
        if libc::WIFEXITED(status) {
            warn!(pid, code = libc::WEXITSTATUS(status), "worker exited");
        } else if libc::WIFSIGNALED(status) {
            warn!(pid, signal = libc::WTERMSIG(status), "worker killed by signal");
        } else {
            warn!(pid, status, "worker exited with unrecognized status");
        }
    }
}

fn terminate_all(pids: &[libc::pid_t]) {
    for &pid in pids {
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
    for &pid in pids {
        let mut status: libc::c_int = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
    }
}
