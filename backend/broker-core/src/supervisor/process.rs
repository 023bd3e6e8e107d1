//! Pid-level process control through `sysinfo`.

use std::thread::sleep;
use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use log::{debug, trace};
use sysinfo::{Pid, Process, ProcessesToUpdate, System};

const KILL_VERIFY_MAX_ELAPSED: Duration = Duration::from_secs(5);

pub(crate) fn with_process<F, R>(pid: u32, f: F) -> Option<R>
where
    F: FnOnce(&Process) -> R,
{
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    sys.process(pid).map(f)
}

pub fn is_alive(pid: u32) -> bool {
    with_process(pid, |_| true).unwrap_or(false)
}

/// Stop a process by PID.
///
/// Sends SIGTERM where the platform supports it, otherwise kills outright,
/// then polls with exponential backoff (up to 5 seconds) until the pid is
/// gone. Blocking; call from `spawn_blocking`.
///
/// Returns `false` if the process was not found or is still alive.
pub fn stop_pid(pid: u32) -> bool {
    let signalled = with_process(pid, |p| {
        if let Some(sent) = p.kill_with(sysinfo::Signal::Term) {
            debug!("Sent SIGTERM to PID {pid}: success={sent}");
            sent
        } else {
            let killed = p.kill();
            debug!("Sent kill to PID {pid}: success={killed}");
            killed
        }
    })
    .unwrap_or_else(|| {
        debug!("Process {pid} not found");
        false
    });

    if !signalled {
        return false;
    }

    let mut backoff = ExponentialBackoff {
        max_elapsed_time: Some(KILL_VERIFY_MAX_ELAPSED),
        ..Default::default()
    };

    loop {
        if !is_alive(pid) {
            debug!("Process {pid} terminated");
            return true;
        }

        match backoff.next_backoff() {
            Some(duration) => {
                trace!("Process {pid} still alive, retrying after {duration:?}");
                sleep(duration);
            }
            None => {
                debug!("Process {pid} still running after max backoff time");
                return false;
            }
        }
    }
}
