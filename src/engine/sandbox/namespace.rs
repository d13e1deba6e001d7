//! Namespace jail for the process backend
//!
//! Entered between fork and exec. The child unshares user, mount, network and
//! PID namespaces, maps its own uid/gid to root inside, makes every mount
//! private and puts a fresh tmpfs on `/tmp`. It then forks twice:
//!
//! - the first fork is PID 1 of the new namespace; when it exits the kernel
//!   kills everything left inside, including processes that called `setsid`
//! - the second fork returns from `enter` and execs the interpreter
//!
//! The original child stays outside the namespace and only relays the
//! interpreter's exit status, so callers see the same exit code or signal as
//! an unjailed run. It closes every descriptor it does not need, so the
//! output pipes reach EOF as soon as the jailed processes are gone.
//!
//! Everything after `fork` sticks to async-signal-safe calls.

use std::ffi::CStr;
use std::io;
use std::os::fd::RawFd;
use std::process::Stdio;
use std::sync::OnceLock;

use nix::errno::Errno;
use nix::libc;
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, getgid, getpid, getuid, ForkResult, Pid};
use tokio::process::Command;
use tracing::{info, warn};

const TMP_OPTIONS: &str = "size=16m,mode=1777";
/// Upper bound for the descriptor sweep when `close_range` is missing
const FALLBACK_FD_LIMIT: RawFd = 4096;

static AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Check (once) whether this host lets an unprivileged child enter the jail
pub async fn namespaces_available() -> bool {
    if let Some(value) = AVAILABLE.get() {
        return *value;
    }

    let jail = NamespaceJail::new();
    let mut cmd = Command::new("/bin/sh");
    cmd.args(["-c", "exit 0"])
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    // SAFETY: `enter` only makes async-signal-safe calls
    unsafe {
        cmd.pre_exec(move || jail.enter());
    }

    let available = matches!(cmd.status().await, Ok(status) if status.success());
    if available {
        info!("namespace isolation available for process sandbox");
    } else {
        warn!("namespace isolation unavailable; runs will share /tmp and network with the host");
    }
    let _ = AVAILABLE.set(available);
    available
}

/// Pre-formatted state for entering the jail from a forked child
#[derive(Debug, Clone)]
pub struct NamespaceJail {
    uid_map: Vec<u8>,
    gid_map: Vec<u8>,
}

impl NamespaceJail {
    pub fn new() -> Self {
        Self {
            uid_map: format!("0 {} 1", getuid()).into_bytes(),
            gid_map: format!("0 {} 1", getgid()).into_bytes(),
        }
    }

    /// Only the process that goes on to exec returns `Ok`; the status relay
    /// and the namespace init exit from inside this call.
    pub fn enter(&self) -> io::Result<()> {
        unshare(
            CloneFlags::CLONE_NEWUSER
                | CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWNET
                | CloneFlags::CLONE_NEWPID,
        )?;
        self.map_ids()?;

        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )?;
        mount(
            Some("tmpfs"),
            "/tmp",
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            Some(TMP_OPTIONS),
        )?;

        let (status_read, status_write) = status_pipe()?;

        // SAFETY: single-threaded child between fork and exec
        if let ForkResult::Parent { child } = unsafe { fork() }? {
            relay(child, status_read);
        }

        // PID 1 of the new namespace from here on
        // SAFETY: as above
        match unsafe { fork() }? {
            ForkResult::Parent { child } => supervise(child, status_write),
            ForkResult::Child => Ok(()),
        }
    }

    fn map_ids(&self) -> io::Result<()> {
        match write_proc(c"/proc/self/setgroups", b"deny") {
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {}
            other => other?,
        }
        write_proc(c"/proc/self/uid_map", &self.uid_map)?;
        write_proc(c"/proc/self/gid_map", &self.gid_map)
    }
}

impl Default for NamespaceJail {
    fn default() -> Self {
        Self::new()
    }
}

/// Outside the namespace: wait for the init, then die the way the program did
fn relay(init: Pid, status_read: RawFd) -> ! {
    close_fds_except(status_read);
    let status = read_status(status_read).unwrap_or(-(Signal::SIGKILL as i32));
    wait_for(init);
    exit_like(status)
}

/// Namespace init: reap the program and report how it ended
fn supervise(program: Pid, status_write: RawFd) -> ! {
    close_fds_except(status_write);
    let status = wait_for(program).to_ne_bytes();
    // SAFETY: writes a 4-byte stack buffer; pipe writes this small are atomic
    unsafe {
        libc::write(status_write, status.as_ptr().cast(), status.len());
        libc::_exit(0)
    }
}

/// Exit code, or the negated signal number
fn wait_for(pid: Pid) -> i32 {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return code,
            Ok(WaitStatus::Signaled(_, sig, _)) => return -(sig as i32),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(_) => return -(Signal::SIGKILL as i32),
        }
    }
}

fn exit_like(status: i32) -> ! {
    if status >= 0 {
        // SAFETY: terminates without running atexit handlers
        unsafe { libc::_exit(status) }
    }
    if let Ok(sig) = Signal::try_from(-status) {
        // SAFETY: restoring the default action right before raising it
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
        let _ = kill(getpid(), sig);
    }
    // SAFETY: as above
    unsafe { libc::_exit(128 - status) }
}

fn write_proc(path: &CStr, contents: &[u8]) -> io::Result<()> {
    // SAFETY: path is NUL-terminated and the buffer outlives the call
    unsafe {
        let fd = libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let written = libc::write(fd, contents.as_ptr().cast(), contents.len());
        let err = io::Error::last_os_error();
        libc::close(fd);
        if written != contents.len() as isize {
            return Err(err);
        }
    }
    Ok(())
}

fn status_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: pipe2 fills the two-element array
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

fn read_status(fd: RawFd) -> Option<i32> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        // SAFETY: reads into the unfilled tail of a stack buffer
        let n = unsafe {
            libc::read(
                fd,
                buf[filled..].as_mut_ptr().cast(),
                buf.len() - filled,
            )
        };
        match n {
            n if n > 0 => filled += n as usize,
            -1 if Errno::last() == Errno::EINTR => continue,
            _ => return None,
        }
    }
    Some(i32::from_ne_bytes(buf))
}

/// Drop every inherited descriptor (stdio, output pipes, the spawn error
/// pipe) except `keep`
fn close_fds_except(keep: RawFd) {
    // SAFETY: closing descriptors this process no longer uses
    unsafe {
        for fd in 0..keep {
            libc::close(fd);
        }
        let swept = libc::syscall(
            libc::SYS_close_range,
            (keep + 1) as libc::c_uint,
            libc::c_uint::MAX,
            0 as libc::c_uint,
        );
        if swept != 0 {
            for fd in keep + 1..FALLBACK_FD_LIMIT {
                libc::close(fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_maps_map_caller_to_root() {
        let jail = NamespaceJail::new();
        assert_eq!(jail.uid_map, format!("0 {} 1", getuid()).into_bytes());
        assert_eq!(jail.gid_map, format!("0 {} 1", getgid()).into_bytes());
    }

    #[tokio::test]
    async fn test_availability_is_cached() {
        let first = namespaces_available().await;
        assert_eq!(AVAILABLE.get(), Some(&first));
        assert_eq!(namespaces_available().await, first);
    }
}
