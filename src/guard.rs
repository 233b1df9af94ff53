// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

//! Process-level protections around the lock: OOM-killer opt-out, user
//! lookup and the post-lock command.

use std::{
    ffi::{CString, OsStr},
    os::fd::{FromRawFd, OwnedFd, RawFd},
    path::Path,
    process,
};

use nix::{
    errno::Errno,
    unistd::{self, ForkResult, execvp, fork},
};
use tracing::{debug, info};

use crate::error::LockError;

#[cfg(target_os = "linux")]
const OOM_SCORE_ADJ: &str = "/proc/self/oom_score_adj";

#[cfg(target_os = "linux")]
const OOM_NEVER_KILL: &[u8] = b"-1000\n";

/// Opts this process out of the kernel OOM killer.
#[cfg(target_os = "linux")]
pub fn dontkillme() -> Result<(), LockError> {
    dontkillme_at(Path::new(OOM_SCORE_ADJ))
}

#[cfg(target_os = "linux")]
pub fn dontkillme_at(path: &Path) -> Result<(), LockError> {
    use nix::{
        fcntl::{self, OFlag},
        sys::stat::Mode,
    };

    let fd = match fcntl::open(path, OFlag::O_WRONLY, Mode::empty()) {
        Ok(fd) => fd,
        Err(Errno::ENOENT) => {
            debug!("{path:?} not present, skipping OOM protection");
            return Ok(());
        }
        Err(e) => return Err(LockError::OomProtectFailed(e)),
    };

    let written = unistd::write(&fd, OOM_NEVER_KILL).map_err(LockError::OomProtectFailed)?;
    if written != OOM_NEVER_KILL.len() {
        return Err(LockError::OomProtectFailed(Errno::EIO));
    }

    unistd::close(fd).map_err(LockError::OomProtectFailed)
}

fn account_name(env_user: Option<String>, passwd_name: &OsStr) -> String {
    env_user
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| passwd_name.to_string_lossy().into_owned())
}

/// Confirms the invoking user has a password database entry and returns the
/// account name to authenticate, preferring `USER`.
pub fn check_user() -> Result<String, LockError> {
    let uid = uzers::get_current_uid();
    let user = uzers::get_user_by_uid(uid).ok_or(LockError::NoUser)?;

    let name = account_name(std::env::var("USER").ok(), user.name());
    debug!("Authenticating '{name}' (uid {uid})");

    Ok(name)
}

fn command_args(command: &[String]) -> Result<Vec<CString>, LockError> {
    command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LockError::SpawnFailed {
            command: command.join(" "),
            source: Errno::EINVAL,
        })
}

/// Closes the child's copy of the server connection. Negative descriptors
/// mean there is nothing to close.
fn close_connection(conn_fd: RawFd) -> nix::Result<()> {
    if conn_fd < 0 {
        return Ok(());
    }

    // SAFETY: the child owns its copy of the descriptor and never uses the
    // connection again.
    unistd::close(unsafe { OwnedFd::from_raw_fd(conn_fd) })
}

/// Forks `command` off the locker. The child closes `conn_fd` before
/// exec'ing so it never touches the server connection.
pub fn spawn_post_lock(command: &[String], conn_fd: RawFd) -> Result<(), LockError> {
    let args = command_args(command)?;
    let Some(program) = args.first() else {
        return Ok(());
    };

    // SAFETY: the locker is single-threaded at this point, and the child only
    // closes a descriptor and execs.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            info!("Started '{}' as pid {child}", command.join(" "));
            Ok(())
        }
        Ok(ForkResult::Child) => {
            if let Err(e) = close_connection(conn_fd) {
                eprintln!("xlock: close connection: {e}");
                process::exit(1);
            }

            let e = match execvp(program, &args) {
                Ok(never) => match never {},
                Err(e) => e,
            };
            eprintln!("xlock: execvp {} failed: {e}", command[0]);
            process::exit(1);
        }
        Err(e) => Err(LockError::SpawnFailed {
            command: command.join(" "),
            source: e,
        }),
    }
}
