// src/lifecycle.rs

//! Process startup phases.
//!
//! The server moves through three phases, each one consuming the last:
//!
//! 1. `PrivilegedInit` - still attached to the terminal and possibly root.
//!    Sockets are bound here so failures are reported to the operator.
//! 2. `PostDaemonInit` - detached (if requested) but still privileged.
//!    Real-time threads are started here; `PrioritySender::post_daemon_init`
//!    takes a `&PostDaemonInit` so it cannot run in any other phase.
//! 3. `Unprivileged` - privileges are gone for good. Nothing that needs
//!    them can be done from here.

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use nix::unistd::{self, Group, User};
use std::io;

/// Phase 1: attached and privileged.
///
/// Only the server's own startup can enter this phase, so a `PostDaemonInit`
/// cannot be minted again once privileges are gone:
///
/// ```compile_fail
/// let phase = flaschen_taschen::lifecycle::PrivilegedInit::begin();
/// ```
#[derive(Debug)]
pub struct PrivilegedInit {
    _private: (),
}

/// Phase 2: detached and still privileged.
#[derive(Debug)]
pub struct PostDaemonInit {
    daemonized: bool,
}

/// Phase 3: privileges dropped.
#[derive(Debug)]
pub struct Unprivileged {
    _private: (),
}

impl PrivilegedInit {
    pub(crate) fn begin() -> Self {
        PrivilegedInit { _private: () }
    }

    /// Leaves the controlling terminal if `daemonize` is set.
    ///
    /// A failed `daemon(3)` is logged and the server carries on in the
    /// foreground.
    pub fn detach(self, daemonize: bool) -> PostDaemonInit {
        if !daemonize {
            return PostDaemonInit { daemonized: false };
        }
        info!("Lifecycle: Becoming a daemon");
        match unistd::daemon(false, false) {
            Ok(()) => PostDaemonInit { daemonized: true },
            Err(e) => {
                error!("Lifecycle: Failed to become daemon: {}", e);
                PostDaemonInit { daemonized: false }
            }
        }
    }
}

impl PostDaemonInit {
    pub fn is_daemonized(&self) -> bool {
        self.daemonized
    }

    /// Permanently drops to `user`/`group` when running as root.
    ///
    /// Non-root processes have nothing to drop and pass straight through.
    pub fn drop_privileges(self, user: &str, group: &str) -> Result<Unprivileged> {
        let ids = unistd::getresuid().context("Lifecycle: getresuid() failed")?;
        if !ids.effective.is_root() {
            debug!("Lifecycle: Not running as root; no privileges to drop");
            return Ok(Unprivileged { _private: () });
        }

        let group_entry = Group::from_name(group)
            .with_context(|| format!("Lifecycle: Group lookup for '{}' failed", group))?
            .ok_or_else(|| anyhow!("Lifecycle: Unknown group '{}'", group))?;
        unistd::setresgid(group_entry.gid, group_entry.gid, group_entry.gid)
            .context("Lifecycle: setresgid() failed")?;

        let user_entry = User::from_name(user)
            .with_context(|| format!("Lifecycle: User lookup for '{}' failed", user))?
            .ok_or_else(|| anyhow!("Lifecycle: Unknown user '{}'", user))?;
        unistd::setresuid(user_entry.uid, user_entry.uid, user_entry.uid)
            .context("Lifecycle: setresuid() failed")?;

        info!("Lifecycle: Dropped privileges to {}:{}", user, group);
        Ok(Unprivileged { _private: () })
    }
}

/// Puts the calling thread under `SCHED_FIFO` with the given priority.
///
/// Needs privileges (root or `CAP_SYS_NICE`), hence only reachable before
/// `drop_privileges`.
pub(crate) fn set_realtime_priority(priority: i32) -> Result<()> {
    // SAFETY: sched_param is plain data; zeroed is a valid starting value and
    // pthread_self() is always a valid handle for the calling thread.
    let rc = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc))
            .with_context(|| format!("pthread_setschedparam(SCHED_FIFO, {}) failed", priority));
    }
    Ok(())
}
