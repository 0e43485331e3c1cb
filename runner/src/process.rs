//! Child process guarding for the local environment.

/// RAII guard that kills a child process (and its process group on Unix) on
/// drop.
///
/// Wrap a spawned `tokio::process::Child` immediately after `spawn()` so the
/// process tree dies if the owning task is cancelled. Call `disarm()` once
/// the process has exited.
pub struct ChildGuard {
    child: Option<tokio::process::Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: tokio::process::Child) -> Self {
        Self { child: Some(child) }
    }

    /// Wait for exit. Returns `None` if the guard was already disarmed.
    pub async fn wait(&mut self) -> Option<std::io::Result<std::process::ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => Some(child.wait().await),
            None => None,
        }
    }

    /// Kill the whole process group now; the child stays guarded until it
    /// is reaped.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            kill_tree(child);
        }
    }

    pub fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        kill_tree(child);
        let _ = child.try_wait();
    }
}

fn kill_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                if libc::killpg(pid as i32, libc::SIGKILL) == -1 {
                    let _ = child.start_kill();
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

/// Put the child in a new session so its pid is also its process-group id.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the child dies with us even on SIGKILL.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut tokio::process::Command) {}
