//! Process management: the overlay process and signalling target processes

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

use guardian_host_api::{HostError, HostResult};

/// Child process running in its own process group
pub struct ManagedProcess {
    pub child: Child,
    pub pid: u32,
    pub pgid: u32,
}

impl ManagedProcess {
    /// Spawn `argv` as the leader of a new session
    pub fn spawn(argv: &[String]) -> HostResult<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(HostError::OverlayFailed("Empty command".into()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // SAFETY: setsid is async-signal-safe and runs before exec
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::other(e.to_string()))?;
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| HostError::OverlayFailed(format!("Failed to spawn {}: {}", program, e)))?;

        let pid = child.id();
        debug!(pid, program = %program, "Process spawned");

        Ok(Self {
            child,
            pid,
            pgid: pid,
        })
    }

    /// Signal the whole process group
    pub fn signal(&self, sig: Signal) -> HostResult<()> {
        let pgid = Pid::from_raw(-(self.pgid as i32));

        match signal::kill(pgid, sig) {
            Ok(()) => {
                debug!(pgid = self.pgid, signal = ?sig, "Signalled process group");
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(HostError::StopFailed(format!("Failed to send {:?}: {}", sig, e))),
        }
    }

    /// Whether the process is still running (reaps it if not)
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = self.pid, ?status, "Process exited");
                false
            }
            Err(e) => {
                warn!(pid = self.pid, error = %e, "Wait failed");
                false
            }
        }
    }
}

/// Whether a process's name or executable matches `name`
fn process_matches(proc_dir: &Path, name: &str) -> bool {
    let comm = fs::read_to_string(proc_dir.join("comm")).unwrap_or_default();
    if comm.trim() == name {
        return true;
    }

    // comm is truncated to 15 bytes; compare argv[0] as well
    let cmdline = fs::read(proc_dir.join("cmdline")).unwrap_or_default();
    cmdline
        .split(|b| *b == 0)
        .next()
        .map(|argv0| String::from_utf8_lossy(argv0).into_owned())
        .is_some_and(|argv0| {
            Path::new(&argv0)
                .file_name()
                .is_some_and(|f| f.to_string_lossy() == name)
        })
}

/// Pids under `proc_root` whose process name matches `name`, excluding
/// ourselves
pub fn find_pids(proc_root: &Path, name: &str) -> Vec<i32> {
    let own = std::process::id() as i32;
    let Ok(entries) = fs::read_dir(proc_root) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|e| {
            let pid: i32 = e.file_name().to_str()?.parse().ok()?;
            (pid != own && process_matches(&e.path(), name)).then_some(pid)
        })
        .collect()
}

/// Send `sig` to every process named `name`. Returns how many were signalled.
pub fn signal_by_name(name: &str, sig: Signal) -> usize {
    let mut signalled = 0;
    for pid in find_pids(Path::new("/proc"), name) {
        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) => signalled += 1,
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!(pid, name, error = %e, "Failed to signal process"),
        }
    }
    signalled
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn spawn_and_signal_group() {
        let mut proc = ManagedProcess::spawn(&["sleep".into(), "60".into()]).unwrap();
        assert!(proc.is_running());

        proc.signal(Signal::SIGTERM).unwrap();
        let _ = proc.child.wait();
        assert!(!proc.is_running());

        // Signalling a reaped group is not an error
        proc.signal(Signal::SIGTERM).unwrap();
    }

    #[test]
    fn spawn_rejects_empty_command() {
        assert!(ManagedProcess::spawn(&[]).is_err());
    }

    #[test]
    fn short_lived_process_stops_running() {
        let mut proc = ManagedProcess::spawn(&["true".into()]).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(!proc.is_running());
    }

    #[test]
    fn finds_processes_by_comm_or_argv0() {
        let root = tempdir().unwrap();
        let entries: [(&str, &str, &[u8]); 3] = [
            ("100", "steam\n", b"/usr/bin/steam\0-silent\0"),
            ("200", "minecraft-launc\n", b"/opt/minecraft/minecraft-launcher\0"),
            ("300", "bash\n", b"bash\0"),
        ];
        for (pid, comm, cmdline) in entries {
            let dir = root.path().join(pid);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("comm"), comm).unwrap();
            fs::write(dir.join("cmdline"), cmdline).unwrap();
        }
        fs::create_dir(root.path().join("self")).unwrap();

        assert_eq!(find_pids(root.path(), "steam"), vec![100]);
        assert_eq!(find_pids(root.path(), "minecraft-launcher"), vec![200]);
        assert!(find_pids(root.path(), "discord").is_empty());
    }
}
