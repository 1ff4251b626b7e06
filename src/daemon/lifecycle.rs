//! Daemon lifecycle: start, stop, restart, foreground.

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, fork, pipe, setsid, ForkResult};
use std::fs::{self, File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::sentinel::read_pid;
use crate::config::MonitorConfig;
use crate::error::{EXIT_FATAL, EXIT_OK};
use crate::process::{is_process_alive, send_signal};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Extra time granted on top of the watcher join timeout when stopping.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Write end of the readiness pipe held by the daemonized process.
///
/// The launching process waits until [`Readiness::notify`] is called, or
/// reports a failed start when the daemon exits or drops this first.
#[derive(Debug)]
pub struct Readiness {
    fd: Option<OwnedFd>,
}

impl Readiness {
    /// No one is waiting (foreground mode).
    pub fn none() -> Self {
        Self { fd: None }
    }

    /// Report a finished startup. `false` if the launching process could not
    /// be told, in which case it will report a failed start.
    pub fn notify(mut self) -> bool {
        let Some(fd) = self.fd.take() else {
            return true;
        };
        loop {
            match nix::unistd::write(&fd, &[1u8]) {
                Ok(_) => return true,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    error!(error = %errno, "failed to report readiness to the launching process");
                    return false;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Daemon {
    pid_path: PathBuf,
    log_path: PathBuf,
    stop_timeout: Duration,
}

impl Daemon {
    pub fn new(pid_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            pid_path: pid_path.into(),
            log_path: log_path.into(),
            stop_timeout: Duration::from_secs(60) + STOP_GRACE,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(&config.pid_file, &config.log_file)
            .with_stop_timeout(config.join_timeout() + STOP_GRACE)
    }

    /// How long [`Daemon::stop`] waits for the old process to exit.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Pid of a live supervisor recorded in the pid file.
    pub fn running_pid(&self) -> Result<Option<u32>> {
        let pid = read_pid(&self.pid_path)
            .with_context(|| format!("Failed to read pid file {}", self.pid_path.display()))?;
        Ok(pid.filter(|&pid| is_process_alive(pid)))
    }

    /// Refuse to start over a live supervisor; clear a pid file left by a dead one.
    fn prepare_start(&self) -> Result<()> {
        if let Some(pid) = self.running_pid()? {
            bail!("Supervisor is already running (pid {pid})");
        }
        if let Err(e) = fs::remove_file(&self.pid_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e).context("Failed to remove stale pid file");
            }
        }
        Ok(())
    }

    /// Detach and run `run` in the background.
    ///
    /// Only the daemonized grandchild returns from this function; the calling
    /// process exits once `run` has signalled readiness, or failed.
    pub fn start<F>(&self, run: F) -> Result<()>
    where
        F: FnOnce(Readiness) -> Result<()>,
    {
        self.prepare_start()?;

        // Open before forking so failures still reach the terminal
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file {}", self.log_path.display()))?;
        let dev_null = File::open("/dev/null").context("Failed to open /dev/null")?;

        let (read_fd, write_fd) = pipe().context("Failed to create pipe")?;

        // First fork - parent waits for readiness, child continues
        match unsafe { fork() }.context("First fork failed")? {
            ForkResult::Parent { .. } => {
                drop(write_fd);

                let mut buf = [0u8; 1];
                match nix::unistd::read(&read_fd, &mut buf) {
                    Ok(1) if buf[0] == 1 => std::process::exit(i32::from(EXIT_OK)),
                    _ => {
                        // EOF or garbage: the daemon died before becoming ready
                        eprintln!(
                            "Supervisor failed to start, see {}",
                            self.log_path.display()
                        );
                        std::process::exit(i32::from(EXIT_FATAL));
                    }
                }
            }
            ForkResult::Child => {
                drop(read_fd);
            }
        }

        // Detach from the controlling terminal
        setsid().context("setsid failed")?;

        // Second fork - the session leader exits so we can never reacquire a terminal
        match unsafe { fork() }.context("Second fork failed")? {
            ForkResult::Parent { .. } => std::process::exit(i32::from(EXIT_OK)),
            ForkResult::Child => {}
        }

        chdir("/").context("Failed to change directory to /")?;
        umask(Mode::from_bits_truncate(0o022));

        // SAFETY: Using libc::dup2 directly with raw fds to avoid ownership issues.
        // Both source descriptors are open for the rest of this function and
        // fds 0-2 are valid targets in this double-forked process.
        unsafe {
            libc::dup2(dev_null.as_raw_fd(), 0);
            libc::dup2(log_file.as_raw_fd(), 1);
            libc::dup2(log_file.as_raw_fd(), 2);
        }
        drop(dev_null);
        drop(log_file);

        run(Readiness { fd: Some(write_fd) })
    }

    /// Stop a running supervisor.
    ///
    /// Sends SIGTERM, removes the pid file (which also ends the loop of a
    /// supervisor that missed the signal) and waits for the process to exit.
    ///
    /// # Returns
    /// * `Ok(true)` - A supervisor was running and has exited
    /// * `Ok(false)` - Nothing was running
    /// * `Err(_)` - Signal failed or the supervisor outlived the stop timeout
    pub fn stop(&self) -> Result<bool> {
        let Some(pid) = read_pid(&self.pid_path)
            .with_context(|| format!("Failed to read pid file {}", self.pid_path.display()))?
        else {
            return Ok(false);
        };

        let alive = is_process_alive(pid);
        if alive {
            info!(pid, "sending SIGTERM to supervisor");
            send_signal(pid, Signal::SIGTERM)
                .with_context(|| format!("Failed to signal supervisor {pid}"))?;
        } else {
            warn!(pid, "pid file names a dead process, removing it");
        }

        if let Err(e) = fs::remove_file(&self.pid_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e).context("Failed to remove pid file");
            }
        }
        if !alive {
            return Ok(false);
        }

        let started = Instant::now();
        while is_process_alive(pid) {
            if started.elapsed() >= self.stop_timeout {
                bail!(
                    "Supervisor {pid} did not exit within {}s",
                    self.stop_timeout.as_secs()
                );
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
        info!(pid, "supervisor stopped");
        Ok(true)
    }

    pub fn restart<F>(&self, run: F) -> Result<()>
    where
        F: FnOnce(Readiness) -> Result<()>,
    {
        if !self.stop()? {
            info!("supervisor was not running");
        }
        self.start(run)
    }

    /// Run `run` attached to the terminal.
    pub fn foreground<F>(&self, run: F) -> Result<()>
    where
        F: FnOnce(Readiness) -> Result<()>,
    {
        self.prepare_start()?;
        run(Readiness::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::process::Command;
    use tempfile::TempDir;

    fn daemon(temp_dir: &TempDir) -> Daemon {
        Daemon::new(
            temp_dir.path().join("monitor.pid"),
            temp_dir.path().join("lbmon.log"),
        )
        .with_stop_timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_readiness_writes_one_byte() {
        let (read_fd, write_fd) = pipe().unwrap();

        assert!(Readiness { fd: Some(write_fd) }.notify());

        let mut buf = [0u8; 2];
        assert_eq!(nix::unistd::read(&read_fd, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn test_readiness_reports_unreachable_launcher() {
        let (read_fd, write_fd) = pipe().unwrap();
        drop(read_fd);

        assert!(!Readiness { fd: Some(write_fd) }.notify());
        assert!(Readiness::none().notify());
    }

    #[test]
    fn test_stop_when_not_running() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!daemon(&temp_dir).stop().unwrap());
    }

    #[test]
    fn test_stop_removes_dead_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = daemon(&temp_dir);
        fs::write(daemon.pid_path(), "999999999\ntoken\n").unwrap();

        assert_eq!(daemon.running_pid().unwrap(), None);
        assert!(!daemon.stop().unwrap());
        assert!(!daemon.pid_path().exists());
    }

    #[test]
    #[serial]
    fn test_stop_signals_and_waits() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = daemon(&temp_dir);
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(daemon.pid_path(), format!("{}\ntoken\n", child.id())).unwrap();
        // Reap in the background; an unreaped zombie would still look alive
        let reaper = thread::spawn(move || child.wait().unwrap());

        assert!(daemon.stop().unwrap());

        assert!(!daemon.pid_path().exists());
        assert!(!reaper.join().unwrap().success());
    }

    #[test]
    fn test_foreground_refuses_live_pid() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = daemon(&temp_dir);
        fs::write(daemon.pid_path(), format!("{}\n", std::process::id())).unwrap();

        let mut ran = false;
        let err = daemon
            .foreground(|_| {
                ran = true;
                Ok(())
            })
            .unwrap_err();

        assert!(!ran);
        assert!(err.to_string().contains("already running"));
    }

    #[test]
    fn test_foreground_clears_stale_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = daemon(&temp_dir);
        fs::write(daemon.pid_path(), "999999999\n").unwrap();

        daemon
            .foreground(|readiness| {
                readiness.notify();
                Ok(())
            })
            .unwrap();
        assert!(!daemon.pid_path().exists());
    }
}
