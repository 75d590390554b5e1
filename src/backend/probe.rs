//! Host backend detection.
//!
//! Every check reads host-local evidence only: filesystem markers, process
//! names under `/proc`, and local socket connects. No check mutates state, and
//! the checks together never take longer than the probe budget.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::AudioBackend;

/// Upper bound on the time spent across all checks of one probe cycle.
pub const PROBE_BUDGET: Duration = Duration::from_millis(50);

/// Result of one probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    /// Kernel sequencer subsystem present.
    pub sequencer: bool,
    /// Port-based MIDI transport usable.
    pub port: bool,
    pub jack: bool,
    pub pipewire: bool,
    pub pulseaudio: bool,
    /// Raw kernel audio output. Always true.
    pub alsa: bool,
}

impl Availability {
    /// Snapshot with only the guaranteed fallbacks available.
    pub fn fallback_only() -> Self {
        Self {
            sequencer: false,
            port: true,
            jack: false,
            pipewire: false,
            pulseaudio: false,
            alsa: true,
        }
    }

    /// Returns whether `backend` was found. `Auto` is always true.
    pub fn audio(&self, backend: AudioBackend) -> bool {
        match backend {
            AudioBackend::Auto => true,
            AudioBackend::Jack => self.jack,
            AudioBackend::PipeWire => self.pipewire,
            AudioBackend::PulseAudio => self.pulseaudio,
            AudioBackend::Alsa => self.alsa,
        }
    }

    /// Number of concrete audio backends available.
    pub fn audio_count(&self) -> usize {
        [self.jack, self.pipewire, self.pulseaudio, self.alsa]
            .iter()
            .filter(|b| **b)
            .count()
    }
}

/// Where the prober looks for evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEnv {
    /// Per-user runtime directory (`$XDG_RUNTIME_DIR` or `/run/user/<uid>`).
    pub runtime_dir: Option<PathBuf>,
    /// Directory holding JACK server sockets (`$JACK_SERVER_DIR` or `/dev/shm`).
    pub jack_server_dir: PathBuf,
    /// JACK server name.
    pub jack_server_name: String,
    /// Root of the proc filesystem.
    pub proc_root: PathBuf,
    /// Paths whose existence means the sequencer subsystem is loaded.
    pub sequencer_markers: Vec<PathBuf>,
    pub uid: Option<u32>,
}

impl ProbeEnv {
    /// Reads the environment of the current process.
    pub fn from_process() -> Self {
        let uid = fs::metadata("/proc/self").ok().map(|m| m.uid());
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| uid.map(|u| PathBuf::from(format!("/run/user/{}", u))));
        let jack_server_dir = std::env::var_os("JACK_SERVER_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/dev/shm"));
        let jack_server_name = std::env::var_os("JACK_DEFAULT_SERVER")
            .and_then(|v: OsString| v.into_string().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "default".to_string());

        Self {
            runtime_dir,
            jack_server_dir,
            jack_server_name,
            proc_root: PathBuf::from("/proc"),
            sequencer_markers: vec![
                PathBuf::from("/proc/asound/seq"),
                PathBuf::from("/dev/snd/seq"),
            ],
            uid,
        }
    }
}

/// Stateless backend prober.
#[derive(Debug, Clone)]
pub struct Prober {
    env: ProbeEnv,
    budget: Duration,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self::with_env(ProbeEnv::from_process())
    }

    pub fn with_env(env: ProbeEnv) -> Self {
        Self {
            env,
            budget: PROBE_BUDGET,
        }
    }

    pub fn env(&self) -> &ProbeEnv {
        &self.env
    }

    /// Runs every check and returns the snapshot.
    ///
    /// All checks share one deadline. A check that would run past it gives up
    /// and reports the backend as absent.
    pub fn probe(&self) -> Availability {
        let started = Instant::now();
        let deadline = started + self.budget;
        let sequencer = self.sequencer_available();
        let jack = self.jack_available(deadline);
        let pipewire = self.pipewire_available(deadline);
        let pulseaudio = self.pulseaudio_available(deadline);

        let snapshot = Availability {
            sequencer,
            port: true,
            jack,
            pipewire,
            pulseaudio,
            alsa: true,
        };
        debug!(
            ?snapshot,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Probed backends"
        );
        snapshot
    }

    pub fn sequencer_available(&self) -> bool {
        self.env.sequencer_markers.iter().any(|p| p.exists())
    }

    /// JACK: a control socket accepts a connection, or `jackd` is running.
    pub fn jack_available(&self, deadline: Instant) -> bool {
        if let Some(uid) = self.env.uid {
            let dir = &self.env.jack_server_dir;
            let name = &self.env.jack_server_name;
            let candidates = [
                dir.join(format!("jack-{}", uid)).join(name).join("jack_0"),
                dir.join(format!("jack-{}", uid)).join(name),
                dir.join(format!("jack_{}_{}_0", name, uid)),
            ];
            if candidates.into_iter().any(|p| connect_within(p, deadline)) {
                return true;
            }
        }
        process_running(&self.env.proc_root, &["jackd", "jackdbus"], deadline)
    }

    /// PipeWire: the runtime socket exists, or `pipewire` is running.
    pub fn pipewire_available(&self, deadline: Instant) -> bool {
        if let Some(dir) = &self.env.runtime_dir {
            if dir.join("pipewire-0").exists() {
                return true;
            }
        }
        process_running(&self.env.proc_root, &["pipewire"], deadline)
    }

    /// PulseAudio: the native socket accepts a connection before `deadline`.
    pub fn pulseaudio_available(&self, deadline: Instant) -> bool {
        match &self.env.runtime_dir {
            Some(dir) => connect_within(dir.join("pulse").join("native"), deadline),
            None => false,
        }
    }

    /// Raw kernel output needs no server.
    pub fn alsa_available(&self) -> bool {
        true
    }
}

/// Connects to a Unix socket on a helper thread, giving up at `deadline`.
///
/// A connect still blocked at the deadline is abandoned on its thread.
fn connect_within(path: PathBuf, deadline: Instant) -> bool {
    let timeout = deadline.saturating_duration_since(Instant::now());
    if timeout.is_zero() || !path.exists() {
        return false;
    }
    let (tx, rx) = crossbeam_channel::bounded(1);
    let spawned = std::thread::Builder::new()
        .name("probe-connect".into())
        .spawn(move || {
            let _ = tx.send(UnixStream::connect(&path).is_ok());
        });
    if spawned.is_err() {
        return false;
    }
    rx.recv_timeout(timeout).unwrap_or(false)
}

/// Returns true if any process under `proc_root` has one of `names` as its
/// command. The scan stops, reporting false, once `deadline` passes.
fn process_running(proc_root: &Path, names: &[&str], deadline: Instant) -> bool {
    let Ok(entries) = fs::read_dir(proc_root) else {
        return false;
    };
    for entry in entries.flatten() {
        if Instant::now() >= deadline {
            debug!(root = %proc_root.display(), "Process scan hit the probe deadline");
            return false;
        }
        let file_name = entry.file_name();
        let is_pid = file_name
            .to_str()
            .is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
        if !is_pid {
            continue;
        }
        let matched = fs::read_to_string(entry.path().join("comm"))
            .map(|comm| names.contains(&comm.trim_end()))
            .unwrap_or(false);
        if matched {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    fn empty_env(root: &Path) -> ProbeEnv {
        let proc_root = root.join("proc");
        let runtime = root.join("run");
        fs::create_dir_all(&proc_root).unwrap();
        fs::create_dir_all(&runtime).unwrap();
        ProbeEnv {
            runtime_dir: Some(runtime),
            jack_server_dir: root.join("shm"),
            jack_server_name: "default".into(),
            proc_root,
            sequencer_markers: vec![root.join("seq")],
            uid: Some(1000),
        }
    }

    fn soon() -> Instant {
        Instant::now() + PROBE_BUDGET
    }

    fn fake_process(proc_root: &Path, pid: u32, comm: &str) {
        let dir = proc_root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
    }

    #[test]
    fn bare_host_has_only_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Prober::with_env(empty_env(dir.path())).probe();
        assert_eq!(snapshot, Availability::fallback_only());
        assert_eq!(snapshot.audio_count(), 1);
    }

    #[test]
    fn sequencer_marker_detected() {
        let dir = tempfile::tempdir().unwrap();
        let env = empty_env(dir.path());
        fs::write(&env.sequencer_markers[0], b"").unwrap();
        assert!(Prober::with_env(env).sequencer_available());
    }

    #[test]
    fn pipewire_socket_or_process() {
        let dir = tempfile::tempdir().unwrap();
        let env = empty_env(dir.path());
        let prober = Prober::with_env(env.clone());
        assert!(!prober.pipewire_available(soon()));

        fake_process(&env.proc_root, 4242, "pipewire");
        assert!(prober.pipewire_available(soon()));

        let dir2 = tempfile::tempdir().unwrap();
        let env2 = empty_env(dir2.path());
        fs::write(env2.runtime_dir.as_ref().unwrap().join("pipewire-0"), b"").unwrap();
        assert!(Prober::with_env(env2).pipewire_available(soon()));
    }

    #[test]
    fn jack_process_is_secondary_signal() {
        let dir = tempfile::tempdir().unwrap();
        let env = empty_env(dir.path());
        fake_process(&env.proc_root, 17, "jackd");
        fake_process(&env.proc_root, 18, "bash");
        fs::create_dir_all(env.proc_root.join("self")).unwrap();
        assert!(Prober::with_env(env).jack_available(soon()));
    }

    #[test]
    fn jack_listening_socket_detected() {
        let dir = tempfile::tempdir().unwrap();
        let env = empty_env(dir.path());
        let sock_dir = env.jack_server_dir.join("jack-1000").join("default");
        fs::create_dir_all(&sock_dir).unwrap();
        let _listener = UnixListener::bind(sock_dir.join("jack_0")).unwrap();
        assert!(Prober::with_env(env).jack_available(soon()));
    }

    #[test]
    fn pulseaudio_requires_live_listener() {
        let dir = tempfile::tempdir().unwrap();
        let env = empty_env(dir.path());
        let pulse_dir = env.runtime_dir.as_ref().unwrap().join("pulse");
        fs::create_dir_all(&pulse_dir).unwrap();
        let prober = Prober::with_env(env);

        assert!(!prober.pulseaudio_available(soon()));

        let listener = UnixListener::bind(pulse_dir.join("native")).unwrap();
        assert!(prober.pulseaudio_available(soon()));

        // A stale socket file with no listener is rejected.
        drop(listener);
        assert!(!prober.pulseaudio_available(soon()));
    }

    #[test]
    fn probe_respects_budget() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Prober::with_env(empty_env(dir.path()));
        let started = Instant::now();
        prober.probe();
        assert!(started.elapsed() < PROBE_BUDGET + Duration::from_millis(25));
    }

    #[test]
    fn expired_deadline_skips_checks() {
        let dir = tempfile::tempdir().unwrap();
        let env = empty_env(dir.path());
        fake_process(&env.proc_root, 17, "jackd");
        let prober = Prober::with_env(env);
        assert!(!prober.jack_available(Instant::now()));
    }

    #[test]
    fn stuck_jack_socket_stays_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let env = empty_env(dir.path());
        let sock_dir = env.jack_server_dir.join("jack-1000").join("default");
        fs::create_dir_all(&sock_dir).unwrap();
        let socket = sock_dir.join("jack_0");
        let listener = UnixListener::bind(&socket).unwrap();

        // Never accept; connect until the backlog is full and the filler blocks.
        let (progress_tx, progress) = crossbeam_channel::unbounded();
        let filler_socket = socket.clone();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            while let Ok(stream) = UnixStream::connect(&filler_socket) {
                held.push(stream);
                if progress_tx.send(true).is_err() {
                    return;
                }
            }
            let _ = progress_tx.send(false);
        });
        let mut saturated = false;
        loop {
            match progress.recv_timeout(Duration::from_millis(100)) {
                Ok(true) => continue,
                // Descriptor limit reached before the backlog filled.
                Ok(false) => break,
                Err(_) => {
                    saturated = true;
                    break;
                }
            }
        }

        let prober = Prober::with_env(env);
        let started = Instant::now();
        let snapshot = prober.probe();
        let elapsed = started.elapsed();
        drop(listener);

        if saturated {
            assert!(!snapshot.jack);
        }
        assert!(elapsed < PROBE_BUDGET + Duration::from_millis(25));
    }
}
