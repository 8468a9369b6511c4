//! Host capability probing for container runtime feature decisions.
//!
//! The engine consults a [`SysInfo`] snapshot to decide which isolation
//! features it may use on this host: control-group controllers, AppArmor,
//! seccomp, cgroup namespaces, and cpuset placement. Probes are
//! deliberately forgiving — a missing flag file means the capability is
//! absent, never an error — because these files routinely do not exist on
//! hosts without the corresponding kernel feature.
#![cfg_attr(not(test), deny(missing_docs))]

pub mod cpuset;

use std::fs;
use std::path::Path;

use tracing::warn;

#[doc(inline)]
pub use cpuset::{is_cpuset_list_available, ParseError};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// A snapshot of the capabilities this host offers.
#[derive(Debug, Clone, Default)]
pub struct SysInfo {
    /// Whether AppArmor is supported.
    pub app_armor: bool,
    /// Whether seccomp filtering is supported.
    pub seccomp: bool,
    /// Whether the kernel supports cgroup namespaces.
    pub cgroup_namespaces: bool,
    /// Whether the memory controller exposes a limit knob.
    pub memory_limit: bool,
    /// Whether CPU CFS quota is available.
    pub cpu_cfs_quota: bool,
    /// Whether the cpuset controller is mounted.
    pub cpuset: bool,
    /// Whether IPv4 forwarding is enabled.
    pub ipv4_forwarding: bool,
    /// Whether bridged traffic traverses iptables.
    pub bridge_nf_call_iptables: bool,
    /// Whether bridged IPv6 traffic traverses ip6tables.
    pub bridge_nf_call_ip6tables: bool,

    // The cpuset.cpus list the host offers, when the controller is mounted.
    cpus: Option<String>,
}

impl SysInfo {
    /// Probe the running host.
    pub fn new() -> Self {
        let cgroup = Path::new(CGROUP_ROOT);
        let info = SysInfo {
            app_armor: apparmor_supported(),
            seccomp: seccomp_supported(),
            cgroup_namespaces: cgroupns_supported(),
            memory_limit: cgroup_enabled(&cgroup.join("memory"), "memory.limit_in_bytes"),
            cpu_cfs_quota: cgroup_enabled(&cgroup.join("cpu"), "cpu.cfs_quota_us"),
            cpuset: cgroup_enabled(&cgroup.join("cpuset"), "cpuset.cpus"),
            ipv4_forwarding: read_proc_bool(Path::new("/proc/sys/net/ipv4/ip_forward")),
            bridge_nf_call_iptables: read_proc_bool(Path::new(
                "/proc/sys/net/bridge/bridge-nf-call-iptables",
            )),
            bridge_nf_call_ip6tables: read_proc_bool(Path::new(
                "/proc/sys/net/bridge/bridge-nf-call-ip6tables",
            )),
            cpus: fs::read_to_string(cgroup.join("cpuset").join("cpuset.cpus"))
                .ok()
                .map(|cpus| cpus.trim().to_string()),
        };
        if !info.memory_limit {
            warn!("No memory limit support on this host");
        }
        if !info.ipv4_forwarding {
            warn!("IPv4 forwarding is disabled");
        }
        info
    }

    /// Check a requested cpuset list against what this host offers.
    ///
    /// Malformed requests are a parse error; well-formed requests the host
    /// cannot satisfy are `Ok(false)`.
    pub fn is_cpuset_cpus_available(&self, requested: &str) -> Result<bool, ParseError> {
        is_cpuset_list_available(requested, self.cpus.as_deref().unwrap_or(""))
    }
}

/// Number of CPUs available to this process.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Read a one-character boolean from a procfs-style file.
///
/// Anything but a readable `1` is `false`; a missing file is a missing
/// capability, not an error.
fn read_proc_bool(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(contents) => contents.trim() == "1",
        Err(_) => false,
    }
}

/// Whether a control-group knob exists under the given controller mount.
fn cgroup_enabled(dir: &Path, file: &str) -> bool {
    dir.join(file).exists()
}

fn apparmor_supported() -> bool {
    Path::new("/sys/kernel/security/apparmor").exists()
}

fn cgroupns_supported() -> bool {
    Path::new("/proc/self/ns/cgroup").exists()
}

fn seccomp_supported() -> bool {
    let status = match fs::read_to_string("/proc/self/status") {
        Ok(status) => status,
        Err(_) => return false,
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("Seccomp:"))
        .map(|value| value.trim() != "")
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_proc_bool_reads_one_and_zero() {
        let tmp = tempfile::tempdir().expect("temp dir");

        let proc_file = tmp.path().join("read-proc-bool");
        fs::write(&proc_file, "1").expect("write flag");
        assert!(read_proc_bool(&proc_file));

        fs::write(&proc_file, "0").expect("write flag");
        assert!(!read_proc_bool(&proc_file));
    }

    #[test]
    fn read_proc_bool_is_false_for_missing_files() {
        let tmp = tempfile::tempdir().expect("temp dir");
        assert!(!read_proc_bool(&tmp.path().join("no-exist")));
    }

    #[test]
    fn cgroup_enabled_tracks_file_presence() {
        let tmp = tempfile::tempdir().expect("temp dir");

        assert!(!cgroup_enabled(tmp.path(), "test"));

        fs::write(tmp.path().join("test"), "").expect("create knob");
        assert!(cgroup_enabled(tmp.path(), "test"));
    }

    // Probing a live host: the snapshot must agree with the probes it is
    // built from, whatever this machine happens to support.
    #[test]
    fn new_reflects_the_host() {
        let info = SysInfo::new();
        assert_eq!(info.app_armor, apparmor_supported());
        assert_eq!(info.seccomp, seccomp_supported());
        assert_eq!(info.cgroup_namespaces, cgroupns_supported());
    }

    #[test]
    fn num_cpus_is_positive() {
        assert!(num_cpus() > 0);
    }

    #[test]
    fn cpuset_availability_uses_the_probed_list() {
        let info = SysInfo {
            cpus: Some("0-3".to_string()),
            ..Default::default()
        };
        assert_eq!(info.is_cpuset_cpus_available("1,3"), Ok(true));
        assert_eq!(info.is_cpuset_cpus_available("1,4"), Ok(false));
        assert!(info.is_cpuset_cpus_available("1--42").is_err());

        let bare = SysInfo::default();
        assert_eq!(bare.is_cpuset_cpus_available(""), Ok(true));
        assert_eq!(bare.is_cpuset_cpus_available("0"), Ok(false));
    }
}
