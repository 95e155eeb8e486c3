//! System Metadata Collection
//!
//! Facts about the machine a worker ran on, stored in every run's metadata:
//!
//! - **date**: UTC time the worker started
//! - **platform**: operating system and architecture
//! - **cpu_count**, **cpu_model_name**: available cores and model
//! - **cpu_affinity**: CPUs the worker was pinned to, if any
//! - **hostname**
//!
//! Linux-specific data gracefully degrades on other platforms by leaving the
//! key out.

use chrono::{SecondsFormat, Utc};
use perfrun_core::affinity::format_cpu_list;
use perfrun_ipc::Metadata;

/// Collect system metadata for a worker run
pub fn collect_metadata(affinity: Option<&[usize]>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("perfrun_version", env!("CARGO_PKG_VERSION"));
    metadata.insert("date", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    metadata.insert(
        "platform",
        format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
    );
    metadata.insert("cpu_count", num_cpus());
    if let Some(model) = get_cpu_model() {
        metadata.insert("cpu_model_name", model);
    }
    if let Some(cpus) = affinity.filter(|cpus| !cpus.is_empty()) {
        metadata.insert("cpu_affinity", format_cpu_list(cpus));
    }
    if let Some(hostname) = get_hostname() {
        metadata.insert("hostname", hostname);
    }
    metadata
}

/// Get CPU model name from /proc/cpuinfo (Linux only)
fn get_cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Get number of available CPU cores
fn num_cpus() -> u64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1)
}

fn get_hostname() -> Option<String> {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
        if ret != 0 {
            return None;
        }
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let name = String::from_utf8_lossy(&buf[..len]).into_owned();
        (!name.is_empty()).then_some(name)
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").ok()
    }
}
