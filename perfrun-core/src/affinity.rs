//! CPU Affinity
//!
//! Pinning the process to a fixed set of CPUs avoids core migrations during
//! measurement. Affinity set on the supervisor is inherited by every worker it
//! spawns. Isolated CPUs (`isolcpus=` kernel parameter) are preferred when no
//! explicit list is given.

use thiserror::Error;

/// Errors parsing a CPU list such as `"0-3,7"`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CpuListError {
    #[error("empty CPU list")]
    Empty,

    #[error("invalid CPU number {0:?}")]
    InvalidCpu(String),

    #[error("invalid CPU range {0:?}")]
    InvalidRange(String),
}

/// Parse a kernel-style CPU list (`"0-2,5"` → `[0, 1, 2, 5]`).
///
/// The result is sorted and free of duplicates.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>, CpuListError> {
    let mut cpus = Vec::new();
    for part in list.trim().split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((first, last)) => {
                let first = parse_cpu(first)?;
                let last = parse_cpu(last)?;
                if last < first {
                    return Err(CpuListError::InvalidRange(part.to_string()));
                }
                cpus.extend(first..=last);
            }
            None => cpus.push(parse_cpu(part)?),
        }
    }
    if cpus.is_empty() {
        return Err(CpuListError::Empty);
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

fn parse_cpu(text: &str) -> Result<usize, CpuListError> {
    text.trim()
        .parse()
        .map_err(|_| CpuListError::InvalidCpu(text.to_string()))
}

/// Format CPUs back into the compact kernel notation (`[0, 1, 2, 5]` → `"0-2,5"`).
pub fn format_cpu_list(cpus: &[usize]) -> String {
    let mut sorted = cpus.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(first) = iter.next() {
        let mut last = first;
        while iter.peek() == Some(&(last + 1)) {
            last += 1;
            iter.next();
        }
        if first == last {
            parts.push(first.to_string());
        } else {
            parts.push(format!("{first}-{last}"));
        }
    }
    parts.join(",")
}

/// CPUs isolated from the general scheduler; empty when none or unknown.
#[cfg(target_os = "linux")]
pub fn isolated_cpus() -> Vec<usize> {
    match std::fs::read_to_string("/sys/devices/system/cpu/isolated") {
        Ok(content) if !content.trim().is_empty() => parse_cpu_list(&content).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn isolated_cpus() -> Vec<usize> {
    Vec::new()
}

/// Restrict the current process to `cpus`.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpus: &[usize]) -> Result<(), std::io::Error> {
    use std::mem::MaybeUninit;

    if cpus.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty CPU set",
        ));
    }

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let set_ref = set.assume_init_mut();

        libc::CPU_ZERO(set_ref);
        for &cpu in cpus {
            if cpu >= libc::CPU_SETSIZE as usize {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("CPU {cpu} is out of range"),
                ));
            }
            libc::CPU_SET(cpu, set_ref);
        }

        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_cpus: &[usize]) -> Result<(), std::io::Error> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "CPU affinity not available on this platform",
    ))
}

/// CPUs the current process may run on, if the platform can tell.
#[cfg(target_os = "linux")]
pub fn get_cpu_affinity() -> Option<Vec<usize>> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let result = libc::sched_getaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            set.as_mut_ptr(),
        );
        if result != 0 {
            return None;
        }
        let set = set.assume_init();
        let cpus: Vec<usize> = (0..libc::CPU_SETSIZE as usize)
            .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
            .collect();
        Some(cpus)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn get_cpu_affinity() -> Option<Vec<usize>> {
    None
}
