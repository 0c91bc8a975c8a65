//! System resource probing
//!
//! Thread counts and physical memory, used to size engine contexts.

#[cfg(any(target_os = "windows", target_os = "macos"))]
use std::process::Command;

/// Threads to use when the config leaves the count unset
pub fn hardware_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

/// Resolve a requested thread count; `None` or zero means auto-detect.
pub fn resolve_threads(requested: Option<u32>) -> u32 {
    match requested {
        Some(n) if n > 0 => n,
        _ => hardware_threads(),
    }
}

/// Total physical memory in MB (best effort)
pub fn total_memory_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    let total = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|contents| parse_meminfo_total_mb(&contents));

    #[cfg(target_os = "macos")]
    let total = get_macos_total_ram_mb();

    #[cfg(target_os = "windows")]
    let total = get_windows_total_ram_mb();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let total = None;

    total
}

/// Warn when a model file will not fit in physical memory.
pub fn warn_if_model_exceeds_memory(model_size_bytes: u64) {
    let Some(total_mb) = total_memory_mb() else {
        return;
    };
    let model_mb = model_size_bytes / 1024 / 1024;
    if model_mb > total_mb {
        tracing::warn!(
            "Model file ({} MB) is larger than physical memory ({} MB); expect heavy paging",
            model_mb,
            total_mb
        );
    }
}

/// Parse "MemTotal:  16318480 kB" out of /proc/meminfo
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo_total_mb(contents: &str) -> Option<u64> {
    contents
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

/// Get total RAM via sysctl hw.memsize (returns bytes, we convert to MB)
#[cfg(target_os = "macos")]
fn get_macos_total_ram_mb() -> Option<u64> {
    let output = Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let bytes_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let bytes = bytes_str.parse::<u64>().ok()?;
    Some(bytes / 1024 / 1024)
}

#[cfg(target_os = "windows")]
fn get_windows_total_ram_mb() -> Option<u64> {
    let output = Command::new("wmic")
        .args(["OS", "get", "TotalVisibleMemorySize", "/Value"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("TotalVisibleMemorySize="))
        .and_then(|kb| kb.trim().parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_threads() {
        assert_eq!(resolve_threads(Some(6)), 6);
        assert_eq!(resolve_threads(Some(0)), hardware_threads());
        assert_eq!(resolve_threads(None), hardware_threads());
        assert!(hardware_threads() >= 1);
    }

    #[test]
    fn test_parse_meminfo() {
        let sample = "MemTotal:       16318480 kB\nMemFree:         1234567 kB\n";
        assert_eq!(parse_meminfo_total_mb(sample), Some(15936));
        assert_eq!(parse_meminfo_total_mb("garbage"), None);
    }
}
