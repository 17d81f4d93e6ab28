//! Resource detection and concurrency autotune
//!
//! Runs once at startup. Limits come from cgroup v2 first (containers),
//! then cgroup v1, then the host via `sysinfo`. The pool sizes derive
//! from what was found: fast-HTTP slots scale with CPU, headless slots
//! are bounded by both CPU and memory (a browser context is assumed to
//! cost ~150 MB).

use std::path::Path;
use sysinfo::System;
use tracing::info;

use crate::config::PoolConfig;

const FAST_SLOTS_PER_CPU: usize = 3;
const FAST_SLOTS_CAP: usize = 30;
const HEADLESS_SLOTS_CAP: usize = 10;
const HEADLESS_MEMORY_PER_SLOT_GB: f64 = 0.15;

#[derive(Debug, Clone, Copy)]
pub struct DetectedResources {
    pub cpus: usize,
    pub memory_bytes: u64,
    pub source: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunedPool {
    pub fast_slots: usize,
    pub headless_slots: usize,
}

pub fn detect() -> DetectedResources {
    if let Some(resources) = detect_cgroup_v2() {
        return resources;
    }
    if let Some(resources) = detect_cgroup_v1() {
        return resources;
    }
    detect_host()
}

fn read_trimmed(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn detect_cgroup_v2() -> Option<DetectedResources> {
    if !Path::new("/sys/fs/cgroup/cgroup.controllers").exists() {
        return None;
    }
    // cpu.max: "<quota> <period>" or "max <period>"
    let cpus = match read_trimmed("/sys/fs/cgroup/cpu.max") {
        Some(raw) => {
            let mut parts = raw.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("max"), _) | (None, _) => host_cpus(),
                (Some(quota), Some(period)) => {
                    let quota: f64 = quota.parse().ok()?;
                    let period: f64 = period.parse().ok()?;
                    ((quota / period).ceil() as usize).max(1)
                }
                _ => host_cpus(),
            }
        }
        None => host_cpus(),
    };
    let memory_bytes = match read_trimmed("/sys/fs/cgroup/memory.max").as_deref() {
        Some("max") | None => host_memory(),
        Some(raw) => raw.parse().unwrap_or_else(|_| host_memory()),
    };
    Some(DetectedResources {
        cpus,
        memory_bytes,
        source: "cgroup-v2",
    })
}

fn detect_cgroup_v1() -> Option<DetectedResources> {
    let quota: i64 = read_trimmed("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")?.parse().ok()?;
    let period: i64 = read_trimmed("/sys/fs/cgroup/cpu/cpu.cfs_period_us")?
        .parse()
        .ok()?;
    let cpus = if quota <= 0 || period <= 0 {
        host_cpus()
    } else {
        ((quota as f64 / period as f64).ceil() as usize).max(1)
    };
    let memory_bytes = read_trimmed("/sys/fs/cgroup/memory/memory.limit_in_bytes")
        .and_then(|raw| raw.parse::<u64>().ok())
        // v1 reports "unlimited" as a huge page-aligned number.
        .filter(|&limit| limit < (1u64 << 60))
        .unwrap_or_else(host_memory);
    Some(DetectedResources {
        cpus,
        memory_bytes,
        source: "cgroup-v1",
    })
}

fn detect_host() -> DetectedResources {
    DetectedResources {
        cpus: host_cpus(),
        memory_bytes: host_memory(),
        source: "host",
    }
}

fn host_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn host_memory() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    system.total_memory().max(512 * 1024 * 1024)
}

/// Combine detected resources with configuration (0 = autotune).
pub fn tune(resources: DetectedResources, config: &PoolConfig) -> TunedPool {
    let fast_slots = if config.fast_http_slots != 0 {
        config.fast_http_slots
    } else {
        (resources.cpus * FAST_SLOTS_PER_CPU).clamp(1, FAST_SLOTS_CAP)
    };
    let headless_slots = if config.headless_slots != 0 {
        config.headless_slots
    } else {
        let memory_gb = resources.memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        let by_memory = (memory_gb / HEADLESS_MEMORY_PER_SLOT_GB) as usize;
        resources.cpus.min(by_memory).clamp(1, HEADLESS_SLOTS_CAP)
    };
    let tuned = TunedPool {
        fast_slots,
        headless_slots,
    };
    info!(
        "autotune ({}): {} cpus, {:.1} GB → {} fast / {} headless slots",
        resources.source,
        resources.cpus,
        resources.memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
        tuned.fast_slots,
        tuned.headless_slots
    );
    tuned
}
