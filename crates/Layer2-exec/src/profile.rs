//! Resource Profiler - exec별 리소스 사용량 통계
//!
//! Readings come from two sources: the container runtime (`cpu`, `mem`) and
//! the exec's own directories on the host (`disk` for the return tree, `tmp`
//! for scratch). Each reading updates a gauge (latest value) and a running
//! [`Stats`] accumulator; the samples themselves are not kept.
//!
//! ## Sampling
//! - runtime stats every `stats_interval`, first tick immediately
//! - filesystem every `disk_interval`, first tick one interval in
//! - one forced filesystem sample when the container exits, after which the
//!   profiler is stopped and ignores further readings

use crate::resources::{CPU, DISK, MEM};
use crate::runtime::ContainerRuntime;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

/// Scratch space in bytes
pub const TMP: &str = "tmp";

/// Latest reading per resource
pub type Gauges = BTreeMap<String, f64>;

/// Running statistics per resource
pub type Profile = BTreeMap<String, Stats>;

/// Online statistics for one resource (Welford).
///
/// `var` is the population variance, so it is exactly zero while `n == 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    pub max: f64,
    pub var: f64,
    pub n: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
}

impl Stats {
    /// Fold one reading taken at `at`
    pub fn add(&mut self, value: f64, at: DateTime<Utc>) {
        let m2 = self.var * self.n as f64;
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        self.var = (m2 + delta * (value - self.mean)) / self.n as f64;

        if self.n == 1 {
            self.max = value;
            self.first = Some(at);
            self.last = Some(at);
        } else {
            self.max = self.max.max(value);
            // never move backwards if the wall clock does
            self.last = Some(self.last.map_or(at, |last| last.max(at)));
        }
    }
}

#[derive(Debug, Default)]
struct ProfilerState {
    gauges: Gauges,
    profile: Profile,
    stopped: bool,
}

/// Shared gauges and profile of one exec
#[derive(Debug, Clone, Default)]
pub struct Profiler {
    state: Arc<Mutex<ProfilerState>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profiler holding persisted values. It is already stopped.
    pub fn restore(gauges: Gauges, profile: Profile) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProfilerState {
                gauges,
                profile,
                stopped: true,
            })),
        }
    }

    /// Record a reading. Returns false once the profiler is stopped.
    pub fn observe(&self, name: &str, value: f64) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }
        // timestamp taken under the lock keeps samples ordered
        let now = Utc::now();
        state.gauges.insert(name.to_string(), value);
        state
            .profile
            .entry(name.to_string())
            .or_default()
            .add(value, now);
        true
    }

    pub fn snapshot(&self) -> (Gauges, Profile) {
        let state = self.state.lock();
        (state.gauges.clone(), state.profile.clone())
    }

    pub fn stop(&self) {
        self.state.lock().stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

/// Background sampler bound to one container
pub struct Sampler {
    pub profiler: Profiler,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub container: String,
    pub tmp_dir: PathBuf,
    pub return_dir: PathBuf,
    pub stats_interval: Duration,
    pub disk_interval: Duration,
}

impl Sampler {
    /// Run until `token` is cancelled
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    async fn run(self, token: CancellationToken) {
        let mut stats = tokio::time::interval(self.stats_interval);
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut disk =
            tokio::time::interval_at(Instant::now() + self.disk_interval, self.disk_interval);
        disk.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = stats.tick() => self.sample_runtime().await,
                _ = disk.tick() => {
                    sample_filesystem(&self.profiler, &self.tmp_dir, &self.return_dir).await
                }
            }
        }
        debug!("Sampler for {} stopped", self.container);
    }

    async fn sample_runtime(&self) {
        match self.runtime.stats(&self.container).await {
            Ok(Some(stats)) => {
                if let Some(cpu) = stats.cpu {
                    self.profiler.observe(CPU, cpu);
                }
                if let Some(mem) = stats.mem {
                    self.profiler.observe(MEM, mem);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Stats unavailable for {}: {}", self.container, e),
        }
    }
}

/// Sample `tmp` and `disk` from the host directories
pub async fn sample_filesystem(profiler: &Profiler, tmp_dir: &Path, return_dir: &Path) {
    let tmp_dir = tmp_dir.to_path_buf();
    let return_dir = return_dir.to_path_buf();
    let sizes = tokio::task::spawn_blocking(move || (du(&tmp_dir), du(&return_dir))).await;
    match sizes {
        Ok((tmp, disk)) => {
            debug!(
                "Filesystem sample: tmp {}, disk {}",
                format_bytes(tmp),
                format_bytes(disk)
            );
            profiler.observe(TMP, tmp as f64);
            profiler.observe(DISK, disk as f64);
        }
        Err(e) => debug!("Filesystem sample failed: {}", e),
    }
}

/// Apparent size of a tree, directory entries included
pub fn du(root: &Path) -> u64 {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// 바이트를 사람이 읽기 좋은 형식으로 변환
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_single_sample_has_zero_variance() {
        let mut stats = Stats::default();
        let now = Utc::now();
        stats.add(4096.0, now);
        assert_eq!(stats.n, 1);
        assert_eq!(stats.var, 0.0);
        assert_eq!(stats.mean, 4096.0);
        assert_eq!(stats.max, 4096.0);
        assert_eq!(stats.first, Some(now));
        assert_eq!(stats.last, Some(now));
    }

    #[test]
    fn test_welford_matches_population_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = Stats::default();
        for v in values {
            stats.add(v, Utc::now());
        }
        assert_eq!(stats.n, 8);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.var - 4.0).abs() < 1e-12);
        assert_eq!(stats.max, 9.0);
        assert!(stats.first <= stats.last);
    }

    #[test]
    fn test_max_tracks_negative_start() {
        let mut stats = Stats::default();
        stats.add(-3.0, Utc::now());
        stats.add(-5.0, Utc::now());
        assert_eq!(stats.max, -3.0);
    }

    #[test]
    fn test_profiler_stops() {
        let profiler = Profiler::new();
        assert!(profiler.observe(MEM, 10.0));
        assert!(profiler.observe(MEM, 30.0));
        profiler.stop();
        assert!(!profiler.observe(MEM, 1000.0));

        let (gauges, profile) = profiler.snapshot();
        assert_eq!(gauges[MEM], 30.0);
        assert_eq!(profile[MEM].n, 2);
        assert_eq!(profile[MEM].mean, 20.0);
        assert_eq!(profile[MEM].max, 30.0);
    }

    #[test]
    fn test_restore_is_stopped() {
        let mut gauges = Gauges::new();
        gauges.insert(DISK.to_string(), 7.0);
        let profiler = Profiler::restore(gauges, Profile::new());
        assert!(profiler.is_stopped());
        assert!(!profiler.observe(DISK, 1.0));
        assert_eq!(profiler.snapshot().0[DISK], 7.0);
    }

    #[test]
    fn test_stats_serde_omits_empty_times() {
        let json = serde_json::to_value(Stats::default()).unwrap();
        assert!(json.get("first").is_none());
        assert_eq!(json["n"], 0);
    }

    #[tokio::test]
    async fn test_filesystem_sample() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("tmp");
        let ret = dir.path().join("return");
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::create_dir_all(&ret).unwrap();
        std::fs::write(tmp.join("x"), "foobar\n").unwrap();
        std::fs::write(ret.join("default"), "foobar\n").unwrap();

        let profiler = Profiler::new();
        sample_filesystem(&profiler, &tmp, &ret).await;
        let (gauges, profile) = profiler.snapshot();
        assert!(gauges[TMP] >= 7.0);
        assert!(gauges[DISK] >= 7.0);
        assert_eq!(profile[TMP].n, 1);
        assert_eq!(profile[DISK].var, 0.0);
    }
}
