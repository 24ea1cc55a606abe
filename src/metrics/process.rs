//! 进程级别的默认指标 (启动时间、运行时长、CPU、内存、文件句柄)
//!
//! 每次导出前刷新一次。CPU/内存/句柄读取 `/proc/self`, 只在 Linux 上注册。

use std::{
    sync::atomic::AtomicU64,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

use super::MetricKind;

/// 进程指标的族名, 由注册表保留, 业务指标不能再使用
pub(crate) const PROCESS_METRICS: &[(&str, MetricKind)] = &[
    ("process_start_time_seconds", MetricKind::Gauge),
    ("process_uptime_seconds", MetricKind::Gauge),
    ("process_cpu_seconds", MetricKind::Counter),
    ("process_resident_memory_bytes", MetricKind::Gauge),
    ("process_virtual_memory_bytes", MetricKind::Gauge),
    ("process_open_fds", MetricKind::Gauge),
];

#[derive(Debug)]
pub(crate) struct ProcessMetrics {
    started: Instant,
    uptime: Gauge<f64, AtomicU64>,
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    os: OsMetrics,
}

#[derive(Debug, Default)]
struct OsMetrics {
    cpu_seconds: Counter<f64, AtomicU64>,
    last_cpu_ticks: AtomicU64,
    resident_memory: Gauge,
    virtual_memory: Gauge,
    open_fds: Gauge,
}

impl ProcessMetrics {
    pub(crate) fn register(registry: &mut Registry) -> Self {
        let start_time = Gauge::<f64, AtomicU64>::default();
        start_time.set(SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default());
        registry.register("process_start_time_seconds", "Start time of the process since unix epoch in seconds", start_time);

        let uptime = Gauge::<f64, AtomicU64>::default();
        registry.register("process_uptime_seconds", "Seconds since the metric registry was created", uptime.clone());

        let os = OsMetrics::default();
        #[cfg(target_os = "linux")]
        {
            registry.register("process_cpu_seconds", "Total user and system CPU time spent in seconds", os.cpu_seconds.clone());
            registry.register("process_resident_memory_bytes", "Resident memory size in bytes", os.resident_memory.clone());
            registry.register("process_virtual_memory_bytes", "Virtual memory size in bytes", os.virtual_memory.clone());
            registry.register("process_open_fds", "Number of open file descriptors", os.open_fds.clone());
        }

        Self {
            started: Instant::now(),
            uptime,
            os,
        }
    }

    pub(crate) fn refresh(&self) {
        self.uptime.set(self.started.elapsed().as_secs_f64());
        #[cfg(target_os = "linux")]
        self.os.refresh();
    }
}

#[cfg(target_os = "linux")]
impl OsMetrics {
    fn refresh(&self) {
        match linux::sample() {
            Ok(sample) => self.apply(&sample),
            Err(e) => log::debug!("failed to sample /proc/self: {e}"),
        }
    }

    fn apply(&self, sample: &linux::Sample) {
        use std::sync::atomic::Ordering;

        // counter 只能增加, 按上次采样的差值累加
        let previous = self.last_cpu_ticks.swap(sample.cpu_ticks, Ordering::Relaxed);
        if sample.cpu_ticks > previous {
            self.cpu_seconds.inc_by((sample.cpu_ticks - previous) as f64 / linux::CLOCK_TICKS_PER_SEC);
        }
        self.resident_memory.set(sample.resident_bytes);
        self.virtual_memory.set(sample.virtual_bytes);
        self.open_fds.set(sample.open_fds);
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::{fs, io};

    /// `/proc/<pid>/stat` 中的 CPU 时间以 USER_HZ 为单位, 内核对用户态固定为 100,
    /// 与内核配置的 HZ 无关
    pub(super) const CLOCK_TICKS_PER_SEC: f64 = 100.0;

    #[derive(Debug, PartialEq)]
    pub(super) struct Sample {
        pub(super) cpu_ticks: u64,
        pub(super) virtual_bytes: i64,
        pub(super) resident_bytes: i64,
        pub(super) open_fds: i64,
    }

    pub(super) fn sample() -> io::Result<Sample> {
        let stat = fs::read_to_string("/proc/self/stat")?;
        let cpu_ticks = parse_cpu_ticks(&stat).ok_or_else(|| malformed("/proc/self/stat"))?;
        let status = fs::read_to_string("/proc/self/status")?;
        let (virtual_bytes, resident_bytes) = parse_status(&status).ok_or_else(|| malformed("/proc/self/status"))?;
        let open_fds = fs::read_dir("/proc/self/fd")?.count() as i64;
        Ok(Sample {
            cpu_ticks,
            virtual_bytes,
            resident_bytes,
            open_fds,
        })
    }

    fn malformed(path: &str) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, format!("malformed {path}"))
    }

    /// utime + stime, 第 14/15 个字段; 进程名可能包含空格, 从最后一个 `)` 之后开始数
    pub(super) fn parse_cpu_ticks(stat: &str) -> Option<u64> {
        let rest = &stat[stat.rfind(')')? + 1..];
        let mut fields = rest.split_whitespace().skip(11);
        let utime: u64 = fields.next()?.parse().ok()?;
        let stime: u64 = fields.next()?.parse().ok()?;
        Some(utime + stime)
    }

    /// VmSize / VmRSS, 单位是 kB, 不依赖页大小 (aarch64 上常见 16K/64K 页)
    pub(super) fn parse_status(status: &str) -> Option<(i64, i64)> {
        let kib = |key: &str| -> Option<i64> {
            let line = status.lines().find_map(|line| line.strip_prefix(key))?;
            let value: i64 = line.trim().strip_suffix("kB")?.trim().parse().ok()?;
            Some(value * 1024)
        };
        Some((kib("VmSize:")?, kib("VmRSS:")?))
    }
}
