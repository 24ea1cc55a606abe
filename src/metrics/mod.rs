//! # 指标注册表
//!
//! 按名称管理 counter / gauge / histogram 三类指标, 并输出 OpenMetrics 文本格式。
//!
//! 指标的 schema (名称、帮助信息、标签名、桶边界) 在注册时固定, 标签值在第一次观测时才会
//! 惰性创建对应的时间序列。存储和编码都交给 `prometheus-client`, 这里只负责按名称查找
//! 和参数校验。

pub mod http;
pub(crate) mod process;

use std::collections::{HashMap, HashSet};

use prometheus_client::{
    encoding::text::encode,
    metrics::{
        counter::Counter,
        family::{Family, MetricConstructor},
        gauge::Gauge,
        histogram::Histogram,
    },
    registry::Registry,
};

use process::{ProcessMetrics, PROCESS_METRICS};

/// `/metrics` 响应的 Content-Type
pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// 有序的标签键值对, 顺序与 `MetricDef::labels` 一致
type LabelSet = Vec<(String, String)>;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metric `{0}` is already registered")]
    DuplicateMetricName(String),
    #[error("metric `{0}` is not registered")]
    UnknownMetric(String),
    #[error("metric `{name}` expects {expected} label values, got {actual}")]
    LabelMismatch { name: String, expected: usize, actual: usize },
    #[error("metric `{name}` is a {actual}, not a {expected}")]
    WrongKind {
        name: String,
        expected: MetricKind,
        actual: MetricKind,
    },
    #[error("metric `{name}` is invalid: {reason}")]
    InvalidDefinition { name: String, reason: &'static str },
    #[error("metric `{name}` rejected observation {value}")]
    InvalidObservation { name: String, value: f64 },
    #[error("failed to encode metrics: {0}")]
    ExportFailure(#[from] std::fmt::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        })
    }
}

/// 指标定义
///
/// 一般以 `const` 的形式集中声明, 见 [`http`] 模块。
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub kind: MetricKind,
    /// 编码时会自动补上结尾的 `.`, 这里不要再加
    pub help: &'static str,
    /// 标签名, 观测时传入的标签值必须与之一一对应
    pub labels: &'static [&'static str],
    /// histogram 的桶上界, 其他类型忽略
    pub buckets: &'static [f64],
}

impl MetricDef {
    /// 编码器会给 counter 自动加上 `_total` 后缀, 注册时需要去掉
    fn family_name(&self) -> &'static str {
        match self.kind {
            MetricKind::Counter => self.name.strip_suffix("_total").unwrap_or(self.name),
            _ => self.name,
        }
    }

    fn validate(&self) -> Result<(), MetricsError> {
        let invalid = |reason| MetricsError::InvalidDefinition {
            name: self.name.to_owned(),
            reason,
        };
        match self.kind {
            MetricKind::Counter if self.family_name() == self.name || self.family_name().is_empty() => {
                Err(invalid("counter names must end with `_total`"))
            }
            MetricKind::Histogram if self.buckets.iter().any(|b| !b.is_finite()) => Err(invalid("bucket boundaries must be finite")),
            MetricKind::Histogram if self.buckets.windows(2).any(|pair| pair[0] >= pair[1]) => {
                Err(invalid("bucket boundaries must be strictly increasing"))
            }
            _ => Ok(()),
        }
    }
}

/// 一个指标族在输出中占用的全部名字 (族名和样本行的名字)
fn exposed_names(family: &str, kind: MetricKind) -> impl Iterator<Item = String> + '_ {
    let suffixes: &'static [&'static str] = match kind {
        MetricKind::Counter => &["", "_total"],
        MetricKind::Gauge => &[""],
        MetricKind::Histogram => &["", "_bucket", "_sum", "_count"],
    };
    suffixes.iter().map(move |suffix| format!("{family}{suffix}"))
}

#[derive(Debug, Clone, Copy)]
struct HistogramBuckets(&'static [f64]);

impl MetricConstructor<Histogram> for HistogramBuckets {
    fn new_metric(&self) -> Histogram {
        Histogram::new(self.0.iter().copied())
    }
}

/// 没有标签的指标直接持有单个序列, 避免编码出 `name{} value`
enum Store<M, C = fn() -> M> {
    Unlabeled(M),
    Labeled(Family<LabelSet, M, C>),
}

impl<M, C: MetricConstructor<M>> Store<M, C> {
    fn with<R>(&self, names: &[&str], values: &[&str], f: impl FnOnce(&M) -> R) -> R {
        match self {
            Store::Unlabeled(metric) => f(metric),
            Store::Labeled(family) => {
                let labels: LabelSet = names.iter().zip(values).map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
                let metric = family.get_or_create(&labels);
                f(&*metric)
            }
        }
    }
}

enum Series {
    Counter(Store<Counter>),
    Gauge(Store<Gauge>),
    Histogram(Store<Histogram, HistogramBuckets>),
}

impl Series {
    fn new(def: &MetricDef) -> Self {
        let labeled = !def.labels.is_empty();
        match def.kind {
            MetricKind::Counter => Series::Counter(match labeled {
                true => Store::Labeled(Family::default()),
                false => Store::Unlabeled(Counter::default()),
            }),
            MetricKind::Gauge => Series::Gauge(match labeled {
                true => Store::Labeled(Family::default()),
                false => Store::Unlabeled(Gauge::default()),
            }),
            MetricKind::Histogram => {
                let buckets = HistogramBuckets(def.buckets);
                Series::Histogram(match labeled {
                    true => Store::Labeled(Family::new_with_constructor(buckets)),
                    false => Store::Unlabeled(buckets.new_metric()),
                })
            }
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Series::Counter(_) => MetricKind::Counter,
            Series::Gauge(_) => MetricKind::Gauge,
            Series::Histogram(_) => MetricKind::Histogram,
        }
    }

    fn register_into(&self, registry: &mut Registry, def: &MetricDef) {
        let (name, help) = (def.family_name(), def.help);
        match self {
            Series::Counter(Store::Unlabeled(m)) => registry.register(name, help, m.clone()),
            Series::Counter(Store::Labeled(f)) => registry.register(name, help, f.clone()),
            Series::Gauge(Store::Unlabeled(m)) => registry.register(name, help, m.clone()),
            Series::Gauge(Store::Labeled(f)) => registry.register(name, help, f.clone()),
            Series::Histogram(Store::Unlabeled(m)) => registry.register(name, help, m.clone()),
            Series::Histogram(Store::Labeled(f)) => registry.register(name, help, f.clone()),
        }
    }
}

struct Entry {
    def: MetricDef,
    series: Series,
}

/// 进程内唯一的指标注册表
///
/// 启动时通过 `&mut self` 注册全部指标, 之后包进 `Arc` 在各个 handler 之间共享;
/// 所有观测操作只需要 `&self`。
pub struct MetricRegistry {
    registry: Registry,
    entries: HashMap<&'static str, Entry>,
    order: Vec<&'static str>,
    /// 已被占用的输出名字, 包括进程指标
    exposed: HashSet<String>,
    process: ProcessMetrics,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    /// 创建注册表, 进程级别的默认指标会自动注册
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let process = ProcessMetrics::register(&mut registry);
        Self {
            registry,
            entries: HashMap::new(),
            order: Vec::new(),
            exposed: PROCESS_METRICS
                .iter()
                .flat_map(|&(family, kind)| exposed_names(family, kind))
                .collect(),
            process,
        }
    }

    pub fn register(&mut self, def: MetricDef) -> Result<(), MetricsError> {
        def.validate()?;
        let names: Vec<String> = exposed_names(def.family_name(), def.kind).collect();
        if names.iter().any(|name| self.exposed.contains(name)) {
            return Err(MetricsError::DuplicateMetricName(def.name.to_owned()));
        }
        self.exposed.extend(names);
        let series = Series::new(&def);
        series.register_into(&mut self.registry, &def);
        self.entries.insert(def.name, Entry { def, series });
        self.order.push(def.name);
        log::debug!("registered {} {}", def.kind, def.name);
        Ok(())
    }

    /// 已注册的指标名, 按注册顺序
    pub fn metric_names(&self) -> &[&'static str] {
        &self.order
    }

    pub fn counter_increment(&self, name: &str, values: &[&str], amount: u64) -> Result<(), MetricsError> {
        let entry = self.lookup(name, values)?;
        match &entry.series {
            Series::Counter(store) => {
                store.with(entry.def.labels, values, |counter| counter.inc_by(amount));
                Ok(())
            }
            other => Err(wrong_kind(name, MetricKind::Counter, other.kind())),
        }
    }

    pub fn gauge_set(&self, name: &str, values: &[&str], value: i64) -> Result<(), MetricsError> {
        self.with_gauge(name, values, |gauge| {
            gauge.set(value);
        })
    }

    pub fn gauge_increment(&self, name: &str, values: &[&str]) -> Result<(), MetricsError> {
        self.with_gauge(name, values, |gauge| {
            gauge.inc();
        })
    }

    pub fn gauge_decrement(&self, name: &str, values: &[&str]) -> Result<(), MetricsError> {
        self.with_gauge(name, values, |gauge| {
            gauge.dec();
        })
    }

    /// 记录一次观测值 (秒), 负数和 NaN 会被拒绝
    pub fn histogram_observe(&self, name: &str, values: &[&str], seconds: f64) -> Result<(), MetricsError> {
        let entry = self.lookup(name, values)?;
        let Series::Histogram(store) = &entry.series else {
            return Err(wrong_kind(name, MetricKind::Histogram, entry.series.kind()));
        };
        if !(seconds >= 0.0) {
            return Err(MetricsError::InvalidObservation {
                name: name.to_owned(),
                value: seconds,
            });
        }
        store.with(entry.def.labels, values, |histogram| histogram.observe(seconds));
        Ok(())
    }

    /// 导出全部指标, 没有任何序列的指标也会输出 HELP/TYPE 行
    pub fn export(&self) -> Result<String, MetricsError> {
        self.process.refresh();
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    fn with_gauge(&self, name: &str, values: &[&str], f: impl FnOnce(&Gauge)) -> Result<(), MetricsError> {
        let entry = self.lookup(name, values)?;
        match &entry.series {
            Series::Gauge(store) => {
                store.with(entry.def.labels, values, f);
                Ok(())
            }
            other => Err(wrong_kind(name, MetricKind::Gauge, other.kind())),
        }
    }

    fn lookup(&self, name: &str, values: &[&str]) -> Result<&Entry, MetricsError> {
        let entry = self.entries.get(name).ok_or_else(|| MetricsError::UnknownMetric(name.to_owned()))?;
        if entry.def.labels.len() != values.len() {
            return Err(MetricsError::LabelMismatch {
                name: name.to_owned(),
                expected: entry.def.labels.len(),
                actual: values.len(),
            });
        }
        Ok(entry)
    }
}

fn wrong_kind(name: &str, expected: MetricKind, actual: MetricKind) -> MetricsError {
    MetricsError::WrongKind {
        name: name.to_owned(),
        expected,
        actual,
    }
}
