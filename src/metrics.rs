//! Metric timing with percentile stats
//!
//! A bounded ring of duration samples keyed by metric type, fed either by
//! explicit start/stop timing pairs or by the [`PerformanceMonitor::time`]
//! wrapper. Durations come from the monotonic clock; the recorded timestamp
//! is wall-clock ms so windowed stats line up with the rest of the engine.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use uuid::Uuid;

use crate::util::now_millis;

/// Ring capacity across all metric types
const MAX_METRICS: usize = 1000;

/// One recorded sample
#[derive(Debug, Clone)]
pub struct Metric {
	pub metric_type: String,
	pub duration_ms: f64,
	pub timestamp: i64,
	pub success: bool,
}

/// Aggregates over a metric type
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStats {
	pub count: usize,
	pub avg: f64,
	pub min: f64,
	pub max: f64,
	pub p95: f64,
	pub total: f64,
}

impl MetricStats {
	fn empty() -> Self {
		MetricStats { count: 0, avg: 0.0, min: 0.0, max: 0.0, p95: 0.0, total: 0.0 }
	}
}

/// Bounded metric recorder with in-flight timing handles
pub struct PerformanceMonitor {
	metrics: Mutex<VecDeque<Metric>>,
	active: Mutex<HashMap<String, (String, Instant)>>,
}

impl PerformanceMonitor {
	pub fn new() -> Self {
		PerformanceMonitor {
			metrics: Mutex::new(VecDeque::with_capacity(MAX_METRICS)),
			active: Mutex::new(HashMap::new()),
		}
	}

	/// Begin a timing; returns the handle for [`stop_timing`].
	///
	/// A caller-supplied id lets unrelated code stop a timing it did not
	/// start (request-scoped timings).
	pub fn start_timing(&self, metric_type: &str, id: Option<&str>) -> String {
		let timing_id = match id {
			Some(id) => id.to_string(),
			None => format!("{}-{}", metric_type, Uuid::new_v4().simple()),
		};

		self.active
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.insert(timing_id.clone(), (metric_type.to_string(), Instant::now()));

		timing_id
	}

	/// Finish a timing and record its duration; returns the elapsed ms, or
	/// None for an unknown handle
	pub fn stop_timing(&self, timing_id: &str, success: bool) -> Option<f64> {
		let (metric_type, started) =
			self.active.lock().unwrap_or_else(|e| e.into_inner()).remove(timing_id)?;

		let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
		self.record_metric(&metric_type, duration_ms, success);
		Some(duration_ms)
	}

	/// Append a sample, evicting the oldest past the ring bound
	pub fn record_metric(&self, metric_type: &str, duration_ms: f64, success: bool) {
		let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
		if metrics.len() >= MAX_METRICS {
			metrics.pop_front();
		}
		metrics.push_back(Metric {
			metric_type: metric_type.to_string(),
			duration_ms,
			timestamp: now_millis(),
			success,
		});
	}

	/// Stats for a metric type, optionally restricted to the last
	/// `period_ms` milliseconds
	pub fn get_stats(&self, metric_type: &str, period_ms: Option<i64>) -> MetricStats {
		let cutoff = period_ms.map(|p| now_millis() - p);

		let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
		let mut durations: Vec<f64> = metrics
			.iter()
			.filter(|m| m.metric_type == metric_type)
			.filter(|m| cutoff.map_or(true, |c| m.timestamp >= c))
			.map(|m| m.duration_ms)
			.collect();

		if durations.is_empty() {
			return MetricStats::empty();
		}

		durations.sort_by(|a, b| a.partial_cmp(b).expect("durations are finite"));
		let count = durations.len();
		let total: f64 = durations.iter().sum();
		let p95_index = ((count as f64 * 0.95).ceil() as usize).saturating_sub(1);

		MetricStats {
			count,
			avg: total / count as f64,
			min: durations[0],
			max: durations[count - 1],
			p95: durations[p95_index.min(count - 1)],
			total,
		}
	}

	/// Time a future and record it under `metric_type`
	pub async fn time<T, Fut>(&self, metric_type: &str, fut: Fut) -> T
	where
		Fut: Future<Output = T>,
	{
		let started = Instant::now();
		let result = fut.await;
		self.record_metric(metric_type, started.elapsed().as_secs_f64() * 1000.0, true);
		result
	}

	pub fn sample_count(&self) -> usize {
		self.metrics.lock().unwrap_or_else(|e| e.into_inner()).len()
	}
}

impl Default for PerformanceMonitor {
	fn default() -> Self {
		Self::new()
	}
}


// vim: ts=4
