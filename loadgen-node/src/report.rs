use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Latency regression bound: a higher-throughput service only wins the
/// comparison if its p95 stays within this factor of the current best's.
const LATENCY_REGRESSION_FACTOR: f64 = 2.0;

/// Recommendation thresholds on the performance gap, in percent.
const MIGRATE_GAP_PERCENT: f64 = 50.0;
const OPTIMIZE_GAP_PERCENT: f64 = 20.0;

/// Caller-supplied benchmark result for one service, used to compare
/// multiple targets side by side. Not produced by the engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePerformance {
    pub name: String,
    pub technology: String,
    pub max_rps: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Fraction of failed requests, 0.0..=1.0
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceComparison {
    pub best_performer: String,
    pub performance_gap_percent: f64,
    pub recommendation: String,
    pub services: Vec<ServicePerformance>,
}

/// Summary of one finished or in-flight run, as embedded in a report.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub simulation_id: Uuid,
    pub target_url: String,
    pub duration_seconds: f64,
    pub total_requests: u64,
    pub average_rps: f64,
    pub success_rate_percent: f64,
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub runs: Vec<RunSummary>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Pick the best performer among `services` and derive a recommendation.
///
/// Throughput wins only if latency does not regress beyond
/// [`LATENCY_REGRESSION_FACTOR`]; ties keep the first-seen service. The
/// performance gap is the best performer's max RPS relative to the mean
/// across all services.
pub fn compare_services(services: &[ServicePerformance]) -> Result<PerformanceComparison> {
    let Some(first) = services.first() else {
        return Err(EngineError::Config(
            "comparison requires at least one service".to_string(),
        ));
    };

    let mut best = first;
    for candidate in &services[1..] {
        if candidate.max_rps > best.max_rps
            && candidate.p95_latency_ms <= best.p95_latency_ms * LATENCY_REGRESSION_FACTOR
        {
            best = candidate;
        }
    }

    let mean_rps = services.iter().map(|s| s.max_rps).sum::<f64>() / services.len() as f64;
    let performance_gap_percent = if mean_rps > 0.0 {
        (best.max_rps - mean_rps) / mean_rps * 100.0
    } else {
        0.0
    };

    let recommendation = if performance_gap_percent > MIGRATE_GAP_PERCENT {
        format!(
            "{} outperforms the field by {:.0}%; migrating to it is recommended",
            best.name, performance_gap_percent
        )
    } else if performance_gap_percent > OPTIMIZE_GAP_PERCENT {
        format!(
            "{} leads by {:.0}%; consider optimization of the slower services",
            best.name, performance_gap_percent
        )
    } else {
        "performance differences are minimal".to_string()
    };

    Ok(PerformanceComparison {
        best_performer: best.name.clone(),
        performance_gap_percent,
        recommendation,
        services: services.to_vec(),
    })
}

/// Success rate below which a run is flagged in report recommendations.
const SUCCESS_RATE_FLOOR_PERCENT: f64 = 95.0;
/// p95 latency above which a run is flagged, in milliseconds.
const P95_LATENCY_CEILING_MS: f64 = 2_000.0;

/// Build a report over the given run summaries.
///
/// Unknown run ids are filtered out by the caller before this point; an
/// empty summary set still produces a valid, empty report.
pub fn build_report(runs: Vec<RunSummary>) -> PerformanceReport {
    let mut insights = Vec::new();
    let mut recommendations = Vec::new();

    if !runs.is_empty() {
        let avg_rps = runs.iter().map(|r| r.average_rps).sum::<f64>() / runs.len() as f64;
        let peak_rps = runs
            .iter()
            .map(|r| r.average_rps)
            .fold(f64::MIN, f64::max);
        insights.push(format!(
            "average throughput across {} run(s): {:.1} RPS",
            runs.len(),
            avg_rps
        ));
        insights.push(format!("peak throughput: {peak_rps:.1} RPS"));
    }

    for run in &runs {
        if run.success_rate_percent < SUCCESS_RATE_FLOOR_PERCENT {
            recommendations.push(format!(
                "run {} against {} had a {:.1}% success rate; investigate target errors",
                run.simulation_id, run.target_url, run.success_rate_percent
            ));
        }
        if run.p95_response_time_ms > P95_LATENCY_CEILING_MS {
            recommendations.push(format!(
                "run {} saw p95 latency of {:.0}ms; the target may be saturated",
                run.simulation_id, run.p95_response_time_ms
            ));
        }
    }

    PerformanceReport {
        generated_at: Utc::now(),
        runs,
        insights,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, max_rps: f64, p95_latency_ms: f64) -> ServicePerformance {
        ServicePerformance {
            name: name.to_string(),
            technology: "http".to_string(),
            max_rps,
            avg_latency_ms: p95_latency_ms / 2.0,
            p95_latency_ms,
            error_rate: 0.01,
        }
    }

    #[test]
    fn highest_rps_wins_when_latency_holds() {
        let services = vec![service("fast", 45_000.0, 100.0), service("slow", 12_000.0, 150.0)];
        let comparison = compare_services(&services).expect("comparison succeeds");

        assert_eq!(comparison.best_performer, "fast");
        assert!(comparison.performance_gap_percent > 0.0);
    }

    #[test]
    fn throughput_does_not_win_past_the_latency_bound() {
        // Double the RPS but more than 2x the p95: the first service keeps
        // the crown.
        let services = vec![service("steady", 10_000.0, 100.0), service("spiky", 20_000.0, 250.0)];
        let comparison = compare_services(&services).expect("comparison succeeds");

        assert_eq!(comparison.best_performer, "steady");
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let services = vec![service("a", 5_000.0, 90.0), service("b", 5_000.0, 90.0)];
        let comparison = compare_services(&services).expect("comparison succeeds");
        assert_eq!(comparison.best_performer, "a");
    }

    #[test]
    fn recommendation_categories_follow_gap_thresholds() {
        // Gap of (45000 - 28500) / 28500 = ~57.9% -> migration territory.
        let migrate = compare_services(&[
            service("fast", 45_000.0, 100.0),
            service("slow", 12_000.0, 150.0),
        ])
        .expect("comparison succeeds");
        assert!(migrate.recommendation.contains("migrating"));

        // Gap of (1250 - 1025) / 1025 = ~22% -> optimization territory.
        let optimize = compare_services(&[
            service("a", 1_250.0, 100.0),
            service("b", 800.0, 100.0),
        ])
        .expect("comparison succeeds");
        assert!(optimize.recommendation.contains("optimization"));

        let minimal = compare_services(&[
            service("a", 1_000.0, 100.0),
            service("b", 950.0, 100.0),
        ])
        .expect("comparison succeeds");
        assert!(minimal.recommendation.contains("minimal"));
    }

    #[test]
    fn empty_comparison_is_a_configuration_error() {
        let result = compare_services(&[]);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn report_flags_low_success_and_high_latency() {
        let healthy = RunSummary {
            simulation_id: Uuid::new_v4(),
            target_url: "http://a.example".to_string(),
            duration_seconds: 60.0,
            total_requests: 6_000,
            average_rps: 100.0,
            success_rate_percent: 99.5,
            avg_response_time_ms: 40.0,
            p95_response_time_ms: 120.0,
        };
        let failing = RunSummary {
            simulation_id: Uuid::new_v4(),
            target_url: "http://b.example".to_string(),
            duration_seconds: 60.0,
            total_requests: 3_000,
            average_rps: 50.0,
            success_rate_percent: 80.0,
            avg_response_time_ms: 900.0,
            p95_response_time_ms: 3_500.0,
        };

        let report = build_report(vec![healthy, failing]);
        assert_eq!(report.runs.len(), 2);
        assert_eq!(report.insights.len(), 2);
        // One flag for the success rate, one for the latency.
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn empty_report_is_valid() {
        let report = build_report(Vec::new());
        assert!(report.runs.is_empty());
        assert!(report.insights.is_empty());
        assert!(report.recommendations.is_empty());
    }
}
