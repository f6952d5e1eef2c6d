//! Unit tests for the loadgen node
//!
//! Covers the pure pieces of the engine:
//! - Node and simulation configuration validation
//! - Rate model ramp shapes
//! - Percentile computation
//! - Service comparison and reporting

use std::collections::HashMap;
use std::time::Duration;

use loadgen_node::config::LoadbeatConfig;
use loadgen_node::error::EngineError;
use loadgen_node::rate::{RateModel, ScaleMode};
use loadgen_node::report::{build_report, compare_services, ServicePerformance};
use loadgen_node::simulation::{HttpMethod, SimulationConfig};
use loadgen_node::stats::compute_percentiles;

fn valid_simulation_config() -> SimulationConfig {
    SimulationConfig {
        target_url: "http://127.0.0.1:8081/".to_string(),
        method: HttpMethod::Get,
        body: None,
        headers: None,
        min_rps: 10.0,
        max_rps: 100.0,
        duration_seconds: 60,
        scale_mode: ScaleMode::Linear,
        concurrent_users: 50,
        request_timeout_ms: 5_000,
    }
}

/// Test node configuration loading and validation
#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoadbeatConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.metrics_enabled());
        assert!(config.management_enabled());
    }

    #[test]
    fn test_zero_tick_interval_is_rejected() {
        let mut config = LoadbeatConfig::default();
        config.engine.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_listen_addr_is_rejected() {
        let mut config = LoadbeatConfig::default();
        config.management.listen_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_feature_skips_addr_validation() {
        let mut config = LoadbeatConfig::default();
        config.metrics.listen_addr = "not-an-address".to_string();
        config.metrics.enabled = false;
        assert!(config.validate().is_ok());
    }
}

/// Test simulation configuration validation
#[cfg(test)]
mod simulation_config_tests {
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_simulation_config().validate().is_ok());
    }

    #[test]
    fn test_malformed_url_is_a_configuration_error() {
        let mut config = valid_simulation_config();
        config.target_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_non_http_scheme_is_rejected() {
        let mut config = valid_simulation_config();
        config.target_url = "ftp://example.com/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_rps_below_min_rps_is_rejected() {
        let mut config = valid_simulation_config();
        config.min_rps = 100.0;
        config.max_rps = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_min_rps_is_rejected() {
        let mut config = valid_simulation_config();
        config.min_rps = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_duration_is_rejected() {
        let mut config = valid_simulation_config();
        config.duration_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrent_users_is_rejected() {
        let mut config = valid_simulation_config();
        config.concurrent_users = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let raw = r#"{
            "target_url": "http://localhost:9000/api",
            "min_rps": 1.0,
            "max_rps": 50.0,
            "duration_seconds": 30,
            "concurrent_users": 10
        }"#;
        let config: SimulationConfig = serde_json::from_str(raw).expect("parses");
        assert_eq!(config.method, HttpMethod::Get);
        assert_eq!(config.scale_mode, ScaleMode::Linear);
        assert_eq!(config.request_timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_headers_survive_round_trip() {
        let mut config = valid_simulation_config();
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        config.headers = Some(headers);

        let json = serde_json::to_string(&config).expect("serializes");
        let decoded: SimulationConfig = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(
            decoded.headers.and_then(|h| h.get("x-api-key").cloned()),
            Some("secret".to_string())
        );
    }
}

/// Test the rate model ramp shapes
#[cfg(test)]
mod rate_model_tests {
    use super::*;

    #[test]
    fn test_linear_ramp_reference_points() {
        let model = RateModel::new(
            ScaleMode::Linear,
            10.0,
            110.0,
            Duration::from_secs(100),
        );
        assert_eq!(model.target_rps(Duration::from_secs(0)), 10.0);
        assert_eq!(model.target_rps(Duration::from_secs(50)), 60.0);
        assert_eq!(model.target_rps(Duration::from_secs(100)), 110.0);
    }

    #[test]
    fn test_all_modes_start_at_min_and_end_at_max() {
        for mode in [
            ScaleMode::Linear,
            ScaleMode::Logarithmic,
            ScaleMode::Exponential,
        ] {
            let model = RateModel::new(mode, 5.0, 500.0, Duration::from_secs(60));
            assert_eq!(model.target_rps(Duration::ZERO), 5.0, "{mode:?} at t=0");
            assert_eq!(
                model.target_rps(Duration::from_secs(60)),
                500.0,
                "{mode:?} at t=duration"
            );
        }
    }

    #[test]
    fn test_ramps_are_monotonically_nondecreasing() {
        for mode in [
            ScaleMode::Linear,
            ScaleMode::Logarithmic,
            ScaleMode::Exponential,
            ScaleMode::Step,
        ] {
            let model = RateModel::new(mode, 1.0, 1_000_000.0, Duration::from_secs(100));
            let mut previous = f64::MIN;
            for second in 0..=100 {
                let rps = model.target_rps(Duration::from_secs(second));
                assert!(
                    rps >= previous,
                    "{mode:?} decreased at t={second}: {rps} < {previous}"
                );
                previous = rps;
            }
        }
    }

    #[test]
    fn test_step_mode_covers_the_full_decade_sequence() {
        let model = RateModel::new(
            ScaleMode::Step,
            1.0,
            1_000_000.0,
            Duration::from_secs(700),
        );
        assert_eq!(
            model.step_levels(),
            &[1.0, 10.0, 100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0]
        );
    }
}

/// Test percentile computation
#[cfg(test)]
mod percentile_tests {
    use super::*;

    #[test]
    fn test_empty_samples_yield_zero_not_panic() {
        let stats = compute_percentiles(&[]);
        assert_eq!(stats.min_ms, 0.0);
        assert_eq!(stats.p99_ms, 0.0);
        assert_eq!(stats.std_dev_ms, 0.0);
    }

    #[test]
    fn test_single_100ms_sample() {
        let stats = compute_percentiles(&[100.0]);
        assert_eq!(stats.min_ms, 100.0);
        assert_eq!(stats.max_ms, 100.0);
        assert_eq!(stats.mean_ms, 100.0);
        assert_eq!(stats.median_ms, 100.0);
        assert_eq!(stats.p95_ms, 100.0);
        assert_eq!(stats.p99_ms, 100.0);
        assert_eq!(stats.std_dev_ms, 0.0);
    }

    #[test]
    fn test_percentile_ordering_holds_for_any_sample_set() {
        let cases: Vec<Vec<f64>> = vec![
            vec![1.0],
            vec![5.0, 5.0, 5.0],
            vec![9.0, 1.0, 5.0, 3.0, 7.0],
            (1..=1000).map(|i| ((i * 37) % 997) as f64).collect(),
        ];
        for samples in cases {
            let stats = compute_percentiles(&samples);
            assert!(stats.min_ms <= stats.median_ms);
            assert!(stats.median_ms <= stats.p95_ms);
            assert!(stats.p95_ms <= stats.p99_ms);
            assert!(stats.p99_ms <= stats.max_ms);
        }
    }

    #[test]
    fn test_p95_interpolates_exactly() {
        // 0..=100 -> rank for p95 is 95.0, an integer index.
        let samples: Vec<f64> = (0..=100).map(|i| i as f64).collect();
        let stats = compute_percentiles(&samples);
        assert_eq!(stats.p95_ms, 95.0);
        assert_eq!(stats.median_ms, 50.0);
    }
}

/// Test service comparison and report assembly
#[cfg(test)]
mod comparison_tests {
    use super::*;

    fn service(name: &str, max_rps: f64, p95_latency_ms: f64) -> ServicePerformance {
        ServicePerformance {
            name: name.to_string(),
            technology: "http".to_string(),
            max_rps,
            avg_latency_ms: p95_latency_ms / 2.0,
            p95_latency_ms,
            error_rate: 0.0,
        }
    }

    #[test]
    fn test_reference_comparison_picks_the_faster_service() {
        let comparison = compare_services(&[
            service("api-a", 45_000.0, 100.0),
            service("api-b", 12_000.0, 150.0),
        ])
        .expect("comparison succeeds");

        assert_eq!(comparison.best_performer, "api-a");
        assert!(comparison.performance_gap_percent > 0.0);
    }

    #[test]
    fn test_empty_report_is_valid() {
        let report = build_report(Vec::new());
        assert!(report.runs.is_empty());
        assert!(report.recommendations.is_empty());
    }
}
