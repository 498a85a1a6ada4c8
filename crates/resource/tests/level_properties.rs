//! Property tests for resource-level classification.

use cinder_config::ResourceConfig;
use cinder_core::ResourceLevel;
use proptest::prelude::*;

fn thresholds() -> impl Strategy<Value = (f64, f64, f64, f64)> {
    (0.01f64..2.0, 0.01f64..2.0, 0.01f64..2.0, 0.0f64..0.5)
        .prop_map(|(a, b, c, margin)| (a, a + b, a + b + c, margin))
}

fn config((critical, low, moderate, margin): (f64, f64, f64, f64)) -> ResourceConfig {
    ResourceConfig {
        safety_margin_gb: margin,
        ..ResourceConfig::with_thresholds(critical, low, moderate)
    }
}

proptest! {
    #[test]
    fn level_is_monotonic_in_available_memory(t in thresholds(), x in 0.0f64..8.0, dx in 0.0f64..4.0) {
        let c = config(t);
        prop_assert!(c.level_for(x) <= c.level_for(x + dx));
    }

    #[test]
    fn level_is_deterministic(t in thresholds(), x in 0.0f64..8.0) {
        let c = config(t);
        prop_assert_eq!(c.level_for(x), c.level_for(x));
    }

    #[test]
    fn exact_boundaries_take_the_lower_level(t in thresholds()) {
        let (critical, low, moderate, _) = t;
        let c = config((critical, low, moderate, 0.0));
        prop_assert_eq!(c.level_for(critical), ResourceLevel::Critical);
        prop_assert_eq!(c.level_for(low), ResourceLevel::Low);
        prop_assert_eq!(c.level_for(moderate), ResourceLevel::Moderate);
    }

    #[test]
    fn just_above_a_boundary_moves_up(t in thresholds()) {
        let c = config(t);
        let (critical, _, moderate, margin) = t;
        prop_assert!(c.level_for(critical + margin + 1e-6) > ResourceLevel::Critical);
        prop_assert_eq!(c.level_for(moderate + margin + 1e-6), ResourceLevel::Good);
    }
}
