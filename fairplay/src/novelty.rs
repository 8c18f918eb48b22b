//! Novelty audit math: category-weighted similarity against seed patterns.
//!
//! The LLM supplies per-category similarities; everything that matters is
//! recomputed here. The stored `overall` is always the weighted sum of the
//! clamped category values under the fixed weights below, regardless of any
//! overall number the model claims.

use serde::{Deserialize, Serialize};

use crate::case::{
    CategorySimilarity, Cml, FalseAssumptionType, NoveltyAudit, NoveltyStatus, SeedSimilarity,
    TestMethod,
};
use crate::config::PipelineConfig;
use crate::model::PrimaryAxis;

/// Fixed category weights; they sum to 1.0.
pub const AXIS_WEIGHT: f64 = 0.25;
pub const MECHANISM_WEIGHT: f64 = 0.25;
pub const FALSE_ASSUMPTION_WEIGHT: f64 = 0.20;
pub const TEST_METHOD_WEIGHT: f64 = 0.15;
pub const ERA_WEIGHT: f64 = 0.075;
pub const LOCATION_WEIGHT: f64 = 0.075;

/// Weighted overall similarity from clamped category values.
pub fn weighted_overall(categories: &CategorySimilarity) -> f64 {
    let c = clamp(categories);
    AXIS_WEIGHT * c.axis
        + MECHANISM_WEIGHT * c.mechanism
        + FALSE_ASSUMPTION_WEIGHT * c.false_assumption
        + TEST_METHOD_WEIGHT * c.test_method
        + ERA_WEIGHT * c.era
        + LOCATION_WEIGHT * c.location
}

fn clamp(c: &CategorySimilarity) -> CategorySimilarity {
    CategorySimilarity {
        axis: c.axis.clamp(0.0, 1.0),
        mechanism: c.mechanism.clamp(0.0, 1.0),
        false_assumption: c.false_assumption.clamp(0.0, 1.0),
        test_method: c.test_method.clamp(0.0, 1.0),
        era: c.era.clamp(0.0, 1.0),
        location: c.location.clamp(0.0, 1.0),
    }
}

/// A seeded structural pattern the generated CML is compared against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPattern {
    pub id: String,
    pub axis: PrimaryAxis,
    /// Coarse mechanism family, e.g. "clock_manipulation".
    pub mechanism_family: String,
    pub false_assumption_type: FalseAssumptionType,
    pub test_method: TestMethod,
    pub era: String,
    pub location_type: String,
}

/// The built-in seed library of well-worn Golden Age structures.
pub fn builtin_seeds() -> Vec<SeedPattern> {
    vec![
        SeedPattern {
            id: "seed-altered-clock".into(),
            axis: PrimaryAxis::Temporal,
            mechanism_family: "clock_manipulation".into(),
            false_assumption_type: FalseAssumptionType::TimeAnchor,
            test_method: TestMethod::Reenactment,
            era: "1930s".into(),
            location_type: "CountryHouse".into(),
        },
        SeedPattern {
            id: "seed-twin-substitution".into(),
            axis: PrimaryAxis::Identity,
            mechanism_family: "impersonation".into(),
            false_assumption_type: FalseAssumptionType::IdentityConflation,
            test_method: TestMethod::WitnessConfrontation,
            era: "1920s".into(),
            location_type: "SeasideHotel".into(),
        },
        SeedPattern {
            id: "seed-sealed-room".into(),
            axis: PrimaryAxis::Spatial,
            mechanism_family: "hidden_passage".into(),
            false_assumption_type: FalseAssumptionType::SpatialContinuity,
            test_method: TestMethod::MaterialComparison,
            era: "1930s".into(),
            location_type: "TownHouse".into(),
        },
        SeedPattern {
            id: "seed-forged-verdict".into(),
            axis: PrimaryAxis::Authority,
            mechanism_family: "document_forgery".into(),
            false_assumption_type: FalseAssumptionType::AuthorityTrust,
            test_method: TestMethod::MaterialComparison,
            era: "1920s".into(),
            location_type: "Chambers".into(),
        },
        SeedPattern {
            id: "seed-habitual-dose".into(),
            axis: PrimaryAxis::Behavioral,
            mechanism_family: "routine_poisoning".into(),
            false_assumption_type: FalseAssumptionType::BehavioralPattern,
            test_method: TestMethod::TimedDemonstration,
            era: "1930s".into(),
            location_type: "CountryHouse".into(),
        },
        SeedPattern {
            id: "seed-borrowed-alibi".into(),
            axis: PrimaryAxis::Temporal,
            mechanism_family: "gramophone_alibi".into(),
            false_assumption_type: FalseAssumptionType::TimeAnchor,
            test_method: TestMethod::Trap,
            era: "1940s".into(),
            location_type: "Theatre".into(),
        },
    ]
}

/// Deterministic fallback: exact-match similarity for the categories the CML
/// carries directly. Used when the model's numbers are missing or malformed;
/// mechanism has no typed counterpart in the CML, so it stays neutral.
pub fn structural_similarity(cml: &Cml, seed: &SeedPattern) -> CategorySimilarity {
    let eq = |same: bool| if same { 1.0 } else { 0.0 };
    CategorySimilarity {
        axis: eq(cml.meta.primary_axis == seed.axis),
        mechanism: 0.5,
        false_assumption: eq(cml.false_assumption.assumption_type == seed.false_assumption_type),
        test_method: eq(cml.discriminating_test.method == seed.test_method),
        era: eq(cml.meta.decade == seed.era),
        location: eq(cml.meta.location_preset == seed.location_type),
    }
}

/// Divergence constraints produced by inverting the top-matching seed's
/// category values; handed to Agent 3 for the regeneration attempt.
pub fn divergence_constraints(seed: &SeedPattern) -> Vec<String> {
    vec![
        format!(
            "do not build the deception on the {} axis; pick a different primary axis",
            seed.axis
        ),
        format!(
            "avoid the {} mechanism family entirely",
            seed.mechanism_family
        ),
        format!(
            "the false assumption must not be of type {:?}",
            seed.false_assumption_type
        ),
        format!(
            "use a discriminating test that is not a {:?}",
            seed.test_method
        ),
        format!(
            "shift era or setting away from {} / {}",
            seed.era, seed.location_type
        ),
    ]
}

/// Evaluate the audit from per-seed category similarities.
///
/// `exhausted` is true once the single regeneration attempt has been spent;
/// at that point an over-threshold similarity downgrades to `warning` unless
/// hard-fail is configured.
pub fn evaluate(
    comparisons: Vec<(String, CategorySimilarity)>,
    config: &PipelineConfig,
    seeds: &[SeedPattern],
    exhausted: bool,
) -> NoveltyAudit {
    if config.novelty_bypassed() {
        return NoveltyAudit {
            status: NoveltyStatus::Pass,
            threshold: config.novelty_threshold,
            comparisons: Vec::new(),
            top_match: None,
            divergence_constraints: Vec::new(),
            reason: "skipped".into(),
        };
    }

    let scored: Vec<SeedSimilarity> = comparisons
        .into_iter()
        .map(|(seed_id, categories)| SeedSimilarity {
            seed_id,
            overall: weighted_overall(&categories),
            categories: clamp(&categories),
        })
        .collect();

    let top = scored
        .iter()
        .max_by(|a, b| a.overall.total_cmp(&b.overall))
        .cloned();

    let (status, reason, constraints) = match &top {
        Some(top_seed) if top_seed.overall >= config.novelty_threshold => {
            let constraints = seeds
                .iter()
                .find(|s| s.id == top_seed.seed_id)
                .map(|s| divergence_constraints(s))
                .unwrap_or_default();
            let status = if exhausted && !config.novelty_hard_fail {
                NoveltyStatus::Warning
            } else {
                NoveltyStatus::Fail
            };
            (
                status,
                format!(
                    "similarity {:.3} to {} at/above threshold {:.3}",
                    top_seed.overall, top_seed.seed_id, config.novelty_threshold
                ),
                constraints,
            )
        }
        Some(top_seed) => (
            NoveltyStatus::Pass,
            format!(
                "top similarity {:.3} below threshold {:.3}",
                top_seed.overall, config.novelty_threshold
            ),
            Vec::new(),
        ),
        None => (
            NoveltyStatus::Pass,
            "no seed comparisons produced".into(),
            Vec::new(),
        ),
    };

    NoveltyAudit {
        status,
        threshold: config.novelty_threshold,
        comparisons: scored,
        top_match: top.map(|t| t.seed_id),
        divergence_constraints: constraints,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(v: f64) -> CategorySimilarity {
        CategorySimilarity {
            axis: v,
            mechanism: v,
            false_assumption: v,
            test_method: v,
            era: v,
            location: v,
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = AXIS_WEIGHT
            + MECHANISM_WEIGHT
            + FALSE_ASSUMPTION_WEIGHT
            + TEST_METHOD_WEIGHT
            + ERA_WEIGHT
            + LOCATION_WEIGHT;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_overall_is_weighted_sum() {
        let cats = CategorySimilarity {
            axis: 1.0,
            mechanism: 0.8,
            false_assumption: 0.6,
            test_method: 0.4,
            era: 0.2,
            location: 0.0,
        };
        let expected = 0.25 + 0.25 * 0.8 + 0.2 * 0.6 + 0.15 * 0.4 + 0.075 * 0.2;
        assert!((weighted_overall(&cats) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_overall_ignores_model_claims_and_clamps() {
        // Out-of-range model values are clamped before weighting.
        let audit = evaluate(
            vec![("seed-altered-clock".into(), flat(7.0))],
            &PipelineConfig::default(),
            &builtin_seeds(),
            false,
        );
        let comparison = &audit.comparisons[0];
        assert!((comparison.overall - 1.0).abs() < 1e-9);
        assert!((comparison.categories.axis - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_below_threshold_passes() {
        let audit = evaluate(
            vec![("seed-altered-clock".into(), flat(0.5))],
            &PipelineConfig::default(),
            &builtin_seeds(),
            false,
        );
        assert_eq!(audit.status, NoveltyStatus::Pass);
        assert!(audit.divergence_constraints.is_empty());
    }

    #[test]
    fn test_at_threshold_fails_first_attempt() {
        let audit = evaluate(
            vec![("seed-altered-clock".into(), flat(0.95))],
            &PipelineConfig::default(),
            &builtin_seeds(),
            false,
        );
        assert_eq!(audit.status, NoveltyStatus::Fail);
        assert_eq!(audit.top_match.as_deref(), Some("seed-altered-clock"));
        assert!(!audit.divergence_constraints.is_empty());
    }

    #[test]
    fn test_exhausted_soft_fail_downgrades_to_warning() {
        let audit = evaluate(
            vec![("seed-altered-clock".into(), flat(0.95))],
            &PipelineConfig::default(),
            &builtin_seeds(),
            true,
        );
        assert_eq!(audit.status, NoveltyStatus::Warning);
    }

    #[test]
    fn test_exhausted_hard_fail_stays_fail() {
        let config = PipelineConfig {
            novelty_hard_fail: true,
            ..PipelineConfig::default()
        };
        let audit = evaluate(
            vec![("seed-altered-clock".into(), flat(0.95))],
            &config,
            &builtin_seeds(),
            true,
        );
        assert_eq!(audit.status, NoveltyStatus::Fail);
    }

    #[test]
    fn test_skip_flag_bypasses() {
        let config = PipelineConfig {
            novelty_skip: true,
            ..PipelineConfig::default()
        };
        let audit = evaluate(
            vec![("seed-altered-clock".into(), flat(1.0))],
            &config,
            &builtin_seeds(),
            false,
        );
        assert_eq!(audit.status, NoveltyStatus::Pass);
        assert_eq!(audit.reason, "skipped");
    }

    #[test]
    fn test_threshold_at_or_above_one_bypasses() {
        let config = PipelineConfig {
            novelty_threshold: 1.0,
            ..PipelineConfig::default()
        };
        let audit = evaluate(
            vec![("seed-altered-clock".into(), flat(1.0))],
            &config,
            &builtin_seeds(),
            false,
        );
        assert_eq!(audit.status, NoveltyStatus::Pass);
    }

    #[test]
    fn test_top_match_selection() {
        let audit = evaluate(
            vec![
                ("seed-sealed-room".into(), flat(0.3)),
                ("seed-altered-clock".into(), flat(0.7)),
                ("seed-twin-substitution".into(), flat(0.5)),
            ],
            &PipelineConfig::default(),
            &builtin_seeds(),
            false,
        );
        assert_eq!(audit.top_match.as_deref(), Some("seed-altered-clock"));
    }

    #[test]
    fn test_structural_similarity_exact_match() {
        let cml = crate::guardrails::tests_support::test_cml();
        let seeds = builtin_seeds();
        let clock = seeds.iter().find(|s| s.id == "seed-altered-clock").unwrap();
        let sim = structural_similarity(&cml, clock);
        assert!((sim.axis - 1.0).abs() < 1e-9);
        assert!((sim.false_assumption - 1.0).abs() < 1e-9);
        assert!((sim.test_method - 1.0).abs() < 1e-9);
        assert!((sim.era - 1.0).abs() < 1e-9);
        assert!((sim.location - 1.0).abs() < 1e-9);
        // Exact structural echo of a seed scores well over the threshold.
        assert!(weighted_overall(&sim) >= 0.85);
    }

    #[test]
    fn test_divergence_constraints_invert_seed() {
        let seeds = builtin_seeds();
        let clock = seeds.iter().find(|s| s.id == "seed-altered-clock").unwrap();
        let constraints = divergence_constraints(clock);
        assert!(constraints.iter().any(|c| c.contains("temporal")));
        assert!(constraints.iter().any(|c| c.contains("clock_manipulation")));
    }
}
