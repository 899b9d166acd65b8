//! Cost admission gate.
//!
//! A research task is estimated before it starts: agent count times the
//! per-agent token budget, priced per thousand tokens. Estimates strictly
//! below the auto-approve threshold proceed; anything else needs an explicit
//! override. The gate is a pure function of its settings and inputs.

use super::context::ExecutionMode;
use crate::utils::toml_config::AdmissionConfig;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Projected resource use of one research task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CostEstimate {
    pub agent_count: u32,
    pub estimated_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// The gate's verdict. Returned to the submitter whether or not the task runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AdmissionDecision {
    pub estimated_cost_usd: f64,
    pub agent_count: u32,
    pub estimated_tokens: u64,
    pub threshold_usd: f64,
    pub should_proceed: bool,
    /// True only when the estimate alone was enough.
    pub auto_approved: bool,
    pub cost_override: bool,
    pub reasoning: String,
}

pub struct AdmissionGate {
    settings: AdmissionConfig,
}

impl AdmissionGate {
    pub fn new(settings: AdmissionConfig) -> Self {
        Self { settings }
    }

    pub fn estimate(&self, mode: ExecutionMode) -> CostEstimate {
        let agent_count = match mode {
            ExecutionMode::SingleAgent => self.settings.single_agent_count,
            ExecutionMode::MultiAgent => self.settings.multi_agent_count,
        };
        let estimated_tokens = agent_count as u64 * self.settings.tokens_per_agent;
        let cost = estimated_tokens as f64 / 1000.0 * self.settings.usd_per_1k_tokens;

        CostEstimate {
            agent_count,
            estimated_tokens,
            estimated_cost_usd: round_usd(cost),
        }
    }

    pub fn evaluate(&self, mode: ExecutionMode, cost_override: bool) -> AdmissionDecision {
        self.decide(&self.estimate(mode), cost_override)
    }

    /// Decide on an externally produced estimate.
    pub fn decide(&self, estimate: &CostEstimate, cost_override: bool) -> AdmissionDecision {
        let threshold = self.settings.auto_approve_threshold_usd;
        let auto_approved = estimate.estimated_cost_usd < threshold;
        let should_proceed = auto_approved || cost_override;

        let reasoning = if auto_approved {
            format!(
                "Estimated cost ${:.2} for {} agent(s) is below the ${:.2} auto-approve threshold",
                estimate.estimated_cost_usd, estimate.agent_count, threshold
            )
        } else if cost_override {
            format!(
                "Estimated cost ${:.2} for {} agent(s) meets or exceeds the ${:.2} threshold; approved by cost override",
                estimate.estimated_cost_usd, estimate.agent_count, threshold
            )
        } else {
            format!(
                "Estimated cost ${:.2} for {} agent(s) meets or exceeds the ${:.2} threshold; resubmit with a cost override to proceed",
                estimate.estimated_cost_usd, estimate.agent_count, threshold
            )
        };

        AdmissionDecision {
            estimated_cost_usd: estimate.estimated_cost_usd,
            agent_count: estimate.agent_count,
            estimated_tokens: estimate.estimated_tokens,
            threshold_usd: threshold,
            should_proceed,
            auto_approved,
            cost_override,
            reasoning,
        }
    }
}

fn round_usd(cost: f64) -> f64 {
    (cost * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn gate() -> AdmissionGate {
        AdmissionGate::new(AdmissionConfig::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn multi_agent_default_estimate() {
        let decision = gate().evaluate(ExecutionMode::MultiAgent, false);
        assert_eq!(decision.agent_count, 5);
        assert_eq!(decision.estimated_tokens, 20_000);
        assert!(approx(decision.estimated_cost_usd, 0.10));
        assert!(decision.should_proceed);
        assert!(decision.auto_approved);
    }

    #[test]
    fn single_agent_default_estimate() {
        let decision = gate().evaluate(ExecutionMode::SingleAgent, false);
        assert_eq!(decision.agent_count, 1);
        assert_eq!(decision.estimated_tokens, 4_000);
        assert!(approx(decision.estimated_cost_usd, 0.02));
        assert!(decision.should_proceed);
    }

    #[rstest]
    #[case(0.49, false, true, true)]
    #[case(0.50, false, false, false)]
    #[case(0.75, false, false, false)]
    #[case(0.50, true, true, false)]
    #[case(0.75, true, true, false)]
    #[case(0.10, true, true, true)]
    fn threshold_and_override(
        #[case] cost: f64,
        #[case] cost_override: bool,
        #[case] proceeds: bool,
        #[case] auto: bool,
    ) {
        let estimate = CostEstimate {
            agent_count: 5,
            estimated_tokens: 0,
            estimated_cost_usd: cost,
        };
        let decision = gate().decide(&estimate, cost_override);
        assert_eq!(decision.should_proceed, proceeds);
        assert_eq!(decision.auto_approved, auto);
        assert!(!decision.reasoning.is_empty());
    }

    #[test]
    fn rejection_explains_how_to_proceed() {
        let estimate = CostEstimate {
            agent_count: 5,
            estimated_tokens: 150_000,
            estimated_cost_usd: 0.75,
        };
        let decision = gate().decide(&estimate, false);
        assert!(!decision.should_proceed);
        assert!(decision.reasoning.contains("cost override"));
    }

    #[test]
    fn pricing_follows_settings() {
        let gate = AdmissionGate::new(AdmissionConfig {
            usd_per_1k_tokens: 0.05,
            ..AdmissionConfig::default()
        });
        let decision = gate.evaluate(ExecutionMode::MultiAgent, false);
        assert!(approx(decision.estimated_cost_usd, 1.0));
        assert!(!decision.should_proceed);
    }
}
