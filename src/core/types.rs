use serde::{Serialize, Serializer};

pub const DEFAULT_MAX_YEARS: u32 = 50;

/// Portfolio size needed to sustain the spending target forever.
///
/// `Unreachable` stands in for an infinite target: the real withdrawal rate
/// is zero or negative, so no finite balance ever qualifies.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FireNumber {
    Target(f64),
    Unreachable,
}

impl FireNumber {
    pub fn value(self) -> Option<f64> {
        match self {
            FireNumber::Target(v) => Some(v),
            FireNumber::Unreachable => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        self.value().unwrap_or(f64::INFINITY)
    }

    pub fn is_reached_by(self, balance: f64) -> bool {
        match self {
            FireNumber::Target(target) => balance >= target,
            FireNumber::Unreachable => false,
        }
    }
}

impl Serialize for FireNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FireNumber::Target(v) => serializer.serialize_f64(*v),
            FireNumber::Unreachable => serializer.serialize_none(),
        }
    }
}

/// Inputs to the deterministic projector. Rates are in percent (7 = 7%).
#[derive(Debug, Clone)]
pub struct ProjectionParameters {
    pub current_net_worth: f64,
    pub annual_savings: f64,
    pub annual_expenses: f64,
    pub expected_return: f64,
    pub inflation: f64,
    pub withdrawal_rate: f64,
    pub max_years: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub fire_number: FireNumber,
    pub years_to_fire: Option<u32>,
    pub projection_data: Vec<f64>,
    pub never_reached: bool,
}

/// Inputs to the Monte Carlo simulator. Rates are in percent.
#[derive(Debug, Clone)]
pub struct SimulationParameters {
    pub current_net_worth: f64,
    pub annual_savings: f64,
    pub annual_expenses: f64,
    pub expected_return: f64,
    pub inflation: f64,
    pub withdrawal_rate: f64,
    pub volatility: f64,
    pub current_age: u32,
    pub retirement_age: u32,
    pub retirement_duration: u32,
    pub simulation_count: u32,
    pub seed: u64,
}

impl SimulationParameters {
    pub fn years_to_retirement(&self) -> u32 {
        self.retirement_age.saturating_sub(self.current_age)
    }

    pub fn total_years(&self) -> u32 {
        self.years_to_retirement() + self.retirement_duration
    }

    /// Deterministic counterpart covering the same horizon as the simulation.
    pub fn projection_parameters(&self) -> ProjectionParameters {
        ProjectionParameters {
            current_net_worth: self.current_net_worth,
            annual_savings: self.annual_savings,
            annual_expenses: self.annual_expenses,
            expected_return: self.expected_return,
            inflation: self.inflation,
            withdrawal_rate: self.withdrawal_rate,
            max_years: self.total_years(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PercentileBands {
    pub p10: Vec<f64>,
    pub p25: Vec<f64>,
    pub p50: Vec<f64>,
    pub p75: Vec<f64>,
    pub p90: Vec<f64>,
}

impl PercentileBands {
    pub fn with_capacity(years: usize) -> Self {
        Self {
            p10: Vec::with_capacity(years),
            p25: Vec::with_capacity(years),
            p50: Vec::with_capacity(years),
            p75: Vec::with_capacity(years),
            p90: Vec::with_capacity(years),
        }
    }

    pub fn len(&self) -> usize {
        self.p50.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p50.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub success_rate: f64,
    pub percentiles: PercentileBands,
    pub years_to_retirement: u32,
    pub total_years: u32,
    pub simulation_count: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub projection: ProjectionResult,
    pub simulation: SimulationResult,
    pub fire_age: Option<u32>,
    pub retirement_year_index: u32,
}
