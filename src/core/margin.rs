use crate::domain::model::{MarginInput, MarginRecord};
use crate::utils::error::{EtlError, Result};
use serde::{Deserialize, Serialize};

/// Coefficients of the transaction-cost model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostCoefficients {
    /// Cost per kilometre to market.
    pub per_km: f64,
    /// Scale of the `1 / (road_density + 1)` access term.
    pub road_access: f64,
    /// Flat penalty when no storage is available.
    pub no_storage_penalty: f64,
}

impl Default for CostCoefficients {
    fn default() -> Self {
        Self {
            per_km: 0.5,
            road_access: 10.0,
            no_storage_penalty: 15.0,
        }
    }
}

impl CostCoefficients {
    pub fn transaction_cost(&self, input: &MarginInput) -> f64 {
        let storage = if input.has_storage() { 1.0 } else { 0.0 };
        self.per_km * input.distance_to_market_km
            + self.road_access / (input.road_density + 1.0)
            + self.no_storage_penalty * (1.0 - storage)
    }
}

fn check_input(row: usize, input: &MarginInput) -> Result<()> {
    let fail = |reason: &str| {
        Err(EtlError::validation(format!(
            "margin row {} ({}): {}",
            row, input.commodity, reason
        )))
    };

    if !input.price_farm.is_finite() || !input.price_retail.is_finite() {
        return fail("prices must be finite numbers");
    }
    if !input.distance_to_market_km.is_finite() || input.distance_to_market_km < 0.0 {
        return fail("distance_to_market_km must be >= 0");
    }
    if !input.road_density.is_finite() || input.road_density <= -1.0 {
        return fail("road_density must be greater than -1");
    }
    if input.storage_availability > 1 {
        return fail("storage_availability must be 0 or 1");
    }
    Ok(())
}

pub fn compute_margin(input: &MarginInput, coefficients: &CostCoefficients) -> MarginRecord {
    let gross_margin = input.price_retail - input.price_farm;
    let transaction_cost = coefficients.transaction_cost(input);

    MarginRecord {
        commodity: input.commodity.clone(),
        price_farm: input.price_farm,
        price_retail: input.price_retail,
        distance_to_market_km: input.distance_to_market_km,
        road_density: input.road_density,
        storage_availability: input.storage_availability,
        gross_margin,
        transaction_cost,
        net_margin: gross_margin - transaction_cost,
    }
}

/// Validates every row first; rows are numbered from 1.
pub fn compute_margins(
    inputs: &[MarginInput],
    coefficients: &CostCoefficients,
) -> Result<Vec<MarginRecord>> {
    for (i, input) in inputs.iter().enumerate() {
        check_input(i + 1, input)?;
    }
    Ok(inputs
        .iter()
        .map(|input| compute_margin(input, coefficients))
        .collect())
}

/// Demo value-chain rows used when the project has no margin input file yet.
pub fn sample_inputs() -> Vec<MarginInput> {
    let row = |commodity: &str, farm, retail, km, density, storage| MarginInput {
        commodity: commodity.to_string(),
        price_farm: farm,
        price_retail: retail,
        distance_to_market_km: km,
        road_density: density,
        storage_availability: storage,
    };

    vec![
        row("maize", 40.0, 65.0, 80.0, 2.0, 1),
        row("maize", 42.0, 67.0, 150.0, 0.5, 0),
        row("rice", 60.0, 100.0, 60.0, 1.2, 1),
    ]
}

pub fn read_inputs(data: &[u8]) -> Result<Vec<MarginInput>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut inputs = Vec::new();
    for row in reader.deserialize() {
        inputs.push(row?);
    }
    Ok(inputs)
}
