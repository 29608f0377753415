//! KPI analysis: catalog, formulas and computed results.
//!
//! The analysis branch resolves every input of a topic's KPIs through one
//! RAG question each, then evaluates the formulas here. A KPI whose inputs
//! could not all be found, or whose formula divides by zero, is reported
//! uncomputed with the reason.

pub mod catalog;
pub mod formula;

pub use catalog::{KpiCatalog, KpiDefinition, KpiInput, KpiTopic};
pub use formula::{EvalError, Formula};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A resolved input value and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiInputValue {
    pub name: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiResult {
    pub topic: String,
    pub name: String,
    pub formula: String,
    pub unit: String,
    /// `None` when the KPI could not be computed
    pub value: Option<f64>,
    pub inputs: Vec<KpiInputValue>,
    /// Inputs without a value
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl KpiResult {
    /// One line for the final answer
    pub fn render(&self) -> String {
        match self.value {
            Some(value) => format!("- {}: {value:.2}{} ({})", self.name, unit_suffix(&self.unit), self.formula),
            None => format!(
                "- {}: not computed ({})",
                self.name,
                self.note.as_deref().unwrap_or("insufficient data")
            ),
        }
    }

    pub fn citations(&self) -> impl Iterator<Item = &String> {
        self.inputs.iter().flat_map(|i| i.citations.iter())
    }
}

fn unit_suffix(unit: &str) -> String {
    match unit {
        "" => String::new(),
        "%" => "%".to_string(),
        other => format!(" {other}"),
    }
}

/// Evaluate `kpi` over the resolved inputs of its topic
pub fn compute(topic: &str, kpi: &KpiDefinition, resolved: &HashMap<String, KpiInputValue>) -> KpiResult {
    let inputs: Vec<KpiInputValue> = kpi
        .inputs
        .iter()
        .map(|input| {
            resolved.get(&input.name).cloned().unwrap_or(KpiInputValue {
                name: input.name.clone(),
                value: None,
                citations: Vec::new(),
            })
        })
        .collect();
    let values: HashMap<String, f64> = inputs
        .iter()
        .filter_map(|i| i.value.map(|v| (i.name.clone(), v)))
        .collect();

    let mut result = KpiResult {
        topic: topic.to_string(),
        name: kpi.name.clone(),
        formula: kpi.formula.clone(),
        unit: kpi.unit.clone(),
        value: None,
        inputs,
        missing: Vec::new(),
        note: None,
    };

    match kpi.parsed_formula() {
        Err(err) => result.note = Some(err.to_string()),
        Ok(formula) => match formula.evaluate(&values) {
            Ok(value) => result.value = Some(value),
            Err(EvalError::Missing(missing)) => {
                result.note = Some(format!("missing {}", missing.join(", ")));
                result.missing = missing;
            }
            Err(err @ EvalError::DivisionByZero) => result.note = Some(err.to_string()),
        },
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(pairs: &[(&str, Option<f64>)]) -> HashMap<String, KpiInputValue> {
        pairs
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    KpiInputValue {
                        name: name.to_string(),
                        value: *value,
                        citations: vec![format!("doc-{name}")],
                    },
                )
            })
            .collect()
    }

    fn current_ratio() -> KpiDefinition {
        KpiCatalog::builtin()
            .unwrap()
            .topic("Liquidity")
            .unwrap()
            .kpis[0]
            .clone()
    }

    #[test]
    fn test_compute_with_all_inputs() {
        let result = compute(
            "Liquidity",
            &current_ratio(),
            &resolved(&[("current_assets", Some(150.0)), ("current_liabilities", Some(100.0))]),
        );
        assert_eq!(result.value, Some(1.5));
        assert!(result.missing.is_empty());
        assert_eq!(result.render(), "- Current ratio: 1.50 x (current_assets / current_liabilities)");
        assert_eq!(result.citations().count(), 2);
    }

    #[test]
    fn test_missing_input_is_uncomputed() {
        let result = compute(
            "Liquidity",
            &current_ratio(),
            &resolved(&[("current_assets", Some(150.0)), ("current_liabilities", None)]),
        );
        assert_eq!(result.value, None);
        assert_eq!(result.missing, vec!["current_liabilities"]);
        assert!(result.render().contains("not computed (missing current_liabilities)"));
    }

    #[test]
    fn test_division_by_zero_is_uncomputed() {
        let result = compute(
            "Liquidity",
            &current_ratio(),
            &resolved(&[("current_assets", Some(150.0)), ("current_liabilities", Some(0.0))]),
        );
        assert_eq!(result.value, None);
        assert!(result.missing.is_empty());
        assert_eq!(result.note.as_deref(), Some("division by zero"));
    }
}
