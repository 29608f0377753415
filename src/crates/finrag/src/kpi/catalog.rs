//! Declarative KPI catalog: topic → ordered KPIs with formulas and inputs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::formula::Formula;
use crate::error::{FinragError, Result};

const BUILTIN_CATALOG: &str = include_str!("../../assets/kpis.toml");

/// A value a formula needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiInput {
    /// Identifier used in the formula
    pub name: String,
    /// What to look up in the filing
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub name: String,
    pub formula: String,
    #[serde(default)]
    pub unit: String,
    pub inputs: Vec<KpiInput>,
}

impl KpiDefinition {
    pub fn parsed_formula(&self) -> Result<Formula> {
        Formula::parse(&self.formula)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiTopic {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kpis: Vec<KpiDefinition>,
}

impl KpiTopic {
    /// Distinct inputs across the topic's KPIs, first use first
    pub fn inputs(&self) -> Vec<&KpiInput> {
        let mut seen: Vec<&KpiInput> = Vec::new();
        for input in self.kpis.iter().flat_map(|k| &k.inputs) {
            if !seen.iter().any(|s| s.name == input.name) {
                seen.push(input);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiCatalog {
    pub topics: Vec<KpiTopic>,
}

impl KpiCatalog {
    /// The catalog shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let catalog: KpiCatalog = toml::from_str(text)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            FinragError::Kpi(format!("cannot read KPI catalog {}: {e}", path.display()))
        })?;
        let catalog = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), topics = catalog.topics.len(), "KPI catalog loaded");
        Ok(catalog)
    }

    /// Configured catalog, or the built-in one
    pub async fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path).await,
            None => Self::builtin(),
        }
    }

    /// Every formula parses and reads only declared inputs
    fn validate(&self) -> Result<()> {
        for topic in &self.topics {
            for kpi in &topic.kpis {
                let formula = kpi.parsed_formula()?;
                let undeclared: Vec<String> = formula
                    .variables()
                    .into_iter()
                    .filter(|v| !kpi.inputs.iter().any(|i| &i.name == v))
                    .collect();
                if !undeclared.is_empty() {
                    return Err(FinragError::Kpi(format!(
                        "KPI '{}' in topic '{}' uses undeclared inputs: {}",
                        kpi.name,
                        topic.name,
                        undeclared.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }

    /// Topic by name, ignoring case
    pub fn topic(&self, name: &str) -> Option<&KpiTopic> {
        let name = name.trim();
        self.topics.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn topic_names(&self) -> Vec<&str> {
        self.topics.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = KpiCatalog::builtin().unwrap();
        assert!(catalog.topic_names().contains(&"Profitability"));
        let liquidity = catalog.topic("liquidity").unwrap();
        assert_eq!(liquidity.kpis[0].name, "Current ratio");

        let profitability = catalog.topic("Profitability").unwrap();
        let names: Vec<&str> = profitability.inputs().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "revenue").count(), 1);
    }

    #[test]
    fn test_undeclared_input_rejected() {
        let text = r#"
            [[topics]]
            name = "Broken"
            [[topics.kpis]]
            name = "Margin"
            formula = "profit / sales"
            inputs = [{ name = "profit", description = "profit" }]
        "#;
        let err = KpiCatalog::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("sales"));
    }

    #[tokio::test]
    async fn test_load_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kpis.toml");
        tokio::fs::write(
            &path,
            r#"
            [[topics]]
            name = "Custom"
            [[topics.kpis]]
            name = "Payout"
            formula = "dividends / net_income"
            unit = "x"
            inputs = [
                { name = "dividends", description = "dividends paid" },
                { name = "net_income", description = "net income" },
            ]
            "#,
        )
        .await
        .unwrap();

        let catalog = KpiCatalog::load_or_builtin(Some(&path)).await.unwrap();
        assert_eq!(catalog.topic_names(), vec!["Custom"]);
        assert!(KpiCatalog::load(&dir.path().join("missing.toml")).await.is_err());
    }
}
