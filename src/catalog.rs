//! Option/Package catalog: read-only reference data for the calculator
//!
//! The engine only reads this data; creation and updates belong to an
//! external catalog-management process. Missing entries surface as
//! [`EngineError::CatalogMissing`], never as silent substitutions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::types::{Model, ModelId, OptionId, OptionItem, Package};

/// Immutable price list consumed by the pricing calculator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    models: HashMap<ModelId, Model>,
    #[serde(default)]
    options: HashMap<OptionId, OptionItem>,
}

/// On-disk catalog layout (TOML arrays rather than keyed tables)
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    models: Vec<Model>,
    #[serde(default)]
    options: Vec<OptionItem>,
}

impl Catalog {
    pub fn new(models: Vec<Model>, options: Vec<OptionItem>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
            options: options.into_iter().map(|o| (o.id.clone(), o)).collect(),
        }
    }

    /// Load catalog reference data from a TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: CatalogFile = toml::from_str(&content)?;
        Ok(Self::new(file.models, file.options))
    }

    pub fn model(&self, id: &str) -> Option<&Model> {
        self.models.get(id)
    }

    pub fn option(&self, id: &str) -> Option<&OptionItem> {
        self.options.get(id)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Resolve a set of option ids to catalog items; any missing id is a
    /// hard error (catalog corruption, not a pricing concern)
    pub fn resolve_options<'a, I>(&self, ids: I) -> Result<Vec<&OptionItem>, EngineError>
    where
        I: IntoIterator<Item = &'a OptionId>,
    {
        ids.into_iter()
            .map(|id| {
                self.options.get(id).ok_or_else(|| EngineError::CatalogMissing {
                    kind: "option",
                    id: id.clone(),
                })
            })
            .collect()
    }

    /// Require a model to exist; used by session APIs that cannot proceed
    /// without one (pricing itself tolerates a missing model as all-zero)
    pub fn require_model(&self, id: &str) -> Result<&Model, EngineError> {
        self.models.get(id).ok_or_else(|| EngineError::CatalogMissing {
            kind: "model",
            id: id.to_string(),
        })
    }

    /// Built-in demo catalog used by the simulation driver and as a
    /// fallback when no catalog file is present
    pub fn demo() -> Self {
        let packages = vec![
            Package {
                key: "comfort".into(),
                name: "Comfort Package".into(),
                price_delta_cents: 350_000,
                includes: vec![
                    "Upgraded insulation".into(),
                    "Mini-split HVAC".into(),
                    "Blackout shades".into(),
                ],
            },
            Package {
                key: "offgrid".into(),
                name: "Off-Grid Package".into(),
                price_delta_cents: 1_250_000,
                includes: vec![
                    "6kW solar array".into(),
                    "Battery bank".into(),
                    "Composting toilet".into(),
                ],
            },
        ];

        let models = vec![
            Model {
                id: "meadowlark-20".into(),
                name: "Meadowlark 20".into(),
                base_price_cents: 6_000_000,
                beds: 1,
                baths: 1,
                square_feet: 400,
                features: vec![
                    "20ft steel chassis".into(),
                    "Full kitchen".into(),
                    "Queen loft".into(),
                ],
                packages: packages.clone(),
                option_ids: vec![
                    "opt-porch".into(),
                    "opt-washer".into(),
                    "opt-solar".into(),
                    "opt-no-loft".into(),
                ],
            },
            Model {
                id: "juniper-28".into(),
                name: "Juniper 28".into(),
                base_price_cents: 8_450_000,
                beds: 2,
                baths: 1,
                square_feet: 560,
                features: vec!["28ft chassis".into(), "Main-floor bedroom".into()],
                packages,
                option_ids: vec!["opt-porch".into(), "opt-washer".into(), "opt-solar".into()],
            },
        ];

        let options = vec![
            OptionItem {
                id: "opt-porch".into(),
                name: "Covered Porch".into(),
                price_delta_cents: 50_000,
                description: "6ft covered cedar porch".into(),
                category: "exterior".into(),
                is_package: false,
            },
            OptionItem {
                id: "opt-washer".into(),
                name: "Washer/Dryer Combo".into(),
                price_delta_cents: 180_000,
                description: "Ventless combo unit".into(),
                category: "appliances".into(),
                is_package: false,
            },
            OptionItem {
                id: "opt-solar".into(),
                name: "Solar Pre-Wire".into(),
                price_delta_cents: 95_000,
                description: "Roof conduit and inverter pad".into(),
                category: "electrical".into(),
                is_package: false,
            },
            OptionItem {
                id: "opt-no-loft".into(),
                name: "Delete Storage Loft".into(),
                price_delta_cents: -40_000,
                description: "Open ceiling in place of the secondary loft".into(),
                category: "interior".into(),
                is_package: false,
            },
        ];

        Self::new(models, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_catalog_lookups() {
        let catalog = Catalog::demo();
        assert_eq!(catalog.model_count(), 2);

        let model = catalog.model("meadowlark-20").unwrap();
        assert_eq!(model.base_price_cents, 6_000_000);
        assert_eq!(model.package("comfort").unwrap().price_delta_cents, 350_000);
        assert!(model.package("ghost").is_none());

        let option = catalog.option("opt-no-loft").unwrap();
        assert!(option.price_delta_cents < 0);
    }

    #[test]
    fn test_resolve_options_reports_missing() {
        let catalog = Catalog::demo();
        let ids: Vec<crate::types::OptionId> = vec!["opt-porch".into(), "opt-ghost".into()];

        let err = catalog.resolve_options(ids.iter()).unwrap_err();
        assert_eq!(
            err,
            EngineError::CatalogMissing {
                kind: "option",
                id: "opt-ghost".into()
            }
        );

        let ok_ids: Vec<crate::types::OptionId> = vec!["opt-porch".into()];
        let resolved = catalog.resolve_options(ok_ids.iter()).unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_require_model_missing() {
        let catalog = Catalog::demo();
        assert!(catalog.require_model("meadowlark-20").is_ok());
        assert!(catalog.require_model("ghost").unwrap_err().is_fatal());
    }

    #[test]
    fn test_catalog_file_roundtrip() {
        let toml_str = r#"
            [[models]]
            id = "m1"
            name = "Test Model"
            base_price_cents = 5000000
            beds = 1
            baths = 1
            square_feet = 380

            [[options]]
            id = "o1"
            name = "Test Option"
            price_delta_cents = 25000
        "#;
        let file: CatalogFile = toml::from_str(toml_str).unwrap();
        let catalog = Catalog::new(file.models, file.options);
        assert!(catalog.model("m1").is_some());
        assert_eq!(catalog.option("o1").unwrap().price_delta_cents, 25_000);
    }
}
