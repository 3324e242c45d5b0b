use serde::{Deserialize, Serialize};
use shared::DiseaseCategory;

/// Default acceptance threshold on the 0..100 confidence scale.
pub const CONFIDENCE_THRESHOLD: f32 = 60.0;

/// Rule ordering used when collapsing raw model labels.
///
/// `Source` keeps the historical order where the generic "blight" rule runs
/// before "late_blight", so every late blight label reports as Leaf Blight.
/// `SpecificFirst` evaluates "late_blight" ahead of the generic rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyOrder {
    #[default]
    Source,
    SpecificFirst,
}

impl TaxonomyOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomyOrder::Source => "source",
            TaxonomyOrder::SpecificFirst => "specific_first",
        }
    }
}

type Rule = (&'static [&'static str], DiseaseCategory);

const HEALTHY: Rule = (&["healthy"], DiseaseCategory::Healthy);
const BLACK_ROT: Rule = (&["black"], DiseaseCategory::BlackRot);
const LEAF_BLIGHT: Rule = (
    &["early_blight", "leaf_blight", "blight"],
    DiseaseCategory::LeafBlight,
);
const RUST: Rule = (&["rust"], DiseaseCategory::Rust);
const MOSAIC: Rule = (&["mosaic", "virus", "curl"], DiseaseCategory::Mosaic);
const LATE_BLIGHT: Rule = (&["late_blight"], DiseaseCategory::LateBlight);

const SOURCE_RULES: [Rule; 6] = [HEALTHY, BLACK_ROT, LEAF_BLIGHT, RUST, MOSAIC, LATE_BLIGHT];
const SPECIFIC_FIRST_RULES: [Rule; 6] =
    [HEALTHY, BLACK_ROT, LATE_BLIGHT, LEAF_BLIGHT, RUST, MOSAIC];

/// Maps raw model labels onto the canonical taxonomy and applies the
/// confidence gate.
#[derive(Debug, Clone, Copy)]
pub struct Taxonomy {
    order: TaxonomyOrder,
    threshold: f32,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::new(TaxonomyOrder::Source, CONFIDENCE_THRESHOLD)
    }
}

impl Taxonomy {
    pub fn new(order: TaxonomyOrder, threshold: f32) -> Self {
        Self { order, threshold }
    }

    pub fn order(&self) -> TaxonomyOrder {
        self.order
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn rules(&self) -> &'static [Rule] {
        match self.order {
            TaxonomyOrder::Source => &SOURCE_RULES,
            TaxonomyOrder::SpecificFirst => &SPECIFIC_FIRST_RULES,
        }
    }

    /// Case-insensitive substring match, first rule wins. Spaces and hyphens
    /// count as underscores, so "Late Blight" and "late_blight" are the same.
    pub fn normalize_label(&self, raw_label: &str) -> DiseaseCategory {
        let label = raw_label.to_lowercase().replace([' ', '-'], "_");
        self.rules()
            .iter()
            .find(|(patterns, _)| patterns.iter().any(|p| label.contains(p)))
            .map(|(_, category)| *category)
            .unwrap_or(DiseaseCategory::Unknown)
    }

    /// `confidence` is on the 0..100 scale and must not be rounded yet. The
    /// boundary is accepted.
    pub fn is_accepted(&self, category: DiseaseCategory, confidence: f32) -> bool {
        if category == DiseaseCategory::Unknown {
            return false;
        }
        confidence >= self.threshold
    }
}

/// Rescales a 0..1 score to percent, rounded to two decimals.
pub fn to_percent(score: f32) -> f32 {
    ((score as f64 * 100.0 * 100.0).round() / 100.0) as f32
}
