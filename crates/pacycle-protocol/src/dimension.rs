//! Dimension catalogue shared by the coordinator and every subsystem.
//!
//! The catalogue is opaque to the coordination protocol: it only feeds the
//! stimulus/action generator, which samples one value per dimension.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chunk::Payload;
use crate::ConfigError;

/// Value domain of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionKind {
    /// Finite set of values.
    Node { values: Vec<String> },
    Integer,
    Float,
    RangedInt { min: i64, max: i64 },
    RangedFloat { min: f64, max: f64 },
    #[serde(rename = "string")]
    Text {
        #[serde(default)]
        values: Vec<String>,
    },
    Meta,
}

const DEFAULT_WORDS: [&str; 8] = ["ABC", "XYZ", "CAT", "DOG", "WOW", "FOO", "BAR", "BAZ"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(flatten)]
    pub kind: DimensionKind,
}

impl Dimension {
    pub fn new(name: impl Into<String>, kind: DimensionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Draw one value from this dimension's domain.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Value {
        match &self.kind {
            DimensionKind::Node { values } => match values.len() {
                0 => Value::Null,
                n => Value::from(values[rng.gen_range(0..n)].clone()),
            },
            DimensionKind::Integer => Value::from(rng.gen_range(0..1_000_000i64)),
            DimensionKind::Float => Value::from(rng.gen::<f64>()),
            DimensionKind::RangedInt { min, max } if min <= max => {
                Value::from(rng.gen_range(*min..=*max))
            }
            DimensionKind::RangedInt { min, .. } => Value::from(*min),
            DimensionKind::RangedFloat { min, max } => {
                Value::from(min + rng.gen::<f64>() * (max - min))
            }
            DimensionKind::Text { values } => {
                if values.is_empty() {
                    Value::from(DEFAULT_WORDS[rng.gen_range(0..DEFAULT_WORDS.len())])
                } else {
                    Value::from(values[rng.gen_range(0..values.len())].clone())
                }
            }
            DimensionKind::Meta => Value::from("meta"),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("dimension with empty name".into()));
        }
        match &self.kind {
            DimensionKind::Node { values } if values.is_empty() => Err(ConfigError::Invalid(
                format!("node dimension `{}` has no values", self.name),
            )),
            DimensionKind::RangedInt { min, max } if min > max => Err(ConfigError::Invalid(
                format!("dimension `{}`: min {min} > max {max}", self.name),
            )),
            DimensionKind::RangedFloat { min, max } if min > max || min.is_nan() || max.is_nan() => {
                Err(ConfigError::Invalid(format!(
                    "dimension `{}`: min {min} > max {max}",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Ordered set of dimensions, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionCatalogue {
    dimensions: Vec<Dimension>,
}

impl DimensionCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension. A later dimension with the same name replaces the
    /// earlier one in place.
    pub fn push(&mut self, dimension: Dimension) {
        match self.dimensions.iter_mut().find(|d| d.name == dimension.name) {
            Some(existing) => *existing = dimension,
            None => self.dimensions.push(dimension),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter()
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// One sampled value per dimension.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Payload {
        self.dimensions
            .iter()
            .map(|d| (d.name.clone(), d.sample(rng)))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for d in &self.dimensions {
            if !seen.insert(d.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate dimension `{}`", d.name)));
            }
            d.validate()?;
        }
        Ok(())
    }
}

impl FromIterator<Dimension> for DimensionCatalogue {
    fn from_iter<T: IntoIterator<Item = Dimension>>(iter: T) -> Self {
        let mut catalogue = DimensionCatalogue::new();
        for d in iter {
            catalogue.push(d);
        }
        catalogue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalogue() -> DimensionCatalogue {
        [
            Dimension::new(
                "color",
                DimensionKind::Node {
                    values: vec!["red".into(), "green".into()],
                },
            ),
            Dimension::new("level", DimensionKind::RangedInt { min: 1, max: 3 }),
            Dimension::new("gain", DimensionKind::RangedFloat { min: 0.5, max: 0.75 }),
            Dimension::new("label", DimensionKind::Text { values: vec![] }),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_sample_stays_in_domain() {
        let cat = catalogue();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let p = cat.sample(&mut rng);
            assert_eq!(p.len(), 4);
            assert!(["red", "green"].contains(&p["color"].as_str().unwrap()));
            let level = p["level"].as_i64().unwrap();
            assert!((1..=3).contains(&level));
            let gain = p["gain"].as_f64().unwrap();
            assert!((0.5..=0.75).contains(&gain));
            assert!(DEFAULT_WORDS.contains(&p["label"].as_str().unwrap()));
        }
    }

    #[test]
    fn test_push_replaces_same_name() {
        let mut cat = catalogue();
        cat.push(Dimension::new("level", DimensionKind::Integer));
        assert_eq!(cat.len(), 4);
        assert_eq!(cat.get("level").unwrap().kind, DimensionKind::Integer);
        assert_eq!(cat.names().collect::<Vec<_>>(), vec!["color", "level", "gain", "label"]);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let cat: DimensionCatalogue =
            [Dimension::new("x", DimensionKind::RangedInt { min: 5, max: 1 })].into_iter().collect();
        assert!(matches!(cat.validate(), Err(ConfigError::Invalid(_))));

        let cat: DimensionCatalogue =
            [Dimension::new("y", DimensionKind::Node { values: vec![] })].into_iter().collect();
        assert!(matches!(cat.validate(), Err(ConfigError::Invalid(_))));
    }
}
