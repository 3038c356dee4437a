use std::{collections::HashSet, fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::Country;

const FLAG_COUNTRIES: &[(&str, &str)] = &[
    ("France", "France"),
    ("Germany", "Allemagne"),
    ("Italy", "Italie"),
    ("Spain", "Espagne"),
    ("Portugal", "Portugal"),
    ("Belgium", "Belgique"),
    ("Sweden", "Suède"),
    ("Norway", "Norvège"),
    ("Austria", "Autriche"),
    ("Switzerland", "Suisse"),
    ("Greece", "Grèce"),
    ("Turkey", "Turquie"),
    ("Russia", "Russie"),
    ("Republic of Ireland", "Irlande"),
    ("United Kingdom", "Royaume-Uni"),
    ("Malta", "Malte"),
    ("Croatia", "Croatie"),
    ("Albania", "Albanie"),
    ("Jamaica", "Jamaïque"),
    ("Republic of India", "Inde"),
    ("Canada", "Canada"),
    ("United States of America", "États-Unis d'Amérique"),
    ("Argentina", "Argentine"),
    ("Peru", "Pérou"),
    ("Chile", "Chili"),
    ("Japan", "Japon"),
    ("Syria", "Syrie"),
    ("Saudi Arabia", "Arabie Saoudite"),
    ("Korea", "Corée du Sud"),
    ("North Korea", "Corée du Nord"),
    ("Brazil", "Brésil"),
    ("South Africa", "Afrique du Sud"),
    ("Algeria", "Algérie"),
    ("Morocco", "Maroc"),
    ("Tunisia", "Tunisie"),
    ("China", "Chine"),
    ("Colombia", "Colombie"),
    ("Ecuador", "Équateur"),
    ("Paraguay", "Paraguay"),
    ("Vietnam", "Vietnam"),
    ("Mexico", "Mexique"),
    ("Egypt", "Égypte"),
    ("Sri Lanka", "Sri Lanka"),
    ("Cambodia", "Cambodge"),
    ("Thailand", "Thaïlande"),
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog must contain at least one country")]
    Empty,
    #[error("country '{0}' appears more than once in the catalog")]
    Duplicate(String),
    #[error("invalid catalog file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read catalog '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    countries: Vec<Country>,
}

/// Fixed, ordered, deduplicated set of countries a game draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    countries: Vec<Country>,
}

impl Catalog {
    pub fn new(countries: Vec<Country>) -> Result<Self, CatalogError> {
        if countries.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::with_capacity(countries.len());
        for country in &countries {
            if !seen.insert(country.name.as_str()) {
                return Err(CatalogError::Duplicate(country.name.clone()));
            }
        }

        Ok(Self { countries })
    }

    /// The built-in catalog with French labels.
    pub fn flags() -> Self {
        Self {
            countries: FLAG_COUNTRIES
                .iter()
                .map(|(name, label)| Country::new(*name, *label))
                .collect(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        Self::new(file.countries)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Country> {
        self.countries.iter().find(|country| country.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Country> {
        self.countries.iter()
    }
}
