//! Whitelist of knowledge-base properties the fact fetcher accepts.
//!
//! Requests for properties outside the catalog are dropped, not errored;
//! an empty surviving filter is a rejection.

use std::collections::BTreeMap;

use crate::types::PropertyId;

/// Catalog of accepted property ids with their English labels.
#[derive(Debug, Clone)]
pub struct PropertyCatalog {
    labels: BTreeMap<String, &'static str>,
}

impl PropertyCatalog {
    /// Create the standard property catalog.
    pub fn standard() -> Self {
        let mut labels = BTreeMap::new();

        // Identity validation
        labels.insert("P31".to_string(), "instance of");
        labels.insert("P279".to_string(), "subclass of");

        // People
        labels.insert("P569".to_string(), "date of birth");
        labels.insert("P570".to_string(), "date of death");
        labels.insert("P19".to_string(), "place of birth");
        labels.insert("P20".to_string(), "place of death");
        labels.insert("P27".to_string(), "country of citizenship");
        labels.insert("P106".to_string(), "occupation");
        labels.insert("P39".to_string(), "position held");
        labels.insert("P108".to_string(), "employer");
        labels.insert("P69".to_string(), "educated at");
        labels.insert("P166".to_string(), "award received");
        labels.insert("P800".to_string(), "notable work");
        labels.insert("P1412".to_string(), "languages spoken, written or signed");

        // Places
        labels.insert("P17".to_string(), "country");
        labels.insert("P36".to_string(), "capital");
        labels.insert(
            "P131".to_string(),
            "located in the administrative territorial entity",
        );
        labels.insert("P30".to_string(), "continent");
        labels.insert("P37".to_string(), "official language");
        labels.insert("P38".to_string(), "currency");
        labels.insert("P47".to_string(), "shares border with");
        labels.insert("P1082".to_string(), "population");
        labels.insert("P6".to_string(), "head of government");
        labels.insert("P35".to_string(), "head of state");

        // Organizations
        labels.insert("P112".to_string(), "founded by");
        labels.insert("P571".to_string(), "inception");
        labels.insert("P159".to_string(), "headquarters location");
        labels.insert("P169".to_string(), "chief executive officer");
        labels.insert("P463".to_string(), "member of");
        labels.insert("P361".to_string(), "part of");

        // Works
        labels.insert("P50".to_string(), "author");
        labels.insert("P57".to_string(), "director");
        labels.insert("P175".to_string(), "performer");
        labels.insert("P577".to_string(), "publication date");

        Self { labels }
    }

    /// Check if a property id is in the catalog. Case-insensitive.
    pub fn is_valid(&self, id: &str) -> bool {
        self.labels.contains_key(id.trim().to_uppercase().as_str())
    }

    /// English label for a catalog property.
    pub fn label(&self, id: &PropertyId) -> Option<&'static str> {
        self.labels.get(id.as_str()).copied()
    }

    /// Normalize a requested filter: trim, uppercase, drop unknown ids,
    /// deduplicate preserving request order. An empty return means no
    /// requested property survived.
    pub fn sanitize(&self, requested: &[PropertyId]) -> Vec<PropertyId> {
        let mut out: Vec<PropertyId> = Vec::new();
        for p in requested {
            let normalized = PropertyId::new(p.as_str());
            if self.labels.contains_key(normalized.as_str()) && !out.contains(&normalized) {
                out.push(normalized);
            }
        }
        out
    }

    /// Catalog size.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Ids with labels, numerically ordered, for the opening prompt.
    pub fn prompt_listing(&self) -> String {
        let mut ids: Vec<&String> = self.labels.keys().collect();
        ids.sort_by_key(|id| id[1..].parse::<u32>().unwrap_or(u32::MAX));
        ids.iter()
            .map(|id| format!("{} {}", id, self.labels[id.as_str()]))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for PropertyCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_has_identity_properties() {
        let catalog = PropertyCatalog::standard();
        assert!(catalog.is_valid("P31"));
        assert!(catalog.is_valid("P279"));
        assert_eq!(catalog.label(&PropertyId::new("P108")), Some("employer"));
        assert_eq!(catalog.label(&PropertyId::new("P36")), Some("capital"));
    }

    #[test]
    fn test_is_valid_normalizes_case() {
        let catalog = PropertyCatalog::standard();
        assert!(catalog.is_valid(" p569 "));
        assert!(!catalog.is_valid("P9999999"));
    }

    #[test]
    fn test_sanitize_drops_unknown_and_duplicates() {
        let catalog = PropertyCatalog::standard();
        let requested = vec![
            PropertyId::new("p108"),
            PropertyId::new("P108"),
            PropertyId::new("P31"),
            PropertyId::new("P424242"),
        ];
        let surviving = catalog.sanitize(&requested);
        assert_eq!(surviving.len(), 2);
        assert_eq!(surviving[0].as_str(), "P108");
        assert_eq!(surviving[1].as_str(), "P31");
    }

    #[test]
    fn test_sanitize_can_reject_everything() {
        let catalog = PropertyCatalog::standard();
        let surviving = catalog.sanitize(&[PropertyId::new("P123456789")]);
        assert!(surviving.is_empty());
    }

    #[test]
    fn test_prompt_listing_is_numeric_order() {
        let catalog = PropertyCatalog::standard();
        let listing = catalog.prompt_listing();
        let p6 = listing.find("P6 ").unwrap();
        let p31 = listing.find("P31 ").unwrap();
        let p1412 = listing.find("P1412 ").unwrap();
        assert!(p6 < p31 && p31 < p1412);
    }
}
