use dbaas_provider::SearchIndex;

pub const STEADY: &str = "STEADY";
pub const READY: &str = "READY";
pub const FAILED: &str = "FAILED";
pub const NOT_CREATED: &str = "NOT_CREATED";

const DEFAULT_TYPE: &str = "search";

/// An index without a reported status, or one that reports `STEADY` or
/// `READY`, may be changed. Anything else is still being built.
pub fn is_steady(observed: &SearchIndex) -> bool {
    match observed.status.as_deref() {
        None => true,
        Some(s) => s.eq_ignore_ascii_case(STEADY) || s.eq_ignore_ascii_case(READY),
    }
}

pub fn is_failed(observed: &SearchIndex) -> bool {
    observed
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(FAILED))
}

/// Compares the user-controlled definition only; ids and status are
/// provider bookkeeping.
pub fn same_definition(desired: &SearchIndex, observed: &SearchIndex) -> bool {
    desired.name == observed.name
        && desired.database == observed.database
        && desired.collection_name == observed.collection_name
        && desired.index_type.as_deref().unwrap_or(DEFAULT_TYPE)
            == observed.index_type.as_deref().unwrap_or(DEFAULT_TYPE)
        && desired.analyzer == observed.analyzer
        && desired.search_analyzer == observed.search_analyzer
        && desired.mappings == observed.mappings
        && desired.synonyms.len() == observed.synonyms.len()
        && desired.synonyms == observed.synonyms
        && desired.fields == observed.fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index(name: &str) -> SearchIndex {
        SearchIndex {
            name: name.into(),
            database: "db".into(),
            collection_name: "movies".into(),
            mappings: Some(json!({"dynamic": true})),
            ..Default::default()
        }
    }

    #[test]
    fn steadiness_follows_reported_status() {
        let mut idx = index("a");
        assert!(is_steady(&idx));
        idx.status = Some("IN_PROGRESS".into());
        assert!(!is_steady(&idx));
        idx.status = Some("READY".into());
        assert!(is_steady(&idx));
        idx.status = Some("FAILED".into());
        assert!(is_failed(&idx));
    }

    #[test]
    fn definition_ignores_bookkeeping() {
        let desired = index("a");
        let mut observed = index("a");
        observed.index_id = Some("idx-1".into());
        observed.status = Some("STEADY".into());
        observed.index_type = Some("search".into());
        assert!(same_definition(&desired, &observed));

        observed.mappings = Some(json!({"dynamic": false}));
        assert!(!same_definition(&desired, &observed));
    }
}
