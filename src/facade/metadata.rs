//! Server introspection reported by [`Database::metadata`](super::Database::metadata).

use std::collections::BTreeMap;

pub const VERSION_QUERY: &str = "SELECT version()";
pub const AURORA_VERSION_QUERY: &str = "SELECT aurora_version()";
pub const SETTINGS_QUERY: &str = "SELECT name, setting FROM pg_settings \
     WHERE name IN ('data_directory', 'rds.extensions', 'TimeZone', 'work_mem')";

const SETTING_PREFIX: &str = "postgresql_setting_";
const RDS_DATA_PREFIX: &str = "/rdsdata";

/// Turns `pg_settings` rows into metadata settings. The data directory
/// itself is not reported, only whether it looks like an RDS instance.
pub fn collect_settings(
    rows: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::new();
    for (name, setting) in rows {
        if name == "data_directory" {
            let is_rds = setting.starts_with(RDS_DATA_PREFIX);
            settings.insert("is_rds".to_string(), is_rds.to_string());
            continue;
        }
        settings.insert(name, setting);
    }
    settings
}

/// Merges the individual probes; a probe that failed is passed as `None`
/// and simply leaves its keys out.
pub fn merge(
    version: Option<String>,
    aurora_version: Option<String>,
    settings: Option<BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Some(version) = version {
        metadata.insert("postgresql_version".to_string(), version);
    }
    if let Some(aurora_version) = aurora_version {
        metadata.insert("postgresql_aurora_version".to_string(), aurora_version);
    }
    for (name, value) in settings.unwrap_or_default() {
        metadata.insert(format!("{SETTING_PREFIX}{name}"), value);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_data_directory_becomes_is_rds() {
        let settings = collect_settings(rows(&[
            ("data_directory", "/rdsdata/db"),
            ("TimeZone", "UTC"),
        ]));
        assert_eq!(settings.get("is_rds").map(String::as_str), Some("true"));
        assert_eq!(settings.get("TimeZone").map(String::as_str), Some("UTC"));
        assert!(!settings.contains_key("data_directory"));

        let local = collect_settings(rows(&[("data_directory", "/var/lib/postgresql/data")]));
        assert_eq!(local.get("is_rds").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_merge_prefixes_settings() {
        let settings = collect_settings(rows(&[("work_mem", "4096")]));
        let metadata = merge(Some("PostgreSQL 16.2".into()), None, Some(settings));

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["postgresql_version"], "PostgreSQL 16.2");
        assert_eq!(metadata["postgresql_setting_work_mem"], "4096");
        assert!(!metadata.contains_key("postgresql_aurora_version"));
    }

    #[test]
    fn test_merge_tolerates_all_failures() {
        assert!(merge(None, None, None).is_empty());
    }
}
