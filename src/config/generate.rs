pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# PROCLENS CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/proclens/config.yml
#   3. /etc/proclens/config.yml
#
# Every section is optional; omitted settings use the values shown here.
# Values may reference environment variables with $env{VAR_NAME}.

# =============================================================================
# STORAGE
# =============================================================================
# DuckDB database holding process records, staged batches and rollups.

storage:
  path: ~/.local/share/proclens/proclens.duckdb

# =============================================================================
# PIPELINE
# =============================================================================
# Ingested batches are staged immediately and materialized in the background.

pipeline:
  # Number of concurrent materialize workers
  workers: 4
  # Staged batch ids that may wait for a worker before ingest blocks
  queue_size: 256

# =============================================================================
# QUERY
# =============================================================================

query:
  # Partition rollups kept in memory (least recently used evicted first)
  rollup_cache_capacity: 128
  # Window used when a query gives no start_time
  default_window: 30days
  # Longer windows are shortened by moving start_time forward
  max_window: 365days
  # Page size when a query gives no limit, and the largest page allowed
  default_limit: 100
  max_limit: 1000
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::{parse_config, validate_config};
    use crate::config::Config;

    #[test]
    fn test_starter_config_is_valid() {
        let config = parse_config(&generate_starter_config()).unwrap();
        validate_config(&config).unwrap();

        let defaults = Config::default();
        assert_eq!(config.pipeline, defaults.pipeline);
        assert_eq!(config.query, defaults.query);
        assert_eq!(config.storage, defaults.storage);
    }
}
