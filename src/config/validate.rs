// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{EtlDagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EtlDagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let config = ConfigFile::new_unchecked(raw.config, raw.task);
        // Registration errors (unknown references, cycles) surface here.
        config.build_registry()?;
        Ok(config)
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(EtlDagError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    // failure_policy and start_while_active are strongly typed and validated
    // during deserialization.

    if cfg.config.dag_name.trim().is_empty() {
        return Err(EtlDagError::ConfigError(
            "[config].dag_name must not be empty".to_string(),
        ));
    }

    if cfg.config.max_workers == 0 {
        return Err(EtlDagError::ConfigError(
            "[config].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.history_limit == 0 {
        return Err(EtlDagError::ConfigError(
            "[config].history_limit must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::loader::parse_and_validate;
    use crate::errors::EtlDagError;
    use crate::types::FailurePolicy;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_and_validate("[task.only]\n").unwrap();
        assert_eq!(cfg.config.dag_name, "etl_pipeline");
        assert_eq!(cfg.config.max_workers, 1);
        assert_eq!(cfg.config.failure_policy, FailurePolicy::CascadeSkip);
        assert_eq!(cfg.build_registry().unwrap().len(), 1);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = parse_and_validate("[config]\nmax_workers = 0\n[task.a]\n").unwrap_err();
        assert!(matches!(err, EtlDagError::ConfigError(ref m) if m.contains("max_workers")));
    }

    #[test]
    fn empty_task_table_is_rejected() {
        let err = parse_and_validate("[config]\ndag_name = \"x\"\n").unwrap_err();
        assert!(matches!(err, EtlDagError::ConfigError(_)));
    }

    #[test]
    fn dependency_problems_surface_as_registration_errors() {
        let missing = parse_and_validate("[task.load]\nafter = [\"transform\"]\n").unwrap_err();
        assert!(matches!(missing, EtlDagError::MissingDependency { .. }));

        let cycle = parse_and_validate("[task.a]\nafter = [\"b\"]\n[task.b]\nafter = [\"a\"]\n")
            .unwrap_err();
        assert!(cycle.is_registration_error());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_and_validate("[task.a]\ncmd = \"echo\"\n").unwrap_err();
        assert!(matches!(err, EtlDagError::TomlError(_)));
    }

    #[test]
    fn forced_failure_overrides_task() {
        let mut cfg = parse_and_validate("[task.a]\nretries = 3\n").unwrap();
        cfg.force_failure("a").unwrap();
        assert!(cfg.task["a"].fail);
        assert_eq!(cfg.task["a"].retries, 0);
        assert!(matches!(cfg.force_failure("ghost"), Err(EtlDagError::TaskNotFound(_))));
    }
}
