use std::sync::Arc;

use anyhow::{bail, Context};
use shield_config::ShieldConfig;
use shield_engine::SchemaAwareness;
use shield_persisted_operations::PersistedOperationsStore;
use shield_validation::Validator;
use tracing::{error, info};

#[derive(Debug, Default)]
pub struct ValidationReport {
  pub checked: usize,
  /// Hashes of the operations with at least one rejected violation, sorted.
  pub rejected: Vec<String>,
}

impl ValidationReport {
  pub fn is_clean(&self) -> bool {
    self.rejected.is_empty()
  }
}

pub async fn load_schema(config: &ShieldConfig) -> anyhow::Result<Arc<SchemaAwareness>> {
  match &config.schema {
    Some(schema_config) => {
      let path = config.resolve_path(&schema_config.path);
      let schema = SchemaAwareness::from_file(&path)
        .await
        .with_context(|| format!("failed to load schema from {:?}", path))?;

      Ok(Arc::new(schema))
    }
    None => Ok(Arc::new(SchemaAwareness::empty())),
  }
}

/// Loads the persisted operations once and runs every rule over each of them.
/// Observed-only violations are not part of the report.
pub async fn validate_persisted_operations(
  config: &ShieldConfig,
) -> anyhow::Result<ValidationReport> {
  let store = PersistedOperationsStore::from_config(&config.persisted_operations, &config.base_path)
    .await
    .context("failed to create persisted operations store")?;

  if store.reload_failures() > 0 {
    bail!("failed to load persisted operations");
  }

  let schema = load_schema(config).await?.schema();
  let validator = Validator::new(&config.validation);
  let table = store.snapshot();

  let mut hashes = table.keys().collect::<Vec<_>>();
  hashes.sort();

  let mut report = ValidationReport {
    checked: hashes.len(),
    ..Default::default()
  };

  for hash in hashes {
    let operation = &table[hash];
    let rejected = match validator.validate_operation(
      &operation.operation_text,
      operation.operation_name.as_deref(),
      schema.as_deref(),
    ) {
      Ok(errors) => {
        let mut rejected = false;

        for e in errors.iter().filter(|e| e.is_rejected()) {
          error!(hash = %hash, rule = e.rule, "{}", e.message);
          rejected = true;
        }

        rejected
      }
      Err(e) => {
        error!(hash = %hash, "{}", e);
        true
      }
    };

    if rejected {
      report.rejected.push(hash.clone());
    }
  }

  info!(
    "validated {} persisted operations, {} rejected",
    report.checked,
    report.rejected.len()
  );

  Ok(report)
}
