//! Schema migrator.
//!
//! A backward-compatibility check run against the desired column set before
//! applying it to the `AnalyticsSink`.

use crate::errors::SchemaError;
use crate::models::SchemaField;
use crate::sink::AnalyticsSink;

/// Walk `existing` and `desired` pairwise and reject anything that isn't a
/// backward-compatible change:
///
/// - removing a column is disallowed;
/// - adding a column is allowed only if its mode is `NULLABLE` or `REPEATED`;
/// - columns must match by name and by type;
/// - mode may only change `REQUIRED` → `NULLABLE`;
/// - `RECORD`-typed columns recurse into their nested `fields`.
pub fn validate_schema(existing: &[SchemaField], desired: &[SchemaField]) -> Result<(), SchemaError> {
    let mut existing_iter = existing.iter();
    let mut desired_iter = desired.iter();

    loop {
        let existing_item = existing_iter.next();
        let desired_item = desired_iter.next();

        match (existing_item, desired_item) {
            (None, None) => return Ok(()),
            (_, None) => {
                return Err(SchemaError::SchemaIncompatible {
                    reason: "cannot remove columns".to_string(),
                })
            }
            (None, Some(new_item)) => {
                if new_item.mode != "NULLABLE" && new_item.mode != "REPEATED" {
                    return Err(SchemaError::SchemaIncompatible {
                        reason: format!(
                            "cannot add non-NULLABLE/REPEATED column {:?} to existing schema",
                            new_item.name
                        ),
                    });
                }
            }
            (Some(existing_item), Some(new_item)) => {
                if existing_item.name != new_item.name {
                    return Err(SchemaError::SchemaIncompatible {
                        reason: format!(
                            "found column named {:?} in new schema when expected column named {:?}",
                            new_item.name, existing_item.name
                        ),
                    });
                }
                if existing_item.field_type != new_item.field_type {
                    return Err(SchemaError::SchemaIncompatible {
                        reason: format!(
                            "cannot change type of column {:?} from {:?} to {:?}",
                            existing_item.name, existing_item.field_type, new_item.field_type
                        ),
                    });
                }
                let mode_change_ok = existing_item.mode == new_item.mode
                    || (existing_item.mode == "REQUIRED" && new_item.mode == "NULLABLE");
                if !mode_change_ok {
                    return Err(SchemaError::SchemaIncompatible {
                        reason: format!(
                            "cannot change mode of column {:?} except from REQUIRED to NULLABLE",
                            existing_item.name
                        ),
                    });
                }
                if existing_item.field_type == "RECORD" {
                    let existing_fields = existing_item.fields.as_deref().unwrap_or_default();
                    let new_fields = new_item.fields.as_deref().unwrap_or_default();
                    validate_schema(existing_fields, new_fields)?;
                }
            }
        }
    }
}

/// `migrate(sink, table, desiredSchema)`. Fetches the current
/// column list; applies `desiredSchema` unconditionally if none exists,
/// otherwise validates the delta first.
pub async fn migrate(sink: &dyn AnalyticsSink, table: &str, desired_schema: &[SchemaField]) -> Result<(), SchemaError> {
    tracing::info!(table, "fetching existing schema");
    let current_schema = sink.get_schema(table).await?;

    if let Some(current_schema) = current_schema {
        tracing::info!(table, "found existing schema, validating delta");
        validate_schema(&current_schema, desired_schema)?;
    }

    tracing::info!(table, "updating schema");
    sink.update_schema(table, desired_schema).await?;
    tracing::info!(table, "schema updated");
    Ok(())
}
