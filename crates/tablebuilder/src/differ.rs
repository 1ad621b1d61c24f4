//! Schema differ.
//!
//! Compares the current column set of a table with a desired field list and
//! produces the operations that transform one into the other.

use std::collections::HashSet;

use crate::operations::SchemaOperation;
use crate::schema::{FieldDefinition, PhysicalColumnSet, IDENTITY_FIELD};

/// Computes schema operations from explicit rename hints.
///
/// The differ is pure: the same inputs always produce the same operations,
/// in the fixed order renames, adds, type alters, drops.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDiffer;

impl SchemaDiffer {
    /// Creates a new differ.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the operations needed to turn `current` into `desired`.
    ///
    /// A desired field whose `prior_name` names an existing column becomes a
    /// rename, and neither its old nor its new name takes part in add/drop
    /// classification. A `prior_name` that does not exist is ignored and the
    /// field is treated as a plain field.
    #[must_use]
    pub fn diff(
        &self,
        current: &PhysicalColumnSet,
        desired: &[FieldDefinition],
    ) -> Vec<SchemaOperation> {
        let mut renames = Vec::new();
        let mut rename_sources: HashSet<&str> = HashSet::new();
        let mut rename_targets: HashSet<&str> = HashSet::new();

        for field in desired {
            if field.name == IDENTITY_FIELD {
                continue;
            }
            let Some(prior) = field.effective_prior_name() else {
                continue;
            };
            if prior == IDENTITY_FIELD
                || !current.contains(prior)
                || rename_sources.contains(prior)
                || rename_targets.contains(field.name.as_str())
            {
                continue;
            }
            renames.push(SchemaOperation::rename(
                prior,
                field.name.clone(),
                field.field_type,
            ));
            rename_sources.insert(prior);
            rename_targets.insert(field.name.as_str());
        }

        let desired_names: HashSet<&str> = desired.iter().map(|f| f.name.as_str()).collect();

        // A column that is renamed away no longer exists under its old name.
        let survives = |name: &str| current.contains(name) && !rename_sources.contains(name);

        let mut adds = Vec::new();
        let mut alters = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for field in desired {
            let name = field.name.as_str();
            if name == IDENTITY_FIELD || rename_targets.contains(name) || !seen.insert(name) {
                continue;
            }
            if !survives(name) {
                adds.push(SchemaOperation::add(name, field.field_type));
            } else if current.get(name) != Some(field.field_type) {
                alters.push(SchemaOperation::alter_type(name, field.field_type));
            }
        }

        let drops = current
            .fields()
            .map(|(name, _)| name)
            .filter(|name| !desired_names.contains(name) && !rename_sources.contains(name))
            .map(SchemaOperation::drop);

        let mut operations = renames;
        operations.extend(adds);
        operations.extend(alters);
        operations.extend(drops);
        debug_assert!(operations
            .windows(2)
            .all(|pair| pair[0].order_class() <= pair[1].order_class()));
        operations
    }
}
