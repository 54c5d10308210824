//! Flow version schema migrations
//!
//! Each migration lifts a version from schema `n` to `n + 1`. Running the
//! chain on a version already at [`LATEST_SCHEMA_VERSION`] changes nothing.

use crate::constants::{LATEST_SCHEMA_VERSION, OFFICIAL_PIECE_PREFIX};
use crate::flow::operations::refresh_derived_fields;
use crate::flow::structure::transfer_trigger;
use crate::model::{ActionKind, FlowVersion, StepMut};
use crate::{PieceFlowError, Result};
use semver::Version;

/// One schema step of the chain
pub trait FlowMigration: Send + Sync {
    /// Schema version this migration upgrades from
    fn from_version(&self) -> u32;

    fn name(&self) -> &'static str;

    fn migrate(&self, version: &mut FlowVersion) -> Result<()>;
}

/// 0 -> 1: qualified piece names and range-pinned draft versions
pub struct NormalizePieceReferences;

impl NormalizePieceReferences {
    fn qualify(name: &str) -> Option<String> {
        if name.is_empty() || name.starts_with('@') || name.contains('/') {
            return None;
        }
        Some(format!("{}{}", OFFICIAL_PIECE_PREFIX, name))
    }
}

impl FlowMigration for NormalizePieceReferences {
    fn from_version(&self) -> u32 {
        0
    }

    fn name(&self) -> &'static str {
        "normalize-piece-references"
    }

    fn migrate(&self, version: &mut FlowVersion) -> Result<()> {
        let locked = version.is_locked();
        transfer_trigger(&mut version.trigger, &mut |mut step: StepMut<'_>| {
            if let Some(name) = step.piece_name_mut()
                && let Some(qualified) = Self::qualify(name)
            {
                *name = qualified;
            }
            if let Some(piece_version) = step.piece_version_mut()
                && !locked
                && Version::parse(piece_version).is_ok()
            {
                *piece_version = format!("~{}", piece_version);
            }
        });
        Ok(())
    }
}

/// 1 -> 2: one router child slot per branch
pub struct AlignRouterChildren;

impl FlowMigration for AlignRouterChildren {
    fn from_version(&self) -> u32 {
        1
    }

    fn name(&self) -> &'static str {
        "align-router-children"
    }

    fn migrate(&self, version: &mut FlowVersion) -> Result<()> {
        transfer_trigger(&mut version.trigger, &mut |step: StepMut<'_>| {
            if let StepMut::Action(action) = step
                && let ActionKind::Router { settings, children } = &mut action.kind
            {
                children.resize(settings.branches.len(), None);
            }
        });
        Ok(())
    }
}

/// 2 -> 3: derived connection and agent references
pub struct RecomputeDerivedReferences;

impl FlowMigration for RecomputeDerivedReferences {
    fn from_version(&self) -> u32 {
        2
    }

    fn name(&self) -> &'static str {
        "recompute-derived-references"
    }

    fn migrate(&self, version: &mut FlowVersion) -> Result<()> {
        let valid = version.valid;
        refresh_derived_fields(version);
        // validity is owned by the validation pass, not the migration
        version.valid = valid;
        Ok(())
    }
}

/// The full chain in upgrade order
pub fn all_migrations() -> Vec<Box<dyn FlowMigration>> {
    vec![
        Box::new(NormalizePieceReferences),
        Box::new(AlignRouterChildren),
        Box::new(RecomputeDerivedReferences),
    ]
}

#[must_use]
pub fn needs_migration(version: &FlowVersion) -> bool {
    version.effective_schema_version() < LATEST_SCHEMA_VERSION
}

/// Upgrade a copy of `version` to the latest schema
pub fn apply(version: &FlowVersion) -> Result<FlowVersion> {
    let mut current = version.effective_schema_version();
    if current > LATEST_SCHEMA_VERSION {
        return Err(PieceFlowError::migration(
            version.id.to_string(),
            format!(
                "schema version {} is newer than supported {}",
                current, LATEST_SCHEMA_VERSION
            ),
        ));
    }

    let mut migrated = version.clone();
    for migration in all_migrations() {
        if migration.from_version() != current {
            continue;
        }
        migration.migrate(&mut migrated).map_err(|e| {
            PieceFlowError::migration(
                version.id.to_string(),
                format!("{} failed: {}", migration.name(), e),
            )
        })?;
        current += 1;
        migrated.schema_version = Some(current);
        tracing::debug!(
            flow_version_id = %version.id,
            migration = migration.name(),
            schema_version = current,
            "Applied flow migration"
        );
    }

    if current != LATEST_SCHEMA_VERSION {
        return Err(PieceFlowError::migration(
            version.id.to_string(),
            format!("no migration path from schema version {}", current),
        ));
    }
    migrated.schema_version = Some(LATEST_SCHEMA_VERSION);
    Ok(migrated)
}
