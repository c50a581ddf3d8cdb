//! Work-unit discovery in the source bucket

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::Result;
use crate::storage::{is_image_key, ObjectMetadata, ObjectStore};

use super::ledger::ProcessedLedger;
use super::report::progress_key;
use super::types::{UnitKind, WorkUnit};

/// Find pending units: top-level folders plus loose root images
pub async fn discover_units(
    store: &dyn ObjectStore,
    bucket: &str,
    processed_prefix: &str,
    ledger: &dyn ProcessedLedger,
) -> Result<Vec<WorkUnit>> {
    let (folders, loose) = store.list_root(bucket).await?;
    let processed_prefix = processed_prefix.trim_matches('/');

    let mut units: Vec<WorkUnit> = folders
        .into_iter()
        .filter(|f| f != processed_prefix)
        .map(WorkUnit::folder)
        .collect();

    let folder_ids: HashSet<String> = units.iter().map(|u| u.id.clone()).collect();
    for object in loose {
        if !is_image_key(&object.key) {
            tracing::debug!("Skipping non-image object at root: {}", object.key);
            continue;
        }
        let stem = file_stem(&object.key);
        // A folder of the same name owns the stem, so fall back to the full name
        let id = if stem.is_empty() || folder_ids.contains(stem) {
            object.key.clone()
        } else {
            stem.to_string()
        };
        units.push(WorkUnit::loose(id, object.key));
    }

    let mut pending = Vec::with_capacity(units.len());
    for unit in units {
        if ledger.contains(&unit.id).await? {
            tracing::debug!("Unit {} already processed, skipping", unit.id);
            continue;
        }
        pending.push(unit);
    }

    pending.sort_by(|a, b| natural_cmp(&a.id, &b.id));
    Ok(pending)
}

/// Images of a unit, in page order
pub async fn unit_images(store: &dyn ObjectStore, bucket: &str, unit: &WorkUnit) -> Result<Vec<ObjectMetadata>> {
    let mut images: Vec<ObjectMetadata> = match &unit.kind {
        UnitKind::Folder => store
            .list_all_objects(bucket, Some(&format!("{}/", unit.id)))
            .await?
            .into_iter()
            .filter(|o| is_image_key(&o.key))
            .collect(),
        UnitKind::Loose { key } => vec![store.head_object(bucket, key).await?],
    };

    images.sort_by(|a, b| natural_cmp(file_name(&a.key), file_name(&b.key)).then_with(|| a.key.cmp(&b.key)));
    Ok(images)
}

/// Every source object belonging to a unit, images or not
pub async fn unit_objects(store: &dyn ObjectStore, bucket: &str, unit: &WorkUnit) -> Result<Vec<String>> {
    match &unit.kind {
        UnitKind::Folder => {
            let progress = progress_key(&unit.id);
            Ok(store
                .list_all_objects(bucket, Some(&format!("{}/", unit.id)))
                .await?
                .into_iter()
                .map(|o| o.key)
                .filter(|key| *key != progress)
                .collect())
        }
        UnitKind::Loose { key } => Ok(vec![key.clone()]),
    }
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

fn leading_number(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// `2.jpg` sorts before `10.jpg`; names without a leading number come last
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (leading_number(a), leading_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
