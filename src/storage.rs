//! Persisted instance state: a JSON array of tagged envelopes at
//! `instances_file()`, loaded leniently and saved atomically.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use crate::instance::record::{InstanceRecord, TYPE_ORCHESTRATOR, TYPE_TASK};

/// One element of the persisted array, already downcast to a concrete
/// record. Only `TYPE_TASK` carries data today; `TYPE_ORCHESTRATOR` is
/// accepted and round-tripped but never constructed by this build (the
/// orchestrator tag is reserved for future use, not yet implemented).
#[derive(Debug, Clone)]
pub enum TaggedInstance {
    Task(InstanceRecord),
    Orchestrator(Value),
}

impl TaggedInstance {
    fn to_envelope(&self) -> Value {
        match self {
            TaggedInstance::Task(record) => serde_json::json!({
                "type": TYPE_TASK,
                "data": record,
            }),
            TaggedInstance::Orchestrator(data) => serde_json::json!({
                "type": TYPE_ORCHESTRATOR,
                "data": data,
            }),
        }
    }

    pub fn as_task(&self) -> Option<&InstanceRecord> {
        match self {
            TaggedInstance::Task(record) => Some(record),
            TaggedInstance::Orchestrator(_) => None,
        }
    }
}

/// Reads and parses `instances_file()`. A missing file is an empty list,
/// not an error. Per-element failures (unknown `type`, malformed `data`)
/// are logged and the element skipped; they never fail the whole load.
/// A file whose bytes are corrupted after some valid JSON prefix (e.g. a
/// torn write) recovers that prefix instead of refusing to start.
pub fn load(path: &Path) -> Result<Vec<TaggedInstance>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read instance store at {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let top_level = recover_json_prefix(&raw, path);
    let Value::Array(elements) = top_level else {
        warn!(path = %path.display(), "storage: instance store is not a JSON array, ignoring");
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        match decode_element(element) {
            Ok(Some(instance)) => out.push(instance),
            Ok(None) => {}
            Err(e) => warn!(index, error = %e, "storage: skipping malformed instance record"),
        }
    }
    Ok(out)
}

/// Parses `raw` as a single JSON value. On outright parse failure (not
/// just trailing garbage), falls back to `serde_json::Deserializer`'s
/// streaming mode and keeps only the first value it can successfully
/// decode, discarding anything after it.
fn recover_json_prefix(raw: &str, path: &Path) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "storage: instance store did not parse cleanly, attempting prefix recovery"
            );
            let mut stream = serde_json::Deserializer::from_str(raw).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => value,
                _ => {
                    warn!(path = %path.display(), "storage: no recoverable prefix, starting empty");
                    Value::Array(Vec::new())
                }
            }
        }
    }
}

fn decode_element(element: Value) -> Result<Option<TaggedInstance>> {
    let tag = element
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("envelope missing string 'type' field"))?
        .to_string();
    let data = element
        .get("data")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("envelope missing 'data' field"))?;

    match tag.as_str() {
        TYPE_TASK => {
            let record: InstanceRecord =
                serde_json::from_value(data).context("malformed task record")?;
            Ok(Some(TaggedInstance::Task(record)))
        }
        TYPE_ORCHESTRATOR => Ok(Some(TaggedInstance::Orchestrator(data))),
        other => {
            warn!(tag = other, "storage: skipping unrecognised instance type");
            Ok(None)
        }
    }
}

/// Atomically overwrites `path` with `instances`: write to a sibling temp
/// file, then rename over the target, so a crash mid-write never leaves a
/// half-written `instances.json` for the next `load` to choke on.
pub fn save(path: &Path, instances: &[TaggedInstance]) -> Result<()> {
    let envelopes: Vec<Value> = instances.iter().map(TaggedInstance::to_envelope).collect();
    let serialized = serde_json::to_string_pretty(&Value::Array(envelopes))
        .context("could not serialize instance store")?;

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("instance store path has no parent directory"))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("could not create directory {}", parent.display()))?;

    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = fs::File::create(&tmp_path)
            .with_context(|| format!("could not create {}", tmp_path.display()))?;
        tmp.write_all(serialized.as_bytes())
            .context("could not write instance store")?;
        tmp.sync_all().context("could not flush instance store")?;
    }
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "could not atomically replace {} with {}",
            path.display(),
            tmp_path.display()
        )
    })?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "instances.json".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

pub fn delete_instance(path: &Path, title: &str) -> Result<()> {
    let mut instances = load(path)?;
    instances.retain(|instance| match instance {
        TaggedInstance::Task(record) => record.title != title,
        TaggedInstance::Orchestrator(_) => true,
    });
    save(path, &instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::record::{Status, WorktreeHandleData};
    use chrono::Utc;

    fn sample_record(title: &str) -> InstanceRecord {
        InstanceRecord {
            title: title.to_string(),
            path: "/repo".to_string(),
            branch: title.to_string(),
            status: Status::Ready,
            height: 50,
            width: 220,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            auto_yes: false,
            program: "claude".to_string(),
            worktree: WorktreeHandleData {
                repo_path: "/repo".to_string(),
                worktree_path: format!("/repo/.worktrees/{title}-ab12"),
                session_name: title.to_string(),
                branch_name: title.to_string(),
                base_commit_sha: "deadbeef".to_string(),
            },
            diff_stats: None,
        }
    }

    #[test]
    fn round_trips_a_saved_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let instances = vec![TaggedInstance::Task(sample_record("alpha"))];
        save(&path, &instances).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_task().unwrap().title, "alpha");
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        assert!(load(&path).unwrap().is_empty());
    }

    #[test]
    fn unknown_type_tag_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let raw = serde_json::json!([
            {"type": "task", "data": sample_record("good")},
            {"type": "future-thing", "data": {"whatever": true}},
        ]);
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_task().unwrap().title, "good");
    }

    #[test]
    fn malformed_single_record_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let raw = serde_json::json!([
            {"type": "task", "data": {"title": "broken"}},
            {"type": "task", "data": sample_record("good")},
        ]);
        fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_task().unwrap().title, "good");
    }

    #[test]
    fn recovers_the_first_value_when_garbage_trails_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let good = serde_json::to_string(&serde_json::json!([
            {"type": "task", "data": sample_record("alpha")}
        ]))
        .unwrap();
        // A torn write that appended a second, incomplete top-level value
        // after an otherwise-complete array. `from_str::<Value>` rejects
        // this outright; the streaming fallback still recovers `good`.
        let torn = format!("{good}{{not json");
        fs::write(&path, torn).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_task().unwrap().title, "alpha");
    }

    #[test]
    fn truncated_array_with_no_recoverable_prefix_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let good = serde_json::to_string(&serde_json::json!([
            {"type": "task", "data": sample_record("alpha")}
        ]))
        .unwrap();
        let truncated = &good[..good.len() - 10];
        fs::write(&path, truncated).unwrap();
        let loaded = load(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn delete_instance_removes_only_the_named_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        save(
            &path,
            &[
                TaggedInstance::Task(sample_record("keep")),
                TaggedInstance::Task(sample_record("drop")),
            ],
        )
        .unwrap();
        delete_instance(&path, "drop").unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_task().unwrap().title, "keep");
    }
}
