use crate::db::{db_path, DB_FILE_NAME};
use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradingd.sqlite3";
pub const SNAPSHOT_FORMAT_V1: &str = "gradingd-snapshot-v1";

#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub path: PathBuf,
    pub db_sha256: String,
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {} for checksum", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf).context("failed to read for checksum")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writes a consistent copy of the open workspace database into a zip bundle.
pub fn export_snapshot(
    conn: &Connection,
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<SnapshotSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let tmp_db = workspace_path.join(format!("{}.snapshot", DB_FILE_NAME));
    if tmp_db.exists() {
        let _ = std::fs::remove_file(&tmp_db);
    }
    conn.execute("VACUUM INTO ?", [tmp_db.to_string_lossy().to_string()])
        .context("failed to copy workspace database")?;
    let digest = sha256_file(&tmp_db)?;

    let result = write_bundle(&tmp_db, &digest, workspace_path, out_path);
    let _ = std::fs::remove_file(&tmp_db);
    result?;

    tracing::info!(path = %out_path.to_string_lossy(), sha256 = %digest, "snapshot written");
    Ok(SnapshotSummary {
        path: out_path.to_path_buf(),
        db_sha256: digest,
    })
}

fn write_bundle(
    db_file_path: &Path,
    digest: &str,
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<()> {
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create snapshot file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": SNAPSHOT_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "createdAt": chrono::Utc::now().to_rfc3339(),
        "sourceWorkspace": workspace_path.to_string_lossy(),
        "dbSha256": digest,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(db_file_path).with_context(|| {
        format!(
            "failed to open database copy {}",
            db_file_path.to_string_lossy()
        )
    })?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize snapshot")?;
    Ok(())
}

/// Replaces the workspace database with the one in `in_path` after checking its digest.
/// Nothing in the workspace changes when the bundle is rejected.
pub fn restore_snapshot(in_path: &Path, workspace_path: &Path) -> anyhow::Result<SnapshotSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open snapshot {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("snapshot missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != SNAPSHOT_FORMAT_V1 {
        return Err(anyhow!("unsupported snapshot format: {}", format));
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json missing dbSha256"))?
        .to_ascii_lowercase();

    let tmp_dst = workspace_path.join(format!("{}.restoring", DB_FILE_NAME));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    {
        let mut db_out = File::create(&tmp_dst).with_context(|| {
            format!(
                "failed to create temp database {}",
                tmp_dst.to_string_lossy()
            )
        })?;
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("snapshot missing db/gradingd.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
        db_out
            .flush()
            .context("failed to flush extracted database")?;
    }

    let actual = sha256_file(&tmp_dst)?;
    if actual != expected {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(anyhow!(
            "snapshot digest mismatch: expected {} actual {}",
            expected,
            actual
        ));
    }

    let dst = db_path(workspace_path);
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move restored database to {}",
            dst.to_string_lossy()
        )
    })?;

    tracing::info!(path = %in_path.to_string_lossy(), sha256 = %actual, "snapshot restored");
    Ok(SnapshotSummary {
        path: dst,
        db_sha256: actual,
    })
}
