use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::cli::InventoryArgs;
use crate::config::{HubConfig, HubPaths};
use crate::model::{InventoryManifest, ModelFileEntry, ModelInventory};
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

/// Candidate input files of one model, sorted by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model: String,
    pub files: Vec<PathBuf>,
}

pub fn run(args: InventoryArgs) -> Result<()> {
    let config = HubConfig::from_args(&args.hub)?;
    let paths = HubPaths::resolve(&args.hub, &config);
    if !paths.model_output.is_dir() {
        bail!(
            "model output directory does not exist: {}",
            paths.model_output.display()
        );
    }

    let filter = model_filter(&args.models);
    let manifest = build_manifest(&paths.model_output, &config, filter.as_ref())?;

    if args.dry_run {
        info!(
            model_count = manifest.model_count,
            file_count = manifest.file_count,
            source = %manifest.model_output_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args.manifest_path.unwrap_or_else(|| {
        PathBuf::from("processed_data")
            .join("manifests")
            .join(format!("{}_inventory.json", config.family.as_str()))
    });

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(
        model_count = manifest.model_count,
        file_count = manifest.file_count,
        "inventory completed"
    );

    Ok(())
}

pub fn model_filter(models: &[String]) -> Option<BTreeSet<String>> {
    if models.is_empty() {
        None
    } else {
        Some(models.iter().cloned().collect())
    }
}

pub fn build_manifest(
    model_output: &Path,
    config: &HubConfig,
    filter: Option<&BTreeSet<String>>,
) -> Result<InventoryManifest> {
    let pattern = Regex::new(r"(?i)^(\d{4}-\d{2}-\d{2})-(.+)\.(csv|parquet)$")
        .context("failed to compile model file name regex")?;

    let discovered = discover_model_files(model_output, config, filter)?;

    let mut models = Vec::with_capacity(discovered.len());
    for model_files in discovered {
        let mut files = Vec::with_capacity(model_files.files.len());
        for path in &model_files.files {
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(ToOwned::to_owned)
                .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;

            let reference_date = parse_reference_date(&filename, &model_files.model, &pattern);
            let size_bytes = fs::metadata(path)
                .with_context(|| format!("failed to stat {}", path.display()))?
                .len();
            let sha256 = sha256_file(path)?;

            files.push(ModelFileEntry {
                path: path
                    .strip_prefix(model_output)
                    .unwrap_or(path)
                    .display()
                    .to_string(),
                filename,
                size_bytes,
                sha256,
                reference_date,
            });
        }

        models.push(ModelInventory {
            model: model_files.model,
            file_count: files.len(),
            files,
        });
    }

    Ok(InventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        family: config.family.as_str().to_string(),
        model_output_directory: model_output.display().to_string(),
        model_count: models.len(),
        file_count: models.iter().map(|model| model.file_count).sum(),
        models,
    })
}

/// One model per top-level directory of `model_output`, sorted by name.
/// A model directory that cannot be listed contributes no files.
pub fn discover_model_files(
    model_output: &Path,
    config: &HubConfig,
    filter: Option<&BTreeSet<String>>,
) -> Result<Vec<ModelFiles>> {
    let entries = fs::read_dir(model_output)
        .with_context(|| format!("failed to read {}", model_output.display()))?;

    let mut models = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", model_output.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_dir()
        {
            continue;
        }

        let Some(model) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            warn!(path = %path.display(), "skipping model directory with non UTF-8 name");
            continue;
        };
        if model.starts_with('.') {
            continue;
        }
        if filter.is_some_and(|selected| !selected.contains(&model)) {
            debug!(model = %model, "model not selected");
            continue;
        }

        let files = match list_model_files(&path, config) {
            Ok(files) => files,
            Err(err) => {
                warn!(
                    model = %model,
                    path = %path.display(),
                    error = %err,
                    "failed to list model directory"
                );
                Vec::new()
            }
        };
        models.push(ModelFiles { model, files });
    }

    models.sort_by(|a, b| a.model.cmp(&b.model));

    if let Some(selected) = filter {
        for missing in selected
            .iter()
            .filter(|name| !models.iter().any(|found| &found.model == *name))
        {
            warn!(model = %missing, "selected model has no directory in model output");
        }
    }

    Ok(models)
}

fn list_model_files(model_dir: &Path, config: &HubConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let entries = fs::read_dir(model_dir)
        .with_context(|| format!("failed to read {}", model_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", model_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let accepted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| config.accepts_extension(ext))
            .unwrap_or(false);

        if accepted {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn parse_reference_date(filename: &str, model: &str, pattern: &Regex) -> Option<String> {
    let Some(captures) = pattern.captures(filename) else {
        debug!(filename, "file name does not follow the hub naming convention");
        return None;
    };

    if captures.get(2).is_some_and(|name| name.as_str() != model) {
        debug!(filename, model, "file name model differs from its directory");
    }

    captures.get(1).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write fixture");
    }

    fn hub() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        let output = dir.path().join("model-output");
        touch(&output.join("b-model/2024-01-13-b-model.csv"), "x\n");
        touch(&output.join("b-model/2024-01-06-b-model.parquet"), "x\n");
        touch(&output.join("b-model/README.md"), "notes\n");
        touch(&output.join("a-model/2024-01-06-a-model.csv"), "x\n");
        touch(&output.join("a-model/notes.txt"), "x\n");
        touch(&output.join("stray.csv"), "x\n");
        fs::create_dir_all(output.join("empty-model")).expect("create empty model");
        dir
    }

    #[test]
    fn discovery_is_sorted_and_skips_unaccepted_files() {
        let dir = hub();
        let output = dir.path().join("model-output");

        let models =
            discover_model_files(&output, &HubConfig::default(), None).expect("discover models");
        let names: Vec<&str> = models.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(names, vec!["a-model", "b-model", "empty-model"]);

        let b_files: Vec<String> = models[1]
            .files
            .iter()
            .map(|p| p.file_name().expect("file name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            b_files,
            vec!["2024-01-06-b-model.parquet", "2024-01-13-b-model.csv"]
        );
        assert!(models[2].files.is_empty());
    }

    #[test]
    fn model_filter_restricts_discovery() {
        let dir = hub();
        let output = dir.path().join("model-output");
        let filter = model_filter(&["b-model".to_string(), "missing".to_string()]);

        let models = discover_model_files(&output, &HubConfig::default(), filter.as_ref())
            .expect("discover models");
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model, "b-model");
        assert!(model_filter(&[]).is_none());
    }

    #[test]
    fn manifest_records_hashes_and_reference_dates() {
        let dir = hub();
        let output = dir.path().join("model-output");

        let manifest =
            build_manifest(&output, &HubConfig::default(), None).expect("build manifest");
        assert_eq!(manifest.model_count, 3);
        assert_eq!(manifest.file_count, 3);
        assert_eq!(manifest.family, "flusight");

        let a = &manifest.models[0].files[0];
        assert_eq!(a.filename, "2024-01-06-a-model.csv");
        assert_eq!(a.reference_date.as_deref(), Some("2024-01-06"));
        assert_eq!(a.size_bytes, 2);
        assert_eq!(a.sha256.len(), 64);
        assert_eq!(
            Path::new(&a.path),
            Path::new("a-model").join("2024-01-06-a-model.csv")
        );
    }

    #[test]
    fn parse_reference_date_ignores_unconventional_names() {
        let pattern = Regex::new(r"(?i)^(\d{4}-\d{2}-\d{2})-(.+)\.(csv|parquet)$").expect("regex");
        assert_eq!(
            parse_reference_date("2024-01-06-team.PARQUET", "team", &pattern),
            Some("2024-01-06".to_string())
        );
        assert_eq!(parse_reference_date("forecast.csv", "team", &pattern), None);
    }
}
