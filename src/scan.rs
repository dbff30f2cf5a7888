use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::classfile::{ClassFile, DroppedAttributes};
use crate::redirect::StubbedCall;
use crate::transformer::Transformer;

/// What a run over the inputs saw and changed.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub artifacts: Vec<Artifact>,
    pub class_count: usize,
    pub modified_count: usize,
    pub redirected: usize,
    pub stubbed: Vec<StubbedCall>,
    /// Class name paired with the attributes its rewritten method lost.
    pub dropped: Vec<(String, DroppedAttributes)>,
}

/// Transform every class under `input` (a class file, jar, or directory).
///
/// When `output` is given the rewritten tree is written there, mirroring the input: a class
/// file becomes a class file, a jar a jar, a directory a directory. Directory listings are
/// visited in sorted order so runs are reproducible.
pub fn scan_inputs(
    input: &Path,
    output: Option<&Path>,
    transformer: &Transformer,
) -> Result<ScanOutput> {
    let mut scanner = Scanner {
        transformer,
        output: ScanOutput::default(),
    };
    scanner.scan_path(input, output, true, true)?;
    Ok(scanner.output)
}

struct Scanner<'a> {
    transformer: &'a Transformer,
    output: ScanOutput,
}

impl Scanner<'_> {
    fn scan_path(
        &mut self,
        path: &Path,
        output: Option<&Path>,
        is_input: bool,
        strict: bool,
    ) -> Result<()> {
        if path.is_dir() {
            return self.scan_dir(path, output);
        }

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        let roles = if is_input {
            Some(vec![
                serde_json::to_value(ArtifactRoles::AnalysisTarget)
                    .context("serialize artifact role")?,
            ])
        } else {
            None
        };

        match extension {
            "class" => self.scan_class_file(path, output, roles),
            "jar" => self.scan_jar_file(path, output, roles),
            _ => {
                if strict {
                    anyhow::bail!("unsupported input file: {}", path.display())
                }
                match output {
                    Some(output) => {
                        debug!("copying {} unchanged", path.display());
                        create_parent(output)?;
                        fs::copy(path, output).with_context(|| {
                            format!("failed to copy {} to {}", path.display(), output.display())
                        })?;
                    }
                    None => debug!("skipping {}", path.display()),
                }
                Ok(())
            }
        }
    }

    fn scan_dir(&mut self, path: &Path, output: Option<&Path>) -> Result<()> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
            entries.push(entry.path());
        }

        entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

        for entry in entries {
            let child_output = match (output, entry.file_name()) {
                (Some(output), Some(file_name)) => Some(output.join(file_name)),
                _ => None,
            };
            if entry.is_dir() {
                self.scan_dir(&entry, child_output.as_deref())?;
            } else {
                self.scan_path(&entry, child_output.as_deref(), false, false)?;
            }
        }

        Ok(())
    }

    fn scan_class_file(
        &mut self,
        path: &Path,
        output: Option<&Path>,
        roles: Option<Vec<Value>>,
    ) -> Result<()> {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let rewritten = self.transform_bytes(&path.display().to_string(), &data)?;

        if let Some(output) = output {
            create_parent(output)?;
            fs::write(output, &rewritten)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
        push_artifact(
            path_to_uri(path),
            data.len() as u64,
            None,
            roles,
            &mut self.output.artifacts,
        );
        Ok(())
    }

    fn scan_jar_file(
        &mut self,
        path: &Path,
        output: Option<&Path>,
        roles: Option<Vec<Value>>,
    ) -> Result<()> {
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive =
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
        let mut writer = match output {
            Some(output) => {
                create_parent(output)?;
                let file = fs::File::create(output)
                    .with_context(|| format!("failed to create {}", output.display()))?;
                Some(ZipWriter::new(file))
            }
            None => None,
        };

        let jar_len = fs::metadata(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .len();
        let jar_index = push_artifact(
            path_to_uri(path),
            jar_len,
            None,
            roles,
            &mut self.output.artifacts,
        );

        // Entries are written back in archive order so unchanged jars keep their layout.
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let name = entry.name().to_string();
            let options = SimpleFileOptions::default()
                .compression_method(entry.compression())
                .last_modified_time(entry.last_modified().unwrap_or_default());
            if entry.is_dir() {
                if let Some(writer) = writer.as_mut() {
                    writer
                        .add_directory(name.as_str(), options)
                        .with_context(|| format!("failed to write {name}"))?;
                }
                continue;
            }

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let is_class = name.ends_with(".class") && !name.ends_with("module-info.class");
            let data = if is_class {
                let rewritten =
                    self.transform_bytes(&format!("{}:{}", path.display(), name), &data)?;
                push_artifact(
                    jar_entry_uri(path, &name),
                    entry.size(),
                    Some(jar_index),
                    None,
                    &mut self.output.artifacts,
                );
                rewritten
            } else {
                data
            };

            if let Some(writer) = writer.as_mut() {
                writer
                    .start_file(name.as_str(), options)
                    .with_context(|| format!("failed to write {name}"))?;
                writer
                    .write_all(&data)
                    .with_context(|| format!("failed to write {name}"))?;
            }
        }

        if let Some(writer) = writer {
            writer
                .finish()
                .with_context(|| format!("failed to finish {}", path.display()))?;
        }
        Ok(())
    }

    fn transform_bytes(&mut self, origin: &str, data: &[u8]) -> Result<Vec<u8>> {
        let class_name = ClassFile::parse(data)
            .and_then(|class_file| class_file.name())
            .with_context(|| format!("failed to parse {origin}"))?
            .replace('/', ".");
        self.output.class_count += 1;
        if !self.transformer.should_transform(&class_name, data) {
            return Ok(data.to_vec());
        }

        let outcome = self
            .transformer
            .transform_class(&class_name, data)
            .with_context(|| format!("failed to transform {origin}"))?;
        if outcome.modified {
            self.output.modified_count += 1;
            debug!(
                "rewrote {class_name}: redirected={} stubbed={} rules={:?}",
                outcome.redirected,
                outcome.stubbed.len(),
                outcome.rules_applied
            );
        }
        self.output.redirected += outcome.redirected;
        self.output.stubbed.extend(outcome.stubbed);
        self.output.dropped.extend(
            outcome
                .dropped
                .into_iter()
                .map(|dropped| (class_name.clone(), dropped)),
        );
        Ok(outcome.bytes)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Push an artifact and return its index for parent linkage (e.g., JAR entries).
fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
