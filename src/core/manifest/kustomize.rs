//! # Kustomize-style overlay engine
//!
//! A minimal composition engine for directories containing a
//! `kustomization.yaml`: resolves a flat `resources:` list relative to the
//! overlay root, then applies `patches:` entries (JSON merge patches
//! targeted by `apiVersion`/`kind`/`name`) over the concatenated resource
//! set. Deliberately does not implement the full kustomize feature set
//! (generators, transformers, remote bases) — the operator's manifest trees
//! only use overlays for localized patches.

use std::path::{Path, PathBuf};

use kube::core::DynamicObject;
use serde::Deserialize;

use super::fs::ManifestSource;

// -----------------------------------------------------------------------------
// KustomizationFile structure

#[derive(Deserialize, Default, Debug)]
struct KustomizationFile {
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    patches: Vec<PatchTarget>,
}

#[derive(Deserialize, Debug)]
struct PatchTarget {
    path: String,
    target: PatchSelector,
}

#[derive(Deserialize, Debug)]
struct PatchSelector {
    kind: String,
    name: String,
}

// -----------------------------------------------------------------------------
// KustomizeError enum

#[derive(thiserror::Error, Debug)]
pub enum KustomizeError {
    #[error("failed to read '{0}', {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse kustomization file '{0}', {1}")]
    Parse(PathBuf, serde_yaml::Error),
    #[error("failed to parse resource '{0}', {1}")]
    ParseResource(PathBuf, serde_yaml::Error),
    #[error("failed to apply patch '{0}' over '{1}', {2}")]
    ApplyPatch(PathBuf, String, serde_json::Error),
}

// -----------------------------------------------------------------------------
// compose function

/// composes the objects produced by the overlay rooted at `dir`.
pub fn compose(
    source: &dyn ManifestSource,
    dir: &Path,
) -> Result<Vec<DynamicObject>, KustomizeError> {
    let kustomization_path = dir.join("kustomization.yaml");
    let raw = source
        .read(&kustomization_path)
        .map_err(|err| KustomizeError::Read(kustomization_path.clone(), err))?;
    let kustomization: KustomizationFile = serde_yaml::from_slice(&raw)
        .map_err(|err| KustomizeError::Parse(kustomization_path.clone(), err))?;

    let mut objects = Vec::new();
    for resource in &kustomization.resources {
        let path = dir.join(resource);
        let raw = source
            .read(&path)
            .map_err(|err| KustomizeError::Read(path.clone(), err))?;

        for document in super::split_yaml_documents(&raw) {
            let object: DynamicObject = serde_yaml::from_str(&document)
                .map_err(|err| KustomizeError::ParseResource(path.clone(), err))?;
            objects.push(object);
        }
    }

    for patch in &kustomization.patches {
        let path = dir.join(&patch.path);
        let raw = source
            .read(&path)
            .map_err(|err| KustomizeError::Read(path.clone(), err))?;
        let patch_value: serde_json::Value = serde_yaml::from_slice(&raw)
            .map_err(|err| KustomizeError::ParseResource(path.clone(), err))?;

        for object in objects.iter_mut() {
            let matches = object.types.as_ref().map(|t| t.kind == patch.target.kind) == Some(true)
                && object.metadata.name.as_deref() == Some(patch.target.name.as_str());

            if !matches {
                continue;
            }

            let mut value = serde_json::to_value(&object)
                .map_err(|err| KustomizeError::ApplyPatch(path.clone(), patch.target.name.clone(), err))?;
            json_patch::merge(&mut value, &patch_value);
            *object = serde_json::from_value(value)
                .map_err(|err| KustomizeError::ApplyPatch(path.clone(), patch.target.name.clone(), err))?;
        }
    }

    Ok(objects)
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, io};

    struct MemorySource(HashMap<PathBuf, Vec<u8>>);

    impl ManifestSource for MemorySource {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "missing"))
        }

        fn list_dir(&self, _path: &Path) -> io::Result<Vec<PathBuf>> {
            Ok(vec![])
        }

        fn is_dir(&self, path: &Path) -> bool {
            self.0.keys().any(|p| p.starts_with(path))
        }
    }

    #[test]
    fn composes_resources_and_applies_patch() {
        let mut files = HashMap::new();
        files.insert(
            PathBuf::from("overlay/kustomization.yaml"),
            br#"
resources:
  - configmap.yaml
patches:
  - path: patch.yaml
    target:
      kind: ConfigMap
      name: cm-1
"#
            .to_vec(),
        );
        files.insert(
            PathBuf::from("overlay/configmap.yaml"),
            br#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm-1
data:
  k: v
"#
            .to_vec(),
        );
        files.insert(
            PathBuf::from("overlay/patch.yaml"),
            br#"
data:
  k: patched
"#
            .to_vec(),
        );

        let source = MemorySource(files);
        let objects = compose(&source, Path::new("overlay")).unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(
            objects[0].data["data"]["k"],
            serde_json::Value::String("patched".to_string())
        );
    }
}
