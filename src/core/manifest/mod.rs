//! # Manifest module
//!
//! Models the three manifest variants of spec.md §3/§4.2 as a tagged enum
//! with a single `process(data) -> objects` contract, avoiding inheritance.
//! The `kind()` tag is queried only by the resource applier, to decide
//! create-vs-merge-patch (spec.md §9 design note).

use std::path::PathBuf;

use handlebars::Handlebars;
use kube::core::DynamicObject;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::object;
use fs::ManifestSource;

pub mod fs;
pub mod kustomize;

// -----------------------------------------------------------------------------
// TemplateData

/// the feature's data bag, passed to a templated manifest's evaluator.
#[derive(Clone, Debug, Default)]
pub struct TemplateData(pub Value);

impl TemplateData {
    pub fn from_map(map: std::collections::BTreeMap<String, Value>) -> Self {
        Self(Value::Object(map.into_iter().collect()))
    }
}

// -----------------------------------------------------------------------------
// ManifestError enum

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("failed to open manifest '{0}', {1}")]
    Open(PathBuf, std::io::Error),
    #[error("failed to parse yaml document in '{0}', {1}")]
    Parse(PathBuf, serde_yaml::Error),
    #[error("failed to parse template in '{0}', {1}")]
    TemplateParse(PathBuf, handlebars::TemplateError),
    #[error("failed to evaluate template '{0}', {1}")]
    TemplateEvaluate(PathBuf, handlebars::RenderError),
    #[error("failed to compose kustomize overlay '{0}', {1}")]
    Kustomize(PathBuf, kustomize::KustomizeError),
}

// -----------------------------------------------------------------------------
// ManifestVariantKind

/// the tag the applier queries to choose its create-vs-merge-patch policy
/// (spec.md §4.3). Every variant except [`Manifest::Patch`] is non-patch.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ManifestVariantKind {
    Patch,
    NonPatch,
}

// -----------------------------------------------------------------------------
// Manifest enum

#[derive(Clone, Debug)]
pub enum Manifest {
    Raw { path: PathBuf },
    Templated { path: PathBuf },
    Patch { path: PathBuf },
    Kustomized { dir: PathBuf },
}

impl Manifest {
    pub fn kind(&self) -> ManifestVariantKind {
        match self {
            Self::Patch { .. } => ManifestVariantKind::Patch,
            Self::Raw { .. } | Self::Templated { .. } | Self::Kustomized { .. } => {
                ManifestVariantKind::NonPatch
            }
        }
    }

    /// reads, (for templated manifests) renders, and parses this manifest
    /// into the untyped objects it yields.
    pub fn process(
        &self,
        source: &dyn ManifestSource,
        data: &TemplateData,
    ) -> Result<Vec<DynamicObject>, ManifestError> {
        match self {
            Self::Raw { path } | Self::Patch { path } => parse_raw(source, path),
            Self::Templated { path } => parse_templated(source, path, data),
            Self::Kustomized { dir } => kustomize::compose(source, dir)
                .map_err(|err| ManifestError::Kustomize(dir.clone(), err)),
        }
    }

    /// sets `managed-by-operator=true` on every object produced, unless a
    /// user already overrode the annotation. Per spec.md invariant I2, only
    /// called for non-patch outputs.
    pub fn mark_as_managed(objects: &mut [DynamicObject]) {
        for obj in objects.iter_mut() {
            object::mark_as_managed(obj);
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

static DOCUMENT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^---\s*$").expect("document separator regex to compile"));

/// splits a multi-document YAML file on the `^---\s*$` separator,
/// discarding blank segments.
pub fn split_yaml_documents(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    DOCUMENT_SEPARATOR
        .split(&text)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_raw(source: &dyn ManifestSource, path: &PathBuf) -> Result<Vec<DynamicObject>, ManifestError> {
    let raw = source
        .read(path)
        .map_err(|err| ManifestError::Open(path.clone(), err))?;

    split_yaml_documents(&raw)
        .into_iter()
        .map(|document| {
            serde_yaml::from_str(&document).map_err(|err| ManifestError::Parse(path.clone(), err))
        })
        .collect()
}

fn parse_templated(
    source: &dyn ManifestSource,
    path: &PathBuf,
    data: &TemplateData,
) -> Result<Vec<DynamicObject>, ManifestError> {
    let raw = source
        .read(path)
        .map_err(|err| ManifestError::Open(path.clone(), err))?;
    let text = String::from_utf8_lossy(&raw);

    let mut registry = Handlebars::new();
    // missingkey=error: a referenced key that is absent is a hard failure.
    registry.set_strict_mode(true);

    let rendered = registry
        .render_template(&text, &data.0)
        .map_err(|err| ManifestError::TemplateEvaluate(path.clone(), err))?;

    split_yaml_documents(rendered.as_bytes())
        .into_iter()
        .map(|document| {
            serde_yaml::from_str(&document).map_err(|err| ManifestError::Parse(path.clone(), err))
        })
        .collect()
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;
    use fs::LocalManifestSource;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn raw_manifest_splits_multidocument_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("namespace.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: b\n",
        )
        .unwrap();

        let source = LocalManifestSource::new(dir.path());
        let manifest = Manifest::Raw { path };
        let objects = manifest.process(&source, &TemplateData::default()).unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].metadata.name.as_deref(), Some("a"));
        assert_eq!(objects[1].metadata.name.as_deref(), Some("b"));
    }

    #[test]
    fn templated_manifest_substitutes_data_bag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cm.tmpl.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{{{name}}}}\n"
        )
        .unwrap();

        let source = LocalManifestSource::new(dir.path());
        let manifest = Manifest::Templated { path };
        let mut map = std::collections::BTreeMap::new();
        map.insert("name".to_string(), Value::String("rendered".to_string()));

        let objects = manifest
            .process(&source, &TemplateData::from_map(map))
            .unwrap();

        assert_eq!(objects[0].metadata.name.as_deref(), Some("rendered"));
    }

    #[test]
    fn templated_manifest_fails_on_missing_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cm.tmpl.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{missing}}\n",
        )
        .unwrap();

        let source = LocalManifestSource::new(dir.path());
        let manifest = Manifest::Templated { path };
        let result = manifest.process(&source, &TemplateData::default());

        assert!(matches!(result, Err(ManifestError::TemplateEvaluate(_, _))));
    }

    #[test]
    fn patch_manifests_are_tagged_patch_kind() {
        let manifest = Manifest::Patch {
            path: PathBuf::from("p.patch.yaml"),
        };
        assert_eq!(manifest.kind(), ManifestVariantKind::Patch);
    }

    #[test]
    fn mark_as_managed_is_a_noop_when_already_overridden() {
        let mut objects = vec![DynamicObject {
            types: Some(kube::core::TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: kube::core::ObjectMeta::default(),
            data: Value::Null,
        }];
        Manifest::mark_as_managed(&mut objects);
        assert!(object::is_managed_by_operator(&objects[0]));
    }
}
