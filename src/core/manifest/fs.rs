//! # Manifest file-system abstraction
//!
//! Treats the per-component manifest bundle as an opaque tree of
//! directories whose leaves are YAML documents (spec.md §1, §6). The
//! concrete file layout is deliberately out of scope; this module only
//! needs enough of a file-system capability to open a path and walk a
//! directory.

use std::{
    io,
    path::{Path, PathBuf},
};

// -----------------------------------------------------------------------------
// ManifestSource trait

/// minimum capability the manifest loader needs from wherever manifests
/// live: local disk, an embedded asset bundle, or a virtual overlay.
pub trait ManifestSource: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    fn is_dir(&self, path: &Path) -> bool;
}

// -----------------------------------------------------------------------------
// LocalManifestSource

/// reads manifests from a directory on local disk, rooted at the path the
/// operator was configured with.
pub struct LocalManifestSource {
    root: PathBuf,
}

impl LocalManifestSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ManifestSource for LocalManifestSource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    /// recurses into every subdirectory of `path`, per spec.md:260's rooted
    /// manifest tree, yielding leaf files and kustomize-composition roots
    /// (directories containing a `kustomization.yaml`) as entries in their
    /// own right; a composition root's contents are left to
    /// `kustomize::compose` rather than walked here.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        self.collect_dir(path, &mut entries)?;
        entries.sort();
        Ok(entries)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

impl LocalManifestSource {
    fn collect_dir(&self, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if is_kustomize_root(self, &path) {
                    out.push(path);
                } else {
                    self.collect_dir(&path, out)?;
                }
            } else {
                out.push(path);
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ManifestKind classification

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ManifestKind {
    Raw,
    Templated,
    Patch,
    Kustomized,
}

/// classifies a path per spec.md §4.2: `.tmpl.` in the filename is
/// templated, `.patch.` is a patch (affects ownership decoration in the
/// applier), a file literally named `kustomization.yaml` is a composition
/// root. `list_dir` never yields such a file directly (a composition root
/// is surfaced as its containing directory instead), so this arm only
/// matters for direct callers; anything else is raw.
pub fn classify(path: &Path) -> ManifestKind {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    if file_name == "kustomization.yaml" {
        return ManifestKind::Kustomized;
    }

    if file_name.contains(".tmpl.") {
        return ManifestKind::Templated;
    }

    if file_name.contains(".patch.") {
        return ManifestKind::Patch;
    }

    ManifestKind::Raw
}

/// true when `dir` contains a `kustomization.yaml`, marking it a
/// composition root.
pub fn is_kustomize_root(source: &dyn ManifestSource, dir: &Path) -> bool {
    source.is_dir(dir) && source.read(&dir.join("kustomization.yaml")).is_ok()
}

// -----------------------------------------------------------------------------
// tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_templated_by_infix() {
        assert_eq!(
            classify(Path::new("deployment.tmpl.yaml")),
            ManifestKind::Templated
        );
    }

    #[test]
    fn classifies_patch_by_infix() {
        assert_eq!(
            classify(Path::new("service.patch.yaml")),
            ManifestKind::Patch
        );
    }

    #[test]
    fn classifies_kustomization_file() {
        assert_eq!(
            classify(Path::new("kustomization.yaml")),
            ManifestKind::Kustomized
        );
    }

    #[test]
    fn classifies_raw_by_default() {
        assert_eq!(classify(Path::new("namespace.yaml")), ManifestKind::Raw);
    }

    #[test]
    fn raw_takes_priority_over_unrelated_dots() {
        assert_eq!(
            classify(Path::new("my.config.map.yaml")),
            ManifestKind::Raw
        );
    }

    #[test]
    fn list_dir_recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("component-a")).unwrap();
        std::fs::write(dir.path().join("component-a").join("deployment.yaml"), "").unwrap();
        std::fs::write(dir.path().join("namespace.yaml"), "").unwrap();

        let source = LocalManifestSource::new(dir.path());
        let entries = source.list_dir(dir.path()).unwrap();

        assert!(entries.contains(&dir.path().join("component-a").join("deployment.yaml")));
        assert!(entries.contains(&dir.path().join("namespace.yaml")));
    }

    #[test]
    fn list_dir_stops_at_a_kustomize_root_instead_of_descending() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = dir.path().join("overlay");
        std::fs::create_dir(&overlay).unwrap();
        std::fs::write(overlay.join("kustomization.yaml"), "resources: []").unwrap();
        std::fs::write(overlay.join("configmap.yaml"), "").unwrap();

        let source = LocalManifestSource::new(dir.path());
        let entries = source.list_dir(dir.path()).unwrap();

        assert_eq!(entries, vec![overlay]);
    }
}
