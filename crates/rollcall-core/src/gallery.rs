//! Known identities: snapshot persistence, rebuild from reference images,
//! and change polling of the reference directory.
//!
//! The current [`Gallery`] is immutable and shared behind an `Arc`. A rebuild
//! constructs a new one and swaps it in, so callers holding a snapshot keep a
//! consistent view for the whole reconciliation.

use crate::analyzer::FaceAnalyzer;
use crate::types::{Embedding, GalleryEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

const SNAPSHOT_VERSION: u32 = 1;
const REFERENCE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("reference directory {path}: {source}")]
    ReferenceDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot {path}: {source}")]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot is corrupt: {0}")]
    SnapshotCorrupt(String),
    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate identity name: {0}")]
    DuplicateName(String),
}

impl GalleryError {
    fn is_missing_snapshot(&self) -> bool {
        matches!(self, GalleryError::SnapshotIo { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Immutable set of known identities, stored as parallel name/embedding lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    names: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl Gallery {
    /// Build a gallery, rejecting duplicate names.
    pub fn new(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut names = Vec::with_capacity(entries.len());
        let mut embeddings = Vec::with_capacity(entries.len());

        for entry in entries {
            if !seen.insert(entry.name.clone()) {
                return Err(GalleryError::DuplicateName(entry.name));
            }
            names.push(entry.name);
            embeddings.push(entry.embedding);
        }

        Ok(Self { names, embeddings })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

}

/// On-disk snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    names: Vec<String>,
    embeddings: Vec<Embedding>,
    /// Reference directory listing the snapshot was built from.
    #[serde(default)]
    source_files: BTreeSet<String>,
}

/// Display name for a reference image: file stem with underscores as spaces.
pub fn identity_name(path: &Path) -> Option<String> {
    let name = path.file_stem()?.to_str()?.replace('_', " ");
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

pub fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| REFERENCE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// File names of the reference images directly inside `dir`.
pub fn list_reference_files(dir: &Path) -> io::Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !is_reference_image(&path) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            files.insert(name.to_string());
        }
    }
    Ok(files)
}

/// Has the watched directory's membership changed?
pub fn directory_changed(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> bool {
    previous != current
}

/// A reference image left out of the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
    pub file: String,
    pub reason: String,
}

/// Outcome of one gallery rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildReport {
    pub enrolled: Vec<String>,
    pub skipped: Vec<SkippedImage>,
}

/// Diagnostics snapshot of the store.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryStatus {
    pub total_identities: usize,
    pub embeddings_loaded: bool,
    pub reference_dir: PathBuf,
    pub snapshot_path: PathBuf,
}

/// Owner of the current gallery.
pub struct GalleryStore {
    reference_dir: PathBuf,
    snapshot_path: PathBuf,
    current: RwLock<Arc<Gallery>>,
    observed: Mutex<Option<BTreeSet<String>>>,
}

impl GalleryStore {
    /// Create a store with an empty gallery. Call [`load`](Self::load) next.
    pub fn new(reference_dir: impl Into<PathBuf>, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            reference_dir: reference_dir.into(),
            snapshot_path: snapshot_path.into(),
            current: RwLock::new(Arc::new(Gallery::default())),
            observed: Mutex::new(None),
        }
    }

    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Current gallery. The returned snapshot is unaffected by later rebuilds.
    pub fn snapshot(&self) -> Arc<Gallery> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn known_names(&self) -> Vec<String> {
        self.snapshot().names().to_vec()
    }

    pub fn status(&self) -> GalleryStatus {
        let gallery = self.snapshot();
        GalleryStatus {
            total_identities: gallery.len(),
            embeddings_loaded: !gallery.embeddings().is_empty(),
            reference_dir: self.reference_dir.clone(),
            snapshot_path: self.snapshot_path.clone(),
        }
    }

    /// Load the persisted snapshot, rebuilding from reference images if it is
    /// missing or unreadable. Returns the number of identities loaded.
    pub fn load<A: FaceAnalyzer + ?Sized>(&self, analyzer: &mut A) -> Result<usize, GalleryError> {
        match self.load_snapshot() {
            Ok(count) => Ok(count),
            Err(e) => {
                if e.is_missing_snapshot() {
                    tracing::info!(path = %self.snapshot_path.display(), "no gallery snapshot; building");
                } else {
                    tracing::warn!(
                        path = %self.snapshot_path.display(),
                        error = %e,
                        "gallery snapshot unreadable; rebuilding"
                    );
                }
                let report = self.rebuild(analyzer)?;
                Ok(report.enrolled.len())
            }
        }
    }

    /// Load only the persisted snapshot, with no rebuild fallback.
    pub fn load_snapshot(&self) -> Result<usize, GalleryError> {
        let (gallery, source_files) = read_snapshot(&self.snapshot_path)?;
        let count = gallery.len();
        tracing::info!(
            path = %self.snapshot_path.display(),
            identities = count,
            "loaded gallery snapshot"
        );
        self.install(gallery, source_files);
        Ok(count)
    }

    /// Re-embed every reference image and replace the gallery and snapshot.
    ///
    /// Images without a usable face, or whose name is already taken, are
    /// skipped and reported. A missing reference directory yields an empty
    /// gallery, persisted like any other. Failing to write the snapshot is
    /// returned as an error after the new gallery has been installed.
    pub fn rebuild<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
    ) -> Result<RebuildReport, GalleryError> {
        let files = self.current_files();
        if files.is_empty() {
            tracing::warn!(dir = %self.reference_dir.display(), "no reference images found");
        }

        let mut report = RebuildReport::default();
        let mut entries: Vec<GalleryEntry> = Vec::with_capacity(files.len());
        let mut owners: Vec<&str> = Vec::with_capacity(files.len());

        for file in &files {
            let path = self.reference_dir.join(file);
            let Some(name) = identity_name(&path) else {
                report.skipped.push(SkippedImage {
                    file: file.clone(),
                    reason: "file name gives no identity name".into(),
                });
                continue;
            };

            if let Some(pos) = entries.iter().position(|e| e.name == name) {
                let reason = format!("name {name:?} already taken by {}", owners[pos]);
                tracing::warn!(file = %file, reason = %reason, "skipping reference image");
                report.skipped.push(SkippedImage { file: file.clone(), reason });
                continue;
            }

            match analyzer.embed_reference(&path) {
                Ok(Some(embedding)) => {
                    tracing::info!(name = %name, file = %file, "encoded reference face");
                    report.enrolled.push(name.clone());
                    entries.push(GalleryEntry { name, embedding });
                    owners.push(file);
                }
                Ok(None) => {
                    tracing::warn!(file = %file, "no face found in reference image");
                    report.skipped.push(SkippedImage {
                        file: file.clone(),
                        reason: "no face found".into(),
                    });
                }
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "failed to embed reference image");
                    report.skipped.push(SkippedImage {
                        file: file.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let gallery = Gallery::new(entries)?;
        tracing::info!(
            identities = gallery.len(),
            skipped = report.skipped.len(),
            "gallery rebuilt"
        );

        let persisted = write_snapshot(&self.snapshot_path, &gallery, &files);
        self.install(gallery, files);
        persisted?;

        Ok(report)
    }

    /// Rebuild if the reference directory's membership changed since the last
    /// load or rebuild. Returns whether a reload happened.
    pub fn check_and_reload<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
    ) -> Result<bool, GalleryError> {
        let current = self.current_files();

        let changed = {
            let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
            match observed.as_ref() {
                Some(previous) => directory_changed(previous, &current),
                None => {
                    *observed = Some(current);
                    false
                }
            }
        };

        if !changed {
            return Ok(false);
        }

        tracing::info!(dir = %self.reference_dir.display(), "reference images changed; reloading gallery");
        self.rebuild(analyzer)?;
        Ok(true)
    }

    /// Reference listing; an unreadable directory counts as empty.
    fn current_files(&self) -> BTreeSet<String> {
        list_reference_files(&self.reference_dir).unwrap_or_else(|source| {
            let err = GalleryError::ReferenceDir {
                path: self.reference_dir.clone(),
                source,
            };
            tracing::warn!(error = %err, "reference directory unavailable; treating as empty");
            BTreeSet::new()
        })
    }

    fn install(&self, gallery: Gallery, source_files: BTreeSet<String>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(gallery);
        *self.observed.lock().unwrap_or_else(PoisonError::into_inner) = Some(source_files);
    }
}

fn read_snapshot(path: &Path) -> Result<(Gallery, BTreeSet<String>), GalleryError> {
    let bytes = std::fs::read(path).map_err(|source| GalleryError::SnapshotIo {
        path: path.to_path_buf(),
        source,
    })?;
    let file: SnapshotFile = serde_json::from_slice(&bytes)?;

    if file.version != SNAPSHOT_VERSION {
        return Err(GalleryError::SnapshotCorrupt(format!(
            "unsupported version {}",
            file.version
        )));
    }
    if file.names.len() != file.embeddings.len() {
        return Err(GalleryError::SnapshotCorrupt(format!(
            "{} names but {} embeddings",
            file.names.len(),
            file.embeddings.len()
        )));
    }
    if file.names.iter().any(String::is_empty) {
        return Err(GalleryError::SnapshotCorrupt("empty identity name".into()));
    }

    let entries = file
        .names
        .into_iter()
        .zip(file.embeddings)
        .map(|(name, embedding)| GalleryEntry { name, embedding })
        .collect();
    Ok((Gallery::new(entries)?, file.source_files))
}

fn write_snapshot(
    path: &Path,
    gallery: &Gallery,
    source_files: &BTreeSet<String>,
) -> Result<(), GalleryError> {
    let io_err = |source: io::Error| GalleryError::SnapshotIo {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let file = SnapshotFile {
        version: SNAPSHOT_VERSION,
        names: gallery.names().to_vec(),
        embeddings: gallery.embeddings().to_vec(),
        source_files: source_files.clone(),
    };
    let json = serde_json::to_vec(&file)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;

    tracing::info!(path = %path.display(), identities = gallery.len(), "saved gallery snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::types::BoundingBox;
    use std::collections::HashMap;

    /// Embeds reference images by file name; unknown files have no face.
    #[derive(Default)]
    struct ByFileName {
        faces: HashMap<String, Vec<f32>>,
        calls: usize,
    }

    impl ByFileName {
        fn with(mut self, file: &str, v: Vec<f32>) -> Self {
            self.faces.insert(file.to_string(), v);
            self
        }

        fn lookup(&self, image: &Path) -> Option<&Vec<f32>> {
            let file = image.file_name()?.to_str()?;
            self.faces.get(file)
        }
    }

    impl FaceAnalyzer for ByFileName {
        fn detect_faces(&mut self, image: &Path) -> Result<Vec<BoundingBox>, AnalyzerError> {
            self.calls += 1;
            if image.to_string_lossy().contains("broken") {
                return Err(AnalyzerError::ImageUnreadable("broken".into()));
            }
            Ok(match self.lookup(image) {
                Some(_) => vec![BoundingBox::new(0.0, 10.0, 10.0, 0.0)],
                None => Vec::new(),
            })
        }

        fn extract_embeddings(
            &mut self,
            image: &Path,
            _boxes: &[BoundingBox],
        ) -> Result<Vec<Embedding>, AnalyzerError> {
            Ok(self.lookup(image).map(|v| Embedding::new(v.clone())).into_iter().collect())
        }
    }

    fn touch(dir: &Path, file: &str) {
        std::fs::write(dir.join(file), b"img").unwrap();
    }

    #[test]
    fn test_identity_name() {
        assert_eq!(identity_name(Path::new("dataset/Alice_Johnson.jpg")).as_deref(), Some("Alice Johnson"));
        assert_eq!(identity_name(Path::new("Liam_O'Connor.PNG")).as_deref(), Some("Liam O'Connor"));
        assert_eq!(identity_name(Path::new("_Ann.jpg")).as_deref(), Some(" Ann"));
    }

    #[test]
    fn test_reference_extensions() {
        assert!(is_reference_image(Path::new("a.JPEG")));
        assert!(is_reference_image(Path::new("a.gif")));
        assert!(!is_reference_image(Path::new("a.txt")));
        assert!(!is_reference_image(Path::new("jpg")));
    }

    #[test]
    fn test_directory_changed() {
        let a: BTreeSet<String> = ["x.jpg".to_string()].into();
        let b: BTreeSet<String> = ["x.jpg".to_string(), "y.jpg".to_string()].into();
        assert!(!directory_changed(&a, &a.clone()));
        assert!(directory_changed(&a, &b));
        assert!(directory_changed(&b, &a));
    }

    #[test]
    fn test_gallery_rejects_duplicate_names() {
        let e = |n: &str| GalleryEntry { name: n.into(), embedding: Embedding::new(vec![0.0]) };
        let err = Gallery::new(vec![e("Ann"), e("Ben"), e("Ann")]).unwrap_err();
        assert!(matches!(err, GalleryError::DuplicateName(ref n) if n == "Ann"));
    }

    #[test]
    fn test_rebuild_skips_faceless_and_failing_images() {
        let tmp = tempfile::tempdir().unwrap();
        let refs = tmp.path().join("dataset");
        std::fs::create_dir(&refs).unwrap();
        touch(&refs, "Alice_Smith.jpg");
        touch(&refs, "Blank.png");
        touch(&refs, "broken.jpg");
        touch(&refs, "notes.txt");

        let store = GalleryStore::new(&refs, tmp.path().join("models/gallery.json"));
        let mut analyzer = ByFileName::default().with("Alice_Smith.jpg", vec![1.0, 2.0]);
        let report = store.rebuild(&mut analyzer).unwrap();

        assert_eq!(report.enrolled, vec!["Alice Smith".to_string()]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(store.known_names(), vec!["Alice Smith".to_string()]);
        assert!(store.snapshot_path().exists());
    }

    #[test]
    fn test_rebuild_rejects_second_image_with_same_name() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "Ann.jpg");
        touch(tmp.path(), "Ann.png");

        let store = GalleryStore::new(tmp.path(), tmp.path().join("g.json"));
        let mut analyzer = ByFileName::default()
            .with("Ann.jpg", vec![0.0])
            .with("Ann.png", vec![1.0]);
        let report = store.rebuild(&mut analyzer).unwrap();

        assert_eq!(report.enrolled, vec!["Ann".to_string()]);
        assert_eq!(report.skipped[0].file, "Ann.png");
        assert!(report.skipped[0].reason.contains("Ann.jpg"));
        assert_eq!(store.snapshot().embeddings()[0].values, vec![0.0]);
    }

    #[test]
    fn test_missing_directory_degrades_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(tmp.path().join("nope"), tmp.path().join("g.json"));
        let report = store.rebuild(&mut ByFileName::default()).unwrap();
        assert!(report.enrolled.is_empty());
        assert!(store.snapshot().is_empty());
        assert!(!store.status().embeddings_loaded);
        assert!(store.snapshot_path().exists());
    }

    #[test]
    fn test_removed_directory_replaces_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let refs = tmp.path().join("dataset");
        std::fs::create_dir(&refs).unwrap();
        touch(&refs, "Ann.jpg");
        let snap = tmp.path().join("g.json");
        let mut analyzer = ByFileName::default().with("Ann.jpg", vec![0.0]);

        let store = GalleryStore::new(&refs, &snap);
        store.load(&mut analyzer).unwrap();
        assert_eq!(store.snapshot().len(), 1);

        std::fs::remove_dir_all(&refs).unwrap();
        let report = store.rebuild(&mut analyzer).unwrap();
        assert!(report.enrolled.is_empty());
        assert!(store.snapshot().is_empty());

        let restarted = GalleryStore::new(&refs, &snap);
        assert_eq!(restarted.load_snapshot().unwrap(), 0);
        assert!(restarted.known_names().is_empty());
    }

    #[test]
    fn test_check_and_reload_empties_gallery_when_directory_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let refs = tmp.path().join("dataset");
        std::fs::create_dir(&refs).unwrap();
        touch(&refs, "Ann.jpg");
        let mut analyzer = ByFileName::default().with("Ann.jpg", vec![0.0]);

        let store = GalleryStore::new(&refs, tmp.path().join("g.json"));
        store.load(&mut analyzer).unwrap();
        let before = analyzer.calls;

        std::fs::remove_dir_all(&refs).unwrap();
        assert!(store.check_and_reload(&mut analyzer).unwrap());
        assert!(store.snapshot().is_empty());
        assert_eq!(analyzer.calls, before);

        assert!(!store.check_and_reload(&mut analyzer).unwrap());
    }

    #[test]
    fn test_load_prefers_snapshot_over_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "Cara.jpg");
        let snap = tmp.path().join("g.json");

        let first = GalleryStore::new(tmp.path(), &snap);
        first.rebuild(&mut ByFileName::default().with("Cara.jpg", vec![0.5])).unwrap();

        let second = GalleryStore::new(tmp.path(), &snap);
        let mut analyzer = ByFileName::default();
        assert_eq!(second.load(&mut analyzer).unwrap(), 1);
        assert_eq!(analyzer.calls, 0);
        assert_eq!(second.known_names(), vec!["Cara".to_string()]);
    }

    #[test]
    fn test_corrupt_snapshot_triggers_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "Dev.jpg");
        let snap = tmp.path().join("g.json");
        std::fs::write(&snap, br#"{"version":1,"names":["Dev"],"embeddings":[]}"#).unwrap();

        let store = GalleryStore::new(tmp.path(), &snap);
        let mut analyzer = ByFileName::default().with("Dev.jpg", vec![0.1]);
        assert_eq!(store.load(&mut analyzer).unwrap(), 1);
        assert!(analyzer.calls > 0);
    }

    #[test]
    fn test_check_and_reload_detects_new_image() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "Eli.jpg");
        let store = GalleryStore::new(tmp.path(), tmp.path().join("g.json"));
        let mut analyzer = ByFileName::default()
            .with("Eli.jpg", vec![0.0])
            .with("Fay.jpg", vec![1.0]);
        store.load(&mut analyzer).unwrap();

        assert!(!store.check_and_reload(&mut analyzer).unwrap());

        let before = store.snapshot();
        touch(tmp.path(), "Fay.jpg");
        assert!(store.check_and_reload(&mut analyzer).unwrap());
        assert_eq!(store.snapshot().len(), 2);
        // Earlier snapshot is untouched by the swap.
        assert_eq!(before.len(), 1);

        assert!(!store.check_and_reload(&mut analyzer).unwrap());
    }

    #[test]
    fn test_stale_snapshot_detected_after_restart() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "Gus.jpg");
        let snap = tmp.path().join("g.json");
        let mut analyzer = ByFileName::default()
            .with("Gus.jpg", vec![0.0])
            .with("Hal.jpg", vec![1.0]);
        GalleryStore::new(tmp.path(), &snap).rebuild(&mut analyzer).unwrap();

        touch(tmp.path(), "Hal.jpg");
        let store = GalleryStore::new(tmp.path(), &snap);
        store.load(&mut analyzer).unwrap();
        assert_eq!(store.snapshot().len(), 1);
        assert!(store.check_and_reload(&mut analyzer).unwrap());
        assert_eq!(store.snapshot().len(), 2);
    }
}
