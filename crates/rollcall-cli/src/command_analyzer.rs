//! Face analyzer backed by an external program.
//!
//! The program is run as `<program> [args...] <image>` and must print
//! `{"faces":[{"box":[top,right,bottom,left],"embedding":[...]}]}` on stdout.

use rollcall_core::{AnalyzerError, BoundingBox, Embedding, FaceAnalyzer};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Deserialize)]
struct AnalyzedFace {
    #[serde(rename = "box")]
    bbox: BoundingBox,
    embedding: Embedding,
}

#[derive(Debug, Deserialize)]
struct AnalyzerOutput {
    faces: Vec<AnalyzedFace>,
}

pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    /// Faces from the last run per image, held between detect and extract.
    pending: HashMap<PathBuf, Vec<AnalyzedFace>>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            pending: HashMap::new(),
        }
    }

    fn run(&self, image: &Path) -> Result<Vec<AnalyzedFace>, AnalyzerError> {
        if !image.is_file() {
            return Err(AnalyzerError::ImageUnreadable(image.display().to_string()));
        }

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalyzerError::DetectionFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let parsed: AnalyzerOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| AnalyzerError::DetectionFailed(format!("unparsable analyzer output: {e}")))?;

        tracing::debug!(
            image = %image.display(),
            faces = parsed.faces.len(),
            "external analyzer finished"
        );
        Ok(parsed.faces)
    }
}

impl FaceAnalyzer for CommandAnalyzer {
    fn detect_faces(&mut self, image: &Path) -> Result<Vec<BoundingBox>, AnalyzerError> {
        let faces = self.run(image)?;
        let boxes = faces.iter().map(|f| f.bbox).collect();
        // Faceless images never reach extract_embeddings.
        if !faces.is_empty() {
            self.pending.insert(image.to_path_buf(), faces);
        }
        Ok(boxes)
    }

    fn extract_embeddings(
        &mut self,
        image: &Path,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        let faces = match self.pending.remove(image) {
            Some(faces) => faces,
            None => self.run(image)?,
        };

        boxes
            .iter()
            .map(|b| {
                faces
                    .iter()
                    .find(|f| f.bbox == *b)
                    .map(|f| f.embedding.clone())
                    .ok_or(AnalyzerError::Misaligned {
                        boxes: boxes.len(),
                        embeddings: faces.len(),
                    })
            })
            .collect()
    }
}
