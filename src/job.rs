use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a scene's clip is seeded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SceneMode {
    /// Generated from the prompt alone
    TextToVideo,
    /// Generated from the prompt plus the previous scene's last frame
    ImageToVideo,
}

impl SceneMode {
    /// Scene 0 always starts from text; every later scene continues from a frame
    pub fn for_index(index: usize) -> Self {
        if index == 0 {
            SceneMode::TextToVideo
        } else {
            SceneMode::ImageToVideo
        }
    }

    /// Label used in the plan block headers
    pub fn label(&self) -> &'static str {
        match self {
            SceneMode::TextToVideo => "Text-to-Video",
            SceneMode::ImageToVideo => "Image-to-Video",
        }
    }
}

/// One scene's generation instruction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenePlan {
    pub index: usize,
    pub mode: SceneMode,
    pub prompt_text: String,
    /// Set only for image-to-video scenes, once the previous frame exists
    pub seed_image_path: Option<PathBuf>,
}

impl ScenePlan {
    pub fn new(index: usize, prompt_text: String) -> Self {
        Self {
            index,
            mode: SceneMode::for_index(index),
            prompt_text,
            seed_image_path: None,
        }
    }

    /// Copy of this plan bound to a seed image. Text-to-video plans never carry one.
    pub fn with_seed(&self, seed: &Path) -> Self {
        let mut plan = self.clone();
        if plan.mode == SceneMode::ImageToVideo {
            plan.seed_image_path = Some(seed.to_path_buf());
        }
        plan
    }
}

/// One end-to-end run, discarded when the run ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub idea: String,
    pub script: String,
    pub scene_count: usize,
    pub target_duration_seconds: u32,
    pub scenes: Vec<ScenePlan>,
}

impl GenerationJob {
    pub fn new(scene_count: usize, target_duration_seconds: u32) -> Self {
        Self {
            idea: String::new(),
            script: String::new(),
            scene_count,
            target_duration_seconds,
            scenes: Vec::new(),
        }
    }
}

/// A generated or derived video file on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    /// Advisory only, never enforced
    pub duration_seconds: Option<f64>,
    pub is_intermediate: bool,
}

impl VideoArtifact {
    pub fn intermediate(path: PathBuf) -> Self {
        Self {
            path,
            duration_seconds: None,
            is_intermediate: true,
        }
    }

    pub fn final_output(path: PathBuf) -> Self {
        Self {
            path,
            duration_seconds: None,
            is_intermediate: false,
        }
    }
}

/// Still image taken from a clip's final frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameImage {
    pub path: PathBuf,
    pub source_artifact: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_modes_by_index() {
        assert_eq!(SceneMode::for_index(0), SceneMode::TextToVideo);
        assert_eq!(SceneMode::for_index(1), SceneMode::ImageToVideo);
        assert_eq!(SceneMode::for_index(7), SceneMode::ImageToVideo);
        assert_eq!(SceneMode::TextToVideo.label(), "Text-to-Video");
    }

    #[test]
    fn test_seed_only_binds_to_image_scenes() {
        let seed = Path::new("work/seed.jpg");

        let first = ScenePlan::new(0, "a gorilla at a desk".to_string()).with_seed(seed);
        assert_eq!(first.seed_image_path, None);

        let second = ScenePlan::new(1, "continuation of the previous scene".to_string()).with_seed(seed);
        assert_eq!(second.seed_image_path.as_deref(), Some(seed));
    }
}
