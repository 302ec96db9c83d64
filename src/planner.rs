//! Scene prompt planning: asks the text provider for one delimited block per
//! scene and splits the reply back into per-scene prompts.

use crate::config::PipelineConfig;
use crate::error::PlanParseError;
use crate::job::{SceneMode, ScenePlan};
use regex::Regex;
use tracing::debug;

/// Literal token separating scene blocks in the provider's reply
pub const SCENE_SEPARATOR: &str = "///";

/// Opening phrase required of every image-to-video scene
pub const CONTINUATION_PREFIX: &str = "continuation of the previous scene";

#[derive(Debug, Clone)]
pub struct ScenePromptPlanner {
    character_description: String,
    visual_style: String,
    scene_direction: String,
    scene_seconds: u32,
}

impl ScenePromptPlanner {
    pub fn new(
        character_description: impl Into<String>,
        visual_style: impl Into<String>,
        scene_direction: impl Into<String>,
        scene_seconds: u32,
    ) -> Self {
        Self {
            character_description: character_description.into(),
            visual_style: visual_style.into(),
            scene_direction: scene_direction.into(),
            scene_seconds,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.character_description.clone(),
            config.visual_style.clone(),
            config.scene_direction.clone(),
            config.scene_seconds,
        )
    }

    /// Header line opening scene `index` (0-based) in the reply
    pub fn header(index: usize) -> String {
        format!("Scene {} ({}):", index + 1, SceneMode::for_index(index).label())
    }

    /// Instruction for the spoken script, sized to the target duration
    pub fn script_instruction(idea: &str, target_duration_seconds: u32) -> String {
        format!(
            "Generate me a script for the video with the idea: {}. \
             Script should be {} seconds long when spoken, text only. \
             Do not include scene directions, speaker names or any formatting.",
            idea.trim(),
            target_duration_seconds
        )
    }

    /// Instruction asking for exactly `scene_count` delimited scene blocks
    pub fn build_instruction(&self, idea: &str, script: &str, scene_count: usize) -> String {
        let direction = self.scene_direction.replace("{script}", script.trim());

        let format_blocks = (0..scene_count)
            .map(|i| format!("{}\n[Your prompt here]", Self::header(i)))
            .collect::<Vec<_>>()
            .join(&format!("\n\n{}\n\n", SCENE_SEPARATOR));

        let mut tasks = vec!["Create the first scene as a **Text-to-Video prompt** (Scene 1).".to_string()];
        if scene_count > 1 {
            tasks.push(format!(
                "Create follow-up scenes as **Image-to-Video prompts** (Scene 2 → Scene {}).",
                scene_count
            ));
            tasks.push(format!("Always start follow-up scenes with: \"{}\".", CONTINUATION_PREFIX));
        } else {
            tasks.push("There are no follow-up scenes.".to_string());
        }
        tasks.push("Keep **character descriptions, setting, and color palette consistent** across all scenes.".to_string());
        tasks.push("Add small but clear scene progression in each step (new action, expression, or camera movement).".to_string());
        tasks.push("Maintain the same visual style across all scenes.".to_string());
        tasks.push(format!(
            "Return exactly {} scene blocks separated by a line containing only {}, using this format and nothing else:",
            scene_count, SCENE_SEPARATOR
        ));
        let tasks = tasks
            .iter()
            .enumerate()
            .map(|(i, task)| format!("{}. {}", i + 1, task))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are an AI prompt writer specialized in creating continuous video prompts using a \
             \"video → screenshot → image-to-video\" technique to make longer stories.\n\n\
             USER INPUT:\n\
             1. Character Descriptions: [{character}]\n\
             2. Main Scene Description: [{direction}. Split the script across the scenes. \
             Each scene is exactly {seconds} seconds long.]\n\
             3. Number of Scenes: [{count}]\n\
             4. Visual Style: [{style}]\n\
             5. Topic: [{idea}]\n\n\
             YOUR TASKS:\n\
             {tasks}\n\n\
             {format_blocks}\n",
            character = self.character_description,
            direction = direction,
            seconds = self.scene_seconds,
            count = scene_count,
            style = self.visual_style,
            idea = idea.trim(),
            tasks = tasks,
            format_blocks = format_blocks,
        )
    }

    /// Split a reply into exactly `scene_count` plans, in order
    pub fn parse_plan(&self, raw: &str, scene_count: usize) -> Result<Vec<ScenePlan>, PlanParseError> {
        let segments: Vec<&str> = raw.split(SCENE_SEPARATOR).collect();

        if segments.len() != scene_count {
            return Err(PlanParseError::WrongSegmentCount {
                expected: scene_count,
                found: segments.len(),
            });
        }

        let mut plans = Vec::with_capacity(scene_count);
        for (index, segment) in segments.into_iter().enumerate() {
            let prompt = strip_header(segment, index);
            if prompt.is_empty() {
                return Err(PlanParseError::EmptyScene { index });
            }
            plans.push(ScenePlan::new(index, prompt));
        }

        debug!("📝 Parsed {} scene prompts", plans.len());
        Ok(plans)
    }
}

/// Remove the expected `Scene k (<mode>):` header wherever it appears, along with any
/// preamble before it. Tolerates markdown emphasis and case.
fn strip_header(segment: &str, index: usize) -> String {
    let pattern = format!(
        r"(?i)[*#_ ]*scene\s+{}\s*\(\s*{}\s*\)\s*:?[*_ ]*",
        index + 1,
        regex::escape(SceneMode::for_index(index).label())
    );

    let header = match Regex::new(&pattern) {
        Ok(re) => re.find(segment).map(|m| m.end()),
        Err(_) => {
            let literal = ScenePromptPlanner::header(index);
            segment.find(&literal).map(|start| start + literal.len())
        }
    };

    match header {
        Some(end) => segment[end..].trim().to_string(),
        None => segment.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn planner() -> ScenePromptPlanner {
        ScenePromptPlanner::from_config(&Config::default().pipeline)
    }

    fn reply(scene_count: usize) -> String {
        (0..scene_count)
            .map(|i| {
                let body = if i == 0 {
                    "A gorilla sits behind a desk.".to_string()
                } else {
                    format!("{}, the gorilla leans in ({}).", CONTINUATION_PREFIX, i)
                };
                format!("{}\n{}\n", ScenePromptPlanner::header(i), body)
            })
            .collect::<Vec<_>>()
            .join("\n///\n\n")
    }

    #[test]
    fn test_headers() {
        assert_eq!(ScenePromptPlanner::header(0), "Scene 1 (Text-to-Video):");
        assert_eq!(ScenePromptPlanner::header(2), "Scene 3 (Image-to-Video):");
    }

    #[test]
    fn test_script_instruction_carries_duration() {
        let instruction = ScenePromptPlanner::script_instruction("  Robots learn to paint ", 24);
        assert!(instruction.contains("idea: Robots learn to paint."));
        assert!(instruction.contains("24 seconds long"));
    }

    #[test]
    fn test_instruction_lists_every_scene() {
        let instruction = planner().build_instruction("AI news", "Robots now paint.", 3);
        assert!(instruction.contains("Human-like gorilla"));
        assert!(instruction.contains("Ultra realistic 3D animated style"));
        assert!(instruction.contains("Robots now paint."));
        assert!(instruction.contains("Number of Scenes: [3]"));
        assert!(instruction.contains("Scene 1 (Text-to-Video):"));
        assert!(instruction.contains("Scene 3 (Image-to-Video):"));
        assert_eq!(instruction.matches(SCENE_SEPARATOR).count(), 2 + 1);
        assert!(instruction.contains(CONTINUATION_PREFIX));
    }

    fn task_numbers(instruction: &str) -> Vec<u32> {
        let tasks = instruction.split("YOUR TASKS:").nth(1).unwrap();
        tasks
            .lines()
            .filter_map(|line| line.split_once(". ").and_then(|(n, _)| n.trim().parse().ok()))
            .collect()
    }

    #[test]
    fn test_task_list_is_numbered_in_order() {
        let multi = planner().build_instruction("AI news", "Robots now paint.", 3);
        assert_eq!(task_numbers(&multi), vec![1, 2, 3, 4, 5, 6, 7]);

        let single = planner().build_instruction("AI news", "Short.", 1);
        assert_eq!(task_numbers(&single), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_single_scene_instruction_has_no_follow_ups() {
        let instruction = planner().build_instruction("AI news", "Short.", 1);
        assert!(!instruction.contains("Image-to-Video):"));
        assert!(instruction.contains("no follow-up scenes"));
    }

    #[test]
    fn test_parse_matches_scene_count() {
        for scene_count in 1..=5 {
            let plans = planner().parse_plan(&reply(scene_count), scene_count).unwrap();
            assert_eq!(plans.len(), scene_count);
            for (i, plan) in plans.iter().enumerate() {
                assert_eq!(plan.index, i);
                assert_eq!(plan.mode, SceneMode::for_index(i));
                assert!(!plan.prompt_text.starts_with("Scene"));
                assert_eq!(plan.seed_image_path, None);
            }
            assert_eq!(plans[0].prompt_text, "A gorilla sits behind a desk.");
        }
    }

    #[test]
    fn test_wrong_separator_count_fails() {
        let err = planner().parse_plan(&reply(2), 3).unwrap_err();
        assert_eq!(err, PlanParseError::WrongSegmentCount { expected: 3, found: 2 });

        let trailing = format!("{}\n///\n", reply(2));
        let err = planner().parse_plan(&trailing, 2).unwrap_err();
        assert_eq!(err, PlanParseError::WrongSegmentCount { expected: 2, found: 3 });
    }

    #[test]
    fn test_strips_markdown_headers() {
        let raw = "**Scene 1 (Text-to-Video):**\nWide shot of a newsroom.\n///\n## scene 2 (image-to-video)\ncontinuation of the previous scene, zoom in.";
        let plans = planner().parse_plan(raw, 2).unwrap();
        assert_eq!(plans[0].prompt_text, "Wide shot of a newsroom.");
        assert_eq!(plans[1].prompt_text, "continuation of the previous scene, zoom in.");
    }

    #[test]
    fn test_header_after_preamble_is_stripped() {
        let raw = "Here are your prompts:\n\nScene 1 (Text-to-Video):\nWide shot.\n///\n\
                   Sure! **Scene 2 (Image-to-Video):** continuation of the previous scene, close up.";
        let plans = planner().parse_plan(raw, 2).unwrap();
        assert_eq!(plans[0].prompt_text, "Wide shot.");
        assert_eq!(plans[1].prompt_text, "continuation of the previous scene, close up.");
    }

    #[test]
    fn test_only_expected_header_is_stripped() {
        // A Text-to-Video header in the second block is not the expected one
        let raw = "Scene 1 (Text-to-Video):\nOpening.\n///\nScene 2 (Text-to-Video):\nOdd header.";
        let plans = planner().parse_plan(raw, 2).unwrap();
        assert!(plans[1].prompt_text.starts_with("Scene 2 (Text-to-Video):"));
    }

    #[test]
    fn test_empty_block_fails() {
        let raw = "Scene 1 (Text-to-Video):\nOpening.\n///\nScene 2 (Image-to-Video):\n   ";
        let err = planner().parse_plan(raw, 2).unwrap_err();
        assert_eq!(err, PlanParseError::EmptyScene { index: 1 });
    }
}
