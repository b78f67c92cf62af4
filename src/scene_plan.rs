use crate::query::select_query;
use serde::{Deserialize, Serialize};

/// Context used when a scene starts past the end of the script.
pub const FALLBACK_CONTEXT: &str = "ai workstation laptop coding workflow";

const MAX_QUERY_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneAssignment {
    pub index: usize,
    pub timestamp_seconds: f64,
    pub context: String,
    pub search_query: String,
}

#[derive(Debug, Clone)]
pub struct ScenePlanner {
    pub scene_count: usize,
    pub context_words: usize,
    pub fallback_words_per_second: f64,
}

impl ScenePlanner {
    pub fn new(scene_count: usize, context_words: usize, fallback_words_per_second: f64) -> Self {
        Self {
            scene_count: scene_count.max(1),
            context_words: context_words.max(1),
            fallback_words_per_second,
        }
    }

    pub fn avg_scene_duration(&self, duration: f64) -> f64 {
        if duration > 0.0 {
            duration / self.scene_count as f64
        } else {
            0.0
        }
    }

    /// Split `duration` seconds into `scene_count` equal scenes and give each
    /// the query for the words spoken when it starts. `words` must already be
    /// lower-cased.
    pub fn plan(&self, duration: f64, words: &[String], keywords: &str) -> Vec<SceneAssignment> {
        let avg = self.avg_scene_duration(duration);
        let words_per_second = if duration > 0.0 && duration.is_finite() {
            words.len() as f64 / duration
        } else {
            self.fallback_words_per_second
        };

        (0..self.scene_count)
            .map(|index| {
                let timestamp = index as f64 * avg;
                let word_index = (timestamp * words_per_second) as usize;
                let context = if word_index < words.len() {
                    let end = (word_index + self.context_words).min(words.len());
                    words[word_index..end].join(" ")
                } else {
                    FALLBACK_CONTEXT.to_string()
                };
                let search_query = truncate_chars(&select_query(&context, keywords), MAX_QUERY_CHARS);

                SceneAssignment {
                    index,
                    timestamp_seconds: timestamp,
                    context,
                    search_query,
                }
            })
            .collect()
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(|w| w.to_lowercase()).collect()
    }

    #[test]
    fn produces_n_increasing_timestamps_within_duration() {
        let script = words(&"one two three four five six seven eight nine ten ".repeat(40));
        for &(duration, n) in &[(600.0, 20usize), (37.5, 25), (1.0, 3), (12345.6, 7)] {
            let planner = ScenePlanner::new(n, 7, 2.5);
            let scenes = planner.plan(duration, &script, "");
            assert_eq!(scenes.len(), n);
            assert_eq!(scenes[0].timestamp_seconds, 0.0);
            for pair in scenes.windows(2) {
                assert!(pair[1].timestamp_seconds > pair[0].timestamp_seconds);
            }
            assert!(scenes.last().unwrap().timestamp_seconds < duration);
            for (i, scene) in scenes.iter().enumerate() {
                assert_eq!(scene.index, i);
            }
        }
    }

    #[test]
    fn context_window_follows_word_rate() {
        // 100 words over 100 seconds, 10 scenes: scene 3 starts at word 30.
        let script: Vec<String> = (0..100).map(|i| format!("w{i}")).collect();
        let planner = ScenePlanner::new(10, 5, 2.5);
        let scenes = planner.plan(100.0, &script, "");
        assert_eq!(scenes[3].context, "w30 w31 w32 w33 w34");
        assert_eq!(scenes[9].context, "w90 w91 w92 w93 w94");
    }

    #[test]
    fn window_is_cut_at_script_end() {
        let script = words("alpha beta gamma");
        let planner = ScenePlanner::new(3, 7, 2.5);
        let scenes = planner.plan(3.0, &script, "");
        assert_eq!(scenes[2].context, "gamma");
    }

    #[test]
    fn empty_script_uses_fallback_context() {
        let planner = ScenePlanner::new(4, 7, 2.5);
        let scenes = planner.plan(60.0, &[], "");
        assert!(scenes.iter().all(|s| s.context == FALLBACK_CONTEXT));
        // the fallback context itself hits the automation category
        assert!(scenes[0].search_query.contains("automation"));
    }

    #[test]
    fn degenerate_duration_does_not_divide_by_zero() {
        let script = words("learn to code");
        let planner = ScenePlanner::new(5, 7, 2.5);
        let scenes = planner.plan(0.0, &script, "");
        assert_eq!(scenes.len(), 5);
        assert!(scenes.iter().all(|s| s.timestamp_seconds == 0.0));
    }

    #[test]
    fn queries_are_bounded() {
        let planner = ScenePlanner::new(2, 7, 2.5);
        let hint = "x".repeat(300);
        let scenes = planner.plan(10.0, &words("nothing matches here"), &hint);
        assert!(scenes.iter().all(|s| s.search_query.chars().count() <= MAX_QUERY_CHARS));
    }
}
