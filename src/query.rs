//! Maps a scene's script context to a provider-agnostic B-roll search phrase.

/// Used when neither the context nor the keyword hint says anything useful.
pub const DEFAULT_QUERY: &str = "ai workstation, laptop, coding, workflow, office, technology, screens";

/// Appended to a keyword hint when no category matched.
const HINT_QUALIFIER: &str = "modern office, laptop, screens, technology";

/// One visual category: any of `triggers` found in the context selects `query`.
pub struct QueryCategory {
    pub name: &'static str,
    pub triggers: &'static [&'static str],
    pub query: &'static str,
}

/// Priority order. The first category with a matching trigger wins, so the
/// order of this table is part of the behavior.
pub const CATEGORIES: &[QueryCategory] = &[
    QueryCategory {
        name: "automation",
        triggers: &[
            "automat", "productiv", "produttivit", "workflow", "routine", "task", "lavoro",
        ],
        query: "person at laptop automation workflow screen, modern office, productivity, ai interface",
    },
    QueryCategory {
        name: "prompting",
        triggers: &["prompt", "chatgpt", "gpt", "llm", "language model", "modello linguistico"],
        query: "close up of computer screen with chat interface, prompt highlighted, dark background, green code",
    },
    QueryCategory {
        name: "integration",
        triggers: &["n8n", "webhook", "api", "integrat", "integrazione", "scenario", "flow"],
        query: "monitor with colorful flowchart automation nodes, glowing lines connecting apps, dark tech background",
    },
    QueryCategory {
        name: "spreadsheet",
        triggers: &[
            "spreadsheet", "excel", "sheets", "foglio", "dati", "data", "report", "table", "tabella",
        ],
        query: "person working on spreadsheet on laptop, charts and tables on screen, clean office desk",
    },
    QueryCategory {
        name: "desk-setup",
        triggers: &[
            "keyboard", "tastiera", "mouse", "laptop stand", "supporto", "webcam", "monitor", "desk",
        ],
        query: "minimal desk setup with laptop on stand, ergonomic keyboard and mouse, soft rgb lights, tech workspace",
    },
    QueryCategory {
        name: "learning",
        triggers: &[
            "learn", "study", "course", "lesson", "book", "libro", "studia", "formazione", "corso",
            "lezione", "impara",
        ],
        query: "open book next to laptop with ai interface, notes and highlighters on desk, cozy learning environment",
    },
];

/// The category whose trigger appears in `context`, by table priority.
pub fn match_category(context: &str) -> Option<&'static QueryCategory> {
    let ctx = context.to_lowercase();
    CATEGORIES
        .iter()
        .find(|cat| cat.triggers.iter().any(|t| ctx.contains(t)))
}

/// Pick the search phrase for one scene.
///
/// `keywords` is the job-wide hint, already flattened to a single string. An
/// empty hint or the literal `none` is treated as absent.
pub fn select_query(context: &str, keywords: &str) -> String {
    if let Some(cat) = match_category(context) {
        return cat.query.to_string();
    }

    let hint = keywords.trim().to_lowercase();
    if !hint.is_empty() && hint != "none" {
        return format!("{}, {}", hint, HINT_QUALIFIER);
    }

    DEFAULT_QUERY.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_category_in_table_order_wins() {
        let q = select_query("automate the spreadsheet every morning", "");
        assert_eq!(q, CATEGORIES[0].query);

        let q = select_query("open the spreadsheet and then automate it", "");
        assert_eq!(q, CATEGORIES[0].query);
    }

    #[test]
    fn later_category_when_earlier_ones_miss() {
        let q = select_query("export the excel report", "");
        assert_eq!(match_category("export the excel report").unwrap().name, "spreadsheet");
        assert!(q.contains("spreadsheet"));

        assert_eq!(match_category("buy a new keyboard").unwrap().name, "desk-setup");
        assert_eq!(match_category("read a good book tonight").unwrap().name, "learning");
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(match_category("Using ChatGPT daily").unwrap().name, "prompting");
    }

    #[test]
    fn keyword_hint_when_no_trigger() {
        let q = select_query("the weather is lovely", "Cloud Hosting");
        assert_eq!(q, "cloud hosting, modern office, laptop, screens, technology");
    }

    #[test]
    fn placeholder_hint_falls_back_to_default() {
        assert_eq!(select_query("the weather is lovely", "none"), DEFAULT_QUERY);
        assert_eq!(select_query("the weather is lovely", "  "), DEFAULT_QUERY);
        assert_eq!(select_query("", ""), DEFAULT_QUERY);
    }

    #[test]
    fn deterministic() {
        let a = select_query("study the n8n webhook", "ai");
        let b = select_query("study the n8n webhook", "ai");
        assert_eq!(a, b);
    }
}
