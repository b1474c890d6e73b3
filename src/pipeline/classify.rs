//! 指令分析：项目类别、任务模板、标题提取、工时估计、计划 id

use chrono::{DateTime, Utc};

/// 项目类别；按声明顺序匹配关键字，先命中者胜出，都不命中为 General
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Web,
    Api,
    Data,
    Mobile,
    Learning,
    General,
}

const ORDERED: [Category; 5] = [
    Category::Web,
    Category::Api,
    Category::Data,
    Category::Mobile,
    Category::Learning,
];

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Web => "web",
            Category::Api => "api",
            Category::Data => "data",
            Category::Mobile => "mobile",
            Category::Learning => "learning",
            Category::General => "general",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Category::Web => &["website", "web app", "frontend", "backend", "html", "css", "javascript"],
            Category::Api => &["api", "rest", "graphql", "microservice", "service"],
            Category::Data => &["data analysis", "machine learning", "ai", "statistics", "analytics"],
            Category::Mobile => &["mobile app", "android", "ios", "flutter", "react native"],
            Category::Learning => &["learn", "study", "research", "tutorial", "course"],
            Category::General => &[],
        }
    }

    /// 类别对应的固定任务模板（有序）
    pub fn template(self) -> &'static [&'static str] {
        match self {
            Category::Web => &[
                "Analyze requirements and choose technology stack",
                "Design system architecture and database schema",
                "Set up development environment and project structure",
                "Implement core frontend components",
                "Develop backend API and business logic",
                "Integrate frontend with backend services",
                "Implement testing and quality assurance",
                "Deploy application and configure production environment",
            ],
            Category::Api => &[
                "Define API specifications and data models",
                "Set up project framework and dependencies",
                "Implement core API endpoints",
                "Add authentication and authorization",
                "Implement data validation and error handling",
                "Write comprehensive API documentation",
                "Create automated tests and integration tests",
                "Deploy API and set up monitoring",
            ],
            Category::Data => &[
                "Collect and explore available data sources",
                "Clean and preprocess raw data",
                "Perform exploratory data analysis",
                "Select and implement analytical models",
                "Validate and optimize model performance",
                "Create data visualizations and insights",
                "Document findings and methodology",
                "Deploy model or publish analysis results",
            ],
            Category::Mobile => &[
                "Define app requirements and user stories",
                "Create UI/UX designs and prototypes",
                "Set up development environment",
                "Implement core app functionality",
                "Integrate with backend services or APIs",
                "Add device-specific features and optimizations",
                "Test app on multiple devices and platforms",
                "Prepare for app store submission and deployment",
            ],
            Category::Learning => &[
                "Define learning objectives and scope",
                "Gather high-quality learning resources",
                "Create structured learning schedule",
                "Complete theoretical study and note-taking",
                "Practice with hands-on exercises and projects",
                "Review and reinforce key concepts",
                "Create summary documentation or portfolio",
                "Share knowledge or apply learned skills",
            ],
            Category::General => &[
                "Analyze project requirements and constraints",
                "Design solution architecture and approach",
                "Set up necessary tools and environment",
                "Implement core functionality and features",
                "Test and validate solution quality",
                "Document solution and create user guides",
                "Deploy or deliver final solution",
                "Monitor performance and gather feedback",
            ],
        }
    }
}

/// 子串匹配，与关键字表的写法一致（"ai" 也会命中含 ai 的单词）
pub fn classify(instruction: &str) -> Category {
    let lower = instruction.to_lowercase();
    ORDERED
        .into_iter()
        .find(|c| c.keywords().iter().any(|kw| lower.contains(kw)))
        .unwrap_or(Category::General)
}

const TITLE_STOP_WORDS: [&str; 8] = [
    "create", "develop", "build", "make", "design", "implement", "write", "setup",
];

/// 去掉动作词和 2 个字符以内的词，首字母大写，保留前 4 个，更多时追加 "..."
pub fn extract_title(instruction: &str) -> String {
    let words: Vec<String> = instruction
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !TITLE_STOP_WORDS.contains(w) && w.chars().count() > 2)
        .map(title_case)
        .collect();

    if words.len() <= 4 {
        words.join(" ")
    } else {
        format!("{}...", words[..4].join(" "))
    }
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut at_start = true;
    for ch in word.chars() {
        if ch.is_alphabetic() {
            if at_start {
                out.extend(ch.to_uppercase());
            } else {
                out.push(ch);
            }
            at_start = false;
        } else {
            out.push(ch);
            at_start = true;
        }
    }
    out
}

/// 按任务内容中的关键字估计工时
pub fn estimate_duration(task: &str) -> &'static str {
    let lower = task.to_lowercase();
    let has = |kws: &[&str]| kws.iter().any(|kw| lower.contains(kw));

    if has(&["analysis", "design", "planning", "research"]) {
        "2-3 hours"
    } else if has(&["implement", "develop", "create", "build"]) {
        "3-5 hours"
    } else if has(&["test", "validate", "debug"]) {
        "1-2 hours"
    } else if has(&["deploy", "setup", "configure"]) {
        "1 hour"
    } else if has(&["document", "write", "create guides"]) {
        "1-2 hours"
    } else {
        "2-3 hours"
    }
}

/// `plan_<YYYYmmdd_HHMMSS>_<8 位随机十六进制>`
pub fn generate_plan_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("plan_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_classify_first_match_wins() {
        assert_eq!(classify("Build a website with a REST api"), Category::Web);
        assert_eq!(classify("Create a GraphQL service"), Category::Api);
        assert_eq!(classify("Machine learning for churn"), Category::Data);
        assert_eq!(classify("Flutter shopping list"), Category::Mobile);
        assert_eq!(classify("Study Rust ownership"), Category::Learning);
        assert_eq!(classify("Organize the garage"), Category::General);
    }

    #[test]
    fn test_templates_have_eight_tasks() {
        for c in ORDERED.into_iter().chain([Category::General]) {
            assert_eq!(c.template().len(), 8, "{}", c.as_str());
        }
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title("Create a todo website"), "Todo Website");
        assert_eq!(
            extract_title("build an online store with payment and shipping"),
            "Online Store With Payment..."
        );
    }

    #[test]
    fn test_estimate_duration() {
        assert_eq!(estimate_duration("Design system architecture"), "2-3 hours");
        assert_eq!(estimate_duration("Implement core API endpoints"), "3-5 hours");
        assert_eq!(estimate_duration("Test app on devices"), "1-2 hours");
        assert_eq!(estimate_duration("Deploy API"), "1 hour");
        assert_eq!(estimate_duration("Document findings"), "1-2 hours");
        assert_eq!(estimate_duration("Monitor performance"), "2-3 hours");
    }

    #[test]
    fn test_plan_id_format() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let id = generate_plan_id(now);
        assert!(id.starts_with("plan_20250304_050607_"));
        assert_eq!(id.len(), "plan_20250304_050607_".len() + 8);
    }
}
