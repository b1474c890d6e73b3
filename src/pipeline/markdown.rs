//! 计划的 Markdown 视图，随 JSON 一同写盘，供人阅读

use chrono::Utc;

use crate::pipeline::types::Plan;

const BAR_WIDTH: usize = 20;

pub fn render_plan(plan: &Plan) -> String {
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S");
    let mut md = String::new();

    md.push_str(&format!("# {}\n\n", plan.title));
    md.push_str("## 📋 Plan Information\n");
    md.push_str(&format!("- **Plan ID**: `{}`\n", plan.id));
    md.push_str(&format!("- **Creator**: {}\n", plan.creator));
    md.push_str(&format!("- **Category**: {}\n", plan.category));
    md.push_str(&format!("- **Status**: {}\n", plan.status));
    md.push_str(&format!("- **Created**: {} UTC\n", plan.created_at.format("%Y-%m-%d %H:%M:%S")));
    md.push_str(&format!("- **Updated**: {} UTC\n\n", plan.updated_at.format("%Y-%m-%d %H:%M:%S")));
    md.push_str(&format!("## 🎯 Original Requirement\n> {}\n\n", plan.instruction));
    md.push_str("## ✅ Task Breakdown\n\n");

    for (i, task) in plan.tasks.iter().enumerate() {
        let number = i + 1;
        let level = (3 + plan.depth(number)).min(6);
        md.push_str(&format!(
            "{} {}. {} {}\n\n",
            "#".repeat(level),
            number,
            task.status.icon(),
            task.content
        ));
        md.push_str(&format!("- **Status**: `{}`\n", task.status.as_str()));
        md.push_str(&format!("- **Estimated Duration**: {}\n", task.estimated_time));
        if let Some(parent) = task.parent {
            md.push_str(&format!("- **Parent Task**: {parent}\n"));
        }
        if !task.notes.is_empty() {
            md.push_str("- **Execution History**:\n");
            for note in &task.notes {
                md.push_str(&format!("  - {note}\n"));
            }
        }
        md.push('\n');
    }

    let progress = plan.progress();
    if progress.total > 0 {
        let filled = progress.completed * BAR_WIDTH / progress.total;
        md.push_str("## 📊 Execution Progress\n\n");
        md.push_str(&format!("`{}{}`\n\n", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled)));
        md.push_str(&format!("- **Total Tasks**: {}\n", progress.total));
        md.push_str(&format!("- **Completed**: {} ✅\n", progress.completed));
        md.push_str(&format!("- **In Progress**: {} 🔄\n", progress.in_progress));
        md.push_str(&format!("- **Pending**: {} ⏳\n", progress.todo));
        md.push_str(&format!("- **Completion Rate**: {}\n\n", progress.completion_rate));
    }

    md.push_str(&format!(
        "---\n*Generated by tandem | Creator: {} | Updated: {} UTC*\n",
        plan.creator, now
    ));
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Task, TaskStatus};

    #[test]
    fn test_render_includes_tasks_notes_and_bar() {
        let mut tasks = vec![Task::new("Root", "1 hour"), Task::new("Child", "2-3 hours")];
        tasks[1].parent = Some(1);
        tasks[0].status = TaskStatus::Done;
        tasks[0].notes.push("[2025-01-01 00:00:00 UTC] Execution successful: ok".into());
        let plan = Plan::new("plan_1", "Demo", "do it", "me", "general", tasks);

        let md = render_plan(&plan);
        assert!(md.starts_with("# Demo\n"));
        assert!(md.contains("### 1. ✅ Root"));
        assert!(md.contains("#### 2. ⏳ Child"));
        assert!(md.contains("- **Parent Task**: 1"));
        assert!(md.contains("Execution successful: ok"));
        assert!(md.contains(&format!("`{}{}`", "█".repeat(10), "░".repeat(10))));
        assert!(md.contains("- **Completion Rate**: 50.0%"));
    }
}
