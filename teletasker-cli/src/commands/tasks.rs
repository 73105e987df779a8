use std::{fmt::Write as _, time::Duration};

use anyhow::Result;
use client::{
    cache::CacheScope,
    controller::Dashboard,
    view::{self, SortOrder, TaskFilter},
};
use shared::{
    config::Config,
    models::{Chat, ChatId, Task},
};
use tracing::info;

use super::{BackendContext, connect, dashboard, settle};

pub async fn list(
    config: &Config,
    chat: Option<ChatId>,
    filter: TaskFilter,
    sort: SortOrder,
    limit: Duration,
) -> Result<()> {
    let dashboard = load(config, chat, limit).await?;
    let tasks = dashboard.visible_tasks(filter, sort);
    print!(
        "{}",
        render_tasks(&tasks, dashboard.chats(), dashboard.selected().is_none())
    );
    Ok(())
}

pub async fn copy(config: &Config, chat: Option<ChatId>, limit: Duration) -> Result<()> {
    let dashboard = load(config, chat, limit).await?;
    let tasks = dashboard.visible_tasks(TaskFilter::All, SortOrder::Newest);
    print!("{}", view::format_tasks_digest(&tasks));
    Ok(())
}

pub async fn complete(config: &Config, task_id: &str, completed: bool) -> Result<()> {
    let mut dashboard = dashboard(config, connect(config)?)?;
    // Resident tasks let the per-chat cache entry be patched too.
    dashboard.fetcher().hydrate_from_cache(&CacheScope::All);
    dashboard
        .toggle_task(task_id, completed)
        .await
        .backend_context(format!("failed to update task {task_id}"))?;
    let state = if completed { "completed" } else { "pending" };
    println!("Task {task_id} marked as {state}");
    Ok(())
}

/// Selects `chat` and waits up to `limit` for its tasks to settle.
async fn load(config: &Config, chat: Option<ChatId>, limit: Duration) -> Result<Dashboard> {
    let mut dashboard = dashboard(config, connect(config)?)?;
    dashboard
        .load_chats()
        .await
        .backend_context("failed to fetch monitored chats")?;
    dashboard.select_chat(chat).await;
    if !settle(&mut dashboard, limit).await {
        eprintln!(
            "warning: processing still running after {}s; showing the tasks available so far",
            limit.as_secs()
        );
    }
    dashboard.shutdown();
    info!(
        selected = ?dashboard.selected(),
        processing = dashboard.view().processing,
        "tasks loaded"
    );
    if let Some(error) = &dashboard.view().error {
        eprintln!("warning: {error}");
    }
    Ok(dashboard)
}

pub fn render_tasks(tasks: &[Task], chats: &[Chat], show_chat: bool) -> String {
    if tasks.is_empty() {
        return "No tasks.\n".to_string();
    }
    let mut out = String::new();
    for task in tasks {
        let mark = if task.is_completed() { 'x' } else { ' ' };
        let _ = write!(
            out,
            "[{mark}] {}  {}  ({}, {})",
            task.id, task.text, task.source, task.time
        );
        if show_chat {
            let name = chats
                .iter()
                .find(|chat| chat.id == task.chat_id)
                .map_or_else(|| task.chat_id.to_string(), |chat| chat.name.clone());
            let _ = write!(out, "  @ {name}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ChatMode, TaskStatus};

    fn task(id: &str, chat: i64, text: &str) -> Task {
        Task {
            id: id.into(),
            chat_id: ChatId::from(chat),
            text: text.into(),
            source: "high".into(),
            time: "2024-05-01 12:30".into(),
            message_date: "2024-05-01 12:00".into(),
            status: TaskStatus::Pending,
            extracted_from: String::new(),
            created_at_raw: None,
            message_date_raw: None,
        }
    }

    #[test]
    fn completed_tasks_are_checked() {
        let mut done = task("2", 1, "Pay rent");
        done.status = TaskStatus::Completed;

        assert_eq!(
            render_tasks(&[task("1", 1, "Book flights"), done], &[], false),
            "[ ] 1  Book flights  (high, 2024-05-01 12:30)\n[x] 2  Pay rent  (high, 2024-05-01 12:30)\n"
        );
    }

    #[test]
    fn aggregate_view_names_the_chat() {
        let chats = [Chat {
            id: ChatId::from(1),
            name: "Ops".into(),
            avatar: "👥".into(),
            mode: ChatMode::Observe,
        }];
        let rendered = render_tasks(
            &[task("1", 1, "Deploy"), task("2", 9, "Call back")],
            &chats,
            true,
        );

        assert!(rendered.contains("Deploy  (high, 2024-05-01 12:30)  @ Ops\n"));
        assert!(rendered.contains("Call back  (high, 2024-05-01 12:30)  @ 9\n"));
    }

    #[test]
    fn empty_list_says_so() {
        assert_eq!(render_tasks(&[], &[], true), "No tasks.\n");
    }
}
