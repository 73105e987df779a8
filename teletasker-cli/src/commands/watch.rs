//! Live dashboard: status polling plus the update stream until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use client::{
    controller::Dashboard,
    events::SyncEvent,
    stream::UpdateStream,
    view::{SortOrder, TaskFilter},
};
use shared::{
    config::Config,
    models::{ChatId, UpdateEvent},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BackendContext, chats::render_status, connect, dashboard, tasks::render_tasks};

pub async fn run(config: &Config, chat: Option<ChatId>) -> Result<()> {
    let api = connect(config)?;
    let mut dashboard = dashboard(config, api.clone())?;
    let stream = Arc::new(UpdateStream::new(
        api,
        dashboard.event_sender(),
        &config.sync,
    ));
    let cancel = CancellationToken::new();
    let handle = stream.spawn(cancel.clone());

    dashboard
        .load_chats()
        .await
        .backend_context("failed to fetch monitored chats")?;
    dashboard.select_chat(chat).await;
    print_tasks(&dashboard);
    println!("Watching for updates, press Ctrl+C to stop.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl+C")?;
                break;
            }
            event = dashboard.next_event() => {
                let Some(event) = event else { break };
                report(&dashboard, &event);
            }
        }
    }

    cancel.cancel();
    dashboard.shutdown();
    if let Err(err) = handle.await {
        warn!(error = %err, "update stream task failed");
    }
    Ok(())
}

fn report(dashboard: &Dashboard, event: &SyncEvent) {
    if let Some(line) = describe(event) {
        println!("{line}");
    }
    if let SyncEvent::TasksUpdated { chat_id, .. } = event
        && dashboard
            .selected()
            .is_none_or(|selected| chat_id.as_ref() == Some(selected))
    {
        print_tasks(dashboard);
    }
}

fn print_tasks(dashboard: &Dashboard) {
    let tasks = dashboard.visible_tasks(TaskFilter::All, SortOrder::Newest);
    print!(
        "{}",
        render_tasks(&tasks, dashboard.chats(), dashboard.selected().is_none())
    );
}

/// One status line per event worth showing; `None` for the rest.
fn describe(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::StatusChanged { status, .. } => status
            .chat_id
            .as_ref()
            .map(|chat_id| render_status(chat_id, status)),
        SyncEvent::PollFailed {
            chat_id, message, ..
        } => {
            Some(format!("chat {chat_id}: polling stopped: {message}"))
        }
        SyncEvent::TasksUpdated { chat_id, count, .. } => Some(match chat_id {
            Some(chat_id) => format!("chat {chat_id}: {count} task(s)"),
            None => format!("all chats: {count} task(s)"),
        }),
        SyncEvent::FetchFailed {
            chat_id,
            message,
            served_stale,
            ..
        } => {
            let scope = chat_id
                .as_ref()
                .map_or_else(|| "all chats".to_string(), |chat_id| format!("chat {chat_id}"));
            let fallback = if *served_stale {
                "showing cached tasks"
            } else {
                "no cached tasks"
            };
            Some(format!("{scope}: fetch failed ({fallback}): {message}"))
        }
        SyncEvent::Update(update) => match update {
            UpdateEvent::NewTask { chat_id, .. } | UpdateEvent::NewTasks { chat_id, .. } => {
                Some(format!("chat {chat_id}: new tasks announced"))
            }
            UpdateEvent::PollingUpdate { chat_id, .. } => {
                debug!(chat_id = %chat_id, "progress update");
                None
            }
            UpdateEvent::Unknown => None,
        },
        SyncEvent::StreamState(state) => Some(format!("update stream {}", state.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client::events::StreamState;
    use shared::models::{ChatProcessingStatus, ProcessingState};

    #[test]
    fn status_changes_use_the_status_line() {
        let status = ChatProcessingStatus::new(ChatId::from(5), ProcessingState::Processing);

        assert_eq!(
            describe(&SyncEvent::StatusChanged {
                status,
                generation: 1
            })
            .as_deref(),
            Some("chat 5: processing (0 messages processed)")
        );
    }

    #[test]
    fn stale_fallback_is_reported() {
        let event = SyncEvent::FetchFailed {
            chat_id: None,
            message: "connection refused".into(),
            served_stale: true,
            generation: None,
        };

        assert_eq!(
            describe(&event).as_deref(),
            Some("all chats: fetch failed (showing cached tasks): connection refused")
        );
    }

    #[test]
    fn progress_and_unknown_updates_stay_quiet() {
        let progress = UpdateEvent::PollingUpdate {
            chat_id: ChatId::from(1),
            data: Default::default(),
        };

        assert_eq!(describe(&SyncEvent::Update(progress)), None);
        assert_eq!(describe(&SyncEvent::Update(UpdateEvent::Unknown)), None);
        assert_eq!(
            describe(&SyncEvent::StreamState(StreamState::Open)).as_deref(),
            Some("update stream open")
        );
    }
}
