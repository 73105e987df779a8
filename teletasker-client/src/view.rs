//! Read-only projections over the task collection.

use std::{cmp::Ordering, fmt, str::FromStr};

use shared::models::{ChatId, Task, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TaskFilter {
    #[default]
    All,
    Pending,
    Completed,
}

impl TaskFilter {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Pending => task.status == TaskStatus::Pending,
            Self::Completed => task.status == TaskStatus::Completed,
        }
    }
}

/// Order by message date, falling back to creation date. Undated tasks go last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
        }
    }

    fn compare(self, left: &Task, right: &Task) -> Ordering {
        match (left.sort_date(), right.sort_date()) {
            (Some(left), Some(right)) => match self {
                Self::Newest => right.cmp(&left),
                Self::Oldest => left.cmp(&right),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Returned for unrecognised filter or sort names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOption(pub String);

impl fmt::Display for UnknownOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown option {:?}", self.0)
    }
}

impl std::error::Error for UnknownOption {}

impl FromStr for TaskFilter {
    type Err = UnknownOption;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            _ => Err(UnknownOption(value.to_string())),
        }
    }
}

impl FromStr for SortOrder {
    type Err = UnknownOption;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            _ => Err(UnknownOption(value.to_string())),
        }
    }
}

/// Filters and sorts a copy of `tasks`; `chat_id` of `None` keeps every chat.
#[must_use]
pub fn project(
    tasks: &[Task],
    chat_id: Option<&ChatId>,
    filter: TaskFilter,
    sort: SortOrder,
) -> Vec<Task> {
    let mut visible: Vec<Task> = tasks
        .iter()
        .filter(|task| chat_id.is_none_or(|chat_id| &task.chat_id == chat_id))
        .filter(|task| filter.matches(task))
        .cloned()
        .collect();
    visible.sort_by(|left, right| sort.compare(left, right));
    visible
}

/// Plain-text block for sharing tasks outside the dashboard.
#[must_use]
pub fn format_tasks_digest(tasks: &[Task]) -> String {
    tasks
        .iter()
        .map(|task| {
            format!(
                "Task: {}\nPriority: {}\nTime: {}\nStatus: {}\nReasoning: {}\n\n",
                task.text,
                task.source,
                task.time,
                task.status.as_str(),
                task.extracted_from
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::task;
    use chrono::{TimeZone, Utc};

    fn dated(id: &str, chat: &str, day: u32) -> Task {
        let mut task = task(id, chat);
        task.message_date_raw = Some(Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap());
        task
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[test]
    fn sorts_by_date_with_undated_last() {
        let mut created_only = task("C", "1");
        created_only.created_at_raw = Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
        let tasks = vec![
            dated("A", "1", 1),
            task("U", "1"),
            dated("B", "1", 3),
            created_only,
        ];

        let newest = project(&tasks, None, TaskFilter::All, SortOrder::Newest);
        let oldest = project(&tasks, None, TaskFilter::All, SortOrder::Oldest);

        assert_eq!(ids(&newest), vec!["B", "C", "A", "U"]);
        assert_eq!(ids(&oldest), vec!["A", "C", "B", "U"]);
    }

    #[test]
    fn filters_by_chat_and_status_without_mutating() {
        let mut done = dated("D", "2", 4);
        done.status = TaskStatus::Completed;
        let tasks = vec![dated("A", "1", 1), done, dated("B", "2", 2)];
        let before = tasks.clone();

        let chat = ChatId::from(2);
        assert_eq!(
            ids(&project(&tasks, Some(&chat), TaskFilter::Pending, SortOrder::Newest)),
            vec!["B"]
        );
        assert_eq!(
            ids(&project(&tasks, None, TaskFilter::Completed, SortOrder::Newest)),
            vec!["D"]
        );
        assert_eq!(tasks, before);
    }

    #[test]
    fn digest_lists_every_field() {
        let mut first = task("1", "5");
        first.text = "Send the invoice".into();
        first.source = "high".into();
        first.time = "2024-05-01 12:30".into();
        first.extracted_from = "Alice asked twice".into();

        assert_eq!(
            format_tasks_digest(&[first]),
            "Task: Send the invoice\nPriority: high\nTime: 2024-05-01 12:30\nStatus: pending\nReasoning: Alice asked twice\n\n"
        );
        assert_eq!(format_tasks_digest(&[]), "");
    }

    #[test]
    fn parses_option_names() {
        assert_eq!("Completed".parse::<TaskFilter>(), Ok(TaskFilter::Completed));
        assert_eq!("oldest".parse::<SortOrder>(), Ok(SortOrder::Oldest));
        assert!("latest".parse::<SortOrder>().is_err());
    }
}
