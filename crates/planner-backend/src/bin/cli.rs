use anyhow::Context;
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use planner_types::scheduling::{BenchZone, DropTarget};
use planner_types::{
    CalendarEvent, Category, DropRequest, NewCategoryInput, NewTaskInput, Priority, Recurrence,
    SyncReport, Task, TaskPatch, TaskStatus,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "planner-cli")]
#[command(about = "CLI for managing planner tasks and categories via the backend API")]
#[command(
    long_about = "A command-line interface for the planner backend.\n\n\
    Supports listing, creating, updating, scheduling and deleting tasks and\n\
    categories, triggering a Microsoft To Do sync, and reading linked calendars."
)]
struct Cli {
    /// Backend server URL to connect to.
    #[arg(
        short,
        long,
        default_value = "http://localhost:3000",
        env = "PLANNER_API_URL"
    )]
    base_url: String,

    /// Session token (the value of the `auth_token` cookie).
    #[arg(short, long, env = "PLANNER_TOKEN", hide_env_values = true)]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tasks
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Manage categories
    Categories {
        #[command(subcommand)]
        action: CategoryAction,
    },
    /// Run a provider sync pass now
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },
    /// List calendar events from every linked Google account
    Events {
        /// Days to look ahead from now.
        #[arg(short, long, default_value_t = 7)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum SyncTarget {
    /// Pull Microsoft To Do lists into the planner
    Todo,
}

#[derive(Subcommand)]
enum TaskAction {
    /// List all tasks
    ///
    /// Shows a status marker, the short ID, the title and the scheduled time.
    List,

    /// Create a new task
    Create {
        /// The title of the task.
        title: String,

        #[arg(short, long, value_name = "TEXT")]
        description: Option<String>,

        /// Planned length in minutes.
        #[arg(short = 'm', long, value_name = "MINUTES")]
        duration: Option<i32>,

        /// low, medium or high.
        #[arg(short, long)]
        priority: Option<Priority>,

        /// RFC 3339 start time, e.g. 2024-06-03T09:00:00Z.
        #[arg(short, long, value_name = "TIME")]
        at: Option<DateTime<Utc>>,

        /// daily, weekly, monthly or yearly.
        #[arg(short, long)]
        recurrence: Option<Recurrence>,

        /// Category UUID to assign this task to.
        #[arg(short, long, value_name = "UUID")]
        category: Option<Uuid>,
    },

    /// Update an existing task. Only specified fields change.
    Update {
        id: Uuid,

        #[arg(short, long, value_name = "TEXT")]
        title: Option<String>,

        #[arg(short, long, value_name = "TEXT")]
        description: Option<String>,

        #[arg(short = 'm', long, value_name = "MINUTES")]
        duration: Option<i32>,

        #[arg(short, long)]
        priority: Option<Priority>,

        /// todo, in_progress or completed.
        #[arg(short, long)]
        status: Option<TaskStatus>,

        #[arg(short, long, value_name = "TIME")]
        at: Option<DateTime<Utc>>,

        #[arg(short, long, value_name = "UUID")]
        category: Option<Uuid>,
    },

    /// Mark a task as completed
    ///
    /// Completing a recurring task creates its next occurrence.
    Complete { id: Uuid },

    /// Permanently delete a task
    Delete { id: Uuid },

    /// Move a task the way a drag on the board would
    Drop {
        id: Uuid,

        /// Schedule on this day, keeping the current time of day.
        #[arg(long, value_name = "YYYY-MM-DD", conflicts_with = "bench")]
        day: Option<NaiveDate>,

        /// With --day, schedule at this hour instead. 0 is the all-day row.
        #[arg(long, requires = "day")]
        hour: Option<u32>,

        /// Unschedule the task.
        #[arg(long)]
        bench: bool,
    },
}

#[derive(Subcommand)]
enum CategoryAction {
    /// List all categories in display order
    List,

    /// Create a new category
    Create {
        name: String,

        /// Hex color, e.g. "#3b82f6". Defaults to indigo.
        #[arg(short, long, value_name = "HEX")]
        color: Option<String>,
    },

    /// Permanently delete a category
    ///
    /// Tasks in the category become uncategorized.
    Delete { id: Uuid },
}

struct Api {
    client: Client,
    base_url: String,
    token: String,
}

impl Api {
    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send(builder: RequestBuilder) -> anyhow::Result<Response> {
        let response = builder.send().await.context("Request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Server returned {}: {}", status, body);
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(builder: RequestBuilder) -> anyhow::Result<T> {
        Ok(Self::send(builder).await?.json().await?)
    }
}

fn short(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api = Api {
        client: Client::new(),
        base_url: cli.base_url.trim_end_matches('/').to_string(),
        token: cli.token,
    };

    match cli.command {
        Commands::Tasks { action } => handle_tasks(&api, action).await?,
        Commands::Categories { action } => handle_categories(&api, action).await?,
        Commands::Sync {
            target: SyncTarget::Todo,
        } => {
            let report: SyncReport =
                Api::json(api.request(reqwest::Method::POST, "/api/sync/microsoft-todo")).await?;
            println!(
                "Synced {} accounts, {} lists: {} created, {} updated, {} completed",
                report.accounts, report.lists, report.created, report.updated, report.completed
            );
            for account in report.failed_accounts {
                println!("    Failed: {}", account);
            }
        }
        Commands::Events { days } => {
            let now = Utc::now();
            let events: Vec<CalendarEvent> = Api::json(
                api.request(reqwest::Method::GET, "/api/calendar/events")
                    .query(&[
                        ("time_min", now.to_rfc3339()),
                        ("time_max", (now + Duration::days(days)).to_rfc3339()),
                    ]),
            )
            .await?;
            if events.is_empty() {
                println!("No events found.");
            }
            for event in events {
                let start = event
                    .start
                    .date_time
                    .map(|t| t.to_rfc3339())
                    .or_else(|| event.start.date.map(|d| d.to_string()))
                    .unwrap_or_default();
                println!(
                    "{} {} ({})",
                    start,
                    event.summary.as_deref().unwrap_or("(no title)"),
                    event.account_email
                );
            }
        }
    }

    Ok(())
}

async fn handle_tasks(api: &Api, action: TaskAction) -> anyhow::Result<()> {
    use reqwest::Method;

    match action {
        TaskAction::List => {
            let tasks: Vec<Task> = Api::json(api.request(Method::GET, "/api/tasks")).await?;
            if tasks.is_empty() {
                println!("No tasks found.");
            }
            for task in tasks {
                let status = match task.status {
                    TaskStatus::Completed => "✓",
                    TaskStatus::InProgress => "◐",
                    TaskStatus::Todo => "○",
                };
                let when = task
                    .scheduled_at
                    .map(|at| at.with_timezone(&Local).format("%a %d %b %H:%M").to_string())
                    .unwrap_or_else(|| "unscheduled".to_string());
                println!(
                    "{} [{}] {} ({}, {} min, {})",
                    status,
                    short(&task.id),
                    task.title,
                    when,
                    task.duration_minutes,
                    task.priority
                );
                if let Some(desc) = &task.description {
                    println!("    {}", desc);
                }
            }
        }
        TaskAction::Create {
            title,
            description,
            duration,
            priority,
            at,
            recurrence,
            category,
        } => {
            let mut req = NewTaskInput::titled(title);
            req.description = description;
            if let Some(duration) = duration {
                req.duration_minutes = duration;
            }
            if let Some(priority) = priority {
                req.priority = priority;
            }
            req.scheduled_at = at;
            req.recurrence = recurrence;
            req.category_id = category;

            let task: Task = Api::json(api.request(Method::POST, "/api/tasks").json(&req)).await?;
            println!("Created task: [{}] {}", short(&task.id), task.title);
        }
        TaskAction::Update {
            id,
            title,
            description,
            duration,
            priority,
            status,
            at,
            category,
        } => {
            let patch = TaskPatch {
                title,
                description: description.map(Some),
                duration_minutes: duration,
                priority,
                status,
                scheduled_at: at.map(Some),
                category_id: category.map(Some),
                ..TaskPatch::default()
            };
            let task = put_task(api, id, &patch).await?;
            println!("Updated task: [{}] {}", short(&task.id), task.title);
        }
        TaskAction::Complete { id } => {
            let patch = TaskPatch {
                status: Some(TaskStatus::Completed),
                ..TaskPatch::default()
            };
            let task = put_task(api, id, &patch).await?;
            println!("Marked as done: [{}] {}", short(&task.id), task.title);
        }
        TaskAction::Delete { id } => {
            Api::send(api.request(Method::DELETE, &format!("/api/tasks/{}", id))).await?;
            println!("Deleted task: {}", id);
        }
        TaskAction::Drop {
            id,
            day,
            hour,
            bench,
        } => {
            let target = match (day, hour) {
                (Some(day), Some(hour)) => DropTarget::HourSlot { day, hour },
                (Some(date), None) => DropTarget::Day { date },
                (None, _) if bench => DropTarget::Bench {
                    zone: BenchZone::All,
                },
                (None, _) => anyhow::bail!("Pass --day or --bench"),
            };
            let req = DropRequest {
                target,
                geometry: None,
                tz_offset_minutes: Local::now().offset().local_minus_utc() / 60,
            };
            let task: Task = Api::json(
                api.request(Method::POST, &format!("/api/tasks/{}/drop", id))
                    .json(&req),
            )
            .await?;
            let when = task
                .scheduled_at
                .map(|at| at.with_timezone(&Local).to_rfc3339())
                .unwrap_or_else(|| "unscheduled".to_string());
            println!("Moved task: [{}] {} -> {}", short(&task.id), task.title, when);
        }
    }

    Ok(())
}

async fn put_task(api: &Api, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task> {
    Api::json(
        api.request(reqwest::Method::PUT, &format!("/api/tasks/{}", id))
            .json(patch),
    )
    .await
}

async fn handle_categories(api: &Api, action: CategoryAction) -> anyhow::Result<()> {
    use reqwest::Method;

    match action {
        CategoryAction::List => {
            let categories: Vec<Category> =
                Api::json(api.request(Method::GET, "/api/categories")).await?;
            if categories.is_empty() {
                println!("No categories found.");
            }
            for cat in categories {
                let source = cat.external_account.as_deref().unwrap_or("local");
                println!(
                    "[{}] {} (color: {}, {})",
                    short(&cat.id),
                    cat.name,
                    cat.color,
                    source
                );
            }
        }
        CategoryAction::Create { name, color } => {
            let req = NewCategoryInput {
                name,
                color: color.unwrap_or_else(|| "#6366f1".to_string()),
                sort_order: None,
            };
            let cat: Category =
                Api::json(api.request(Method::POST, "/api/categories").json(&req)).await?;
            println!("Created category: [{}] {}", short(&cat.id), cat.name);
        }
        CategoryAction::Delete { id } => {
            Api::send(api.request(Method::DELETE, &format!("/api/categories/{}", id))).await?;
            println!("Deleted category: {}", id);
        }
    }

    Ok(())
}
