//! Microsoft Graph: the signed-in profile and the To Do task API.

use chrono::{DateTime, NaiveDateTime, Utc};
use planner_types::{Priority, TaskStatus};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{check, json, ProviderResult};

const GRAPH_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const UTC_PREFERENCE: &str = r#"outlook.timezone="UTC""#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphIdentity {
    pub mail: Option<String>,
    pub user_principal_name: Option<String>,
    pub display_name: Option<String>,
}

impl GraphIdentity {
    /// `mail` is empty for personal accounts; the UPN is the fallback.
    pub fn email(&self) -> Option<&str> {
        self.mail
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(self.user_principal_name.as_deref())
            .filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoList {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub wellknown_list_name: Option<String>,
}

impl TodoList {
    pub fn is_default(&self) -> bool {
        self.wellknown_list_name.as_deref() == Some("defaultList")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItemBody {
    pub content: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDateTime {
    pub date_time: String,
    pub time_zone: String,
}

impl GraphDateTime {
    pub fn utc(at: DateTime<Utc>) -> Self {
        Self {
            date_time: at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            time_zone: "UTC".to_string(),
        }
    }

    /// Graph sends naive timestamps; the UTC preference header makes them UTC.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.date_time, GRAPH_DATE_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub importance: String,
    #[serde(default)]
    pub body: Option<TodoItemBody>,
    #[serde(default)]
    pub due_date_time: Option<GraphDateTime>,
    #[serde(default)]
    pub reminder_date_time: Option<GraphDateTime>,
}

impl TodoItem {
    pub fn priority(&self) -> Priority {
        match self.importance.as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }

    pub fn task_status(&self) -> TaskStatus {
        match self.status.as_str() {
            "inProgress" => TaskStatus::InProgress,
            "completed" => TaskStatus::Completed,
            _ => TaskStatus::Todo,
        }
    }

    /// Body text, `None` when blank.
    pub fn description(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| body.content.trim().to_string())
            .filter(|content| !content.is_empty())
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_date_time.as_ref().and_then(GraphDateTime::to_utc)
    }

    pub fn reminder_at(&self) -> Option<DateTime<Utc>> {
        self.reminder_date_time.as_ref().and_then(GraphDateTime::to_utc)
    }
}

pub fn importance_for(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Medium => "normal",
        Priority::High => "high",
    }
}

pub fn remote_status_for(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "notStarted",
        TaskStatus::InProgress => "inProgress",
        TaskStatus::Completed => "completed",
    }
}

/// Create or patch body. Absent fields are left untouched by Graph;
/// `due_date_time: Some(None)` clears the due date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItemDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<TodoItemBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date_time: Option<Option<GraphDateTime>>,
}

impl TodoItemDraft {
    pub fn is_empty(&self) -> bool {
        *self == TodoItemDraft::default()
    }
}

pub fn text_body(content: &str) -> TodoItemBody {
    TodoItemBody {
        content: content.to_string(),
        content_type: "text".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Clone)]
pub struct GraphTodoClient {
    http: Client,
    api_base: String,
}

impl GraphTodoClient {
    pub fn new(http: Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn identify(&self, access_token: &str) -> ProviderResult<GraphIdentity> {
        let response = self
            .http
            .get(format!("{}/me", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await?;
        json(response).await
    }

    async fn collect<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        first: String,
    ) -> ProviderResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let response = self
                .http
                .get(&url)
                .bearer_auth(access_token)
                .header("Prefer", UTC_PREFERENCE)
                .send()
                .await?;
            let page: Page<T> = json(response).await?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }

    pub async fn list_lists(&self, access_token: &str) -> ProviderResult<Vec<TodoList>> {
        self.collect(access_token, format!("{}/me/todo/lists", self.api_base))
            .await
    }

    /// Every task of the list that is not completed.
    pub async fn list_active_tasks(
        &self,
        access_token: &str,
        list_id: &str,
    ) -> ProviderResult<Vec<TodoItem>> {
        let url = format!(
            "{}/me/todo/lists/{}/tasks?$filter={}",
            self.api_base,
            urlencoding::encode(list_id),
            urlencoding::encode("status ne 'completed'"),
        );
        self.collect(access_token, url).await
    }

    pub async fn create_task(
        &self,
        access_token: &str,
        list_id: &str,
        draft: &TodoItemDraft,
    ) -> ProviderResult<TodoItem> {
        let response = self
            .http
            .post(format!(
                "{}/me/todo/lists/{}/tasks",
                self.api_base,
                urlencoding::encode(list_id)
            ))
            .bearer_auth(access_token)
            .json(draft)
            .send()
            .await?;
        json(response).await
    }

    pub async fn update_task(
        &self,
        access_token: &str,
        list_id: &str,
        task_id: &str,
        draft: &TodoItemDraft,
    ) -> ProviderResult<()> {
        let response = self
            .http
            .patch(self.task_url(list_id, task_id))
            .bearer_auth(access_token)
            .json(draft)
            .send()
            .await?;
        check(response).await.map(|_| ())
    }

    /// Deleting an already deleted task is not an error.
    pub async fn delete_task(
        &self,
        access_token: &str,
        list_id: &str,
        task_id: &str,
    ) -> ProviderResult<()> {
        let response = self
            .http
            .delete(self.task_url(list_id, task_id))
            .bearer_auth(access_token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await.map(|_| ())
    }

    fn task_url(&self, list_id: &str, task_id: &str) -> String {
        format!(
            "{}/me/todo/lists/{}/tasks/{}",
            self.api_base,
            urlencoding::encode(list_id),
            urlencoding::encode(task_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_item_field_mapping() {
        let item: TodoItem = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "title": "Pay rent",
            "status": "inProgress",
            "importance": "high",
            "body": {"content": "  \n", "contentType": "text"},
            "dueDateTime": {"dateTime": "2024-03-05T00:00:00.0000000", "timeZone": "UTC"}
        }))
        .unwrap();

        assert_eq!(item.priority(), Priority::High);
        assert_eq!(item.task_status(), TaskStatus::InProgress);
        assert_eq!(item.description(), None);
        assert_eq!(
            item.due_at(),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(item.reminder_at(), None);
    }

    #[test]
    fn test_unknown_status_is_todo() {
        let item: TodoItem = serde_json::from_value(serde_json::json!({
            "id": "t1", "title": "x", "status": "waitingOnOthers", "importance": "normal"
        }))
        .unwrap();
        assert_eq!(item.task_status(), TaskStatus::Todo);
        assert_eq!(item.priority(), Priority::Medium);
    }

    #[test]
    fn test_identity_falls_back_to_upn() {
        let identity = GraphIdentity {
            mail: Some(String::new()),
            user_principal_name: Some("me@outlook.com".to_string()),
            display_name: None,
        };
        assert_eq!(identity.email(), Some("me@outlook.com"));
    }

    #[test]
    fn test_draft_clears_due_date_with_null() {
        let draft = TodoItemDraft {
            due_date_time: Some(None),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&draft).unwrap(),
            serde_json::json!({"dueDateTime": null})
        );
        assert!(TodoItemDraft::default().is_empty());
    }

    #[tokio::test]
    async fn test_active_tasks_follow_next_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/todo/lists/L1/tasks"))
            .and(query_param("$skip", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"id": "b", "title": "Second", "status": "notStarted", "importance": "low"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/todo/lists/L1/tasks"))
            .and(query_param("$filter", "status ne 'completed'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"id": "a", "title": "First", "status": "notStarted", "importance": "normal"}],
                "@odata.nextLink": format!("{}/me/todo/lists/L1/tasks?$skip=1", server.uri())
            })))
            .mount(&server)
            .await;

        let client = GraphTodoClient::new(Client::new(), &server.uri());
        let items = client.list_active_tasks("tok", "L1").await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_create_posts_draft() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/todo/lists/L1/tasks"))
            .and(body_json(serde_json::json!({
                "title": "Call mum",
                "importance": "normal",
                "status": "notStarted"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "new-id", "title": "Call mum", "status": "notStarted", "importance": "normal"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let draft = TodoItemDraft {
            title: Some("Call mum".to_string()),
            importance: Some(importance_for(Priority::Medium).to_string()),
            status: Some(remote_status_for(TaskStatus::Todo).to_string()),
            ..Default::default()
        };
        let client = GraphTodoClient::new(Client::new(), &server.uri());
        let created = client.create_task("tok", "L1", &draft).await.unwrap();
        assert_eq!(created.id, "new-id");
    }

    #[tokio::test]
    async fn test_delete_missing_task_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/me/todo/lists/L1/tasks/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GraphTodoClient::new(Client::new(), &server.uri());
        client.delete_task("tok", "L1", "gone").await.unwrap();
    }
}
