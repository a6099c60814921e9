//! Google userinfo and Calendar v3.

use planner_types::{CalendarEvent, CalendarWindow, EventTime};
use reqwest::Client;
use serde::Deserialize;

use super::{json, ProviderResult};

/// Who a Google access token belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleIdentity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    html_link: Option<String>,
    #[serde(default)]
    start: EventTime,
    #[serde(default)]
    end: EventTime,
}

#[derive(Clone)]
pub struct GoogleCalendarClient {
    http: Client,
    api_base: String,
    userinfo_url: String,
}

impl GoogleCalendarClient {
    pub fn new(http: Client, api_base: &str, userinfo_url: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            userinfo_url: userinfo_url.to_string(),
        }
    }

    /// Who the token belongs to. Any non-2xx answer means the token is not usable.
    pub async fn identify(&self, access_token: &str) -> ProviderResult<GoogleIdentity> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        json(response).await
    }

    /// Events of the primary calendar inside `window`, recurring events
    /// expanded, tagged with the owning account.
    pub async fn list_events(
        &self,
        access_token: &str,
        window: &CalendarWindow,
        account_email: &str,
        color: &str,
    ) -> ProviderResult<Vec<CalendarEvent>> {
        let url = format!("{}/calendar/v3/calendars/primary/events", self.api_base);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", window.time_min.to_rfc3339()),
                ("timeMax", window.time_max.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", "250".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(access_token)
                .query(&query)
                .send()
                .await?;
            let page: EventsPage = json(response).await?;

            events.extend(
                page.items
                    .into_iter()
                    .filter(|event| event.status.as_deref() != Some("cancelled"))
                    .map(|event| CalendarEvent {
                        id: event.id,
                        summary: event.summary,
                        description: event.description,
                        location: event.location,
                        html_link: event.html_link,
                        start: event.start,
                        end: event.end,
                        account_email: account_email.to_string(),
                        color: color.to_string(),
                    }),
            );

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(events)
    }
}
