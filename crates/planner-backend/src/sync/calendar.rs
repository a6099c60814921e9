use futures::future::join_all;
use planner_types::{CalendarEvent, CalendarWindow, Provider};
use uuid::Uuid;

use crate::tokens::{TokenError, TokenStore};

/// Read-only merge of every linked Google calendar.
#[derive(Clone)]
pub struct CalendarReader {
    tokens: TokenStore,
}

impl CalendarReader {
    pub fn new(tokens: TokenStore) -> Self {
        Self { tokens }
    }

    /// Events from all Google accounts inside `window`, sorted by start.
    /// An account that fails is left out; the rest are still returned.
    pub async fn events(
        &self,
        user_id: Uuid,
        window: &CalendarWindow,
    ) -> Result<Vec<CalendarEvent>, TokenError> {
        let credentials = self.tokens.credentials(user_id, Provider::Google).await?;
        let google = &self.tokens.providers().google;

        let fetches = credentials.iter().map(|credential| async move {
            let result = google
                .list_events(
                    &credential.access_token,
                    window,
                    &credential.account_email,
                    credential.color(),
                )
                .await;
            (credential, result)
        });

        let mut events = Vec::new();
        for (credential, result) in join_all(fetches).await {
            match result {
                Ok(account_events) => {
                    tracing::debug!(
                        "Fetched {} events for {}",
                        account_events.len(),
                        credential.account_email
                    );
                    events.extend(account_events);
                }
                Err(e) => {
                    tracing::warn!(
                        "Skipping calendar for {}: {}",
                        credential.account_email,
                        e
                    );
                }
            }
        }

        events.sort_by_key(|event| event.start.instant());
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{integration_row, test_state};
    use chrono::{Duration, TimeZone, Utc};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_failed_account_is_skipped_and_events_merge_sorted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/google/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer token-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "late", "start": {"dateTime": "2024-03-04T15:00:00Z"}, "end": {"dateTime": "2024-03-04T16:00:00Z"}},
                    {"id": "early", "start": {"dateTime": "2024-03-04T08:00:00Z"}, "end": {"dateTime": "2024-03-04T09:00:00Z"}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/google/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer token-b"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/google/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer token-c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "middle", "start": {"dateTime": "2024-03-04T12:00:00+01:00"}, "end": {"dateTime": "2024-03-04T13:00:00+01:00"}}
                ]
            })))
            .mount(&server)
            .await;

        let (state, memory) = test_state(&server.uri());
        let user = uuid::Uuid::new_v4();
        let expires = Utc::now() + Duration::hours(1);
        for (offset, (email, token)) in [
            ("a@example.com", "token-a"),
            ("b@example.com", "token-b"),
            ("c@example.com", "token-c"),
        ]
        .into_iter()
        .enumerate()
        {
            let mut row = integration_row(user, Provider::Google, email, expires, None);
            row.access_token = token.to_string();
            row.is_primary = offset == 0;
            row.created_at += Duration::seconds(offset as i64);
            memory.seed_integration(row);
        }

        let window = CalendarWindow {
            time_min: Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(),
            time_max: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
        };
        let events = state.calendar.events(user, &window).await.unwrap();

        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "middle", "late"]);
        assert_eq!(events[0].account_email, "a@example.com");
        assert_eq!(events[1].account_email, "c@example.com");
        assert_ne!(events[0].color, events[1].color);
    }

    #[tokio::test]
    async fn test_no_accounts_means_no_events() {
        let server = MockServer::start().await;
        let (state, _) = test_state(&server.uri());
        let window = CalendarWindow {
            time_min: Utc::now(),
            time_max: Utc::now() + Duration::days(1),
        };
        let events = state.calendar.events(uuid::Uuid::new_v4(), &window).await.unwrap();
        assert!(events.is_empty());
    }
}
