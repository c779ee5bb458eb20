//! Tests for calendar_client module.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone, Utc};
    use mockito::{Matcher, Server};

    use super::super::calendar_client::*;
    use super::super::event_codec::RemoteEvent;
    use crate::auth::{Credential, MemoryCredentialStore, OAuthClientConfig, TokenManager};
    use crate::error::OAuthError;

    fn token_manager(server_url: &str, credential: Option<Credential>) -> Arc<TokenManager> {
        let store = match credential {
            Some(c) => MemoryCredentialStore::with_credential(c),
            None => MemoryCredentialStore::new(),
        };
        let config = OAuthClientConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost/cb".into(),
            scopes: vec!["calendar".into()],
            auth_url: format!("{server_url}/auth"),
            token_url: format!("{server_url}/token"),
            userinfo_url: format!("{server_url}/userinfo"),
        };
        Arc::new(
            TokenManager::new(config, Arc::new(store), "google", StdDuration::from_secs(5)).unwrap(),
        )
    }

    fn client(server: &Server) -> GoogleCalendarClient {
        let credential = Credential {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::hours(1)),
            scope: String::new(),
            token_type: "Bearer".into(),
            id_token: None,
        };
        GoogleCalendarClient::new(
            token_manager(&server.url(), Some(credential)),
            StdDuration::from_secs(5),
        )
        .unwrap()
        .with_base_url(server.url())
    }

    fn body(summary: &str) -> RemoteEvent {
        RemoteEvent {
            summary: Some(summary.into()),
            ..RemoteEvent::default()
        }
    }

    #[tokio::test]
    async fn test_full_listing_follows_pages_and_takes_final_token() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/calendars/primary/events")
            .match_header("authorization", "Bearer tok")
            .match_query(Matcher::Regex(
                "^singleEvents=true&showDeleted=true&maxResults=2500$".into(),
            ))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"a"},{"id":"b"}],"nextPageToken":"p2","nextSyncToken":"ignored"}"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"c","status":"cancelled"}],"nextSyncToken":"sync-1"}"#)
            .create_async()
            .await;

        let delta = client(&server).list_delta("primary", None).await.unwrap();

        assert_eq!(delta.items.len(), 3);
        assert_eq!(delta.next_sync_token.as_deref(), Some("sync-1"));
        assert!(delta.items[2].is_cancelled());
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_incremental_listing_sends_only_sync_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::Regex("^syncToken=tok-9$".into()))
            .with_status(200)
            .with_body(r#"{"items":[],"nextSyncToken":"tok-10"}"#)
            .create_async()
            .await;

        let delta = client(&server)
            .list_delta("primary", Some("tok-9"))
            .await
            .unwrap();
        assert!(delta.items.is_empty());
        assert_eq!(delta.next_sync_token.as_deref(), Some("tok-10"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gone_listing_means_token_expired() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::Any)
            .with_status(410)
            .create_async()
            .await;

        let err = client(&server)
            .list_delta("primary", Some("old"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::TokenExpired));
    }

    #[tokio::test]
    async fn test_calendar_id_is_path_escaped() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/calendars/en.japanese%23holiday%40group.v.calendar.google.com/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[{"id":"h","summary":"Holiday","start":{"date":"2025-01-01"}}]}"#)
            .create_async()
            .await;

        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let items = client(&server)
            .list_range("en.japanese#holiday@group.v.calendar.google.com", from, to)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_range_listing_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("showDeleted".into(), "false".into()),
                Matcher::UrlEncoded("timeMin".into(), "2025-03-01T00:00:00Z".into()),
                Matcher::UrlEncoded("timeMax".into(), "2025-04-01T00:00:00Z".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;

        let from = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        client(&server).list_range("primary", from, to).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_sends_if_match_and_maps_412() {
        let mut server = Server::new_async().await;
        server
            .mock("PATCH", "/calendars/primary/events/ev1")
            .match_header("if-match", "\"etag-1\"")
            .with_status(412)
            .create_async()
            .await;

        let err = client(&server)
            .update("primary", "ev1", Some("\"etag-1\""), &body("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PreconditionFailed));
    }

    #[tokio::test]
    async fn test_update_missing_and_gone() {
        let mut server = Server::new_async().await;
        server
            .mock("PATCH", "/calendars/primary/events/missing")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("PATCH", "/calendars/primary/events/gone")
            .with_status(410)
            .create_async()
            .await;

        let c = client(&server);
        assert!(matches!(
            c.update("primary", "missing", None, &body("x")).await,
            Err(RemoteError::NotFound)
        ));
        assert!(matches!(
            c.update("primary", "gone", None, &body("x")).await,
            Err(RemoteError::Gone)
        ));
    }

    #[tokio::test]
    async fn test_create_posts_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/calendars/primary/events")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({"summary": "Lunch"})))
            .with_status(200)
            .with_body(r#"{"id":"new-1","etag":"\"e1\"","summary":"Lunch","updated":"2025-01-01T00:00:00Z"}"#)
            .create_async()
            .await;

        let created = client(&server).create("primary", &body("Lunch")).await.unwrap();
        assert_eq!(created.id.as_deref(), Some("new-1"));
        assert_eq!(created.etag.as_deref(), Some("\"e1\""));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_request_failed() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/calendars/primary/events")
            .with_status(503)
            .with_body("backend unavailable")
            .create_async()
            .await;

        let err = client(&server).create("primary", &body("x")).await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::RequestFailed { status: 503, ref body } if body == "backend unavailable"
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/calendars/primary/events/a")
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("DELETE", "/calendars/primary/events/b")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("DELETE", "/calendars/primary/events/c")
            .with_status(410)
            .create_async()
            .await;

        let c = client(&server);
        for id in ["a", "b", "c"] {
            c.delete("primary", id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_credential_surfaces_as_credential_error() {
        let server = Server::new_async().await;
        let c = GoogleCalendarClient::new(token_manager(&server.url(), None), StdDuration::from_secs(1))
            .unwrap()
            .with_base_url(server.url());

        let err = c.list_delta("primary", None).await.unwrap_err();
        assert!(matches!(err, RemoteError::Credential(OAuthError::NoCredential)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let err = client(&server).list_delta("primary", None).await.unwrap_err();
        assert!(matches!(err, RemoteError::Decode(_)));
    }
}
