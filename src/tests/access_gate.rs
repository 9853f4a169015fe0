// Serialized token use and single-flight refresh under concurrent callers.

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::routing::{get, post};
    use axum::Json;
    use http::{HeaderMap, StatusCode};
    use serde_json::json;
    use tokio::time::sleep;

    use crate::client::{ApiClient, Credentials};
    use crate::request::ApiRequest;
    use crate::tests::common::{http_transport, spawn_axum, test_settings, ScriptedTransport};

    const BASE: &str = "https://api.example.test/2.0";

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_most_one_authenticated_exchange_in_flight() {
        let transport = ScriptedTransport::new(vec![]).with_latency(Duration::from_millis(20));
        let client = Arc::new(
            ApiClient::with_transport(&test_settings(BASE), transport, Credentials::AccessToken("t".into()))
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for i in 0..8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let url = client.endpoint(&format!("files/{i}")).unwrap();
                client.execute(ApiRequest::get(url)).await.unwrap().status()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::OK);
        }

        assert_eq!(client.executor().transport().calls(), 8);
        assert_eq!(client.executor().transport().max_in_flight(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn held_lease_blocks_other_requests_until_released() {
        let client = Arc::new(
            ApiClient::with_transport(
                &test_settings(BASE),
                ScriptedTransport::new(vec![]),
                Credentials::AccessToken("t".into()),
            )
            .unwrap(),
        );

        let lease = client.acquire().await.unwrap();
        assert_eq!(lease.token(), "t");
        assert_eq!(lease.max_attempts(), 5);

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move {
                let url = client.endpoint("users/me").unwrap();
                client.execute(ApiRequest::get(url)).await.unwrap()
            })
        };
        sleep(Duration::from_millis(50)).await;
        assert_eq!(client.executor().transport().calls(), 0);

        lease.release();
        waiting.await.unwrap();
        assert_eq!(client.executor().transport().calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let refreshes_clone = refreshes.clone();
        let router = axum::Router::new()
            .route(
                "/oauth2/token",
                post(move || {
                    let refreshes = refreshes_clone.clone();
                    async move {
                        let n = refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                        sleep(Duration::from_millis(30)).await;
                        Json(json!({"access_token": format!("fresh-{n}"), "refresh_token": "r2", "expires_in": 3600}))
                    }
                }),
            )
            .route(
                "/2.0/users/me",
                get(|headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_owned();
                    Json(json!({"authorization": auth}))
                }),
            );
        let (server, addr) = spawn_axum(router).await;

        let client = Arc::new(
            ApiClient::with_transport(
                &test_settings(&format!("http://{addr}/2.0")),
                http_transport(),
                Credentials::TokenPair {
                    access_token: "expired".into(),
                    refresh_token: "r1".into(),
                    expires_in: 0,
                },
            )
            .unwrap(),
        );

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let url = client.endpoint("users/me").unwrap();
                let resp = client.execute(ApiRequest::get(url)).await.unwrap();
                resp.json::<serde_json::Value>().unwrap()["authorization"]
                    .as_str()
                    .unwrap()
                    .to_owned()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "Bearer fresh-1");
        }

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        server.abort();
    }
}
