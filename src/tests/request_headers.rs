// What actually goes on the wire: bearer token, user agent, content type defaults,
// acting-as header and redirect handling.

#[cfg(test)]
mod test {
    use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
    use http::{HeaderValue, Method, StatusCode};
    use serde_json::json;

    use crate::client::{ApiClient, Credentials};
    use crate::request::ApiRequest;
    use crate::tests::common::{response, response_with, test_settings, ScriptedTransport};
    use crate::utils::constants;

    const BASE: &str = "https://api.example.test/2.0";

    fn client(script: Vec<anyhow::Result<crate::transport::PhysicalResponse>>) -> ApiClient<ScriptedTransport> {
        ApiClient::with_transport(
            &test_settings(BASE),
            ScriptedTransport::new(script),
            Credentials::AccessToken("token-1".into()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn get_carries_bearer_and_user_agent_without_content_type() {
        let client = client(vec![]);
        client.execute(ApiRequest::get(client.endpoint("users/me").unwrap())).await.unwrap();

        let sent = client.executor().transport().sent();
        assert_eq!(sent.len(), 1);
        let headers = &sent[0].headers;
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer token-1");
        assert_eq!(headers.get(USER_AGENT).unwrap(), constants::USER_AGENT);
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert!(sent[0].body.is_none());
    }

    #[tokio::test]
    async fn bodiless_post_defaults_to_json_content_type() {
        let client = client(vec![]);
        client.execute(ApiRequest::post(client.endpoint("folders/0/copy").unwrap())).await.unwrap();

        let sent = client.executor().transport().sent();
        assert_eq!(sent[0].headers.get(CONTENT_TYPE).unwrap(), constants::JSON_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn explicit_content_type_is_kept() {
        let client = client(vec![]);
        let request = ApiRequest::put(client.endpoint("files/1/content").unwrap())
            .raw_body(&b"raw bytes"[..], HeaderValue::from_static("application/octet-stream"));
        client.execute(request).await.unwrap();

        let sent = client.executor().transport().sent();
        assert_eq!(sent[0].headers.get(CONTENT_TYPE).unwrap(), "application/octet-stream");
        assert_eq!(sent[0].body.as_deref(), Some(&b"raw bytes"[..]));
    }

    #[tokio::test]
    async fn act_as_adds_user_header() {
        let client = client(vec![]);
        let mut request = ApiRequest::get(client.endpoint("folders/0").unwrap());
        request.act_as("987").unwrap();
        client.execute(request).await.unwrap();

        let sent = client.executor().transport().sent();
        assert_eq!(sent[0].headers.get("As-User").unwrap(), "987");
    }

    #[tokio::test]
    async fn unauthenticated_request_has_no_bearer() {
        let client = client(vec![]);
        let request = ApiRequest::get(client.endpoint("shared_items").unwrap()).unauthenticated();
        client.execute(request).await.unwrap();

        let sent = client.executor().transport().sent();
        assert!(sent[0].headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn response_exposes_body_and_originating_request() {
        let client = client(vec![response(200, r#"{"id":"42","name":"docs"}"#)]);
        let request = std::sync::Arc::new(ApiRequest::get(client.endpoint("folders/42").unwrap()));

        let resp = client.execute(request.clone()).await.unwrap();

        assert!(std::sync::Arc::ptr_eq(resp.request(), &request));
        assert_eq!(resp.content_type(), Some("application/json"));
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body, json!({"id": "42", "name": "docs"}));
    }

    #[tokio::test]
    async fn same_origin_redirect_keeps_token() {
        let client = client(vec![
            response_with(302, "location", "/2.0/files/1/content?version=2"),
            response(200, "{}"),
        ]);
        client.execute(ApiRequest::get(client.endpoint("files/1/content").unwrap())).await.unwrap();

        let sent = client.executor().transport().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].url.as_str(), "https://api.example.test/2.0/files/1/content?version=2");
        assert_eq!(sent[1].headers.get(AUTHORIZATION).unwrap(), "Bearer token-1");
    }

    #[tokio::test]
    async fn cross_origin_redirect_drops_token() {
        let client = client(vec![
            response_with(302, "location", "https://dl.example-cdn.test/blob/1"),
            response(200, "{}"),
        ]);
        client.execute(ApiRequest::get(client.endpoint("files/1/content").unwrap())).await.unwrap();

        let sent = client.executor().transport().sent();
        assert_eq!(sent[1].url.host_str(), Some("dl.example-cdn.test"));
        assert!(sent[1].headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn see_other_turns_post_into_bodiless_get() {
        let client = client(vec![
            response_with(303, "location", "/2.0/files/9"),
            response(200, "{}"),
        ]);
        let request = ApiRequest::post(client.endpoint("files/content").unwrap())
            .json_body(&json!({"name": "a.txt"}))
            .unwrap();
        client.execute(request).await.unwrap();

        let sent = client.executor().transport().sent();
        assert_eq!(sent[1].method, Method::GET);
        assert!(sent[1].body.is_none());
        assert!(sent[1].headers.get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn redirect_budget_exhaustion_returns_redirect() {
        let client = client(vec![
            response_with(302, "location", "/2.0/a"),
            response_with(302, "location", "/2.0/b"),
        ]);
        let request = ApiRequest::get(client.endpoint("files/1").unwrap()).max_redirects(1);

        let resp = client.execute(request).await.unwrap();

        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(client.executor().transport().calls(), 2);
    }
}
