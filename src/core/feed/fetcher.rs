use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedFeed {
    pub fn text(&self) -> Result<&str, FetchError> {
        Ok(std::str::from_utf8(&self.body)?)
    }

    pub fn is_plain_text(&self) -> bool {
        self.content_type.as_deref().map_or(true, |value| {
            value
                .split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/plain"))
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    #[error("response body is not valid utf-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
}

pub fn build_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("dataplane-sip-feed/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<FetchedFeed, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let body = response.bytes().await?.to_vec();

    Ok(FetchedFeed { body, content_type })
}

pub async fn fetch_feed_with_retry(
    client: &reqwest::Client,
    url: &str,
    max_retries: usize,
) -> Result<FetchedFeed, FetchError> {
    let mut attempt = 0_usize;
    loop {
        match fetch_feed(client, url).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let should_retry = matches!(err, FetchError::Request(_))
                    || matches!(err, FetchError::HttpStatus(code) if code >= 500);
                if !should_retry || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                tracing::warn!(url, attempt, error = %err, "retrying feed download");
                tokio::time::sleep(Duration::from_millis(40 * attempt as u64)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct AppState {
        request_count: Arc<AtomicUsize>,
    }

    async fn flaky_handler(State(state): State<AppState>) -> Response {
        let counter = state.request_count.fetch_add(1, Ordering::SeqCst);
        if counter == 0 {
            let mut response =
                Response::new(axum::body::Body::from("temporary failure".to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }

        let mut response = Response::new(axum::body::Body::from(
            include_str!("../../../fixtures/sipregistration.txt").to_string(),
        ));
        response.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            "text/plain; charset=utf-8"
                .parse()
                .expect("header must parse"),
        );
        response
    }

    async fn missing_handler(State(state): State<AppState>) -> Response {
        state.request_count.fetch_add(1, Ordering::SeqCst);
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    }

    async fn binary_handler() -> Response {
        Response::new(axum::body::Body::from(vec![0xff_u8, 0xfe, 0xfd]))
    }

    async fn spawn_test_server() -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        let state = AppState {
            request_count: request_count.clone(),
        };
        let app = Router::new()
            .route("/sipregistration.txt", get(flaky_handler))
            .route("/missing.txt", get(missing_handler))
            .route("/binary.txt", get(binary_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), request_count, join_handle)
    }

    #[tokio::test]
    async fn fetch_feed_retries_server_errors() {
        let (base, request_count, server_task) = spawn_test_server().await;
        let client = build_client(Duration::from_secs(5)).expect("client should build");

        let fetched = fetch_feed_with_retry(&client, &format!("{base}/sipregistration.txt"), 2)
            .await
            .expect("fetch should succeed with retry");

        assert_eq!(request_count.load(Ordering::SeqCst), 2);
        assert_eq!(
            fetched.content_type.as_deref(),
            Some("text/plain; charset=utf-8")
        );
        assert!(fetched
            .text()
            .expect("fixture is utf-8")
            .starts_with("#\n# dataplane.org"));

        server_task.abort();
    }

    #[test]
    fn plain_text_detection_ignores_parameters() {
        let with_type = |content_type: Option<&str>| FetchedFeed {
            body: Vec::new(),
            content_type: content_type.map(ToString::to_string),
        };

        assert!(with_type(Some("text/plain; charset=utf-8")).is_plain_text());
        assert!(with_type(Some("TEXT/PLAIN")).is_plain_text());
        assert!(with_type(None).is_plain_text());
        assert!(!with_type(Some("text/html; charset=utf-8")).is_plain_text());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (base, request_count, server_task) = spawn_test_server().await;
        let client = build_client(Duration::from_secs(5)).expect("client should build");

        let result = fetch_feed_with_retry(&client, &format!("{base}/missing.txt"), 3).await;

        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
        assert_eq!(request_count.load(Ordering::SeqCst), 1);

        server_task.abort();
    }

    #[tokio::test]
    async fn invalid_utf8_body_is_a_decode_error() {
        let (base, _, server_task) = spawn_test_server().await;
        let client = build_client(Duration::from_secs(5)).expect("client should build");

        let fetched = fetch_feed(&client, &format!("{base}/binary.txt"))
            .await
            .expect("download itself succeeds");

        assert!(matches!(fetched.text(), Err(FetchError::Decode(_))));

        server_task.abort();
    }
}
