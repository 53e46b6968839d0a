use super::{ExternalTaskService, ExternalTaskSpec};
use crate::config::ExternalConfig;
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::{Client, Url};

/// REST client for the external task service.
///
/// `POST {base}/tasks` creates a task and answers with `{ "id": .. }`;
/// `POST {base}/tasks/{id}/close` closes it.
pub struct HttpTaskService {
    client: Client,
    tasks_url: Url,
    api_token: String,
}

/// Appends `segments` to `base`, percent-encoding each one so an id can
/// never add path levels or a query.
fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, AppError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::invalid_data(format!("{base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl HttpTaskService {
    pub fn new(config: &ExternalConfig) -> Result<Self, AppError> {
        let base = Url::parse(config.base_url.trim()).map_err(|err| {
            AppError::invalid_data(format!("external.base_url '{}': {err}", config.base_url))
        })?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| AppError::io(err.to_string()))?;
        Ok(Self {
            client,
            tasks_url: join_segments(&base, &["tasks"])?,
            api_token: config.api_token.clone(),
        })
    }

    fn close_url(&self, external_id: &str) -> Result<Url, AppError> {
        join_segments(&self.tasks_url, &[external_id, "close"])
    }
}

fn extract_id(body: &serde_json::Value) -> Option<String> {
    match body.get("id")? {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[async_trait]
impl ExternalTaskService for HttpTaskService {
    async fn create_task(&self, spec: &ExternalTaskSpec) -> Result<String, AppError> {
        let resp = self
            .client
            .post(self.tasks_url.clone())
            .bearer_auth(&self.api_token)
            .json(spec)
            .send()
            .await
            .map_err(|err| AppError::external_create_failed(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::external_create_failed(format!("{status}: {text}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|err| AppError::external_create_failed(err.to_string()))?;
        extract_id(&body)
            .ok_or_else(|| AppError::external_create_failed("response did not contain an id"))
    }

    async fn close_task(&self, external_id: &str) -> Result<bool, AppError> {
        let resp = self
            .client
            .post(self.close_url(external_id)?)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| AppError::external_close_failed(err.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(AppError::external_close_failed(format!("{status}: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpTaskService, extract_id};
    use crate::config::ExternalConfig;
    use crate::external::{ExternalTaskService, ExternalTaskSpec};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn service(base_url: &str) -> HttpTaskService {
        HttpTaskService::new(&ExternalConfig {
            base_url: base_url.to_string(),
            api_token: "tok".to_string(),
            project_id: None,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn spec() -> ExternalTaskSpec {
        ExternalTaskSpec {
            content: "Stretch".to_string(),
            description: None,
            deadline_date: None,
            due_date: "2024-01-08".to_string(),
            due_datetime: None,
            priority: Some(1),
            labels: Vec::new(),
            project_id: None,
        }
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request).to_lowercase();
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let body_len = text[..header_end]
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + body_len
    }

    /// Answers a single request with `status` and `body`, handing back the
    /// lowercased request it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_lowercase()
        });
        (format!("http://{addr}/api/"), handle)
    }

    #[test]
    fn extract_id_accepts_strings_and_numbers() {
        assert_eq!(
            extract_id(&serde_json::json!({ "id": "abc" })).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_id(&serde_json::json!({ "id": 42 })).as_deref(),
            Some("42")
        );
        assert_eq!(extract_id(&serde_json::json!({ "id": "" })), None);
        assert_eq!(extract_id(&serde_json::json!({})), None);
    }

    #[test]
    fn endpoints_encode_ids_as_one_segment() {
        let service = service("https://tasks.example.com/api/");
        assert_eq!(
            service.tasks_url.as_str(),
            "https://tasks.example.com/api/tasks"
        );
        assert_eq!(
            service.close_url("a/b?c#d").unwrap().as_str(),
            "https://tasks.example.com/api/tasks/a%2Fb%3Fc%23d/close"
        );
        assert_eq!(
            self::service("https://tasks.example.com").tasks_url.as_str(),
            "https://tasks.example.com/tasks"
        );
    }

    #[test]
    fn unparsable_base_url_is_invalid_data() {
        let err = HttpTaskService::new(&ExternalConfig {
            base_url: "not a url".to_string(),
            api_token: "tok".to_string(),
            project_id: None,
            timeout_secs: 5,
        })
        .err()
        .unwrap();
        assert_eq!(err.code(), "invalid_data");
    }

    #[tokio::test]
    async fn create_posts_spec_with_bearer_token() {
        let (base, server) = serve_once("200 OK", r#"{"id":"abc"}"#).await;

        let id = service(&base).create_task(&spec()).await.unwrap();
        let request = server.await.unwrap();

        assert_eq!(id, "abc");
        assert!(request.starts_with("post /api/tasks http/1.1"));
        assert!(request.contains("authorization: bearer tok"));
        assert!(request.contains(r#""content":"stretch""#));
    }

    #[tokio::test]
    async fn create_rejects_error_status_and_missing_id() {
        let (base, server) = serve_once("500 Internal Server Error", r#"{"error":"down"}"#).await;
        let err = service(&base).create_task(&spec()).await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.code(), "external_create_failed");
        assert!(err.message().contains("500"));

        let (base, server) = serve_once("200 OK", "{}").await;
        let err = service(&base).create_task(&spec()).await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.code(), "external_create_failed");
        assert!(err.message().contains("did not contain an id"));
    }

    #[tokio::test]
    async fn close_posts_to_the_encoded_task_path() {
        let (base, server) = serve_once("200 OK", "{}").await;

        let closed = service(&base).close_task("ext/1").await.unwrap();
        let request = server.await.unwrap();

        assert!(closed);
        assert!(request.starts_with("post /api/tasks/ext%2f1/close http/1.1"));
        assert!(request.contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn close_maps_not_found_and_failures() {
        let (base, server) = serve_once("404 Not Found", "{}").await;
        let gone = service(&base).close_task("ext-1").await.unwrap();
        server.await.unwrap();
        assert!(!gone);

        let (base, server) = serve_once("503 Service Unavailable", "{}").await;
        let err = service(&base).close_task("ext-1").await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.code(), "external_close_failed");
        assert!(err.message().contains("503"));
    }
}
