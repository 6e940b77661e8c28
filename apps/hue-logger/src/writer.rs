use crate::metric::Batch;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("metrics write failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics sink rejected batch ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

/// Destination for one sampling cycle's batch. A call either stores the whole
/// batch or reports failure for all of it.
pub trait MetricsSink {
    fn write_batch(&self, batch: &Batch) -> impl Future<Output = Result<usize, SinkError>> + Send;
}

#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub retention_policy: Option<String>,
}

#[derive(Deserialize)]
struct InfluxErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct InfluxWriter {
    client: Client,
    write_url: String,
    settings: InfluxSettings,
}

impl InfluxWriter {
    pub fn new(settings: InfluxSettings, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        let write_url = format!("{}/write", settings.url.trim_end_matches('/'));
        Ok(Self {
            client,
            write_url,
            settings,
        })
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = vec![("db", self.settings.database.as_str()), ("precision", "s")];
        if let Some(rp) = self.settings.retention_policy.as_deref() {
            query.push(("rp", rp));
        }
        if let Some(username) = self.settings.username.as_deref() {
            query.push(("u", username));
        }
        if let Some(password) = self.settings.password.as_deref() {
            query.push(("p", password));
        }
        query
    }
}

impl MetricsSink for InfluxWriter {
    async fn write_batch(&self, batch: &Batch) -> Result<usize, SinkError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let len = batch.len();
        let body = batch.to_line_protocol();

        let response = self
            .client
            .post(&self.write_url)
            .query(&self.query())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.text().await {
                Ok(text) => rejection_message(&text),
                Err(err) => format!("failed to read response body: {err}"),
            };
            return Err(SinkError::Rejected { status, message });
        }

        let micros = started.elapsed().as_micros() as u64;
        tracing::debug!(len, micros, db = %self.settings.database, "wrote light batch");
        Ok(len)
    }
}

fn rejection_message(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    let mut bytes = trimmed.as_bytes().to_vec();
    match simd_json::serde::from_slice::<InfluxErrorBody>(&mut bytes) {
        Ok(parsed) => parsed.error,
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricRecord;
    use crate::test_support::{http_response, serve_once};
    use chrono::{TimeZone, Utc};

    fn settings() -> InfluxSettings {
        InfluxSettings {
            url: "http://pi:8086/".to_string(),
            database: "home".to_string(),
            username: None,
            password: None,
            retention_policy: None,
        }
    }

    #[test]
    fn builds_write_url_and_query() {
        let writer = InfluxWriter::new(settings(), Duration::from_secs(1)).expect("writer");
        assert_eq!(writer.write_url, "http://pi:8086/write");
        assert_eq!(writer.query(), vec![("db", "home"), ("precision", "s")]);
    }

    #[test]
    fn includes_credentials_and_retention_policy() {
        let writer = InfluxWriter::new(
            InfluxSettings {
                username: Some("logger".to_string()),
                password: Some("secret".to_string()),
                retention_policy: Some("autogen".to_string()),
                ..settings()
            },
            Duration::from_secs(1),
        )
        .expect("writer");
        let query = writer.query();
        assert!(query.contains(&("rp", "autogen")));
        assert!(query.contains(&("u", "logger")));
        assert!(query.contains(&("p", "secret")));
    }

    #[test]
    fn extracts_influx_error_message() {
        assert_eq!(
            rejection_message(r#"{"error":"database not found: \"home\""}"#),
            "database not found: \"home\""
        );
        assert_eq!(rejection_message("bad gateway"), "bad gateway");
        assert_eq!(rejection_message("  "), "empty response body");
    }

    #[tokio::test]
    async fn empty_batch_is_not_sent() {
        let writer = InfluxWriter::new(
            InfluxSettings {
                url: "http://127.0.0.1:9".to_string(),
                ..settings()
            },
            Duration::from_millis(50),
        )
        .expect("writer");
        let stored = writer
            .write_batch(&Batch::new(chrono::Utc::now()))
            .await
            .expect("no request");
        assert_eq!(stored, 0);
    }

    fn lamp_batch() -> Batch {
        let ts = Utc.with_ymd_and_hms(2026, 1, 11, 8, 0, 0).unwrap();
        let mut batch = Batch::new(ts);
        let mut record = MetricRecord::new("lights", ts);
        record.tag("light_name", "Lamp").field("light_id", 5i64);
        batch.push(record);
        batch
    }

    #[tokio::test]
    async fn posts_line_protocol_and_reports_stored_count() {
        let (url, captured) =
            serve_once("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string()).await;
        let writer = InfluxWriter::new(
            InfluxSettings {
                url,
                password: Some("p&w d".to_string()),
                ..settings()
            },
            Duration::from_secs(5),
        )
        .expect("writer");
        let batch = lamp_batch();

        let stored = writer.write_batch(&batch).await.expect("stored");
        assert_eq!(stored, 1);

        let request = captured.await.expect("request");
        assert_eq!(
            request.request_line,
            "POST /write?db=home&precision=s&p=p%26w+d HTTP/1.1"
        );
        assert_eq!(
            request.body,
            format!("lights,light_name=Lamp light_id=5i {}", batch.timestamp().timestamp())
        );
        assert!(request
            .header("content-type")
            .is_some_and(|value| value.starts_with("text/plain")));
    }

    #[tokio::test]
    async fn non_success_status_rejects_batch_with_influx_message() {
        let (url, _captured) = serve_once(http_response(
            "404 Not Found",
            "application/json",
            r#"{"error":"database not found: \"home\""}"#,
        ))
        .await;
        let writer = InfluxWriter::new(InfluxSettings { url, ..settings() }, Duration::from_secs(5))
            .expect("writer");

        let err = writer.write_batch(&lamp_batch()).await.expect_err("rejected");
        match err {
            SinkError::Rejected { status, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(message, "database not found: \"home\"");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreadable_rejection_body_is_reported() {
        let (url, _captured) = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 64\r\nConnection: close\r\n\r\n{\"error\":"
                .to_string(),
        )
        .await;
        let writer = InfluxWriter::new(InfluxSettings { url, ..settings() }, Duration::from_secs(5))
            .expect("writer");

        let err = writer.write_batch(&lamp_batch()).await.expect_err("rejected");
        match err {
            SinkError::Rejected { status, message } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(message.starts_with("failed to read response body"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
