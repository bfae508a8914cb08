//! InfluxDB v2 sink

use super::{MetricsSink, Point, SinkError};
use crate::models::FieldValue;
use async_trait::async_trait;
use influxdb2::models::DataPoint;
use influxdb2::RequestError;
use tracing::debug;
use url::Url;

/// Connection parameters for the InfluxDB sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Added to every point as the `host` tag when set
    pub hostname: Option<String>,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            hostname: None,
        }
    }
}

/// Writes points to one bucket of an InfluxDB v2 server
pub struct InfluxSink {
    client: influxdb2::Client,
    bucket: String,
}

impl InfluxSink {
    pub fn new(settings: &SinkSettings) -> Result<Self, SinkError> {
        let base = Url::parse(&settings.url)
            .map_err(|e| SinkError::Config(format!("invalid URL {:?}: {e}", settings.url)))?;

        // The client appends `/api/v2/...` to the base as given
        let base = base.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            client: influxdb2::Client::new(base, &settings.org, &settings.token),
            bucket: settings.bucket.clone(),
        })
    }
}

/// Line protocol cannot carry line breaks in names or tag values
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Convert a point, dropping non-finite floats the server would reject
fn data_point(point: &Point) -> Result<DataPoint, SinkError> {
    let mut builder = DataPoint::builder(single_line(&point.measurement));

    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        builder = builder.tag(single_line(key), single_line(value));
    }

    let mut written = 0;
    for (key, value) in &point.fields {
        let key = single_line(key);
        builder = match value {
            FieldValue::Float(v) if !v.is_finite() => continue,
            FieldValue::Float(v) => builder.field(key, *v),
            FieldValue::Integer(v) => builder.field(key, *v),
            FieldValue::UInteger(v) => match i64::try_from(*v) {
                Ok(v) => builder.field(key, v),
                Err(_) => builder.field(key, *v as f64),
            },
            FieldValue::Boolean(v) => builder.field(key, *v),
            FieldValue::String(v) => builder.field(key, v.clone()),
        };
        written += 1;
    }
    if written == 0 {
        return Err(SinkError::EmptyPoint);
    }

    let nanos = point
        .timestamp
        .timestamp_nanos_opt()
        .ok_or_else(|| SinkError::InvalidPoint("timestamp out of range".to_string()))?;

    builder
        .timestamp(nanos)
        .build()
        .map_err(|e| SinkError::InvalidPoint(e.to_string()))
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn ping(&self) -> Result<bool, SinkError> {
        match self.client.ready().await {
            Ok(ready) => Ok(ready),
            Err(RequestError::Http { status, text }) => {
                debug!(status = status.as_u16(), body = %text, "Sink not ready");
                Ok(false)
            }
            Err(e) => Err(SinkError::Unreachable(e)),
        }
    }

    async fn write(&self, point: &Point) -> Result<(), SinkError> {
        let point = data_point(point)?;

        match self
            .client
            .write(&self.bucket, futures::stream::iter(vec![point]))
            .await
        {
            Ok(()) => Ok(()),
            Err(RequestError::Http { status, text }) => Err(SinkError::Rejected {
                status: status.as_u16(),
                body: text,
            }),
            Err(e) => Err(SinkError::Unreachable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fields, labels};
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;

    fn settings(url: String) -> SinkSettings {
        SinkSettings {
            url,
            token: "s3cret".into(),
            org: "home".into(),
            bucket: "network".into(),
            hostname: None,
        }
    }

    fn sample_point() -> Point {
        Point {
            measurement: "ping".into(),
            tags: labels([("target", "1.1.1.1")]),
            fields: fields([("rtt_avg_ms", FieldValue::Integer(3))]),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    async fn write_mock(server: &mut mockito::ServerGuard, body: Matcher) -> mockito::Mock {
        server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("org".into(), "home".into()),
                Matcher::UrlEncoded("bucket".into(), "network".into()),
            ]))
            .match_header("authorization", "Token s3cret")
            .match_body(body)
            .with_status(204)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_ping_ready() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ready")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"ready","started":"2024-01-01T00:00:00Z","up":"1m"}"#)
            .create_async()
            .await;

        let sink = InfluxSink::new(&settings(server.url())).unwrap();
        assert!(sink.ping().await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping_not_ready() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ready")
            .with_status(503)
            .with_body("starting")
            .create_async()
            .await;

        let sink = InfluxSink::new(&settings(server.url())).unwrap();
        assert!(!sink.ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_ping_unreachable() {
        // Nothing listens on port 9 of the loopback interface
        let sink = InfluxSink::new(&settings("http://127.0.0.1:9".into())).unwrap();
        assert!(matches!(
            sink.ping().await,
            Err(SinkError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_write_point() {
        let mut server = mockito::Server::new_async().await;
        let mock = write_mock(
            &mut server,
            Matcher::Regex(r"^ping,target=1\.1\.1\.1 rtt_avg_ms=3i 1700000000000000000\n?$".into()),
        )
        .await;

        let sink = InfluxSink::new(&settings(server.url())).unwrap();
        sink.write(&sample_point()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_flattens_line_breaks_in_tags() {
        let mut server = mockito::Server::new_async().await;
        let mock = write_mock(
            &mut server,
            Matcher::Regex(r"^ping,isp=Foo\\ Bar,target=1\.1\.1\.1 rtt_avg_ms=3i ".into()),
        )
        .await;

        let mut point = sample_point();
        point.tags.insert("isp".into(), "Foo\nBar".into());

        let sink = InfluxSink::new(&settings(server.url())).unwrap();
        sink.write(&point).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_keeps_path_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/influx/api/v2/write")
            .match_query(Matcher::Any)
            .with_status(204)
            .create_async()
            .await;

        let sink = InfluxSink::new(&settings(format!("{}/influx/", server.url()))).unwrap();
        sink.write(&sample_point()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"code":"unauthorized","message":"unauthorized access"}"#)
            .create_async()
            .await;

        let sink = InfluxSink::new(&settings(server.url())).unwrap();
        let err = sink.write(&sample_point()).await.unwrap_err();

        match err {
            SinkError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("unauthorized"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_write_without_usable_fields() {
        let mut point = sample_point();
        point.fields = fields([("jitter_ms", FieldValue::Float(f64::NAN))]);

        // Rejected before any request is made
        let sink = InfluxSink::new(&settings("http://127.0.0.1:9".into())).unwrap();
        assert!(matches!(
            sink.write(&point).await,
            Err(SinkError::EmptyPoint)
        ));
    }

    #[test]
    fn test_single_line() {
        assert_eq!(single_line("AT&T\r\nWireless"), "AT&T  Wireless");
        assert_eq!(single_line("plain"), "plain");
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            InfluxSink::new(&settings("not a url".into())),
            Err(SinkError::Config(_))
        ));
    }
}
