// # InfluxDB History Sink
//
// Writes connectivity transitions to InfluxDB 1.x using line protocol.
//
// - Devices: measurement `device`, tag `device=<id>`
// - Hubs: measurement `gateway`, tag `gateway=<id>`
// - One boolean field `connected`, timestamp in seconds
//
// Each point is a single POST to `{url}/write?db=<database>&precision=s`.

use async_trait::async_trait;
use connlog_core::config::HistoryConfig;
use connlog_core::traits::{HistoryPoint, HistorySink};
use connlog_core::{EntityKind, Error, Result};
use reqwest::Url;
use std::time::Duration;

/// History sink writing to an InfluxDB database
///
/// # Security
///
/// The Debug implementation does NOT expose the password.
#[derive(Clone)]
pub struct InfluxHistorySink {
    write_url: Url,
    username: Option<String>,
    /// ⚠️ NEVER log this value
    password: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for InfluxHistorySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxHistorySink")
            .field("write_url", &self.write_url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl InfluxHistorySink {
    /// Create a sink for `database` at `base_url`
    pub fn new(base_url: &str, database: &str, timeout: Duration) -> Result<Self> {
        let mut write_url = Url::parse(base_url.trim())
            .map_err(|e| Error::config(format!("Invalid InfluxDB URL {:?}: {}", base_url, e)))?;
        write_url
            .path_segments_mut()
            .map_err(|_| Error::config(format!("InfluxDB URL {:?} cannot be a base", base_url)))?
            .pop_if_empty()
            .push("write");
        write_url
            .query_pairs_mut()
            .append_pair("db", database)
            .append_pair("precision", "s");

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            write_url,
            username: None,
            password: None,
            client,
        })
    }

    /// Authenticate writes with HTTP basic auth
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Build from configuration
    pub fn from_config(config: &HistoryConfig) -> Result<Self> {
        let url = config
            .influx_url
            .as_deref()
            .ok_or_else(|| Error::config("InfluxDB URL cannot be empty"))?;
        let sink = Self::new(url, &config.database, Duration::from_secs(config.timeout_secs))?;

        Ok(match config.username.as_deref() {
            Some(user) if !user.is_empty() => sink.with_credentials(user, config.password.clone()),
            _ => sink,
        })
    }

    /// Full write URL
    pub fn write_url(&self) -> &str {
        self.write_url.as_str()
    }
}

/// Render a point as one line of InfluxDB line protocol
pub fn line_protocol(point: &HistoryPoint) -> String {
    let measurement = match point.entity_kind {
        EntityKind::Device => "device",
        EntityKind::Hub => "gateway",
    };
    format!(
        "{m},{m}={id} connected={online} {ts}",
        m = measurement,
        id = escape_tag(&point.entity_id),
        online = point.online,
        ts = point.time.timestamp()
    )
}

fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl HistorySink for InfluxHistorySink {
    async fn append(&self, point: &HistoryPoint) -> Result<()> {
        let line = line_protocol(point);
        tracing::trace!(line = %line, "Writing history point");

        let mut request = self.client.post(self.write_url.clone()).body(line);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::history("InfluxDB write timed out")
            } else {
                Error::history(format!("InfluxDB write failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::history(format!(
                "InfluxDB rejected write: {} - {}",
                status, body
            )));
        }

        Ok(())
    }
}
