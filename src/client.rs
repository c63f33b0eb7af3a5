use crate::config::{AttributeModel, ProviderConfig};
use crate::error::ScoreError;
use crate::request::AnalyzeComment;
use crate::response::ScoreResult;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use std::time::Instant;
use tokio::sync::Mutex;

/// A provider connection handle and the moment it was opened.
struct Connection {
    http: Client,
    created_at: Instant,
}

impl Connection {
    fn open(config: &ProviderConfig) -> Result<Self, ScoreError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(1)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            created_at: Instant::now(),
        })
    }

    fn is_stale(&self, config: &ProviderConfig) -> bool {
        self.created_at.elapsed() > config.connection_max_age()
    }
}

/// Scores text against the remote analysis endpoint.
///
/// One instance is built per process and shared by the live hook path and
/// the backfill scanner. Every call holds the connection lock for the whole
/// exchange, so a recycled handle is never swapped out under a caller that
/// is still reading its response.
pub struct ScoreClient {
    config: ProviderConfig,
    model: AttributeModel,
    builder: AnalyzeComment,
    connection: Mutex<Option<Connection>>,
}

impl ScoreClient {
    pub fn new(config: ProviderConfig, model: AttributeModel) -> Self {
        let builder = AnalyzeComment::from_config(&config, model);
        Self {
            config,
            model,
            builder,
            connection: Mutex::new(None),
        }
    }

    pub fn model(&self) -> AttributeModel {
        self.model
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.analyze_path
        )
    }

    /// Single attempt, no retries. Transport failures surface as
    /// [`ScoreError::Network`]; anything the provider sends back is turned
    /// into a score, defaulting to 0.0.
    pub async fn score(&self, raw: &str, user_id: Option<i64>) -> Result<ScoreResult, ScoreError> {
        let body = serde_json::to_vec(&self.builder.build(raw, user_id))?;

        let mut guard = self.connection.lock().await;
        let connection = match guard.take() {
            Some(connection) if !connection.is_stale(&self.config) => connection,
            Some(_) => {
                log::debug!(
                    "Recycling provider connection older than {:?}",
                    self.config.connection_max_age()
                );
                Connection::open(&self.config)?
            }
            None => Connection::open(&self.config)?,
        };

        match self.send(&connection, body).await {
            Ok(text) => {
                *guard = Some(connection);
                Ok(ScoreResult::from_response(&text, self.model))
            }
            Err(e) => {
                // the handle stays dropped, the next call opens a fresh one
                let e = e.without_url();
                log::warn!("Scoring request failed: {e}");
                Err(ScoreError::Network(e))
            }
        }
    }

    async fn send(&self, connection: &Connection, body: Vec<u8>) -> Result<String, reqwest::Error> {
        let response = connection
            .http
            .post(self.analyze_url())
            .query(&[("key", self.config.api_key.as_str())])
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Scoring provider answered with status {}", status.as_u16());
        }
        response.text().await
    }
}
