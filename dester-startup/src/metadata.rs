//! Metadata ingestion trigger and the bundled TMDB ingestor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dester_core::{ConfigStore, ProviderApiKey};

use crate::error::MetadataError;

/// Builds a provider client for an API key and runs one ingestion pass.
///
/// A successful pass is expected to set the store's metadata flag so the
/// next cold start skips ingestion.
pub trait MetadataIngestor: Send + Sync {
    fn ingest(&self, api_key: &ProviderApiKey) -> Result<IngestReport, MetadataError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Ingested(IngestReport),
    /// This trigger already fired during the current process lifetime.
    AlreadyFired,
}

/// Fires the ingestor at most once. No retry, no progress tracking.
pub struct MetadataSyncTrigger {
    ingestor: Arc<dyn MetadataIngestor>,
    fired: AtomicBool,
}

impl MetadataSyncTrigger {
    pub fn new(ingestor: Arc<dyn MetadataIngestor>) -> Self {
        Self {
            ingestor,
            fired: AtomicBool::new(false),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn fire(&self, api_key: ProviderApiKey) -> Result<TriggerOutcome, MetadataError> {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("metadata trigger already fired; skipping");
            return Ok(TriggerOutcome::AlreadyFired);
        }

        tracing::info!("running metadata ingestion");
        let ingestor = Arc::clone(&self.ingestor);
        let report = tokio::task::spawn_blocking(move || ingestor.ingest(&api_key))
            .await
            .map_err(|err| MetadataError::Join(err.to_string()))??;
        tracing::info!(provider = %report.provider, "metadata ingestion finished");
        Ok(TriggerOutcome::Ingested(report))
    }
}

// ---------------------------------------------------------------------------
// TMDB
// ---------------------------------------------------------------------------

const TMDB_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Subset of TMDB's `/configuration` response the ingestor uses.
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbConfiguration {
    pub images: TmdbImages,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbImages {
    pub secure_base_url: String,
    #[serde(default)]
    pub poster_sizes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbErrorBody {
    status_message: String,
}

/// Minimal blocking TMDB v3 client.
pub struct TmdbClient {
    base_url: String,
    api_key: ProviderApiKey,
    agent: ureq::Agent,
}

impl TmdbClient {
    pub fn new(api_key: ProviderApiKey, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            agent: ureq::AgentBuilder::new().timeout(TMDB_REQUEST_TIMEOUT).build(),
        }
    }

    /// `GET /configuration`; succeeds only with a valid key.
    pub fn configuration(&self) -> Result<TmdbConfiguration, MetadataError> {
        let url = format!("{}/configuration", self.base_url);
        match self
            .agent
            .get(&url)
            .query("api_key", self.api_key.expose())
            .call()
        {
            Ok(response) => response
                .into_json::<TmdbConfiguration>()
                .map_err(|err| MetadataError::Http {
                    url,
                    message: format!("invalid response body: {err}"),
                }),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(rejected(status, &body))
            }
            Err(ureq::Error::Transport(transport)) => Err(MetadataError::Http {
                url,
                message: transport.to_string(),
            }),
        }
    }
}

fn rejected(status: u16, body: &str) -> MetadataError {
    let message = serde_json::from_str::<TmdbErrorBody>(body)
        .map(|parsed| parsed.status_message)
        .unwrap_or_else(|_| body.trim().to_string());
    MetadataError::Rejected { status, message }
}

/// Validates the key against TMDB and records the pass in the store.
pub struct TmdbIngestor {
    store: Arc<dyn ConfigStore>,
    base_url: String,
}

impl TmdbIngestor {
    pub fn new(store: Arc<dyn ConfigStore>, base_url: impl Into<String>) -> Self {
        Self {
            store,
            base_url: base_url.into(),
        }
    }
}

impl MetadataIngestor for TmdbIngestor {
    fn ingest(&self, api_key: &ProviderApiKey) -> Result<IngestReport, MetadataError> {
        let client = TmdbClient::new(api_key.clone(), self.base_url.clone());
        let configuration = client.configuration()?;
        self.store.set_metadata_initialized(true)?;
        Ok(IngestReport {
            provider: "tmdb".to_string(),
            detail: Some(configuration.images.secure_base_url),
        })
    }
}
