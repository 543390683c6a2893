use async_trait::async_trait;
use marina_core::{LivenessOracle, OracleError};
use tracing::debug;

/// Confirms a credential against the external account API by requesting the
/// authenticated self endpoint. A 2xx means the credential currently
/// authenticates; any other status means it does not. Transport errors are
/// surfaced to the caller, which treats them as not-live.
#[derive(Clone)]
pub struct HttpLivenessOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLivenessOracle {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl LivenessOracle for HttpLivenessOracle {
    async fn confirm(&self, credential: &str) -> Result<bool, OracleError> {
        let url = format!("{}/users/@me", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("Authorization", credential)
            .send()
            .await
            .map_err(|err| OracleError::new(err.to_string()))?;
        debug!(status = %response.status(), "liveness probe");
        Ok(response.status().is_success())
    }
}
