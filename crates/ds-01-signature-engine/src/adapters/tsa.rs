//! Timestamp gateway backed by the RFC 3161 client.

use crate::domain::errors::SignatureError;
use crate::ports::outbound::TimestampGateway;
use async_trait::async_trait;
use ds_04_timestamp_authority::{
    FailoverConfig, TimestampAuthorityApi, TimestampRequestOptions, TsaClient, TsaConfig,
    TsaTransport,
};
use shared_types::{HashAlgorithm, Timestamp};

/// Asks a single URL when one is given, otherwise the failover list.
pub struct TsaTimestampGateway<T: TsaTransport> {
    client: TsaClient<T>,
    servers: FailoverConfig,
    options: TimestampRequestOptions,
}

impl<T: TsaTransport> TsaTimestampGateway<T> {
    pub fn new(client: TsaClient<T>, servers: FailoverConfig) -> Self {
        Self {
            client,
            servers,
            options: TimestampRequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TimestampRequestOptions) -> Self {
        self.options = options;
        self
    }

    /// An ad hoc URL inherits the primary's timeout but not its credentials.
    fn single(&self, url: &str) -> TsaConfig {
        TsaConfig::new(url).with_timeout(self.servers.primary.timeout)
    }
}

#[async_trait]
impl<T: TsaTransport> TimestampGateway for TsaTimestampGateway<T> {
    async fn timestamp_digest(
        &self,
        hash: HashAlgorithm,
        digest: &[u8],
        tsa_url: Option<&str>,
    ) -> Result<Timestamp, SignatureError> {
        let options = TimestampRequestOptions {
            hash_algorithm: hash,
            ..self.options.clone()
        };
        let request = self
            .client
            .create_timestamp_request_for_digest(digest, &options)?;
        let response = match tsa_url {
            Some(url) => self.client.request_timestamp(&request, &self.single(url)).await?,
            None => {
                self.client
                    .request_timestamp_with_failover(&request, &self.servers)
                    .await?
            }
        };
        Ok(response.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_04_timestamp_authority::test_support::{FakeTsa, TsaBehavior};
    use ds_04_timestamp_authority::TsaError;
    use std::sync::Arc;

    const A: &str = "https://a.tsa.test";
    const B: &str = "https://b.tsa.test";

    fn gateway(fake: Arc<FakeTsa>) -> TsaTimestampGateway<Arc<FakeTsa>> {
        TsaTimestampGateway::new(
            TsaClient::new(fake),
            FailoverConfig::new(TsaConfig::new(A)).with_fallback(TsaConfig::new(B)),
        )
    }

    #[tokio::test]
    async fn test_uses_failover_list_by_default() {
        let fake = Arc::new(FakeTsa::new().with_behavior(A, TsaBehavior::Unreachable));
        let gw = gateway(Arc::clone(&fake));
        let ts = gw
            .timestamp_digest(HashAlgorithm::Sha256, &[1u8; 32], None)
            .await
            .unwrap();
        assert_eq!(ts.tsa_url.as_deref(), Some(B));
        assert_eq!(fake.calls(), vec![A, B]);
    }

    #[tokio::test]
    async fn test_explicit_url_bypasses_failover() {
        let fake = Arc::new(FakeTsa::new().with_behavior("https://c.tsa.test", TsaBehavior::Reject(2)));
        let gw = gateway(Arc::clone(&fake));
        let err = gw
            .timestamp_digest(HashAlgorithm::Sha256, &[1u8; 32], Some("https://c.tsa.test"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignatureError::TimestampServer(TsaError::Response { status: 2, .. })
        ));
        assert_eq!(fake.calls(), vec!["https://c.tsa.test"]);
    }
}
