use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;

use crate::error::{Error, Result};

/// Default deadline for a TXT lookup during request resolution.
pub const TXT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// TXT record lookup, abstracted so request resolution can be tested
/// without the network.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>>;
}

/// System resolver backed by hickory.
pub struct DnsTxtResolver {
    resolver: TokioAsyncResolver,
}

impl DnsTxtResolver {
    pub fn from_system_conf() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Config(format!("resolver init: {e}")))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl TxtResolver for DnsTxtResolver {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>> {
        let lookup = tokio::time::timeout(TXT_LOOKUP_TIMEOUT, self.resolver.txt_lookup(fqdn))
            .await
            .map_err(|_| Error::Storage(format!("txt lookup timed out: {fqdn}")))?
            .map_err(|e| Error::Storage(format!("txt lookup {fqdn}: {e}")))?;
        Ok(lookup.iter().map(|txt| txt.to_string()).collect())
    }
}

/// Fixed answers for tests: fqdn -> records.
#[derive(Default)]
pub struct StaticTxtResolver {
    records: HashMap<String, Vec<String>>,
}

impl StaticTxtResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, fqdn: &str, value: &str) -> Self {
        self.records
            .entry(fqdn.to_string())
            .or_default()
            .push(value.to_string());
        self
    }
}

#[async_trait]
impl TxtResolver for StaticTxtResolver {
    async fn lookup_txt(&self, fqdn: &str) -> Result<Vec<String>> {
        self.records
            .get(fqdn)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no txt records: {fqdn}")))
    }
}
