use super::address_family::BrokerAddressFamily;
use rdkafka::config::ClientConfig;
use std::collections::BTreeMap;
use std::time::Duration;

/// Builds the rdkafka configuration of the sink's two clients.
///
/// Both start from the same [`connection`](Self::connection) settings, then add either the
/// [`recovery_reader`](Self::recovery_reader) or the
/// [`transactional_producer`](Self::transactional_producer) property group.
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brokers, broker address family, optional client id and user properties.
    ///
    /// User properties are applied last among the connection settings, so they may override
    /// the address family but not the property groups added afterwards.
    pub fn connection(
        mut self,
        brokers: &str,
        client_id: Option<&str>,
        properties: &BTreeMap<String, String>,
    ) -> Self {
        self.config.set("bootstrap.servers", brokers);
        if let Some(family) = BrokerAddressFamily::from_env().client_property() {
            self.config.set("broker.address.family", family);
        }
        if let Some(id) = client_id {
            self.config.set("client.id", id);
        }
        for (key, value) in properties {
            self.config.set(key, value);
        }
        self
    }

    /// Throwaway reader: its own group, no offset commits, committed data only, EOF events
    pub fn recovery_reader(mut self, group_id: &str) -> Self {
        self.config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "true")
            .set("auto.offset.reset", "earliest")
            .set("isolation.level", "read_committed");
        self
    }

    /// Idempotent producer with a broker-side transaction timeout.
    ///
    /// `transactional.id` is set when the producer starts.
    pub fn transactional_producer(mut self, transaction_timeout: Duration) -> Self {
        self.config
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set(
                "transaction.timeout.ms",
                transaction_timeout.as_millis().to_string(),
            );
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
