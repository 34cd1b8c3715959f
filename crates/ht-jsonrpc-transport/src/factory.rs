//! Transport factory: validate options once, then hand out servers and
//! clients bound to the same immutable config.

use std::sync::Arc;

use crate::client::Client;
use crate::config::{TransportConfig, TransportOptions};
use crate::dispatch::Dispatch;
use crate::error::ConfigError;
use crate::server::Server;

#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: Arc<TransportConfig>,
}

impl HttpTransport {
    /// Validate `options` and fill in defaults.
    ///
    /// Fails with [`ConfigError::MissingEndpoint`] unless an app or both host
    /// and port are given.
    pub fn new(options: TransportOptions) -> Result<Self, ConfigError> {
        let config = TransportConfig::from_options(options)?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    pub fn server<D: Dispatch>(&self, dispatch: D) -> Result<Server, ConfigError> {
        Server::new(self.config.clone(), dispatch)
    }

    pub fn server_without_dispatch(&self) -> Result<Server, ConfigError> {
        Server::without_dispatch(self.config.clone())
    }

    pub fn client(&self) -> Result<Client, ConfigError> {
        Client::new(self.config.clone())
    }
}
