use std::{
    env,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use thiserror::Error;
use uuid::Uuid;

use crate::constants::DEFAULT_ROOT_PATH;

pub const ENV_ROOT_PATH: &str = "STATUSBUS_ROOT_PATH";
pub const ENV_MULTICAST_ADDR: &str = "STATUSBUS_MULTICAST_ADDR";
pub const ENV_WS_ADDR: &str = "STATUSBUS_WS_ADDR";
pub const ENV_PROCESS_ID: &str = "STATUSBUS_PROCESS_ID";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} is not a multicast address")]
    NotMulticast(SocketAddrV4),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Prefix of every client namespace path. Starts with `/` and never
    /// ends with one; empty mounts namespaces at the server root.
    pub root_path: String,
    /// Group used by the multicast broker.
    pub multicast_addr: SocketAddrV4,
    /// Where the websocket gateway listens.
    pub ws_addr: SocketAddr,
    /// Identity stamped on envelopes authored here. Random per process
    /// unless pinned.
    pub process_id: Uuid,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            root_path: DEFAULT_ROOT_PATH.to_owned(),
            multicast_addr: SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 123), 4600),
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            process_id: Uuid::new_v4(),
        }
    }
}

impl BusConfig {
    /// Defaults overridden by whichever `STATUSBUS_*` variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(root) = lookup(ENV_ROOT_PATH) {
            config.root_path = root;
        }
        if let Some(addr) = lookup(ENV_MULTICAST_ADDR) {
            config.multicast_addr = parse(ENV_MULTICAST_ADDR, addr)?;
        }
        if let Some(addr) = lookup(ENV_WS_ADDR) {
            config.ws_addr = parse(ENV_WS_ADDR, addr)?;
        }
        if let Some(id) = lookup(ENV_PROCESS_ID) {
            config.process_id = parse(ENV_PROCESS_ID, id)?;
        }
        config.normalize()
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn with_process_id(mut self, process_id: Uuid) -> Self {
        self.process_id = process_id;
        self
    }

    /// Check invariants and canonicalise the root path.
    pub fn normalize(mut self) -> Result<Self, ConfigError> {
        if !self.multicast_addr.ip().is_multicast() {
            return Err(ConfigError::NotMulticast(self.multicast_addr));
        }
        let trimmed = self.root_path.trim().trim_matches('/');
        self.root_path = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        Ok(self)
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<_, _> = vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = BusConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.root_path, "/status");
        assert_eq!(config.multicast_addr.port(), 4600);
        assert_eq!(config.ws_addr.port(), 4000);
    }

    #[test]
    fn environment_overrides() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let config = BusConfig::from_lookup(lookup(&[
            (ENV_ROOT_PATH, "live/"),
            (ENV_MULTICAST_ADDR, "239.1.2.3:5000"),
            (ENV_WS_ADDR, "127.0.0.1:9000"),
            (ENV_PROCESS_ID, &id_str),
        ]))
        .unwrap();
        assert_eq!(config.root_path, "/live");
        assert_eq!(config.multicast_addr, "239.1.2.3:5000".parse().unwrap());
        assert_eq!(config.ws_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.process_id, id);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert_eq!(
            BusConfig::from_lookup(lookup(&[(ENV_WS_ADDR, "nowhere")])),
            Err(ConfigError::Invalid {
                name: ENV_WS_ADDR,
                value: "nowhere".into()
            })
        );
        assert!(matches!(
            BusConfig::from_lookup(lookup(&[(ENV_MULTICAST_ADDR, "10.0.0.1:4600")])),
            Err(ConfigError::NotMulticast(_))
        ));
    }

    #[test]
    fn root_path_is_canonical() {
        let config = BusConfig::default().with_root_path("//a/b//").normalize().unwrap();
        assert_eq!(config.root_path, "/a/b");
        let config = BusConfig::default().with_root_path("/").normalize().unwrap();
        assert_eq!(config.root_path, "");
    }
}
