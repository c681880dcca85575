#[cfg(test)]
#[path = "tests/config.rs"]
mod tests;

use std::fs::{read_to_string, write};

use blocksync_network::config::{BootstrapConfig, ConnectionConfig, NetworkConfig, SwarmConfig};
use blocksync_network::StreamProtocol;
use camino::Utf8Path;
use eyre::{eyre, Result as EyreResult, WrapErr};
use libp2p_identity::Keypair;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_PROTOCOL: StreamProtocol = StreamProtocol::new("/blocksync/sync/2");

pub const DEFAULT_PROTECTION_TAG: &str = "sync";

const PROTOCOL_SUFFIX: &str = "/sync/2";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SyncConfig {
    /// Protocol the sync streams are opened and accepted on.
    #[serde(with = "serde_protocol")]
    pub protocol: StreamProtocol,

    /// Tag under which peers we are syncing with are protected from pruning.
    pub protection_tag: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL,
            protection_tag: DEFAULT_PROTECTION_TAG.to_owned(),
        }
    }
}

impl SyncConfig {
    /// Sync config for the chain whose protocols live under `prefix`, e.g.
    /// `/dot` gives `/dot/sync/2`.
    pub fn for_chain(prefix: &str) -> EyreResult<Self> {
        let protocol = format!("{}{PROTOCOL_SUFFIX}", prefix.trim_end_matches('/'));
        let protocol = StreamProtocol::try_from_owned(protocol)
            .map_err(|err| eyre!("invalid protocol prefix {prefix:?}: {err:?}"))?;

        Ok(Self {
            protocol,
            ..Self::default()
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct NodeConfig {
    #[serde(with = "serde_identity", default = "Keypair::generate_ed25519")]
    pub identity: Keypair,

    #[serde(default)]
    pub swarm: SwarmConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub connections: ConnectionConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl NodeConfig {
    #[must_use]
    pub fn new(identity: Keypair) -> Self {
        Self {
            identity,
            swarm: SwarmConfig::default(),
            bootstrap: BootstrapConfig::default(),
            connections: ConnectionConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse configuration from {path:?}"))
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }

    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig::new(
            self.identity.clone(),
            self.swarm.clone(),
            self.bootstrap.clone(),
            self.connections,
        )
    }
}

mod serde_protocol {
    use blocksync_network::StreamProtocol;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(protocol: &StreamProtocol, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(protocol.as_ref())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<StreamProtocol, D::Error>
    where
        D: Deserializer<'de>,
    {
        let protocol = String::deserialize(deserializer)?;

        StreamProtocol::try_from_owned(protocol)
            .map_err(|err| D::Error::custom(format!("invalid protocol: {err:?}")))
    }
}

pub mod serde_identity {
    use core::fmt::{self, Formatter};

    use libp2p_identity::Keypair;
    use serde::de::{self, MapAccess};
    use serde::ser::{self, SerializeMap};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = key.to_protobuf_encoding().map_err(ser::Error::custom)?;

        let mut keypair = serializer.serialize_map(Some(2))?;
        keypair.serialize_entry("peer_id", &key.public().to_peer_id().to_base58())?;
        keypair.serialize_entry("keypair", &bs58::encode(&encoded).into_string())?;
        keypair.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdentityVisitor;

        impl<'de> de::Visitor<'de> for IdentityVisitor {
            type Value = Keypair;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("an identity")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut peer_id = None::<String>;
                let mut keypair = None::<String>;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "peer_id" => peer_id = Some(map.next_value()?),
                        "keypair" => keypair = Some(map.next_value()?),
                        _ => {
                            let _ignored = map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }

                let peer_id = peer_id.ok_or_else(|| de::Error::missing_field("peer_id"))?;
                let keypair = keypair.ok_or_else(|| de::Error::missing_field("keypair"))?;

                let decoded = bs58::decode(&keypair)
                    .into_vec()
                    .map_err(de::Error::custom)?;
                let keypair =
                    Keypair::from_protobuf_encoding(&decoded).map_err(de::Error::custom)?;

                if keypair.public().to_peer_id().to_base58() != peer_id {
                    return Err(de::Error::custom("peer_id does not match keypair"));
                }

                Ok(keypair)
            }
        }

        deserializer.deserialize_map(IdentityVisitor)
    }
}
