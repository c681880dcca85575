use core::fmt;
use core::time::Duration;

use libp2p_identity::Keypair;
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 7001;

pub const DEFAULT_MAX_PEERS: usize = 50;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub identity: Keypair,

    pub swarm: SwarmConfig,
    pub bootstrap: BootstrapConfig,
    pub connections: ConnectionConfig,
}

impl NetworkConfig {
    #[must_use]
    pub const fn new(
        identity: Keypair,
        swarm: SwarmConfig,
        bootstrap: BootstrapConfig,
        connections: ConnectionConfig,
    ) -> Self {
        Self {
            identity,
            swarm,
            bootstrap,
            connections,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub listen: Vec<Multiaddr>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        let listen = format!("/ip4/0.0.0.0/tcp/{DEFAULT_PORT}")
            .parse()
            .map_or_else(|_| Vec::new(), |addr| vec![addr]);

        Self { listen }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub nodes: BootstrapNodes,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootstrapNodes {
    #[serde(deserialize_with = "deserialize_bootstrap")]
    pub list: Vec<Multiaddr>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connections above this count are pruned, protected peers excepted.
    pub max_peers: usize,

    #[serde(rename = "idle_timeout_ms", with = "serde_duration")]
    pub idle_timeout: Duration,

    #[serde(rename = "prune_interval_ms", with = "serde_duration")]
    pub prune_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_peers: DEFAULT_MAX_PEERS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
        }
    }
}

fn deserialize_bootstrap<'de, D>(deserializer: D) -> Result<Vec<Multiaddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct BootstrapVisitor;

    impl<'de> de::Visitor<'de> for BootstrapVisitor {
        type Value = Vec<Multiaddr>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a list of multiaddresses")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut addrs = Vec::new();

            while let Some(addr) = seq.next_element::<Multiaddr>()? {
                let Some(multiaddr::Protocol::P2p(_)) = addr.iter().last() else {
                    return Err(de::Error::custom("peer ID required in bootstrap address"));
                };

                addrs.push(addr);
            }

            Ok(addrs)
        }
    }

    deserializer.deserialize_seq(BootstrapVisitor)
}

pub mod serde_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
