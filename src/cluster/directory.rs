//! Static slave directory and the cluster configuration file it is loaded
//! from.

use std::path::{Path, PathBuf};

use crate::utils::ShardError;

/// Default host of the master and of every slave when not given.
const DEFAULT_HOST: &str = "localhost";

/// Default client-facing port of the master when not given.
const DEFAULT_MASTER_PORT: u16 = 10000;

/// Static description of one storage node.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SlaveDescriptor {
    /// Slave ID string, `slave1`, `slave2`, ... by configured index.
    pub id: String,

    /// Host name or IP the slave listens on.
    pub host: String,

    /// Port the slave listens on.
    pub port: u16,

    /// Directory the slave keeps its blobs in.
    pub storage_dir: PathBuf,
}

impl SlaveDescriptor {
    /// Address string for logging.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Immutable, ordered mapping of all configured slaves.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct SlaveDirectory {
    slaves: Vec<SlaveDescriptor>,
}

impl SlaveDirectory {
    /// Creates a directory from descriptors in configured order.
    pub fn new(slaves: Vec<SlaveDescriptor>) -> Self {
        SlaveDirectory { slaves }
    }

    /// Looks up a slave by its ID.
    pub fn get(&self, id: &str) -> Option<&SlaveDescriptor> {
        self.slaves.iter().find(|s| s.id == id)
    }

    /// Iterates over slaves in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &SlaveDescriptor> {
        self.slaves.iter()
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }
}

/// Contents of the cluster configuration file, shared by the master and
/// slave executables.
///
/// The file is TOML using dotted keys for per-slave settings:
/// ```toml
/// numOfSlaves = 2
/// masterHost = "localhost"
/// masterPort = 10000
/// storageDir = "/tmp/shardstore/master"
/// slave1.host = "localhost"
/// slave1.port = 10001
/// slave1.dirPath = "/tmp/shardstore/slave1"
/// slave2.port = 10002
/// slave2.dirPath = "/tmp/shardstore/slave2"
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ClusterConfig {
    /// Host the master listens on for clients.
    pub master_host: String,

    /// Port the master listens on for clients.
    pub master_port: u16,

    /// Master's own local directory, only used by LISTING.
    pub storage_dir: Option<PathBuf>,

    /// All configured slaves.
    pub slaves: SlaveDirectory,
}

impl ClusterConfig {
    /// Parses a cluster configuration from a TOML string. A missing or
    /// malformed required key is an error.
    pub fn from_toml_str(config_str: &str) -> Result<Self, ShardError> {
        let table = config_str.parse::<toml::Table>()?;

        let num_slaves = get_int(&table, "numOfSlaves")?.ok_or_else(|| {
            ShardError::msg("missing required key 'numOfSlaves'")
        })?;
        if num_slaves < 0 {
            return Err(ShardError::msg(format!(
                "invalid numOfSlaves {}",
                num_slaves
            )));
        }

        let master_host = get_str(&table, "masterHost")?
            .unwrap_or_else(|| DEFAULT_HOST.into());
        let master_port = match get_int(&table, "masterPort")? {
            Some(port) => to_port("masterPort", port)?,
            None => DEFAULT_MASTER_PORT,
        };
        let storage_dir = get_str(&table, "storageDir")?.map(PathBuf::from);

        let mut slaves = Vec::new();
        for i in 1..=num_slaves {
            let id = format!("slave{}", i);
            let empty = toml::Table::new();
            let slave_table = match table.get(&id) {
                Some(toml::Value::Table(t)) => t,
                Some(_) => {
                    return Err(ShardError::msg(format!(
                        "key '{}' is not a table",
                        id
                    )))
                }
                None => &empty,
            };

            let host = get_str(slave_table, "host")?
                .unwrap_or_else(|| DEFAULT_HOST.into());
            let port = get_int(slave_table, "port")?.ok_or_else(|| {
                ShardError::msg(format!("missing required key '{}.port'", id))
            })?;
            let port = to_port(&format!("{}.port", id), port)?;
            let dir = get_str(slave_table, "dirPath")?.ok_or_else(|| {
                ShardError::msg(format!(
                    "missing required key '{}.dirPath'",
                    id
                ))
            })?;

            slaves.push(SlaveDescriptor {
                id,
                host,
                port,
                storage_dir: PathBuf::from(dir),
            });
        }

        Ok(ClusterConfig {
            master_host,
            master_port,
            storage_dir,
            slaves: SlaveDirectory::new(slaves),
        })
    }

    /// Reads and parses the cluster configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ShardError> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            ShardError::msg(format!(
                "cannot read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&config_str)
    }
}

/// Reads an integer key, accepting both TOML integers and numeric strings.
fn get_int(table: &toml::Table, key: &str) -> Result<Option<i64>, ShardError> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::Integer(v)) => Ok(Some(*v)),
        Some(toml::Value::String(s)) => Ok(Some(s.trim().parse::<i64>()?)),
        Some(v) => Err(ShardError::msg(format!(
            "key '{}' expects an integer, got '{}'",
            key, v
        ))),
    }
}

fn get_str(
    table: &toml::Table,
    key: &str,
) -> Result<Option<String>, ShardError> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
        Some(v) => Err(ShardError::msg(format!(
            "key '{}' expects a string, got '{}'",
            key, v
        ))),
    }
}

fn to_port(key: &str, port: i64) -> Result<u16, ShardError> {
    u16::try_from(port)
        .map_err(|_| ShardError::msg(format!("invalid {} {}", key, port)))
}
