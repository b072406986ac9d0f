//! Transfer input: server address, display name and local file path, validated.

use std::path::PathBuf;

use serde::Deserialize;

use crate::protocol::MAX_NAME_LEN;

/// Raw transfer input as written in a settings file `[transfer]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferInput {
    /// `host:port`
    pub server: String,
    pub name: String,
    pub file: String,
}

/// Validated transfer input for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub file_path: PathBuf,
}

impl TransferConfig {
    /// Validate the three logical fields.
    pub fn new(server: &str, name: &str, file: &str) -> Result<Self, ConfigError> {
        let (host, port) = parse_address(server)?;
        validate_name(name)?;
        if file.is_empty() {
            return Err(ConfigError::EmptyFilePath);
        }
        Ok(Self {
            host: host.to_owned(),
            port,
            name: name.to_owned(),
            file_path: PathBuf::from(file),
        })
    }

    /// Parse the three-line `transfer.info` form: address, name, file path.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let lines: Vec<&str> = text
            .lines()
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .collect();
        if lines.len() != 3 {
            return Err(ConfigError::LineCount(lines.len()));
        }
        Self::new(lines[0], lines[1], lines[2])
    }

    /// `host:port`, for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TryFrom<TransferInput> for TransferConfig {
    type Error = ConfigError;

    fn try_from(input: TransferInput) -> Result<Self, Self::Error> {
        Self::new(&input.server, &input.name, &input.file)
    }
}

/// Display names are 1..=100 bytes.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ConfigError::NameLength(name.len()));
    }
    Ok(())
}

fn parse_address(server: &str) -> Result<(&str, u16), ConfigError> {
    let mut parts = server.split(':');
    let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ConfigError::Address(server.to_owned()));
    };
    if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::Address(server.to_owned()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| ConfigError::Port(port.to_owned()))?;
    Ok((host, port))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("expected exactly 3 lines of transfer input, got {0}")]
    LineCount(usize),
    #[error("invalid server address {0:?}: expected host:port")]
    Address(String),
    #[error("port out of range: {0}")]
    Port(String),
    #[error("name must be 1..={max} bytes, got {0}", max = MAX_NAME_LEN)]
    NameLength(usize),
    #[error("file path is empty")]
    EmptyFilePath,
}
