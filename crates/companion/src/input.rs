//! Topology files and result rendering

use std::path::Path;

use anyhow::{Context, Result};
use companion_core::{Error, Topology};
use serde::Serialize;

use crate::cli::Format;

/// Read a topology, choosing the parser from the file extension.
pub async fn load_topology(path: &Path) -> Result<Topology> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
    parse_topology(path, &content)
        .with_context(|| format!("Failed to load topology from {}", path.display()))
}

fn parse_topology(path: &Path, content: &str) -> Result<Topology> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let parsed = match extension.as_str() {
        "json" => serde_json::from_str(content).map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        "toml" => toml::from_str(content).map_err(|e| e.to_string()),
        other => Err(format!(
            "unsupported topology format '{other}', expected json, yaml or toml"
        )),
    };
    parsed.map_err(|msg| Error::ParseError(msg).into())
}

/// Write `value` to stdout.
pub fn emit<T: Serialize>(value: &T, format: Format) -> Result<()> {
    let rendered = match format {
        Format::Json => serde_json::to_string_pretty(value)?,
        Format::Yaml => serde_yaml::to_string(value)?,
    };
    #[allow(clippy::print_stdout)]
    {
        println!("{}", rendered.trim_end());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use companion_core::ExchangeType;
    use tempfile::TempDir;

    use super::*;

    const YAML: &str = r"
name: shop
exchanges:
  - name: orders
    type: topic
queues:
  - name: orders.created
    max_length: 1000
bindings:
  - source_exchange: orders
    destination_queue: orders.created
    routing_key: orders.*.created
";

    #[tokio::test]
    async fn test_load_yaml_topology() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("shop.yaml");
        std::fs::write(&path, YAML)?;

        let topology = load_topology(&path).await?;
        assert_eq!(topology.name, "shop");
        assert_eq!(topology.exchanges[0].exchange_type, ExchangeType::Topic);
        assert_eq!(topology.queues[0].max_length, Some(1000));
        assert_eq!(topology.bindings[0].destination, "orders.created");
        Ok(())
    }

    #[test]
    fn test_json_and_toml_parse() -> Result<()> {
        let json = r#"{"name":"t","exchanges":[{"name":"e","type":"x-consistent-hash"}]}"#;
        let topology = parse_topology(&PathBuf::from("t.JSON"), json)?;
        assert_eq!(topology.exchanges[0].exchange_type, ExchangeType::ConsistentHash);

        let toml = "name = \"t\"\n[[queues]]\nname = \"q\"\n";
        let topology = parse_topology(&PathBuf::from("t.toml"), toml)?;
        assert_eq!(topology.queues[0].name, "q");
        Ok(())
    }

    #[test]
    fn test_unknown_extension_is_parse_error() {
        let result = parse_topology(&PathBuf::from("t.xml"), "<topology/>");
        let code = result
            .err()
            .and_then(|e| e.downcast_ref::<Error>().map(Error::exit_code));
        assert_eq!(code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = load_topology(Path::new("/nonexistent/topology.json")).await;
        assert!(result.is_err_and(|e| matches!(e.downcast_ref::<Error>(), Some(Error::IoError(_)))));
    }
}
