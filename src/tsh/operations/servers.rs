//! Node discovery through the proxy's `servers` subsystem.

use regex::Regex;
use russh::ChannelMsg;
use tracing::debug;

use crate::tsh::client::RemoteSession;
use crate::tsh::error::TshError;
use crate::tsh::types::ServerInfo;

const OPERATION: &str = "get-servers";

/// Subsystem the proxy answers with a JSON array of nodes.
pub(crate) const SERVERS_SUBSYSTEM: &str = "servers";

/// Label filter applied to the listing.
///
/// With only a name, nodes carrying that label match. With a value pattern,
/// the pattern must match the whole label value. A pattern without a name
/// matches against every label.
#[derive(Debug, Clone)]
pub struct LabelFilter {
    name: Option<String>,
    value: Option<Regex>,
}

impl LabelFilter {
    pub fn new(name: Option<&str>, value: Option<&str>) -> Result<Self, String> {
        let value = value
            .filter(|v| !v.is_empty())
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern))
                    .map_err(|e| format!("invalid label value pattern '{}': {}", pattern, e))
            })
            .transpose()?;
        Ok(Self {
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            value,
        })
    }

    pub fn matches(&self, server: &ServerInfo) -> bool {
        match (&self.name, &self.value) {
            (None, None) => true,
            (Some(name), None) => server.labels.contains_key(name),
            (Some(name), Some(value)) => server
                .labels
                .get(name)
                .is_some_and(|actual| value.is_match(actual)),
            (None, Some(value)) => server.labels.values().any(|actual| value.is_match(actual)),
        }
    }
}

/// Parse the proxy's reply.
pub(super) fn parse_servers(payload: &[u8]) -> Result<Vec<ServerInfo>, TshError> {
    serde_json::from_slice(payload).map_err(|e| {
        TshError::operation(OPERATION, format!("invalid server list from proxy: {}", e))
    })
}

/// Render servers as an aligned table, one row per node.
pub fn format_table(servers: &[ServerInfo]) -> String {
    const HEADERS: [&str; 4] = ["ID", "HOSTNAME", "ADDRESS", "LABELS"];

    let rows: Vec<[String; 4]> = servers
        .iter()
        .map(|s| {
            let labels = s
                .labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            [s.id.clone(), s.hostname.clone(), s.addr.clone(), labels]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: [&str; 4]| {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    };

    push_row(HEADERS);
    for row in &rows {
        push_row([row[0].as_str(), row[1].as_str(), row[2].as_str(), row[3].as_str()]);
    }
    out
}

/// Ask the proxy for every node it knows about.
pub(super) async fn fetch_servers(session: &RemoteSession) -> Result<Vec<ServerInfo>, TshError> {
    let mut channel = session
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| TshError::operation(OPERATION, format!("Failed to open channel: {}", e)))?;
    channel
        .request_subsystem(true, SERVERS_SUBSYSTEM)
        .await
        .map_err(|e| {
            TshError::operation(OPERATION, format!("proxy refused the servers subsystem: {}", e))
        })?;

    let mut payload = Vec::with_capacity(4096);
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => payload.extend_from_slice(&data),
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }
    if let Err(e) = channel.close().await {
        debug!("Failed to close servers channel: {}", e);
    }

    debug!("Received {} byte(s) of server listing", payload.len());
    parse_servers(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn server(id: &str, labels: &[(&str, &str)]) -> ServerInfo {
        ServerInfo {
            id: id.to_string(),
            addr: format!("{}:3022", id),
            hostname: format!("{}.example.com", id),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    mod filter {
        use super::*;

        #[test]
        fn test_no_filter_matches_everything() {
            let filter = LabelFilter::new(None, None).unwrap();
            assert!(filter.matches(&server("a", &[])));
        }

        #[test]
        fn test_name_only_requires_label() {
            let filter = LabelFilter::new(Some("env"), None).unwrap();
            assert!(filter.matches(&server("a", &[("env", "prod")])));
            assert!(!filter.matches(&server("b", &[("role", "db")])));
        }

        #[test]
        fn test_value_pattern_is_anchored() {
            let filter = LabelFilter::new(Some("env"), Some("prod")).unwrap();
            assert!(filter.matches(&server("a", &[("env", "prod")])));
            assert!(!filter.matches(&server("b", &[("env", "preprod")])));
        }

        #[test]
        fn test_value_pattern_regex() {
            let filter = LabelFilter::new(Some("env"), Some("prod|stage")).unwrap();
            assert!(filter.matches(&server("a", &[("env", "stage")])));
            assert!(!filter.matches(&server("b", &[("env", "dev")])));
        }

        #[test]
        fn test_value_without_name_checks_every_label() {
            let filter = LabelFilter::new(None, Some("db-.*")).unwrap();
            assert!(filter.matches(&server("a", &[("role", "db-main")])));
            assert!(!filter.matches(&server("b", &[("role", "web")])));
        }

        #[test]
        fn test_invalid_pattern_is_rejected() {
            let err = LabelFilter::new(Some("env"), Some("(")).unwrap_err();
            assert!(err.contains("invalid label value pattern"));
        }

        #[test]
        fn test_empty_strings_mean_no_filter() {
            let filter = LabelFilter::new(Some(""), Some("")).unwrap();
            assert!(filter.matches(&server("a", &[])));
        }
    }

    mod listing {
        use super::*;

        #[test]
        fn test_parse_servers() {
            let payload = br#"[
                {"id": "n1", "addr": "10.0.0.1:3022", "hostname": "n1", "labels": {"env": "prod"}},
                {"id": "n2", "addr": "10.0.0.2:3022"}
            ]"#;
            let servers = parse_servers(payload).unwrap();
            assert_eq!(servers.len(), 2);
            assert_eq!(servers[0].labels["env"], "prod");
            assert!(servers[1].labels.is_empty());
        }

        #[test]
        fn test_parse_garbage_is_operation_error() {
            let err = parse_servers(b"not json").unwrap_err();
            assert_eq!(err.stage(), "operation");
        }

        #[test]
        fn test_table_layout() {
            let table = format_table(&[server("n1", &[("env", "prod"), ("role", "db")])]);
            let lines: Vec<&str> = table.lines().collect();
            assert_eq!(lines.len(), 2);
            assert!(lines[0].starts_with("ID"));
            assert!(lines[1].contains("n1.example.com"));
            assert!(lines[1].ends_with("env=prod,role=db"));
        }

        #[test]
        fn test_empty_table_has_header() {
            assert_eq!(format_table(&[]), "ID  HOSTNAME  ADDRESS  LABELS\n");
        }
    }
}
