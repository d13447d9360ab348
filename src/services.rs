//! Service names for well-known ports.
//!
//! A compiled-in lookup table used purely for display; no network cost and
//! no per-run state.

use crate::types::Port;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Well-known TCP ports and the services usually behind them.
const KNOWN_SERVICES: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "domain"),
    (80, "http"),
    (88, "kerberos"),
    (110, "pop3"),
    (111, "rpcbind"),
    (135, "msrpc"),
    (139, "netbios-ssn"),
    (143, "imap"),
    (179, "bgp"),
    (389, "ldap"),
    (443, "https"),
    (445, "microsoft-ds"),
    (465, "smtps"),
    (514, "syslog"),
    (587, "submission"),
    (631, "ipp"),
    (636, "ldaps"),
    (853, "domain-s"),
    (873, "rsync"),
    (993, "imaps"),
    (995, "pop3s"),
    (1080, "socks"),
    (1433, "ms-sql-s"),
    (1521, "oracle"),
    (1723, "pptp"),
    (1883, "mqtt"),
    (2049, "nfs"),
    (2181, "zookeeper"),
    (2375, "docker"),
    (3000, "grafana"),
    (3128, "squid"),
    (3306, "mysql"),
    (3389, "ms-wbt-server"),
    (4369, "epmd"),
    (5000, "upnp"),
    (5432, "postgresql"),
    (5672, "amqp"),
    (5900, "vnc"),
    (5901, "vnc-1"),
    (6379, "redis"),
    (6443, "kubernetes"),
    (7001, "weblogic"),
    (8000, "http-alt"),
    (8080, "http-proxy"),
    (8081, "http-alt"),
    (8082, "http-alt"),
    (8443, "https-alt"),
    (8530, "wsus"),
    (8888, "http-alt"),
    (9000, "cslistener"),
    (9090, "prometheus"),
    (9092, "kafka"),
    (9200, "elasticsearch"),
    (9418, "git"),
    (11211, "memcached"),
    (15672, "rabbitmq-mgmt"),
    (25565, "minecraft"),
    (27017, "mongodb"),
    (27018, "mongodb"),
    (27019, "mongodb"),
];

static SERVICE_MAP: LazyLock<HashMap<u16, &'static str>> =
    LazyLock::new(|| KNOWN_SERVICES.iter().copied().collect());

/// Look up the probable service name for a port.
pub fn service_name(port: Port) -> Option<&'static str> {
    SERVICE_MAP.get(&port.as_u16()).copied()
}

/// Display label for a port: `443/https`, or just `4444` when unknown.
pub fn port_label(port: Port) -> String {
    match service_name(port) {
        Some(name) => format!("{port}/{name}"),
        None => port.to_string(),
    }
}
