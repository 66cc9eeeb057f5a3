//! Shared fixtures for the rotation integration tests.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;

use lbcert_common::{CertificateName, ListenerConfig, ListenerState, LoadBalancerSnapshot};
use lbcert_config::RotationConfig;

pub const LB: &str = "ocid1.loadbalancer.oc1..test";
pub const NAMESPACE: &str = "certs-ns";
pub const BUCKET: &str = "certbot";
pub const PREFIX: &str = "letsencrypt";
pub const DOMAIN: &str = "example.com";

/// A self-signed certificate for `domain` expiring on the given day, with its key
pub fn mint(domain: &str, year: i32, month: u8, day: u8) -> (String, String) {
    let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.not_after = rcgen::date_time_ymd(year, month, day);
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Builds certbot-style tar.gz bundles
#[derive(Default)]
pub struct BundleBuilder {
    entries: Vec<(String, Option<String>, Option<String>)>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.entries
            .push((path.to_string(), Some(content.to_string()), None));
        self
    }

    pub fn link(mut self, path: &str, target: &str) -> Self {
        self.entries
            .push((path.to_string(), None, Some(target.to_string())));
        self
    }

    /// One archived version of `domain` with live links pointing at it
    pub fn version(self, domain: &str, n: u32, chain: &str, key: &str) -> Self {
        self.file(
            &format!("etc/letsencrypt/archive/{}/fullchain{}.pem", domain, n),
            chain,
        )
        .file(
            &format!("etc/letsencrypt/archive/{}/privkey{}.pem", domain, n),
            key,
        )
    }

    pub fn live(self, domain: &str, n: u32) -> Self {
        self.link(
            &format!("etc/letsencrypt/live/{}/fullchain.pem", domain),
            &format!("../../archive/{}/fullchain{}.pem", domain, n),
        )
        .link(
            &format!("etc/letsencrypt/live/{}/privkey.pem", domain),
            &format!("../../archive/{}/privkey{}.pem", domain, n),
        )
    }

    pub fn build(self) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content, target) in self.entries {
            let mut header = tar::Header::new_gnu();
            match (content, target) {
                (Some(content), _) => {
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder
                        .append_data(&mut header, &path, content.as_bytes())
                        .unwrap();
                }
                (None, Some(target)) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    builder.append_link(&mut header, &path, &target).unwrap();
                }
                (None, None) => unreachable!(),
            }
        }
        builder.into_inner().unwrap().finish().unwrap()
    }
}

pub fn config() -> RotationConfig {
    let mut config = RotationConfig::new(LB, NAMESPACE, BUCKET, PREFIX, DOMAIN);
    config.poll_interval_secs = 1;
    config.max_poll_attempts = 10;
    config
}

pub fn object_name() -> String {
    format!("{}-{}.tar.gz", PREFIX, DOMAIN)
}

pub fn listener(name: &str, port: u16, certificate: Option<&str>) -> ListenerState {
    let ssl = match certificate {
        Some(cert) => json!({
            "certificateName": cert,
            "verifyDepth": 5,
            "verifyPeerCertificate": false,
            "protocols": ["TLSv1.2", "TLSv1.3"],
        }),
        None => serde_json::Value::Null,
    };
    let config: ListenerConfig = serde_json::from_value(json!({
        "defaultBackendSetName": "web",
        "port": port,
        "protocol": "HTTP",
        "hostnameNames": [],
        "sslConfiguration": ssl,
    }))
    .unwrap();
    ListenerState::new(name, config)
}

/// Three TLS listeners on the old certificate and one plain HTTP listener
pub fn snapshot(installed: &[&str]) -> LoadBalancerSnapshot {
    LoadBalancerSnapshot {
        certificates: installed.iter().copied().map(CertificateName::from).collect(),
        listeners: vec![
            listener("https", 443, Some("cert_example.com_20291015")),
            listener("http", 80, None),
            listener("api", 8443, Some("cert_example.com_20291015")),
            listener("admin", 9443, Some("cert_example.com_20291015")),
        ],
    }
}
