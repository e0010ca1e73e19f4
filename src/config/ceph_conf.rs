//! Cluster Configuration Document
//!
//! `ceph.conf` is held as ordered sections of key/value pairs, merged in memory
//! and written in one go. Keys are normalized the way Ceph reads them
//! (`mon_host` and `mon host` are the same option), so merging never
//! duplicates a section or an option.

use crate::domain::model::{ClusterConfig, Consumer, CredentialRef, GatewayTopology};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::path::Path;
use tracing::debug;

type Section = IndexMap<String, String>;

/// Sectioned key/value configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CephConf {
    sections: IndexMap<String, Section>,
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl CephConf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an option
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) -> &mut Self {
        self.sections
            .entry(section.trim().to_string())
            .or_default()
            .insert(normalize_key(key), value.into());
        self
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(&normalize_key(key)))
            .map(String::as_str)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Overlay `other` on top of `self`; options in `other` win
    pub fn merge(&mut self, other: &CephConf) {
        for (name, options) in &other.sections {
            let section = self.sections.entry(name.clone()).or_default();
            for (key, value) in options {
                section.insert(key.clone(), value.clone());
            }
        }
    }

    /// Parse an existing file. Comments start with `#` or `;`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut conf = CephConf::new();
        let mut current: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| {
                    Error::Configuration(format!("line {}: unterminated section header", lineno + 1))
                })?;
                let name = name.trim().to_string();
                conf.sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Configuration(format!("line {}: expected key = value", lineno + 1))
            })?;
            let section = current.as_deref().ok_or_else(|| {
                Error::Configuration(format!("line {}: option outside of a section", lineno + 1))
            })?;
            conf.set(section, key, value.trim());
        }

        Ok(conf)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, (name, options)) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push_str(&format!("[{}]\n", name));
            for (key, value) in options {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
        out
    }

    /// Load a file if it exists
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(Self::parse(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge with whatever is on disk and write the result once
    pub async fn merge_into_file(&self, path: &Path) -> Result<CephConf> {
        let mut merged = Self::load(path).await?.unwrap_or_default();
        merged.merge(self);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, merged.render()).await?;
        debug!("Wrote {} ({} sections)", path.display(), merged.sections.len());

        Ok(merged)
    }

    /// Build the configuration for an embedded cluster
    pub fn for_cluster(config: &ClusterConfig) -> Self {
        let mut conf = CephConf::new();
        let host = &config.hostname;

        conf.set("global", "fsid", config.fsid.to_string())
            .set("global", "mon initial members", host.as_str())
            .set("global", "mon host", config.host_ip.as_str())
            .set("global", "auth cluster required", "cephx")
            .set("global", "auth service required", "cephx")
            .set("global", "auth client required", "cephx")
            .set("global", "filestore xattr use omap", "true")
            .set("global", "osd crush chooseleaf type", "0")
            .set("global", "osd journal size", "100")
            .set("global", "osd pool default size", config.replicas.to_string());

        if let Some(binding) = config
            .binding(Consumer::SharedFilesystem)
            .filter(|b| b.enabled)
        {
            let section = binding.credential.entity().to_string();
            if let CredentialRef::Owned(cred) = &binding.credential {
                conf.set(&section, "keyring", cred.keyring.display().to_string());
            }
            conf.set(&section, "client mount uid", "0")
                .set(&section, "client mount gid", "0")
                .set(&section, "log file", format!("/var/log/ceph/ceph-{}.log", section))
                .set(&section, "admin socket", "/var/run/ceph/ceph-$name.$pid.asok");
        }

        if config.runs_local_gateway() {
            if let (
                GatewayTopology::Embedded { port },
                Some(binding),
            ) = (&config.gateway, config.binding(Consumer::ObjectGateway))
            {
                let section = binding.credential.entity().to_string();
                let name = section.trim_start_matches("client.");
                if let CredentialRef::Owned(cred) = &binding.credential {
                    conf.set(&section, "keyring", cred.keyring.display().to_string());
                }
                conf.set(&section, "host", host.as_str())
                    .set(&section, "log file", format!("/var/log/ceph/{}.log", name))
                    .set(&section, "rgw socket path", format!("/tmp/{}.sock", name))
                    .set(&section, "rgw frontends", format!("civetweb port={}", port))
                    .set(&section, "rgw keystone url", config.identity.auth_uri.as_str())
                    .set(
                        &section,
                        "rgw keystone admin token",
                        config.identity.admin_token.as_str(),
                    )
                    .set(&section, "rgw keystone accepted roles", "Member, _member_, admin")
                    .set(&section, "rgw s3 auth use keystone", "true")
                    .set(
                        &section,
                        "nss db path",
                        config.data_dir.join("nss").display().to_string(),
                    );
            }
        }

        conf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploySettings;
    use uuid::Uuid;

    #[test]
    fn test_keys_are_normalized() {
        let mut conf = CephConf::new();
        conf.set("global", "mon_host", "10.0.0.1");
        conf.set("global", "mon host", "10.0.0.2");
        assert_eq!(conf.get("global", "MON_HOST"), Some("10.0.0.2"));
        assert_eq!(conf.render(), "[global]\nmon host = 10.0.0.2\n");
    }

    #[test]
    fn test_parse_and_render() {
        let text = "# generated\n[global]\nfsid = abc\nmon_host=10.0.0.1\n\n[client.manila]\n; comment\nclient mount uid = 0\n";
        let conf = CephConf::parse(text).unwrap();
        assert_eq!(conf.get("global", "mon host"), Some("10.0.0.1"));
        assert_eq!(conf.get("client.manila", "client_mount_uid"), Some("0"));

        let reparsed = CephConf::parse(&conf.render()).unwrap();
        assert_eq!(reparsed, conf);
    }

    #[test]
    fn test_parse_rejects_orphan_option() {
        assert!(CephConf::parse("fsid = abc\n").is_err());
        assert!(CephConf::parse("[global\n").is_err());
    }

    #[test]
    fn test_merge_never_duplicates_sections() {
        let mut base = CephConf::parse("[global]\nfsid = abc\n[client.manila]\nclient mount uid = 0\n").unwrap();
        let mut overlay = CephConf::new();
        overlay.set("client.manila", "client mount uid", "0");
        overlay.set("client.manila", "client mount gid", "0");

        base.merge(&overlay);
        base.merge(&overlay);

        assert_eq!(base.section_names().count(), 2);
        assert_eq!(base.render().matches("[client.manila]").count(), 1);
        assert_eq!(base.get("client.manila", "client mount gid"), Some("0"));
    }

    #[tokio::test]
    async fn test_merge_into_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ceph.conf");

        let mut conf = CephConf::new();
        conf.set("global", "fsid", "abc");
        conf.merge_into_file(&path).await.unwrap();
        conf.merge_into_file(&path).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written.matches("[global]").count(), 1);
        assert_eq!(written.matches("fsid").count(), 1);
    }

    #[test]
    fn test_cluster_sections() {
        let settings = DeploySettings {
            hostname: "node1".to_string(),
            replicas: 2,
            enable_manila: true,
            enable_rgw: true,
            ..Default::default()
        };
        let config = ClusterConfig::resolve(&settings, Uuid::nil()).unwrap();
        let conf = CephConf::for_cluster(&config);

        assert_eq!(conf.get("global", "fsid"), Some(Uuid::nil().to_string().as_str()));
        assert_eq!(conf.get("global", "mon initial members"), Some("node1"));
        assert_eq!(conf.get("global", "auth client required"), Some("cephx"));
        assert_eq!(conf.get("global", "osd pool default size"), Some("2"));
        assert!(conf.has_section("client.manila"));
        assert_eq!(
            conf.get("client.radosgw.node1", "rgw frontends"),
            Some("civetweb port=8080")
        );
        assert_eq!(
            conf.get("client.radosgw.node1", "rgw keystone accepted roles"),
            Some("Member, _member_, admin")
        );
    }

    #[test]
    fn test_no_gateway_section_for_remote_gateway() {
        let settings = DeploySettings {
            enable_rgw: true,
            remote_rgw: true,
            remote_rgw_url: Some("http://rgw:8080/swift/v1".to_string()),
            ..Default::default()
        };
        let config = ClusterConfig::resolve(&settings, Uuid::nil()).unwrap();
        let conf = CephConf::for_cluster(&config);
        assert_eq!(conf.section_names().collect::<Vec<_>>(), vec!["global"]);
    }
}
