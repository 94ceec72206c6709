use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio::task::JoinError;
use tracing::warn;

const OS_RELEASE_PATH: &str = "/etc/os-release";
const SYS_BLOCK_PATH: &str = "/sys/block";
const PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";
const UNKNOWN_DISTRO: &str = "Unknown Linux Distribution";
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Serialize)]
pub struct HostFacts {
    pub os_type: String,
    pub platform: String,
    pub kernel_version: Option<String>,
    pub distro: String,
    pub cpu_models: Vec<String>,
    pub total_ram_gb: f64,
    pub disk_partitions: Vec<DiskPartition>,
    pub storage_blocks: Vec<StorageBlock>,
    pub internal_ips: Vec<String>,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskPartition {
    pub name: String,
    pub mount: String,
    pub filesystem: String,
    pub size_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub use_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageBlock {
    pub device: String,
    #[serde(rename = "type")]
    pub kind: StorageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageKind {
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "HDD")]
    Hdd,
}

#[derive(Debug, Deserialize)]
struct PublicIpResponse {
    ip: String,
}

/// Static facts about the host. Nothing here is cached; every call re-reads.
/// The sysinfo scan walks every process and disk, so it runs on the blocking
/// pool; the error only surfaces if that scan panicked.
pub async fn describe_host(client: &Client) -> Result<HostFacts, JoinError> {
    let mut facts = tokio::task::spawn_blocking(local_facts).await?;
    facts.public_ip = fetch_public_ip(client).await;
    Ok(facts)
}

fn local_facts() -> HostFacts {
    let system = System::new_all();

    let os_type = system
        .name()
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    let distro = read_distro().unwrap_or_else(|| os_type.clone());

    HostFacts {
        platform: std::env::consts::ARCH.to_string(),
        kernel_version: system.kernel_version(),
        distro,
        os_type,
        cpu_models: system
            .cpus()
            .iter()
            .map(|c| c.brand().trim().to_string())
            .collect(),
        total_ram_gb: round2(system.total_memory() as f64 / GIB),
        disk_partitions: system
            .disks()
            .iter()
            .map(|d| {
                let total = d.total_space();
                let available = d.available_space();
                let used = total.saturating_sub(available);
                DiskPartition {
                    name: d.name().to_string_lossy().to_string(),
                    mount: d.mount_point().to_string_lossy().to_string(),
                    filesystem: String::from_utf8_lossy(d.file_system()).to_string(),
                    size_gb: round2(total as f64 / GIB),
                    used_gb: round2(used as f64 / GIB),
                    available_gb: round2(available as f64 / GIB),
                    use_percent: if total > 0 {
                        round2(used as f64 / total as f64 * 100.0)
                    } else {
                        0.0
                    },
                }
            })
            .collect(),
        storage_blocks: read_storage_blocks(),
        internal_ips: internal_ipv4_addrs(),
        public_ip: None,
    }
}

fn read_distro() -> Option<String> {
    match fs::read_to_string(OS_RELEASE_PATH) {
        Ok(text) => Some(parse_pretty_name(&text).unwrap_or_else(|| UNKNOWN_DISTRO.to_string())),
        Err(err) => {
            warn!(error = %err, path = OS_RELEASE_PATH, "cannot read os-release");
            None
        }
    }
}

pub fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|v| !v.is_empty())
}

fn read_storage_blocks() -> Vec<StorageBlock> {
    let Ok(entries) = fs::read_dir(SYS_BLOCK_PATH) else {
        return Vec::new();
    };

    let mut blocks: Vec<StorageBlock> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let device = entry.file_name().to_string_lossy().to_string();
            let rotational = fs::read_to_string(entry.path().join("queue/rotational")).ok()?;
            Some(StorageBlock {
                device,
                kind: storage_kind(&rotational),
            })
        })
        .collect();
    blocks.sort_by(|a, b| a.device.cmp(&b.device));
    blocks
}

pub fn storage_kind(rotational: &str) -> StorageKind {
    if rotational.trim() == "1" {
        StorageKind::Hdd
    } else {
        StorageKind::Ssd
    }
}

fn internal_ipv4_addrs() -> Vec<String> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|i| !i.is_loopback())
            .filter_map(|i| match i.ip() {
                IpAddr::V4(v4) => Some(v4.to_string()),
                IpAddr::V6(_) => None,
            })
            .collect(),
        Err(err) => {
            warn!(error = %err, "cannot list interfaces");
            Vec::new()
        }
    }
}

async fn fetch_public_ip(client: &Client) -> Option<String> {
    let resp = client
        .get(PUBLIC_IP_URL)
        .timeout(Duration::from_secs(6))
        .send()
        .await
        .and_then(|r| r.error_for_status());
    match resp {
        Ok(resp) => match resp.json::<PublicIpResponse>().await {
            Ok(body) => Some(body.ip),
            Err(err) => {
                warn!(error = %err, "unexpected public IP response");
                None
            }
        },
        Err(err) => {
            warn!(error = %err, "public IP lookup failed");
            None
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
