//! Kernel-level UDP receive drops
//!
//! Linux exposes a per-socket drop counter in `/proc/net/udp` and
//! `/proc/net/udp6` (last column). The ingest socket is located by inode,
//! or by local port if the inode cannot be resolved. Other platforms report 0.

/// How to find the ingest socket in the proc tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMatch {
    /// Socket inode (exact)
    Inode(u64),
    /// Local port (any socket bound to it)
    Port(u16),
}

/// Reads cumulative kernel drops for one UDP socket
#[derive(Debug, Clone)]
pub struct UdpDropCounter {
    target: Option<SocketMatch>,
}

impl UdpDropCounter {
    /// Counter for a bound tokio socket
    pub fn for_socket(socket: &tokio::net::UdpSocket) -> Self {
        let target = socket_inode(socket)
            .map(SocketMatch::Inode)
            .or_else(|| socket.local_addr().ok().map(|a| SocketMatch::Port(a.port())));

        Self { target }
    }

    /// Counter matching a fixed target
    pub fn with_target(target: SocketMatch) -> Self {
        Self {
            target: Some(target),
        }
    }

    /// Counter that always reports 0
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Current cumulative drop count
    pub async fn read(&self) -> u64 {
        let Some(target) = self.target else {
            return 0;
        };
        if !cfg!(target_os = "linux") {
            return 0;
        }

        let mut total = 0;
        for path in ["/proc/net/udp", "/proc/net/udp6"] {
            if let Ok(contents) = tokio::fs::read_to_string(path).await {
                total += parse_proc_net_udp(&contents, target);
            }
        }
        total
    }
}

/// Sum the drop column of every table row matching `target`
pub fn parse_proc_net_udp(contents: &str, target: SocketMatch) -> u64 {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 13 {
                return None;
            }

            let matches = match target {
                SocketMatch::Inode(inode) => fields[9].parse::<u64>().ok() == Some(inode),
                SocketMatch::Port(port) => fields[1]
                    .rsplit_once(':')
                    .and_then(|(_, hex)| u16::from_str_radix(hex, 16).ok())
                    == Some(port),
            };

            if matches {
                fields.last().and_then(|drops| drops.parse::<u64>().ok())
            } else {
                None
            }
        })
        .sum()
}

#[cfg(target_os = "linux")]
fn socket_inode(socket: &tokio::net::UdpSocket) -> Option<u64> {
    use std::os::fd::AsRawFd;

    // Link target looks like "socket:[12345]"
    let link = std::fs::read_link(format!("/proc/self/fd/{}", socket.as_raw_fd())).ok()?;
    let link = link.to_str()?;
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

#[cfg(not(target_os = "linux"))]
fn socket_inode(_socket: &tokio::net::UdpSocket) -> Option<u64> {
    None
}
