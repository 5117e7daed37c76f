//! Client IP extraction from HTTP headers with trust validation
//!
//! - Walks X-Forwarded-For and Forwarded right-to-left, skipping trusted proxies
//! - Supports Cloudflare's CF-Connecting-IP
//! - Falls back to the socket remote address when headers are untrusted
//! - Handles both IPv4 and IPv6

use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the visitor address according to the trust configuration
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            extract_standard_ip(headers, socket_addr, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Prefer RFC 7239 Forwarded, fall back to X-Forwarded-For
fn extract_standard_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> Option<IpAddr> {
    // Forwarding headers are only meaningful when the peer itself is a proxy we trust
    if !config.trusted_proxies.is_empty() && !is_trusted(socket_addr, config) {
        return None;
    }

    let chain = forwarded_chain(headers).or_else(|| x_forwarded_for_chain(headers))?;
    select_from_chain(&chain, config)
}

fn is_trusted(ip: IpAddr, config: &AnalyticsConfig) -> bool {
    config.trusted_proxies.iter().any(|net| net.contains(&ip))
}

/// Pick the client from a hop chain ordered client-first
fn select_from_chain(chain: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if chain.is_empty() {
        return None;
    }

    if let Some(num_trusted) = config.num_trusted_proxies {
        // No trusted hop means nothing in the header can be believed
        if num_trusted == 0 {
            return None;
        }
        // The socket peer is one hop; the header holds the rest
        let skip = num_trusted - 1;
        return if chain.len() > skip {
            Some(chain[chain.len() - skip - 1])
        } else {
            chain.first().copied()
        };
    }

    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(**ip, config))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}

/// Parse `Forwarded: for=192.0.2.60;proto=http, for="[2001:db8::1]:4711"`
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let mut chain = Vec::new();

    for value in headers.get_all("forwarded") {
        let Ok(value) = value.to_str() else { continue };
        for element in value.split(',') {
            for param in element.split(';') {
                let param = param.trim();
                let Some((name, raw)) = param.split_once('=') else { continue };
                if !name.trim().eq_ignore_ascii_case("for") {
                    continue;
                }
                if let Some(ip) = parse_forwarded_node(raw.trim()) {
                    chain.push(ip);
                }
            }
        }
    }

    (!chain.is_empty()).then_some(chain)
}

fn parse_forwarded_node(raw: &str) -> Option<IpAddr> {
    let node = raw.trim_matches('"');

    if let Some(rest) = node.strip_prefix('[') {
        // [v6] or [v6]:port
        let end = rest.find(']')?;
        return rest[..end].parse::<Ipv6Addr>().ok().map(IpAddr::V6);
    }

    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }

    // v4:port
    node.rsplit_once(':')
        .and_then(|(host, _)| host.parse::<Ipv4Addr>().ok())
        .map(IpAddr::V4)
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let chain: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Anonymize an IP address by truncating to network prefix
///
/// - IPv4: Truncate to /24 (zero last octet)
/// - IPv6: Truncate to /48 (zero last 80 bits)
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let octets = addr.octets();
            IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], 0))
        }
        IpAddr::V6(addr) => {
            let segments = addr.segments();
            IpAddr::V6(Ipv6Addr::new(
                segments[0],
                segments[1],
                segments[2],
                0,
                0,
                0,
                0,
                0,
            ))
        }
    }
}
