use crate::peer::types::IceServerConfig;
use rand::Rng;
use url::Url;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefixes an ICE server URL with its scheme when it has none
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    let url = config.url.as_str();
    if ["stun:", "stuns:", "turn:", "turns:"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
    {
        url.to_string()
    } else if config.credential.is_some() {
        // credentials imply a relay
        format!("turn:{}", url)
    } else {
        format!("stun:{}", url)
    }
}

/// Whether the signaling endpoint points at this machine
pub fn is_local_endpoint(endpoint: &str) -> bool {
    let Ok(url) = Url::parse(endpoint) else {
        return false;
    };
    match url.host() {
        Some(url::Host::Domain(host)) => host.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
