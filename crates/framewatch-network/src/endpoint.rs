//! 엔드포인트 우선순위.
//!
//! 같은 네트워크에 있을 가능성이 높은 주소(사설 대역, 루프백, 링크 로컬, mDNS 이름)를
//! 공인 주소보다 먼저 시도한다. 휴리스틱일 뿐이며 실제 도달 여부는 프로브로 판단한다.

use framewatch_core::config::WebDavServer;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// 로컬 네트워크로 보이는 엔드포인트인지 여부
pub fn is_local_endpoint(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    match parsed.host() {
        Some(Host::Ipv4(ip)) => is_local_v4(ip),
        Some(Host::Ipv6(ip)) => is_local_v6(ip),
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".local") || domain.ends_with(".lan")
        }
        None => false,
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7 고유 로컬, fe80::/10 링크 로컬
    ip.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// 로컬 엔드포인트를 앞으로 (각 그룹 내 원래 순서 유지)
pub fn order_endpoints(servers: &[WebDavServer]) -> Vec<WebDavServer> {
    let (mut local, public): (Vec<_>, Vec<_>) = servers
        .iter()
        .cloned()
        .partition(|server| is_local_endpoint(&server.url));
    local.extend(public);
    local
}
