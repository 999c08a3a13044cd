//! HTTP-side rate limiting
//!
//! Keyed GCRA limiter (per client address) guarding share creation. The
//! WebSocket path carries its own per-connection limiter; this one exists so
//! a single publisher cannot mint shares unboundedly.

use axum::http::HeaderMap;
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;

use crate::prelude::*;

type KeyedLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

pub struct RateLimitManager {
	share: KeyedLimiter,
}

impl std::fmt::Debug for RateLimitManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RateLimitManager").finish_non_exhaustive()
	}
}

impl RateLimitManager {
	pub fn new(share_per_minute: u32) -> Self {
		let rate = NonZeroU32::new(share_per_minute).unwrap_or(NonZeroU32::MIN);
		let burst = rate.saturating_add(rate.get() / 2);
		Self { share: RateLimiter::keyed(Quota::per_minute(rate).allow_burst(burst)) }
	}

	/// Check the share-creation quota for one client address.
	pub fn check_share(&self, addr: IpAddr) -> ClResult<()> {
		self.share.check_key(&addr).map_err(|_| {
			warn!("share rate limit hit for {}", addr);
			Error::RateLimited
		})
	}
}

/// Client address for rate limiting, honoring the usual proxy headers.
/// Falls back to loopback when nothing is present (direct local traffic and
/// in-process tests).
pub fn client_addr(headers: &HeaderMap) -> IpAddr {
	let forwarded = headers
		.get("x-forwarded-for")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.split(',').next())
		.and_then(|v| v.trim().parse().ok());
	if let Some(addr) = forwarded {
		return addr;
	}
	headers
		.get("x-real-ip")
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.trim().parse().ok())
		.unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;

	#[test]
	fn test_client_addr_prefers_forwarded_for() {
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
		headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
		assert_eq!(client_addr(&headers), "203.0.113.9".parse::<IpAddr>().unwrap());
	}

	#[test]
	fn test_client_addr_fallbacks() {
		let mut headers = HeaderMap::new();
		headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
		assert_eq!(client_addr(&headers), "198.51.100.2".parse::<IpAddr>().unwrap());
		assert_eq!(client_addr(&HeaderMap::new()), IpAddr::from([127, 0, 0, 1]));
	}

	#[test]
	fn test_share_quota_exhausts() {
		let manager = RateLimitManager::new(2);
		let addr = IpAddr::from([192, 0, 2, 1]);
		let mut denied = false;
		for _ in 0..16 {
			if manager.check_share(addr).is_err() {
				denied = true;
				break;
			}
		}
		assert!(denied, "quota never exhausted");
		// a different address is unaffected
		assert!(manager.check_share(IpAddr::from([192, 0, 2, 2])).is_ok());
	}
}

// vim: ts=4
