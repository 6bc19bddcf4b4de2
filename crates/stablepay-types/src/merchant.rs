//! Merchant settlement policy.
//!
//! Merchants override the module fee rate and settlement bounds for the
//! payments they receive. Records are never deleted, only deactivated.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::{Address, Result, StablepayError, constants};

/// Hostnames (or suffixes) that resolve to internal infrastructure.
const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal"];
const BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".lan"];

/// Per-merchant settlement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantConfig {
    pub address: Address,
    pub name: String,
    /// Overrides the module default fee rate when set.
    pub fee_rate_bps: Option<u32>,
    /// 0 means no merchant-specific minimum.
    pub min_settlement: u128,
    /// 0 means no merchant-specific maximum.
    pub max_settlement: u128,
    pub batch_enabled: bool,
    pub batch_threshold: u32,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
}

impl MerchantConfig {
    /// Validate every policy field.
    ///
    /// # Errors
    /// `InvalidField`, `InvalidFeeRate`, `InvalidWebhookUrl` or
    /// `InvalidAmount` describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        validate_merchant_name(&self.name)?;
        if let Some(bps) = self.fee_rate_bps {
            validate_fee_rate(bps)?;
        }
        if self.max_settlement != 0 && self.min_settlement > self.max_settlement {
            return Err(StablepayError::invalid_amount(format!(
                "merchant min settlement {} exceeds max {}",
                self.min_settlement, self.max_settlement
            )));
        }
        if let Some(url) = &self.webhook_url {
            validate_webhook_url(url)?;
        }
        Ok(())
    }

    /// Apply a patch. Only fields present in `update` change.
    ///
    /// The patch is validated against the merged result before the record
    /// is touched, so a bad patch leaves `self` unchanged.
    ///
    /// # Errors
    /// Any error from [`MerchantConfig::validate`] on the merged record.
    pub fn apply(&mut self, update: &MerchantUpdate) -> Result<()> {
        let mut next = self.clone();
        if let Some(name) = &update.name {
            next.name.clone_from(name);
        }
        if let Some(bps) = update.fee_rate_bps {
            next.fee_rate_bps = bps;
        }
        if let Some(min) = update.min_settlement {
            next.min_settlement = min;
        }
        if let Some(max) = update.max_settlement {
            next.max_settlement = max;
        }
        if let Some(enabled) = update.batch_enabled {
            next.batch_enabled = enabled;
        }
        if let Some(threshold) = update.batch_threshold {
            next.batch_threshold = threshold;
        }
        if let Some(url) = &update.webhook_url {
            next.webhook_url.clone_from(url);
        }
        if let Some(active) = update.is_active {
            next.is_active = active;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// Partial update for a [`MerchantConfig`].
///
/// `None` leaves a field untouched. Nullable fields use a nested `Option`
/// so that `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantUpdate {
    pub name: Option<String>,
    pub fee_rate_bps: Option<Option<u32>>,
    pub min_settlement: Option<u128>,
    pub max_settlement: Option<u128>,
    pub batch_enabled: Option<bool>,
    pub batch_threshold: Option<u32>,
    pub webhook_url: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl MerchantUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// # Errors
/// `InvalidFeeRate` if `bps > 10000`.
pub fn validate_fee_rate(bps: u32) -> Result<()> {
    if u128::from(bps) > constants::BPS_DENOMINATOR {
        return Err(StablepayError::InvalidFeeRate { bps });
    }
    Ok(())
}

fn validate_merchant_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StablepayError::InvalidField {
            field: "name",
            reason: "must not be empty".into(),
        });
    }
    if name.len() > constants::MAX_MERCHANT_NAME_LEN {
        return Err(StablepayError::InvalidField {
            field: "name",
            reason: format!("longer than {} bytes", constants::MAX_MERCHANT_NAME_LEN),
        });
    }
    Ok(())
}

/// Webhooks must be HTTPS and must not point at private, loopback or
/// link-local hosts.
///
/// # Errors
/// Returns [`StablepayError::InvalidWebhookUrl`] describing the rejection.
pub fn validate_webhook_url(raw: &str) -> Result<()> {
    let reject = |reason: &str| StablepayError::InvalidWebhookUrl {
        reason: format!("{raw}: {reason}"),
    };

    if raw.len() > constants::MAX_WEBHOOK_URL_LEN {
        return Err(reject("too long"));
    }
    let url = Url::parse(raw).map_err(|e| reject(&e.to_string()))?;
    if url.scheme() != "https" {
        return Err(reject("scheme must be https"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject("credentials are not allowed"));
    }
    match url.host() {
        None => Err(reject("missing host")),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if BLOCKED_HOSTS.contains(&domain.as_str())
                || BLOCKED_SUFFIXES.iter().any(|s| domain.ends_with(s))
            {
                Err(reject("internal hostname"))
            } else {
                Ok(())
            }
        }
        Some(Host::Ipv4(ip)) if is_blocked_v4(ip) => Err(reject("private network address")),
        Some(Host::Ipv6(ip)) if is_blocked_v6(ip) => Err(reject("private network address")),
        Some(_) => Ok(()),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // carrier-grade NAT 100.64.0.0/10
        || (a == 100 && (64..=127).contains(&b))
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    ip.is_loopback() || ip.is_unspecified() || ip.is_unique_local() || ip.is_unicast_link_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merchant() -> MerchantConfig {
        MerchantConfig {
            address: Address::parse("stable1shop").unwrap(),
            name: "Coffee Shop".into(),
            fee_rate_bps: Some(25),
            min_settlement: 0,
            max_settlement: 0,
            batch_enabled: false,
            batch_threshold: 0,
            webhook_url: Some("https://hooks.shop.example/pay".into()),
            is_active: true,
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn https_public_host_accepted() {
        assert!(validate_webhook_url("https://api.example.com/hook").is_ok());
        assert!(validate_webhook_url("https://8.8.8.8/hook").is_ok());
    }

    #[test]
    fn plain_http_rejected() {
        assert!(validate_webhook_url("http://api.example.com/hook").is_err());
        assert!(validate_webhook_url("ftp://api.example.com").is_err());
        assert!(validate_webhook_url("not a url").is_err());
    }

    #[test]
    fn private_hosts_rejected() {
        for url in [
            "https://localhost/hook",
            "https://127.0.0.1/hook",
            "https://10.1.2.3/hook",
            "https://172.16.0.1/hook",
            "https://192.168.1.1/hook",
            "https://169.254.169.254/latest",
            "https://0.0.0.0/",
            "https://100.64.0.1/",
            "https://[::1]/hook",
            "https://[fd00::1]/hook",
            "https://[fe80::1]/hook",
            "https://[::ffff:10.0.0.1]/hook",
            "https://printer.local/",
            "https://metadata.google.internal/",
        ] {
            assert!(validate_webhook_url(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn credentials_rejected() {
        assert!(validate_webhook_url("https://user:pw@api.example.com/").is_err());
    }

    #[test]
    fn fee_rate_bound() {
        assert!(validate_fee_rate(10_000).is_ok());
        assert_eq!(
            validate_fee_rate(10_001).unwrap_err(),
            StablepayError::InvalidFeeRate { bps: 10_001 }
        );
    }

    #[test]
    fn apply_only_touches_present_fields() {
        let mut m = merchant();
        let update = MerchantUpdate {
            batch_enabled: Some(true),
            batch_threshold: Some(10),
            ..MerchantUpdate::default()
        };
        m.apply(&update).unwrap();
        assert!(m.batch_enabled);
        assert_eq!(m.batch_threshold, 10);
        assert_eq!(m.name, "Coffee Shop");
        assert_eq!(m.fee_rate_bps, Some(25));
        assert!(m.webhook_url.is_some());
    }

    #[test]
    fn apply_can_clear_nullable_fields() {
        let mut m = merchant();
        let update = MerchantUpdate {
            fee_rate_bps: Some(None),
            webhook_url: Some(None),
            ..MerchantUpdate::default()
        };
        m.apply(&update).unwrap();
        assert_eq!(m.fee_rate_bps, None);
        assert_eq!(m.webhook_url, None);
    }

    #[test]
    fn bad_patch_leaves_record_untouched() {
        let mut m = merchant();
        let before = m.clone();
        let update = MerchantUpdate {
            name: Some("Renamed".into()),
            webhook_url: Some(Some("http://insecure.example".into())),
            ..MerchantUpdate::default()
        };
        assert!(m.apply(&update).is_err());
        assert_eq!(m, before);
    }

    #[test]
    fn empty_update() {
        assert!(MerchantUpdate::default().is_empty());
        let update = MerchantUpdate {
            is_active: Some(false),
            ..MerchantUpdate::default()
        };
        assert!(!update.is_empty());
    }
}
