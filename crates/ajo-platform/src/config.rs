use ajo_core::StandardRiskPolicy;
use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub risk_policy: StandardRiskPolicy,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let risk_policy = risk_policy_from_env()?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            risk_policy,
        })
    }
}

fn risk_policy_from_env() -> Result<StandardRiskPolicy> {
    let defaults = StandardRiskPolicy::default();
    let high_pct = pct_var("AJO_RISK_HIGH_PCT", defaults.high_pct)?;
    let medium_pct = pct_var("AJO_RISK_MEDIUM_PCT", defaults.medium_pct)?;
    build_risk_policy(high_pct, medium_pct)
}

fn pct_var(name: &str, default: f64) -> Result<f64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{name} must be a number, found {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn build_risk_policy(high_pct: f64, medium_pct: f64) -> Result<StandardRiskPolicy> {
    if !(0.0..=100.0).contains(&medium_pct) || !(0.0..=100.0).contains(&high_pct) {
        anyhow::bail!("risk thresholds must be percentages between 0 and 100");
    }
    if medium_pct > high_pct {
        anyhow::bail!("AJO_RISK_MEDIUM_PCT must not exceed AJO_RISK_HIGH_PCT");
    }
    Ok(StandardRiskPolicy {
        high_pct,
        medium_pct,
    })
}
