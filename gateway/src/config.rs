use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use levelone_core::dispatch::{default_models, DEFAULT_DEADLINE};
use levelone_core::runtime::{DEFAULT_MAX_WORKERS, MAX_WORKERS_LIMIT};
use levelone_core::ShapePolicy;

const DEFAULT_BIND: &str = "0.0.0.0:8087";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub deadline: Duration,
    pub max_workers: usize,
    pub shape_policy: ShapePolicy,
    pub schema_registry: Option<PathBuf>,
    pub models: BTreeMap<String, String>,
    pub openai_api_key: String,
    pub openai_api_base: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind = lookup("LEVELONE_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .context("LEVELONE_BIND must be a socket address like 0.0.0.0:8087")?;

        let deadline = match lookup("LEVELONE_DEADLINE_SECS") {
            Some(raw) => Duration::from_secs(positive(&raw).context("LEVELONE_DEADLINE_SECS")?),
            None => DEFAULT_DEADLINE,
        };

        let max_workers = match lookup("LEVELONE_MAX_WORKERS") {
            Some(raw) => {
                let value = positive(&raw).context("LEVELONE_MAX_WORKERS")?;
                match usize::try_from(value) {
                    Ok(value) if value <= MAX_WORKERS_LIMIT => value,
                    _ => bail!("LEVELONE_MAX_WORKERS must be at most {MAX_WORKERS_LIMIT}, got {value}"),
                }
            }
            None => DEFAULT_MAX_WORKERS,
        };

        let shape_policy = match lookup("LEVELONE_SHAPE_POLICY") {
            Some(raw) => raw.parse::<ShapePolicy>().map_err(anyhow::Error::msg)?,
            None => ShapePolicy::default(),
        };

        let models = match lookup("LEVELONE_MODELS") {
            Some(raw) => parse_models(&raw).context("LEVELONE_MODELS")?,
            None => default_models(),
        };

        let openai_api_key = lookup("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;

        Ok(Self {
            bind,
            deadline,
            max_workers,
            shape_policy,
            schema_registry: lookup("LEVELONE_SCHEMA_REGISTRY").map(PathBuf::from),
            models,
            openai_api_key,
            openai_api_base: lookup("OPENAI_BASE_URL"),
        })
    }
}

fn positive(raw: &str) -> Result<u64> {
    let value: u64 = raw.trim().parse().with_context(|| format!("'{raw}' is not a number"))?;
    if value == 0 {
        bail!("must be greater than zero");
    }
    Ok(value)
}

// alias=model,alias=model
fn parse_models(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut models = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((alias, model)) = entry.split_once('=') else {
            bail!("entry '{entry}' is not alias=model");
        };
        let (alias, model) = (alias.trim(), model.trim());
        if alias.is_empty() || model.is_empty() {
            bail!("entry '{entry}' has an empty side");
        }
        models.insert(alias.to_string(), model.to_string());
    }
    if models.is_empty() {
        bail!("no models configured");
    }
    Ok(models)
}
