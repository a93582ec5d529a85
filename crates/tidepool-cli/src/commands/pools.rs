use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use tidepool_scheduler::RequestContext;

use super::{load_backends, load_config};

/// Parse repeated `key=regex` arguments.
pub fn parse_filters(filters: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    filters
        .iter()
        .map(|f| {
            let (key, pattern) = f
                .split_once('=')
                .with_context(|| format!("filter {f:?} is not key=regex"))?;
            Ok((key.trim().to_string(), pattern.to_string()))
        })
        .collect()
}

pub fn run(config: Option<&Path>, backends: &Path, filters: &[String]) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let filters = parse_filters(filters)?;
    let (_store, manager) = load_backends(&config, backends)?;
    let pools = manager.get_pools(&RequestContext::default(), &config.topic, &filters)?;
    println!("{}", serde_json::to_string_pretty(&pools)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_regex_pairs() {
        let filters = parse_filters(&["backend=lvm".into(), "pool=vg[0-9]=x".into()]).unwrap();
        assert_eq!(filters["backend"], "lvm");
        assert_eq!(filters["pool"], "vg[0-9]=x");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(parse_filters(&["backend".into()]).is_err());
    }
}
