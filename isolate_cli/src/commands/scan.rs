use std::path::Path;
use std::sync::Arc;

use isolate_core::{IsolateConfig, Resolver};
use isolate_runtime::{Bundle, HostNamespace, Isolate, MemorySink};
use serde::Serialize;

use crate::error::CliError;

/// How one name resolves on each side.
#[derive(Debug, Serialize)]
pub struct ScanRow {
    pub name: String,
    pub host: String,
    pub domain: String,
    pub private: bool,
}

/// Resolve every resource under `dir` in the host and in a fresh domain.
pub fn scan(config: &IsolateConfig, dir: &Path, owned: Vec<String>, exclude: Vec<String>) -> Result<Vec<ScanRow>, CliError> {
    let location = format!("file:{}/", dir.display());
    let bundle = Bundle::from_dir(location, dir)?;
    let names: Vec<String> = bundle.names().map(str::to_string).collect();

    let host = Arc::new(HostNamespace::new().with_bundle(bundle));
    let mut builder = Isolate::builder("scan")
        .config(config.clone())
        .owned_prefixes(owned)
        .host(host.clone())
        .sink(Arc::new(MemorySink::new()));
    for name in exclude {
        builder = builder.exclude(name);
    }
    let isolate = builder.build()?;

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let in_host = host.resolve(&name)?;
        let in_domain = isolate.resolve(&name)?;
        rows.push(ScanRow {
            host: in_host.to_string(),
            domain: in_domain.to_string(),
            private: !in_domain.same_definition(&in_host),
            name,
        });
    }
    isolate.stop()?;
    Ok(rows)
}

pub fn execute(config: &IsolateConfig, dir: &Path, owned: Vec<String>, exclude: Vec<String>) -> Result<(), CliError> {
    let rows = scan(config, dir, owned, exclude)?;
    if rows.is_empty() {
        println!("No resources under {}", dir.display());
        return Ok(());
    }
    for row in &rows {
        let marker = if row.private { "private" } else { "shared" };
        println!("{:<8} {:<40} {}", marker, row.name, row.domain);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_marks_owned_names_private() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("acme/model")).unwrap();
        fs::write(dir.path().join("acme/model/Order.def"), b"order").unwrap();
        fs::write(dir.path().join("acme/model/Invoice.def"), b"invoice").unwrap();
        fs::write(dir.path().join("Banner.txt"), b"banner").unwrap();

        let rows = scan(
            &IsolateConfig::default(),
            dir.path(),
            vec!["acme::".to_string()],
            vec!["acme::model::Invoice".to_string()],
        )
        .unwrap();

        let private: Vec<&str> = rows.iter().filter(|r| r.private).map(|r| r.name.as_str()).collect();
        assert_eq!(private, vec!["acme::model::Order"]);
        assert_eq!(rows.len(), 3);
        let order = rows.iter().find(|r| r.name == "acme::model::Order").unwrap();
        assert!(order.domain.ends_with("(domain scan)"));
        assert!(order.host.ends_with("(host)"));
    }

    #[test]
    fn test_scan_missing_dir() {
        let dir = tempdir().unwrap();
        let err = scan(&IsolateConfig::default(), &dir.path().join("absent"), Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::Isolate(_)));
    }
}
