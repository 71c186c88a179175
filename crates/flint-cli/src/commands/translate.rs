//! Translate command - print what a file turns into before indexing.

use crate::app::App;
use anyhow::{bail, Context};
use flint_core::{Config, LocalFileContent, MemoryIndex};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// Run the translate command.
pub fn run(config: Config, file: &Path, params: &[String]) -> anyhow::Result<()> {
    let parameters = parse_params(params)?;
    if !file.is_file() {
        bail!("{} is not a file", file.display());
    }

    let app = App::new(config)?;
    let index = MemoryIndex::new("translate", app.manager.open_indexes().clone());
    let content = LocalFileContent::new(file, None);

    let result = app
        .manager
        .translate_content(index.as_ref(), &content, &parameters)
        .with_context(|| format!("Failed to translate {}", file.display()));
    app.manager.stop();

    match result? {
        Some(bytes) if !bytes.is_empty() => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
        _ => eprintln!("Nothing to index for {}", file.display()),
    }
    Ok(())
}

/// Parse `name=value` pairs.
fn parse_params(params: &[String]) -> anyhow::Result<HashMap<String, String>> {
    params
        .iter()
        .map(|param| match param.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
            _ => bail!("Invalid parameter '{}', expected name=value", param),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let params = parse_params(&["lang=en".to_string(), "title=a=b".to_string()]).unwrap();
        assert_eq!(params["lang"], "en");
        assert_eq!(params["title"], "a=b");

        assert!(parse_params(&["novalue".to_string()]).is_err());
        assert!(parse_params(&["=x".to_string()]).is_err());
    }
}
