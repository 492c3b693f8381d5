use nw_domain::config::Config;

/// Print every problem found.  Returns false when there was at least one.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let problems = config.validate();

    if problems.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    for problem in &problems {
        println!("error: {problem}");
    }
    println!("\n{} problem(s) in {config_path}", problems.len());
    false
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}
