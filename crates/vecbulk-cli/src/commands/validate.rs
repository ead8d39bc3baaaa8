//! Validate command implementation.

use anyhow::Result;
use vecbulk_core::Config;

/// Check the configuration and print the schema it declares.
pub fn run(config: &Config) -> Result<()> {
    config.validate()?;
    let schema = config.schema.build()?;

    println!("Configuration is valid");
    println!(
        "Schema: {} fields, primary key {}, dynamic field {}",
        schema.fields().len(),
        schema.primary_key().name,
        if schema.enable_dynamic_field() { "enabled" } else { "disabled" }
    );
    for field in schema.fields() {
        println!("  {:<24} {}", field.name, field.data_type);
    }
    match &config.remote {
        Some(remote) => println!("Remote stage: {} ({})", remote.stage_name, remote.endpoint),
        None => println!("Remote stage: none (local output)"),
    }
    Ok(())
}
