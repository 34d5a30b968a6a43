//! `proxygen mappings`

use super::Options;

pub fn execute(options: &Options, template: &str, json: bool) -> anyhow::Result<()> {
    let runtime = options.runtime()?;
    let mappings = runtime.mappings(template)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&mappings)?);
        return Ok(());
    }

    let width = mappings.iter().map(|m| m.method.len()).max().unwrap_or(0);
    for m in &mappings {
        let slot = m.slot.as_deref().map(|s| format!(" [{}]", s)).unwrap_or_default();
        println!(
            "{:<width$}  {:<11} {:<6} {}{}",
            m.method,
            m.kind,
            m.dispatch,
            m.member,
            slot,
            width = width
        );
    }
    Ok(())
}
