//! `proxygen targets`

use proxygen_bytecode::FormatVersion;

use super::Options;

pub fn execute(options: &Options) -> anyhow::Result<()> {
    let runtime = options.runtime()?;
    let selection = runtime.selection()?;
    let host_max = options.host_max()?;

    println!("Host maximum: {}", host_max);
    println!("Selected:     {}", selection);
    println!();
    println!("Formats:");
    for version in [FormatVersion::V1, FormatVersion::V2, FormatVersion::V3] {
        let marker = if version == selection.format { "*" } else { " " };
        let note = if version > host_max { " (not loadable by host)" } else { "" };
        println!(
            " {} {}  up to {}{}",
            marker,
            version,
            version.max_feature_level(),
            note
        );
    }
    Ok(())
}
