//! `proxygen dump`

use super::Options;

pub fn execute(options: &Options, template: &str) -> anyhow::Result<()> {
    let runtime = options.runtime()?;
    print!("{}", runtime.disassemble(template)?);
    Ok(())
}
