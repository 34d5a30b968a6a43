//! `proxygen templates`

use super::Options;

pub fn execute(options: &Options) -> anyhow::Result<()> {
    let runtime = options.runtime()?;
    let mut ids = runtime.templates().ids();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    for id in ids {
        let Some(template) = runtime.templates().get(&id) else {
            continue;
        };
        println!("{} -> {}", id, template.target_names().join(" | "));
        for method in template.methods() {
            println!("    {}", method);
        }
    }
    Ok(())
}
