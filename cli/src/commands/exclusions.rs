use uwalker_common::network::exclusion::ExclusionSet;

use crate::terminal::print;

pub fn exclusions() -> anyhow::Result<()> {
    let set = ExclusionSet::reserved()?;
    for block in set.blocks() {
        print::print_status(block.to_string());
    }
    print::aligned_line("Blocks", set.len());
    Ok(())
}
