//! Order command - print the resolved build order

use convenient_rootfs::{BuildOrder, Catalog, CatalogLoader};
use std::path::Path;

/// Print the build order of the catalog in `configs`.
pub fn execute(configs: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = CatalogLoader::new().load(configs)?;
    let order = BuildOrder::resolve(&catalog)?;

    for line in render(&catalog, &order) {
        println!("{line}");
    }
    Ok(())
}

/// One numbered line per package, host tools marked.
fn render(catalog: &Catalog, order: &BuildOrder) -> Vec<String> {
    order
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let desc = catalog.get(name)?;
            Some(if desc.is_host_tool() {
                format!("{:>4}. {} (host)", i + 1, desc.name)
            } else {
                format!("{:>4}. {} {}", i + 1, desc.name, desc.version)
            })
        })
        .collect()
}
