use std::path::Path;

pub fn merge(input_dir: &Path, output_filepath: &Path) -> anyhow::Result<()> {
    let epochs = benchgrid_campaign::merge_buckets(input_dir, output_filepath)?;
    println!(
        "Merged {epochs} epochs from {} into {}",
        input_dir.display(),
        output_filepath.display()
    );
    Ok(())
}
