use std::path::Path;

use benchgrid_campaign::validate;

pub fn validate(output_dir: &Path, disks: usize, format: &str) -> anyhow::Result<()> {
    validate::log_disk_server_stats(output_dir);
    let report = validate::validate_output(output_dir, disks)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            for category in &report.categories {
                println!("{}", category.summary());
            }
            println!("✓ all {disks} disks reported");
        }
    }
    Ok(())
}
