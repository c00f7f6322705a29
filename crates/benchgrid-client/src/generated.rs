//! Per-run configuration files derived from the host-wide templates.
//!
//! Each file is a copy of a template in the remote output directory with a
//! few fields rewritten in place by anchored `sed` substitutions. Only the
//! rewritten fields differ from the template.

use bench_core::RemoteLayout;
use benchgrid_remote::CommandLine;

/// Timestamp embedded in generated file names, unique per microsecond.
pub fn file_stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string()
}

/// `"key": "a.b.c.d"` JSON string fields holding a dotted quad.
fn quoted_ip_field(key: &str, ip: &str, path: &str) -> String {
    format!(
        r#"sed -i "s/\"{key}\": \"[0-9]*\.[0-9]*\.[0-9]*\.[0-9]*\"/\"{key}\": \"{ip}\"/g" {path}"#
    )
}

/// `key <value>` lines of the runtime config, where the current value
/// matches `pattern`.
fn plain_field(key: &str, pattern: &str, value: &str, path: &str) -> String {
    format!(r#"sed -i "s/{key} {pattern}/{key} {value}/g" {path}"#)
}

const DOTTED_QUAD: &str = r"[0-9]*\.[0-9]*\.[0-9]*\.[0-9]*";
const INTEGER: &str = "[0-9]*";

/// Storage client config: where the virtual disk and the controller live.
pub fn sandook_config(
    layout: &RemoteLayout,
    stamp: &str,
    client_ip: &str,
    controller_ip: &str,
) -> (String, CommandLine) {
    let path = format!("{}/config_{stamp}.json", layout.output_dir());
    let cmd = CommandLine::new()
        .arg(format!("cp {} {path};", layout.sandook_config_template()))
        .arg(format!("{};", quoted_ip_field("kVirtualDiskIP", client_ip, &path)))
        .arg(quoted_ip_field("kControllerIP", controller_ip, &path));
    (path, cmd)
}

/// Kernel-bypass runtime config: the client's address and how many kernel
/// threads it runs, spins and is guaranteed.
pub fn virtual_disk_config(
    layout: &RemoteLayout,
    stamp: &str,
    client_ip: &str,
    cores: u32,
) -> (String, CommandLine) {
    let path = format!("{}/virtual_disk_{stamp}.config", layout.output_dir());
    let cores = cores.to_string();
    let mut cmd = CommandLine::new()
        .arg(format!("cp {} {path};", layout.virtual_disk_config_template()))
        .arg(format!(
            "{};",
            plain_field("host_addr", DOTTED_QUAD, client_ip, &path)
        ));
    let kthreads = [
        "runtime_kthreads",
        "runtime_spinning_kthreads",
        "runtime_guaranteed_kthreads",
    ];
    for (i, key) in kthreads.iter().enumerate() {
        let sed = plain_field(key, INTEGER, &cores, &path);
        if i + 1 < kthreads.len() {
            cmd.push(format!("{sed};"));
        } else {
            cmd.push(sed);
        }
    }
    (path, cmd)
}
