//! Drive label lookup through `lsblk`.

use tracing::{debug, warn};

use crate::command::CommandRunner;
use crate::configfs::DriveUuid;

/// Return the filesystem label of a drive, or `None` if it has none or the
/// lookup fails.
pub async fn lookup_label<R: CommandRunner>(runner: &R, uuid: &DriveUuid) -> Option<String> {
    let device = uuid.device_path();
    let output = match runner.run("lsblk", &["-no", "LABEL", device.as_str()]).await {
        Ok(output) => output,
        Err(e) => {
            warn!(drive = %uuid, error = %e, "Failed to execute lsblk");
            return None;
        }
    };

    match output.check(&format!("lsblk {}", device)) {
        Ok(stdout) => {
            // Partitioned devices print one line per child; the first is the device itself.
            let label = stdout.lines().next().unwrap_or("").trim();
            if label.is_empty() {
                debug!(drive = %uuid, "Drive has no label");
                None
            } else {
                Some(label.to_string())
            }
        }
        Err(e) => {
            debug!(drive = %uuid, error = %e, "Label lookup failed");
            None
        }
    }
}
