use tracing::{error, info, instrument};

use crate::command::CommandRunner;
use crate::configfs::layout::{ATTR_ADRFAM, ATTR_TRADDR, ATTR_TRSVCID, ATTR_TRTYPE, PORT_ID};
use crate::configfs::attr;

use super::Provisioner;
use super::report::{AttributeWrite, PortReport, StepStatus};

impl<R: CommandRunner> Provisioner<R> {
    /// Create the listening port and write its address attributes.
    ///
    /// Attribute writes are independent: one failing does not stop the
    /// others. If the port directory itself cannot be created the writes are
    /// skipped.
    #[instrument(skip(self))]
    pub async fn configure_port(&self) -> PortReport {
        let port_dir = self.layout.port_dir();
        info!(
            "Creating NVMe-oF {} port {} on port {}...",
            self.config.transport, PORT_ID, self.config.port
        );

        let values = [
            (ATTR_TRADDR, self.config.listen_addr.to_string()),
            (ATTR_TRTYPE, self.config.transport.to_string()),
            (ATTR_TRSVCID, self.config.port.to_string()),
            (ATTR_ADRFAM, self.config.address_family.to_string()),
        ];

        let create = match attr::ensure_dir(&port_dir).await {
            Ok(()) => {
                info!(path = %port_dir.display(), "Created directory");
                StepStatus::Done
            }
            Err(e) => {
                error!(path = %port_dir.display(), error = %e, "Failed to create port");
                StepStatus::failed(e)
            }
        };

        let mut attributes = Vec::with_capacity(values.len());
        for (name, value) in values {
            let status = if create.is_done() {
                let path = self.layout.port_attr(name);
                match attr::write_attr(&path, &value).await {
                    Ok(()) => {
                        info!(path = %path.display(), value = %value, "Wrote attribute");
                        StepStatus::Done
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Failed to write attribute");
                        StepStatus::failed(e)
                    }
                }
            } else {
                StepStatus::skipped("port directory not created")
            };
            attributes.push(AttributeWrite {
                name: name.to_string(),
                value,
                status,
            });
        }

        PortReport {
            path: port_dir,
            create,
            attributes,
        }
    }
}
