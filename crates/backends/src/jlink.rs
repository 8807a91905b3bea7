//! Debug probe backend
//!
//! Lists J-Link probe serial numbers by invoking the vendor's `nrfjprog`
//! command-line tool. Probe serials are the canonical identity most other
//! transports are conflated against, so each fragment also carries the
//! development-kit board version inferred from the serial.

use crate::board_version::board_version;
use async_trait::async_trait;
use conflater::{Backend, DeviceFragment, DeviceTrait, ErrorInfo};
use serde_json::json;
use tracing::{debug, trace};

/// Debug probe backend shelling out to the vendor SDK
pub struct JlinkBackend {
    program: String,
}

impl JlinkBackend {
    pub const DEFAULT_PROGRAM: &'static str = "nrfjprog";

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Backend for JlinkBackend {
    fn name(&self) -> &'static str {
        "jlink"
    }

    async fn reenumerate(&self) -> Vec<DeviceFragment> {
        debug!(program = %self.program, "listing debug probes");
        let output = match tokio::process::Command::new(&self.program)
            .arg("--ids")
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                return vec![DeviceFragment::error(
                    "jlink",
                    ErrorInfo::new(format!("cannot run {}: {err}", self.program)),
                )];
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return vec![DeviceFragment::error(
                "jlink",
                ErrorInfo::new(format!(
                    "{} --ids exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                )),
            )];
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ids(&stdout).map(probe_fragment).collect()
    }
}

/// Probe serial numbers from `nrfjprog --ids` output, one per line
fn parse_ids(stdout: &str) -> impl Iterator<Item = &str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.bytes().all(|byte| byte.is_ascii_digit()))
}

fn probe_fragment(serial: &str) -> DeviceFragment {
    trace!(serial, "found debug probe");
    let payload = json!({
        "serialNumber": serial,
        "boardVersion": board_version(serial),
    });
    DeviceFragment::device(serial)
        .with_trait(DeviceTrait::Jlink)
        .with_data(DeviceTrait::Jlink.namespace(), payload)
}
