use crate::{
    cli::{
        CliError, Command, CommandResult,
        formatting::{format_capability, format_description, format_header},
    },
    services::MediaDevices,
};

/// Lists the capture formats of one camera
pub struct CapabilitiesCommand {
    descriptor: String,
    json: bool,
}

impl CapabilitiesCommand {
    /// Creates the command for the camera with `descriptor`.
    pub fn new(descriptor: String, json: bool) -> Self {
        Self { descriptor, json }
    }
}

impl Command for CapabilitiesCommand {
    fn execute(&self, devices: &MediaDevices) -> CommandResult {
        let device = devices
            .video_capture_devices()?
            .into_iter()
            .find(|device| device.descriptor() == self.descriptor)
            .ok_or_else(|| CliError::DeviceNotFound(self.descriptor.clone()))?;

        let capabilities = devices.video_capture_capabilities(&device)?;

        if self.json {
            return Ok(serde_json::to_string_pretty(&capabilities)?);
        }

        let mut output = format_header(&device.to_string());
        if capabilities.is_empty() {
            output.push_str(&format!("\n{}", format_description("  no capture formats")));
        }
        for capability in &capabilities {
            output.push('\n');
            output.push_str(&format_capability(capability));
        }

        Ok(output)
    }
}
