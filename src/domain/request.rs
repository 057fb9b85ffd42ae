use std::{fmt, str::FromStr};

use super::{error::DomainError, tile::TileSpec};

pub const DEFAULT_RESOLUTION_PERCENTAGE: u32 = 100;

/// Cycles acceleration device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda,
    Optix,
    Hip,
    OneApi,
}

impl Device {
    pub const ALL: [Device; 5] = [
        Device::Cpu,
        Device::Cuda,
        Device::Optix,
        Device::Hip,
        Device::OneApi,
    ];

    /// Name as Blender spells it on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Cuda => "CUDA",
            Device::Optix => "OPTIX",
            Device::Hip => "HIP",
            Device::OneApi => "ONEAPI",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, Device::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Device::ALL
            .into_iter()
            .find(|device| device.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                DomainError::invalid_request(format!(
                    "unknown device `{trimmed}` (expected one of CPU, CUDA, OPTIX, HIP, ONEAPI)"
                ))
            })
    }
}

/// A render call as the caller phrased it. Numbers are kept signed and unchecked
/// until [`RenderRequest::validate`] runs, so out-of-range input can be reported
/// with the value the caller actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub file: String,
    pub device: Option<Device>,
    pub resolution_x: Option<i64>,
    pub resolution_y: Option<i64>,
    pub resolution_percentage: Option<i64>,
    pub grid_size: i64,
    pub tile_index: i64,
}

impl RenderRequest {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            device: None,
            resolution_x: None,
            resolution_y: None,
            resolution_percentage: None,
            grid_size: 1,
            tile_index: 0,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_resolution(mut self, x: Option<i64>, y: Option<i64>) -> Self {
        self.resolution_x = x;
        self.resolution_y = y;
        self
    }

    pub fn with_resolution_percentage(mut self, percentage: i64) -> Self {
        self.resolution_percentage = Some(percentage);
        self
    }

    pub fn with_tile(mut self, grid_size: i64, tile_index: i64) -> Self {
        self.grid_size = grid_size;
        self.tile_index = tile_index;
        self
    }

    /// Check every field and resolve defaults. Runs before any engine state is touched.
    pub fn validate(&self) -> Result<RenderPlan, DomainError> {
        let file = self.file.trim();
        if file.is_empty() {
            return Err(DomainError::invalid_request("scene file must not be empty"));
        }
        if file.contains(['/', '\\', '\0']) || file.starts_with('.') {
            return Err(DomainError::invalid_request(format!(
                "scene file `{file}` must be a plain file name"
            )));
        }

        let tile = TileSpec::new(self.grid_size, self.tile_index)?;
        let resolution_x = positive("resolutionX", self.resolution_x)?;
        let resolution_y = positive("resolutionY", self.resolution_y)?;
        let resolution_percentage = positive("resolutionPercentage", self.resolution_percentage)?
            .unwrap_or(DEFAULT_RESOLUTION_PERCENTAGE);

        Ok(RenderPlan {
            file: file.to_string(),
            device: self.device,
            resolution_x,
            resolution_y,
            resolution_percentage,
            tile,
        })
    }
}

/// A request that passed validation, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    pub file: String,
    pub device: Option<Device>,
    pub resolution_x: Option<u32>,
    pub resolution_y: Option<u32>,
    pub resolution_percentage: u32,
    pub tile: TileSpec,
}

fn positive(name: &'static str, value: Option<i64>) -> Result<Option<u32>, DomainError> {
    match value {
        None => Ok(None),
        Some(value) if value >= 1 => u32::try_from(value).map(Some).map_err(|_| {
            DomainError::invalid_request(format!("{name} {value} is out of range"))
        }),
        Some(value) => Err(DomainError::invalid_request(format!(
            "{name} must be a positive integer, got {value}"
        ))),
    }
}
