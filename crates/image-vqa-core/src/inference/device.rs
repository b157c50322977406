//! Compute device selection.

use candle_core::Device;
use tracing::{debug, info};

/// Picks the device ViLT runs on.
///
/// GPU backends are only tried when compiled in through the `metal` or `cuda`
/// features. Any failure to open one falls through to the CPU.
#[must_use]
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("Running ViLT on Metal");
                return device;
            }
            Err(e) => debug!("Metal unavailable: {e}"),
        }
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("Running ViLT on CUDA");
                return device;
            }
            Err(e) => debug!("CUDA unavailable: {e}"),
        }
    }

    debug!("No GPU backend selected");
    info!("Running ViLT on CPU");
    Device::Cpu
}
