use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage};

use crate::VlmError;

/// Side of the square input expected by the Moondream2 vision encoder.
pub const IMAGE_SIZE: usize = 378;

/// Convert an image into a normalized tensor with shape [1, 3, 378, 378].
///
/// The image is resized to fill the square input (cropping the longest side)
/// and every channel is mapped from [0, 255] to [-1, 1].
pub fn preprocess_image(
    image: &DynamicImage,
    device: &Device,
    dtype: DType,
) -> Result<Tensor, VlmError> {
    let img = image
        .resize_to_fill(IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::Triangle)
        .to_rgb8();

    // mean and std are both 0.5 for every channel
    let image_t = Tensor::from_vec(img.into_raw(), (IMAGE_SIZE, IMAGE_SIZE, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2. / 255., -1.)?
        .to_dtype(dtype)?
        .to_device(device)?
        .unsqueeze(0)?;

    Ok(image_t)
}
