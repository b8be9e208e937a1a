use crate::config::LightingConfig;
use crate::error::Result;
use crate::render::{BlurKernel, RenderDevice, SurfaceId};

/// In-place separable Gaussian blur.
///
/// `radius` is the kernel half-width in pixels and `amount` divides it to give
/// the standard deviation, so larger amounts give a tighter falloff. A zero
/// radius or a non-positive amount turns the stage into a no-op.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianBlur {
    pub radius: u32,
    pub amount: f32,
}

impl GaussianBlur {
    pub fn new(radius: u32, amount: f32) -> Self {
        Self { radius, amount }
    }

    pub fn from_config(config: &LightingConfig) -> Self {
        Self::new(config.blur_radius, config.blur_amount)
    }

    /// One-sided weights, normalized so the full `2 * radius + 1` tap kernel
    /// sums to one. `None` when the blur is disabled.
    pub fn kernel(&self) -> Option<BlurKernel> {
        if self.radius == 0 || !(self.amount > 0.0) {
            return None;
        }
        let sigma = self.radius as f32 / self.amount;
        let two_sigma_sq = 2.0 * sigma * sigma;
        let mut weights: Vec<f32> = (0..=self.radius)
            .map(|i| (-((i * i) as f32) / two_sigma_sq).exp())
            .collect();
        let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
        for weight in &mut weights {
            *weight /= total;
        }
        Some(BlurKernel::new(weights))
    }

    pub fn is_enabled(&self) -> bool {
        self.kernel().is_some()
    }

    /// Blur `surface` in place. Does not touch the device when disabled.
    pub fn apply<D: RenderDevice + ?Sized>(&self, device: &mut D, surface: SurfaceId) -> Result<()> {
        match self.kernel() {
            Some(kernel) => device.blur(surface, &kernel),
            None => Ok(()),
        }
    }
}

impl Default for GaussianBlur {
    fn default() -> Self {
        Self::from_config(&LightingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Rect, Vec2};
    use crate::render::SoftwareDevice;

    #[test]
    fn kernel_weights_sum_to_one() {
        let kernel = GaussianBlur::new(11, 2.0).kernel().unwrap();
        let weights = kernel.weights();
        assert_eq!(kernel.radius(), 11);
        let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(weights.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn disabled_blur_leaves_bytes_untouched() {
        let mut device = SoftwareDevice::new();
        let surface = device.create_surface("mask", 16, 16).unwrap();
        device
            .fill_polygon(
                surface,
                &[
                    Vec2::new(2.0, 2.0),
                    Vec2::new(9.0, 3.0),
                    Vec2::new(6.0, 12.0),
                ],
                [1.0, 0.5, 0.25, 1.0],
            )
            .unwrap();
        let before = device.read_pixels(surface).unwrap();

        for blur in [GaussianBlur::new(0, 2.0), GaussianBlur::new(5, 0.0)] {
            assert!(!blur.is_enabled());
            blur.apply(&mut device, surface).unwrap();
            assert_eq!(device.read_pixels(surface).unwrap(), before);
        }
    }

    #[test]
    fn enabled_blur_softens_an_edge() {
        let mut device = SoftwareDevice::new();
        let surface = device.create_surface("mask", 16, 4).unwrap();
        device
            .fill_polygon(
                surface,
                &Rect::from_dimensions(Vec2::ZERO, Vec2::new(8.0, 4.0)).corners(),
                [1.0, 1.0, 1.0, 1.0],
            )
            .unwrap();
        GaussianBlur::new(3, 1.5).apply(&mut device, surface).unwrap();
        let image = device.read_pixels(surface).unwrap();
        let edge = image.get_pixel(8, 1)[0];
        assert!(edge > 0 && edge < 255, "edge = {edge}");
        assert_eq!(image.get_pixel(0, 1)[0], 255);
    }
}
