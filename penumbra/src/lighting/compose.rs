use crate::error::Result;
use crate::render::{ComposeInputs, RenderDevice, SurfaceId, TextureHandle};

/// Terminal blend of scene, lightmap and vision mask.
///
/// Where the vision mask reaches the pass level the scene is shown lit by the
/// lightmap plus the ambient floor. Where it is black the out-of-view texture
/// is tiled instead. Values in between mix the two.
#[derive(Clone, Copy, Debug)]
pub struct SceneCompositor {
    out_of_view: TextureHandle,
    ambient: [f32; 4],
}

impl SceneCompositor {
    pub fn new(out_of_view: TextureHandle, ambient: [f32; 4]) -> Self {
        Self { out_of_view, ambient }
    }

    pub fn ambient(&self) -> [f32; 4] {
        self.ambient
    }

    pub fn set_ambient(&mut self, ambient: [f32; 4]) {
        self.ambient = ambient;
    }

    pub fn compose<D: RenderDevice + ?Sized>(
        &self,
        device: &mut D,
        target: SurfaceId,
        scene: SurfaceId,
        lightmap: SurfaceId,
        vision: SurfaceId,
    ) -> Result<()> {
        device.compose(
            target,
            &ComposeInputs {
                scene,
                lightmap,
                vision,
                out_of_view: self.out_of_view,
                ambient: self.ambient,
            },
        )
    }

    /// Full-vision output: the scene as drawn, with no lighting applied.
    pub fn present_unlit<D: RenderDevice + ?Sized>(
        &self,
        device: &mut D,
        scene: SurfaceId,
        target: SurfaceId,
    ) -> Result<()> {
        device.copy_surface(scene, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{SoftwareDevice, BLACK, FULL_VISION_GRAY};
    use image::{Rgba, RgbaImage};

    struct Fixture {
        device: SoftwareDevice,
        compositor: SceneCompositor,
        pattern: RgbaImage,
        scene: SurfaceId,
        lightmap: SurfaceId,
        vision: SurfaceId,
        target: SurfaceId,
    }

    fn fixture() -> Fixture {
        let mut device = SoftwareDevice::new();
        let pattern = RgbaImage::from_fn(3, 2, |x, y| Rgba([10 * x as u8, 50 + 20 * y as u8, 7, 255]));
        let out_of_view = device.load_texture("outofview", &pattern).unwrap();
        let scene = device.create_surface("scene", 8, 8).unwrap();
        let lightmap = device.create_surface("lightmap", 8, 8).unwrap();
        let vision = device.create_surface("vision", 8, 8).unwrap();
        let target = device.create_surface("final", 8, 8).unwrap();
        device.clear(scene, [0.8, 0.6, 0.4, 1.0]).unwrap();
        Fixture {
            device,
            compositor: SceneCompositor::new(out_of_view, [0.1, 0.1, 0.1, 1.0]),
            pattern,
            scene,
            lightmap,
            vision,
            target,
        }
    }

    #[test]
    fn hidden_pixels_show_the_out_of_view_texture() {
        let mut f = fixture();
        f.device.clear(f.vision, BLACK).unwrap();
        for light in [BLACK, [1.0, 1.0, 1.0, 1.0]] {
            f.device.clear(f.lightmap, light).unwrap();
            f.compositor
                .compose(&mut f.device, f.target, f.scene, f.lightmap, f.vision)
                .unwrap();
            let image = f.device.read_pixels(f.target).unwrap();
            for (x, y, pixel) in image.enumerate_pixels() {
                assert_eq!(*pixel, *f.pattern.get_pixel(x % 3, y % 2));
            }
        }
    }

    #[test]
    fn visible_pixels_are_lit_scene_plus_ambient() {
        let mut f = fixture();
        f.device.clear(f.vision, FULL_VISION_GRAY).unwrap();
        f.device.clear(f.lightmap, [0.4, 0.4, 0.4, 1.0]).unwrap();
        f.compositor
            .compose(&mut f.device, f.target, f.scene, f.lightmap, f.vision)
            .unwrap();
        let pixel = *f.device.read_pixels(f.target).unwrap().get_pixel(4, 4);
        // 0.8 * (0.4 + 0.1)
        assert_eq!(pixel[0], 102);
        assert_eq!(pixel[3], 255);
    }

    #[test]
    fn unlit_presentation_copies_the_scene() {
        let mut f = fixture();
        f.compositor
            .present_unlit(&mut f.device, f.scene, f.target)
            .unwrap();
        assert_eq!(
            f.device.read_pixels(f.target).unwrap(),
            f.device.read_pixels(f.scene).unwrap()
        );
    }
}
