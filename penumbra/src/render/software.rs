//! CPU reference device.
//!
//! Every surface is an `RgbaImage`. The math mirrors the WGSL shaders of the
//! GPU device closely enough that the pipeline behaves the same on both, and
//! it is fully deterministic, which is what the test-suite relies on.

use std::collections::HashMap;
use std::f32::consts::{PI, TAU};

use image::{imageops, Rgba, RgbaImage};

use super::{
    to_byte, to_rgba8, BatchSlot, BlendMode, BlurKernel, ComposeInputs, DeviceInfo,
    RenderDevice, ResolveOptions, Sampled, SurfaceId, SurfaceOrigin, TextureHandle, BATCH_SIZE,
    LIGHT_FALLOFF, VISION_PASS_LEVEL,
};
use crate::error::{LightingError, Result};
use crate::math::Vec2;

/// Render device that rasterizes on the CPU.
pub struct SoftwareDevice {
    origin: SurfaceOrigin,
    supports_shadows: bool,
    surfaces: HashMap<SurfaceId, RgbaImage>,
    textures: HashMap<TextureHandle, RgbaImage>,
    next_surface_id: u32,
    next_texture_id: u32,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            origin: SurfaceOrigin::TopLeft,
            supports_shadows: true,
            surfaces: HashMap::new(),
            textures: HashMap::new(),
            next_surface_id: 1,
            next_texture_id: 1,
        }
    }

    /// Emulate render targets with a different row order.
    ///
    /// With [`SurfaceOrigin::BottomLeft`] the lightmap pass stores its rows
    /// bottom-up, the way GL-style render textures do.
    #[must_use]
    pub fn with_origin(mut self, origin: SurfaceOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Report that the shadow shaders are unavailable.
    #[must_use]
    pub fn without_shadow_support(mut self) -> Self {
        self.supports_shadows = false;
        self
    }

    /// Borrow the pixels of a live surface.
    pub fn surface_image(&self, surface: SurfaceId) -> Option<&RgbaImage> {
        self.surfaces.get(&surface)
    }

    /// Number of live surfaces.
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    fn image(&self, surface: SurfaceId) -> Result<&RgbaImage> {
        self.surfaces
            .get(&surface)
            .ok_or(LightingError::UnknownSurface(surface))
    }

    fn image_mut(&mut self, surface: SurfaceId) -> Result<&mut RgbaImage> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(LightingError::UnknownSurface(surface))
    }

    fn texture(&self, texture: TextureHandle) -> Result<&RgbaImage> {
        self.textures
            .get(&texture)
            .ok_or(LightingError::UnknownTexture(texture))
    }

    fn sampled(&self, source: Sampled) -> Result<&RgbaImage> {
        match source {
            Sampled::Surface(id) => self.image(id),
            Sampled::Texture(handle) => self.texture(handle),
        }
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for SoftwareDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "software".into(),
            origin: self.origin,
            supports_shadows: self.supports_shadows,
        }
    }

    fn create_surface(&mut self, label: &str, width: u32, height: u32) -> Result<SurfaceId> {
        if width == 0 || height == 0 {
            return Err(LightingError::InvalidSurfaceSize { width, height });
        }
        let id = SurfaceId(self.next_surface_id);
        self.next_surface_id += 1;
        log::trace!("software surface {label} ({width}x{height}) -> {id:?}");
        self.surfaces
            .insert(id, RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])));
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
    }

    fn surface_size(&self, surface: SurfaceId) -> Option<(u32, u32)> {
        self.surfaces.get(&surface).map(|s| s.dimensions())
    }

    fn load_texture(&mut self, _label: &str, image: &RgbaImage) -> Result<TextureHandle> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(LightingError::InvalidSurfaceSize { width, height });
        }
        let handle = TextureHandle(self.next_texture_id);
        self.next_texture_id += 1;
        self.textures.insert(handle, image.clone());
        Ok(handle)
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| t.dimensions())
    }

    fn clear(&mut self, surface: SurfaceId, color: [f32; 4]) -> Result<()> {
        let pixel = to_rgba8(color);
        for p in self.image_mut(surface)?.pixels_mut() {
            *p = pixel;
        }
        Ok(())
    }

    fn fill_polygon(&mut self, surface: SurfaceId, points: &[Vec2], color: [f32; 4]) -> Result<()> {
        if points.len() < 3 {
            return Ok(());
        }
        let image = self.image_mut(surface)?;
        let (w, h) = image.dimensions();

        let (mut lo, mut hi) = (points[0], points[0]);
        for p in points {
            lo = lo.min(*p);
            hi = hi.max(*p);
        }
        let x0 = lo.x.floor().max(0.0) as u32;
        let y0 = lo.y.floor().max(0.0) as u32;
        let x1 = (hi.x.ceil().max(0.0) as u32).min(w);
        let y1 = (hi.y.ceil().max(0.0) as u32).min(h);

        for y in y0..y1 {
            for x in x0..x1 {
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                if point_in_polygon(center, points) {
                    let dst = *image.get_pixel(x, y);
                    image.put_pixel(x, y, blend(dst, color, BlendMode::Alpha));
                }
            }
        }
        Ok(())
    }

    fn resolve_shadows(&mut self, surface: SurfaceId, options: &ResolveOptions) -> Result<()> {
        let mask = match options.mask {
            Some(handle) => Some(self.texture(handle)?.clone()),
            None => None,
        };
        let image = self.image_mut(surface)?;
        let resolved = resolve_silhouette(image, options, mask.as_ref());
        *image = resolved;
        Ok(())
    }

    fn light_pass(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        slots: &[BatchSlot; BATCH_SIZE],
    ) -> Result<()> {
        if source == dest {
            return Err(LightingError::Device(
                "lightmap pass cannot read and write the same surface".into(),
            ));
        }
        let src = self.image(source)?;
        let (w, h) = src.dimensions();
        let dest_size = self
            .surface_size(dest)
            .ok_or(LightingError::UnknownSurface(dest))?;
        if dest_size != (w, h) {
            return Err(LightingError::InvalidSurfaceSize {
                width: dest_size.0,
                height: dest_size.1,
            });
        }

        let mut inputs = Vec::with_capacity(BATCH_SIZE);
        for slot in slots {
            inputs.push((slot, self.sampled(slot.texture)?));
        }

        let flipped = self.origin == SurfaceOrigin::BottomLeft;
        let mut out = RgbaImage::new(w, h);
        for y in 0..h {
            let row = if flipped { h - 1 - y } else { y };
            for x in 0..w {
                let uv = [(x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32];
                let base = src.get_pixel(x, row);
                let mut acc = [
                    base[0] as f32 / 255.0,
                    base[1] as f32 / 255.0,
                    base[2] as f32 / 255.0,
                ];
                for (slot, texture) in &inputs {
                    if let Some(texel) = sample_nearest(texture, slot.placement.map(uv)) {
                        for c in 0..3 {
                            acc[c] += texel[c] as f32 / 255.0 * slot.color[c] * slot.color[3];
                        }
                    }
                }
                out.put_pixel(
                    x,
                    row,
                    Rgba([to_byte(acc[0]), to_byte(acc[1]), to_byte(acc[2]), 255]),
                );
            }
        }

        *self.image_mut(dest)? = out;
        Ok(())
    }

    fn copy_surface(&mut self, source: SurfaceId, dest: SurfaceId) -> Result<()> {
        let src = self.image(source)?.clone();
        let dst = self.image_mut(dest)?;
        if dst.dimensions() != src.dimensions() {
            let (width, height) = dst.dimensions();
            return Err(LightingError::InvalidSurfaceSize { width, height });
        }
        *dst = src;
        Ok(())
    }

    fn flip_vertical(&mut self, surface: SurfaceId) -> Result<()> {
        imageops::flip_vertical_in_place(self.image_mut(surface)?);
        Ok(())
    }

    fn blit(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        origin: (i32, i32),
        mode: BlendMode,
    ) -> Result<()> {
        let src = self.image(source)?.clone();
        let dst = self.image_mut(dest)?;
        let (dw, dh) = (dst.width() as i64, dst.height() as i64);
        for (sx, sy, pixel) in src.enumerate_pixels() {
            let dx = origin.0 as i64 + sx as i64;
            let dy = origin.1 as i64 + sy as i64;
            if dx < 0 || dy < 0 || dx >= dw || dy >= dh {
                continue;
            }
            let (dx, dy) = (dx as u32, dy as u32);
            let below = *dst.get_pixel(dx, dy);
            let color = [
                pixel[0] as f32 / 255.0,
                pixel[1] as f32 / 255.0,
                pixel[2] as f32 / 255.0,
                pixel[3] as f32 / 255.0,
            ];
            dst.put_pixel(dx, dy, blend(below, color, mode));
        }
        Ok(())
    }

    fn blur(&mut self, surface: SurfaceId, kernel: &BlurKernel) -> Result<()> {
        if kernel.radius() == 0 {
            return Ok(());
        }
        let image = self.image_mut(surface)?;
        *image = blur_separable(image, kernel.weights());
        Ok(())
    }

    fn compose(&mut self, target: SurfaceId, inputs: &ComposeInputs) -> Result<()> {
        let size = self
            .surface_size(target)
            .ok_or(LightingError::UnknownSurface(target))?;
        let scene = self.image(inputs.scene)?;
        let light = self.image(inputs.lightmap)?;
        let vision = self.image(inputs.vision)?;
        let out_of_view = self.texture(inputs.out_of_view)?;
        for image in [scene, light, vision] {
            if image.dimensions() != size {
                let (width, height) = image.dimensions();
                return Err(LightingError::InvalidSurfaceSize { width, height });
            }
        }

        let (w, h) = size;
        let (ow, oh) = out_of_view.dimensions();
        let mut out = RgbaImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let s = scene.get_pixel(x, y);
                let l = light.get_pixel(x, y);
                let o = out_of_view.get_pixel(x % ow, y % oh);
                let visibility = (vision.get_pixel(x, y)[0] as f32 / 255.0 / VISION_PASS_LEVEL)
                    .clamp(0.0, 1.0);
                let mut rgb = [0u8; 3];
                for c in 0..3 {
                    let lit = s[c] as f32 / 255.0
                        * (l[c] as f32 / 255.0 + inputs.ambient[c]).clamp(0.0, 1.0);
                    let hidden = o[c] as f32 / 255.0;
                    rgb[c] = to_byte(hidden * (1.0 - visibility) + lit * visibility);
                }
                out.put_pixel(x, y, Rgba([rgb[0], rgb[1], rgb[2], 255]));
            }
        }

        *self.image_mut(target)? = out;
        Ok(())
    }

    fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage> {
        Ok(self.image(surface)?.clone())
    }
}

fn blend(dst: Rgba<u8>, src: [f32; 4], mode: BlendMode) -> Rgba<u8> {
    let d = [
        dst[0] as f32 / 255.0,
        dst[1] as f32 / 255.0,
        dst[2] as f32 / 255.0,
        dst[3] as f32 / 255.0,
    ];
    let out = match mode {
        BlendMode::Replace => src,
        BlendMode::Alpha => {
            let a = src[3];
            [
                src[0] * a + d[0] * (1.0 - a),
                src[1] * a + d[1] * (1.0 - a),
                src[2] * a + d[2] * (1.0 - a),
                a + d[3] * (1.0 - a),
            ]
        }
        BlendMode::Additive => [d[0] + src[0], d[1] + src[1], d[2] + src[2], d[3] + src[3]],
    };
    to_rgba8(out)
}

/// Even-odd point-in-polygon test.
fn point_in_polygon(p: Vec2, points: &[Vec2]) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Nearest texel at `uv`; `None` outside `[0, 1)` (clamp-to-border black).
fn sample_nearest(texture: &RgbaImage, uv: [f32; 2]) -> Option<Rgba<u8>> {
    if !(0.0..1.0).contains(&uv[0]) || !(0.0..1.0).contains(&uv[1]) {
        return None;
    }
    let (w, h) = texture.dimensions();
    let x = ((uv[0] * w as f32) as u32).min(w - 1);
    let y = ((uv[1] * h as f32) as u32).min(h - 1);
    Some(*texture.get_pixel(x, y))
}

/// Radial shadow map from a silhouette where any non-zero alpha occludes.
///
/// Rays are marched out from the center of the area to find the nearest
/// occluder per angular bucket; a pixel is lit when it is no farther from the
/// center than the hit distance of its bucket.
fn resolve_silhouette(
    silhouette: &RgbaImage,
    options: &ResolveOptions,
    mask: Option<&RgbaImage>,
) -> RgbaImage {
    let (w, h) = silhouette.dimensions();
    let center = Vec2::new(w as f32 * 0.5, h as f32 * 0.5);
    let radius = w.min(h) as f32 * 0.5;
    let rays = options.quality.ray_count(w.min(h)) as usize;
    let step = options.quality.march_step();
    let taps = options.quality.filter_taps();

    let occupied = |p: Vec2| -> bool {
        if p.x < 0.0 || p.y < 0.0 || p.x >= w as f32 || p.y >= h as f32 {
            return false;
        }
        silhouette.get_pixel(p.x as u32, p.y as u32)[3] > 0
    };

    let mut distances = vec![radius; rays];
    for (i, distance) in distances.iter_mut().enumerate() {
        let angle = (i as f32 + 0.5) / rays as f32 * TAU - PI;
        let dir = Vec2::new(angle.cos(), angle.sin());
        let mut t = 0.0;
        while t <= radius {
            if occupied(center + dir * t) {
                *distance = t;
                break;
            }
            t += step;
        }
    }

    let mut out = RgbaImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let delta = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - center;
        let d = delta.length();
        if d > radius {
            *pixel = Rgba([0, 0, 0, 255]);
            continue;
        }

        let bucket = (((delta.y.atan2(delta.x) + PI) / TAU * rays as f32) as i64).rem_euclid(rays as i64);
        let mut lit = 0.0;
        for k in -taps..=taps {
            let index = (bucket + k as i64).rem_euclid(rays as i64) as usize;
            if d <= distances[index] + step {
                lit += 1.0;
            }
        }
        let mut intensity = lit / (2 * taps + 1) as f32;
        if options.attenuate {
            intensity *= (1.0 - d / radius).max(0.0).powf(LIGHT_FALLOFF);
        }
        if let Some(mask) = mask {
            let uv = [(x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32];
            if let Some(m) = sample_nearest(mask, uv) {
                intensity *= m[0] as f32 / 255.0;
            }
        }
        let v = to_byte(intensity);
        *pixel = Rgba([v, v, v, 255]);
    }
    out
}

fn blur_separable(image: &RgbaImage, weights: &[f32]) -> RgbaImage {
    let (w, h) = image.dimensions();
    let r = weights.len() as i64 - 1;
    let at = |x: i64, y: i64| -> usize { (y as usize * w as usize + x as usize) * 4 };

    let source: Vec<f32> = image.as_raw().iter().map(|&v| v as f32).collect();
    let mut horizontal = vec![0.0f32; source.len()];
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = [0.0f32; 4];
            for k in -r..=r {
                let sx = (x + k).clamp(0, w as i64 - 1);
                let weight = weights[k.unsigned_abs() as usize];
                let i = at(sx, y);
                for c in 0..4 {
                    acc[c] += source[i + c] * weight;
                }
            }
            horizontal[at(x, y)..at(x, y) + 4].copy_from_slice(&acc);
        }
    }

    let mut out = RgbaImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = [0.0f32; 4];
            for k in -r..=r {
                let sy = (y + k).clamp(0, h as i64 - 1);
                let weight = weights[k.unsigned_abs() as usize];
                let i = at(x, sy);
                for c in 0..4 {
                    acc[c] += horizontal[i + c] * weight;
                }
            }
            out.put_pixel(
                x as u32,
                y as u32,
                Rgba(acc.map(|v| v.round().clamp(0.0, 255.0) as u8)),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Placement, ResolveQuality};

    fn solid(device: &mut SoftwareDevice, w: u32, h: u32, color: [f32; 4]) -> SurfaceId {
        let id = device.create_surface("test", w, h).unwrap();
        device.clear(id, color).unwrap();
        id
    }

    #[test]
    fn zero_sized_surfaces_are_rejected() {
        let mut device = SoftwareDevice::new();
        let err = device.create_surface("bad", 0, 16).unwrap_err();
        assert!(matches!(err, LightingError::InvalidSurfaceSize { width: 0, height: 16 }));
    }

    #[test]
    fn fill_polygon_covers_pixel_centers_inside_the_shape() {
        let mut device = SoftwareDevice::new();
        let id = solid(&mut device, 8, 8, [0.0, 0.0, 0.0, 0.0]);
        let square = [
            Vec2::new(2.0, 2.0),
            Vec2::new(6.0, 2.0),
            Vec2::new(6.0, 6.0),
            Vec2::new(2.0, 6.0),
        ];
        device.fill_polygon(id, &square, [1.0, 0.0, 0.0, 1.0]).unwrap();
        let image = device.surface_image(id).unwrap();
        assert_eq!(image.get_pixel(2, 2).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(5, 5).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(6, 6).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(1, 3).0, [0, 0, 0, 0]);
    }

    #[test]
    fn unobstructed_resolve_lights_the_whole_disc() {
        let mut device = SoftwareDevice::new();
        let id = solid(&mut device, 32, 32, [0.0, 0.0, 0.0, 0.0]);
        let options = ResolveOptions {
            quality: ResolveQuality::Fast,
            attenuate: false,
            mask: None,
        };
        device.resolve_shadows(id, &options).unwrap();
        let image = device.surface_image(id).unwrap();
        assert_eq!(image.get_pixel(16, 16).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(2, 16).0, [255, 255, 255, 255]);
        // Corners lie outside the light's radius.
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn occluder_casts_a_shadow_away_from_the_center() {
        let mut device = SoftwareDevice::new();
        let id = solid(&mut device, 64, 64, [0.0, 0.0, 0.0, 0.0]);
        let wall = [
            Vec2::new(40.0, 28.0),
            Vec2::new(44.0, 28.0),
            Vec2::new(44.0, 36.0),
            Vec2::new(40.0, 36.0),
        ];
        device.fill_polygon(id, &wall, [0.0, 0.0, 0.0, 1.0]).unwrap();
        let options = ResolveOptions {
            quality: ResolveQuality::High,
            attenuate: false,
            mask: None,
        };
        device.resolve_shadows(id, &options).unwrap();
        let image = device.surface_image(id).unwrap();
        // Between the light and the wall.
        assert_eq!(image.get_pixel(36, 32)[0], 255);
        // Behind the wall.
        assert_eq!(image.get_pixel(54, 32)[0], 0);
        // Opposite side is unobstructed.
        assert_eq!(image.get_pixel(10, 32)[0], 255);
    }

    #[test]
    fn attenuated_resolve_fades_towards_the_edge() {
        let mut device = SoftwareDevice::new();
        let id = solid(&mut device, 64, 64, [0.0, 0.0, 0.0, 0.0]);
        let options = ResolveOptions {
            quality: ResolveQuality::Fast,
            attenuate: true,
            mask: None,
        };
        device.resolve_shadows(id, &options).unwrap();
        let image = device.surface_image(id).unwrap();
        let near = image.get_pixel(33, 32)[0];
        let far = image.get_pixel(60, 32)[0];
        assert!(near > far, "near {near} far {far}");
        assert!(far > 0);
    }

    #[test]
    fn light_pass_adds_placed_texture_times_color() {
        let mut device = SoftwareDevice::new();
        let source = solid(&mut device, 8, 8, [0.0, 0.0, 0.0, 1.0]);
        let dest = solid(&mut device, 8, 8, [0.0, 0.0, 0.0, 1.0]);
        let white = device.create_surface("light", 4, 4).unwrap();
        device.clear(white, [1.0, 1.0, 1.0, 1.0]).unwrap();
        let black = device
            .load_texture("black", &RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 255])))
            .unwrap();

        let mut slots = [BatchSlot::empty(black); BATCH_SIZE];
        slots[0] = BatchSlot {
            texture: Sampled::Surface(white),
            color: [1.0, 0.5, 0.0, 1.0],
            placement: Placement::for_area(Vec2::new(4.0, 4.0), 4.0, (8, 8)),
        };
        device.light_pass(source, dest, &slots).unwrap();

        let image = device.surface_image(dest).unwrap();
        assert_eq!(image.get_pixel(5, 5).0, [255, 128, 0, 255]);
        assert_eq!(image.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn light_pass_refuses_to_alias_source_and_dest() {
        let mut device = SoftwareDevice::new();
        let surface = solid(&mut device, 4, 4, [0.0, 0.0, 0.0, 1.0]);
        let black = device
            .load_texture("black", &RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])))
            .unwrap();
        let slots = [BatchSlot::empty(black); BATCH_SIZE];
        assert!(device.light_pass(surface, surface, &slots).is_err());
    }

    #[test]
    fn blur_keeps_a_flat_surface_flat() {
        let mut device = SoftwareDevice::new();
        let id = solid(&mut device, 16, 16, [0.5, 0.25, 1.0, 1.0]);
        let before = device.read_pixels(id).unwrap();
        let kernel = BlurKernel::new(vec![0.4, 0.2, 0.1]);
        device.blur(id, &kernel).unwrap();
        assert_eq!(device.read_pixels(id).unwrap(), before);
    }

    #[test]
    fn blit_clips_at_the_destination_edges() {
        let mut device = SoftwareDevice::new();
        let dest = solid(&mut device, 8, 8, [0.0, 0.0, 0.0, 1.0]);
        let patch = solid(&mut device, 4, 4, [1.0, 1.0, 1.0, 1.0]);
        device.blit(patch, dest, (-2, 6), BlendMode::Replace).unwrap();
        let image = device.surface_image(dest).unwrap();
        assert_eq!(image.get_pixel(0, 6).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(1, 7).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(2, 7).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(0, 5).0, [0, 0, 0, 255]);
    }
}
