use crate::error::Result;
use crate::render::{BatchSlot, RenderDevice, SurfaceId, SurfaceOrigin, TextureHandle, BATCH_SIZE, BLACK};

/// Outcome of one lightmap composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchReport {
    /// Lightmap shader invocations issued.
    pub passes: usize,
    /// Real (non-padding) slots drawn.
    pub lights: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BatchState {
    Accumulating,
    Flushing,
}

/// Drains queued light slots into the lightmap, [`BATCH_SIZE`] per pass.
///
/// Passes ping-pong between the canonical lightmap and an intermediate
/// surface. Every pass gets exactly [`BATCH_SIZE`] slots: short batches are
/// padded with the empty texture and zero color, so an empty queue still runs
/// one pass and `n` lights run `ceil(n / BATCH_SIZE)` passes.
#[derive(Clone, Copy, Debug)]
pub struct LightBatcher {
    empty: TextureHandle,
}

impl LightBatcher {
    pub fn new(empty: TextureHandle) -> Self {
        Self { empty }
    }

    /// Number of passes a queue of `lights` slots takes.
    pub fn passes_for(lights: usize) -> usize {
        lights.div_ceil(BATCH_SIZE).max(1)
    }

    /// Accumulate `queue` into `lightmap`, using `intermediate` as the second
    /// ping-pong surface. The result always ends up in `lightmap`, top row first.
    pub fn composite<D, I>(
        &self,
        device: &mut D,
        lightmap: SurfaceId,
        intermediate: SurfaceId,
        queue: I,
    ) -> Result<BatchReport>
    where
        D: RenderDevice + ?Sized,
        I: IntoIterator<Item = BatchSlot>,
    {
        let surfaces = [lightmap, intermediate];
        device.clear(lightmap, BLACK)?;

        let mut queue = queue.into_iter();
        let mut pending: Vec<BatchSlot> = Vec::with_capacity(BATCH_SIZE);
        let mut state = BatchState::Accumulating;
        let mut source = 0;
        let mut report = BatchReport { passes: 0, lights: 0 };

        loop {
            match state {
                BatchState::Accumulating => match queue.next() {
                    Some(slot) => {
                        pending.push(slot);
                        report.lights += 1;
                        if pending.len() == BATCH_SIZE {
                            state = BatchState::Flushing;
                        }
                    }
                    None if pending.is_empty() && report.passes > 0 => break,
                    None => state = BatchState::Flushing,
                },
                BatchState::Flushing => {
                    let slots = self.pad(&pending);
                    device.light_pass(surfaces[source], surfaces[1 - source], &slots)?;
                    report.passes += 1;
                    source = 1 - source;
                    pending.clear();
                    state = BatchState::Accumulating;
                }
            }
        }

        // `source` now names the surface written last.
        if source != 0 {
            device.copy_surface(surfaces[source], lightmap)?;
        }
        if device.info().origin == SurfaceOrigin::BottomLeft {
            device.flip_vertical(lightmap)?;
        }
        log::trace!("lightmap: {} lights in {} passes", report.lights, report.passes);
        Ok(report)
    }

    fn pad(&self, pending: &[BatchSlot]) -> [BatchSlot; BATCH_SIZE] {
        let mut slots = [BatchSlot::empty(self.empty); BATCH_SIZE];
        slots[..pending.len()].copy_from_slice(pending);
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;
    use crate::render::{Placement, Sampled, SoftwareDevice};
    use image::{Rgba, RgbaImage};

    fn setup(device: &mut SoftwareDevice) -> (LightBatcher, SurfaceId, SurfaceId, SurfaceId) {
        let empty = device
            .load_texture("black5x5", &RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 255])))
            .unwrap();
        let lightmap = device.create_surface("lightmap", 32, 32).unwrap();
        let intermediate = device.create_surface("intermediate", 32, 32).unwrap();
        let area = device.create_surface("area", 8, 8).unwrap();
        device.clear(area, [1.0, 1.0, 1.0, 1.0]).unwrap();
        (LightBatcher::new(empty), lightmap, intermediate, area)
    }

    fn slot(area: SurfaceId, x: f32, color: [f32; 4]) -> BatchSlot {
        BatchSlot {
            texture: Sampled::Surface(area),
            color,
            placement: Placement::for_area(Vec2::new(x, 0.0), 8.0, (32, 32)),
        }
    }

    #[test]
    fn pass_count_is_ceil_of_batches_with_a_floor_of_one() {
        assert_eq!(LightBatcher::passes_for(0), 1);
        assert_eq!(LightBatcher::passes_for(6), 1);
        assert_eq!(LightBatcher::passes_for(7), 2);
        assert_eq!(LightBatcher::passes_for(13), 3);

        for n in [0usize, 1, 5, 6, 7, 12, 13] {
            let mut device = SoftwareDevice::new();
            let (batcher, lightmap, intermediate, area) = setup(&mut device);
            let queue = (0..n).map(|_| slot(area, 0.0, [0.01, 0.01, 0.01, 1.0]));
            let report = batcher.composite(&mut device, lightmap, intermediate, queue).unwrap();
            assert_eq!(report.passes, LightBatcher::passes_for(n), "n = {n}");
            assert_eq!(report.lights, n);
        }
    }

    #[test]
    fn empty_queue_leaves_a_black_lightmap() {
        let mut device = SoftwareDevice::new();
        let (batcher, lightmap, intermediate, _) = setup(&mut device);
        batcher
            .composite(&mut device, lightmap, intermediate, std::iter::empty())
            .unwrap();
        let image = device.read_pixels(lightmap).unwrap();
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    }

    #[test]
    fn padding_slots_do_not_change_accumulated_pixels() {
        let mut device = SoftwareDevice::new();
        let (batcher, _, intermediate, _) = setup(&mut device);
        let source = device.create_surface("source", 32, 32).unwrap();
        device.clear(source, [0.3, 0.6, 0.9, 1.0]).unwrap();
        let padding = batcher.pad(&[]);
        assert!(padding.iter().all(BatchSlot::is_padding));

        device.light_pass(source, intermediate, &padding).unwrap();
        assert_eq!(
            device.read_pixels(source).unwrap(),
            device.read_pixels(intermediate).unwrap()
        );
    }

    #[test]
    fn result_lands_in_the_lightmap_after_an_odd_or_even_pass_count() {
        for n in [6usize, 7] {
            let mut device = SoftwareDevice::new();
            let (batcher, lightmap, intermediate, area) = setup(&mut device);
            let queue: Vec<BatchSlot> = (0..n)
                .map(|i| slot(area, (i % 4) as f32 * 8.0, [0.1, 0.1, 0.1, 1.0]))
                .collect();
            batcher.composite(&mut device, lightmap, intermediate, queue).unwrap();
            let image = device.read_pixels(lightmap).unwrap();
            // Column 0 is covered by lights 0 and 4.
            assert_eq!(image.get_pixel(2, 2)[0], 51, "n = {n}");
            assert_eq!(image.get_pixel(2, 20)[0], 0);
        }
    }

    #[test]
    fn bottom_left_devices_get_an_upright_lightmap() {
        let mut upright = SoftwareDevice::new();
        let mut flipped = SoftwareDevice::new().with_origin(SurfaceOrigin::BottomLeft);
        let mut images = Vec::new();
        for device in [&mut upright, &mut flipped] {
            let (batcher, lightmap, intermediate, area) = setup(device);
            let queue: Vec<BatchSlot> = (0..8)
                .map(|i| slot(area, (i % 3) as f32 * 8.0, [0.2, 0.1, 0.05, 1.0]))
                .collect();
            batcher.composite(device, lightmap, intermediate, queue).unwrap();
            images.push(device.read_pixels(lightmap).unwrap());
        }
        assert_eq!(images[0], images[1]);
        assert_ne!(images[0].get_pixel(2, 2), images[0].get_pixel(2, 30));
    }
}
