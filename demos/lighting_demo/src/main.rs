use std::time::Instant;

use anyhow::Result;
use penumbra::{
    AssetManager, Camera2D, FrameDriver, FrameOutcome, GpuDevice, LightId, LightState,
    LightingConfig, RenderDevice, TileDef, TileWorld, Tilemap, Vec2,
};
use winit::{
    dpi::{LogicalSize, PhysicalSize},
    event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

const TILE: f32 = 32.0;
const MAP: (u32, u32) = (48, 48);
const LIGHTS: usize = 24;

/// Walk around a walled map lit by random lights.
///
/// Left click toggles a wall under the cursor, space drops a light at the
/// cursor, escape quits. An optional first argument names a JSON lighting
/// config.
struct LightingDemo {
    world: TileWorld,
    floor: u32,
    wall: u32,
    camera: Camera2D,
    cursor: Vec2,
    started: Instant,
    last_flicker: f32,
    flickering: Vec<LightId>,
    orbiting: Option<LightId>,
}

impl LightingDemo {
    fn new() -> Self {
        let mut world = TileWorld::new(Tilemap::new(Vec2::splat(TILE), MAP, Vec2::ZERO));
        world.set_background([0.02, 0.02, 0.03, 1.0]);
        let floor = world.define_tile(TileDef::floor("floor", [0.55, 0.5, 0.45, 1.0]));
        let wall = world.define_tile(TileDef::wall("wall", [0.2, 0.22, 0.28, 1.0]));

        let (w, h) = MAP;
        world.tilemap.fill_rect(0, 0, w, h, wall);
        world.tilemap.fill_rect(1, 1, w - 2, h - 2, floor);
        for _ in 0..40 {
            let x = fastrand::u32(2..w - 8);
            let y = fastrand::u32(2..h - 8);
            let len = fastrand::u32(2..7);
            if fastrand::bool() {
                world.tilemap.fill_rect(x, y, len, 1, wall);
            } else {
                world.tilemap.fill_rect(x, y, 1, len, wall);
            }
        }

        let mut flickering = Vec::new();
        for i in 0..LIGHTS {
            let position = Vec2::new(
                fastrand::f32() * (w as f32 - 2.0) * TILE + TILE,
                fastrand::f32() * (h as f32 - 2.0) * TILE + TILE,
            );
            let radius = 80.0 + fastrand::f32() * 320.0;
            let id = world.lights.spawn(position, radius, random_color());
            if i % 6 == 0 {
                flickering.push(id);
            }
        }
        let orbiting = Some(world.lights.spawn(world_center(), 200.0, [0.6, 0.8, 1.0, 1.0]));

        let mut demo = Self {
            world,
            floor,
            wall,
            camera: Camera2D::new(world_center()),
            cursor: Vec2::ZERO,
            started: Instant::now(),
            last_flicker: 0.0,
            flickering,
            orbiting,
        };
        demo.update();
        demo
    }

    fn update(&mut self) {
        let t = self.started.elapsed().as_secs_f32();

        let player = world_center() + Vec2::new((t * 0.3).cos() * 320.0, (t * 0.2).sin() * 240.0);
        self.world.set_controlled(Some(player));
        self.camera.position = player;

        if let Some(id) = self.orbiting {
            let orbit = Vec2::new((t * 0.8).cos(), (t * 0.8).sin()) * 160.0;
            self.world.lights.move_to(id, player + orbit);
        }

        if t - self.last_flicker > 0.15 {
            self.last_flicker = t;
            for id in &self.flickering {
                let Some(light) = self.world.lights.get(*id) else {
                    continue;
                };
                if fastrand::f32() < 0.3 {
                    let state = match light.state {
                        LightState::On => LightState::Broken,
                        _ => LightState::On,
                    };
                    self.world.lights.set_state(*id, state);
                }
            }
        }
    }

    fn cursor_world(&self, size: PhysicalSize<u32>) -> Vec2 {
        self.camera
            .screen_to_world(self.cursor, size.width, size.height)
    }

    fn toggle_wall<D: RenderDevice>(&mut self, driver: &mut FrameDriver<D>, size: PhysicalSize<u32>) {
        let (x, y) = self.world.tilemap.world_to_tile(self.cursor_world(size));
        if x < 0 || y < 0 {
            return;
        }
        let (x, y) = (x as u32, y as u32);
        let Some(tile) = self.world.tilemap.get_tile(x, y) else {
            return;
        };
        let next = if tile.id == self.wall { self.floor } else { self.wall };
        if let Some(bounds) = self.world.set_tile(x, y, next) {
            let hits = driver.on_geometry_changed(bounds);
            log::info!("tile ({x}, {y}) changed, {hits} lights invalidated");
        }
    }

    fn drop_light(&mut self, size: PhysicalSize<u32>) {
        let position = self.cursor_world(size);
        let id = self
            .world
            .lights
            .spawn(position, 120.0 + fastrand::f32() * 200.0, random_color());
        log::info!("light {} placed at ({:.0}, {:.0})", id.to_u32(), position.x, position.y);
    }

    fn draw(&self, driver: &mut FrameDriver<GpuDevice<'_>>) -> Result<()> {
        match driver.render_frame(&self.world, &self.camera)? {
            FrameOutcome::Presented(surface) | FrameOutcome::Reused(surface) => {
                driver.device_mut().present(surface)?;
            }
            FrameOutcome::Skipped(reason) => log::debug!("frame skipped: {reason:?}"),
        }
        Ok(())
    }
}

fn world_center() -> Vec2 {
    Vec2::new(MAP.0 as f32 * TILE * 0.5, MAP.1 as f32 * TILE * 0.5)
}

fn random_color() -> [f32; 4] {
    [
        0.7 + fastrand::f32() * 0.3,
        0.5 + fastrand::f32() * 0.4,
        0.3 + fastrand::f32() * 0.4,
        0.8 + fastrand::f32() * 0.2,
    ]
}

fn is_pressed(event: &KeyEvent, code: KeyCode) -> bool {
    event.state == ElementState::Pressed && event.physical_key == PhysicalKey::Code(code)
}

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => LightingConfig::load(path)?,
        None => LightingConfig::default(),
    };

    let event_loop = EventLoop::new()?;
    let mut window_attributes = Window::default_attributes();
    window_attributes.title = "Penumbra - Lighting Demo".into();
    window_attributes.inner_size = Some(LogicalSize::new(1280, 720).into());
    let window = event_loop.create_window(window_attributes)?;
    // The window lives until the process exits.
    let window: &'static Window = Box::leak(Box::new(window));

    let size = window.inner_size();
    let mut device = GpuDevice::for_window(window, true)?;
    let mut assets = AssetManager::new();
    assets.load_builtin(&mut device)?;
    let mut driver = FrameDriver::new(device, &assets, config, (size.width, size.height))?;
    let mut demo = LightingDemo::new();

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if is_pressed(&event, KeyCode::Escape) {
                    elwt.exit();
                } else if is_pressed(&event, KeyCode::Space) {
                    demo.drop_light(window.inner_size());
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                demo.cursor = Vec2::new(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => demo.toggle_wall(&mut driver, window.inner_size()),
            WindowEvent::Resized(new_size) => {
                driver.device_mut().resize_window(new_size);
                if let Err(err) = driver.on_resize(new_size.width, new_size.height) {
                    eprintln!("Encountered error during resize: {err:?}");
                    elwt.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = demo.draw(&mut driver) {
                    eprintln!("Encountered error during draw: {err:?}");
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            demo.update();
            window.request_redraw();
        }
        _ => {}
    })?;

    Ok(())
}
