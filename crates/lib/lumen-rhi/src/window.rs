//! Abstraction over the OS window a device presents to.

/// The surface a backend creates its swapchain against.
///
/// Implemented for winit windows when running interactively and by a dummy
/// window for headless runs.
pub trait RenderWindow: Send + Sync {
    fn framebuffer_size(&self) -> [u32; 2];

    fn should_close(&self) -> bool;

    /// Pump OS events. Called by the application after each presented frame;
    /// windows with their own event loop leave this empty.
    fn on_frame_end(&self) {}
}

impl RenderWindow for winit::window::Window {
    fn framebuffer_size(&self) -> [u32; 2] {
        let size = self.inner_size();
        [size.width, size.height]
    }

    fn should_close(&self) -> bool {
        false
    }
}

/// Fixed-size window stand-in for tests and offscreen rendering.
#[derive(Debug, Clone, Copy)]
pub struct OffscreenWindow {
    pub width: u32,
    pub height: u32,
}

impl RenderWindow for OffscreenWindow {
    fn framebuffer_size(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    fn should_close(&self) -> bool {
        false
    }
}
