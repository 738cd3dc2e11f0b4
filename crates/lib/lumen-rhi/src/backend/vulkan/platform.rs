use std::ffi::CStr;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface;
#[cfg(windows)]
use ash::extensions::khr::Win32Surface;
#[cfg(all(unix, not(target_os = "macos")))]
use ash::extensions::khr::XlibSurface;

use crate::error::RhiError;

#[cfg(windows)]
pub fn required_extension_names() -> Vec<&'static CStr> {
    vec![Surface::name(), Win32Surface::name(), DebugUtils::name()]
}

#[cfg(all(unix, not(target_os = "macos")))]
pub fn required_extension_names() -> Vec<&'static CStr> {
    vec![Surface::name(), XlibSurface::name(), DebugUtils::name()]
}

#[cfg(windows)]
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &winit::window::Window,
) -> Result<ash::vk::SurfaceKHR, RhiError> {
    use std::os::raw::c_void;
    use std::ptr;
    use winapi::shared::windef::HWND;
    use winapi::um::libloaderapi::GetModuleHandleW;
    use winit::platform::windows::WindowExtWindows;

    let hwnd = window.hwnd() as HWND as *const c_void;
    let hinstance = GetModuleHandleW(ptr::null()) as *const c_void;
    let create_info = ash::vk::Win32SurfaceCreateInfoKHR::builder()
        .hinstance(hinstance)
        .hwnd(hwnd)
        .build();

    let loader = Win32Surface::new(entry, instance);
    Ok(loader.create_win32_surface(&create_info, None)?)
}

#[cfg(all(unix, not(target_os = "macos")))]
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &winit::window::Window,
) -> Result<ash::vk::SurfaceKHR, RhiError> {
    use winit::platform::unix::WindowExtUnix;

    let xlib_window = window
        .xlib_window()
        .ok_or_else(|| RhiError::UnsupportedFeature("xlib windowing".to_owned()))?;
    let xlib_display = window
        .xlib_display()
        .ok_or_else(|| RhiError::UnsupportedFeature("xlib windowing".to_owned()))?;

    let create_info = ash::vk::XlibSurfaceCreateInfoKHR::builder()
        .window(xlib_window as ash::vk::Window)
        .dpy(xlib_display as *mut ash::vk::Display)
        .build();

    let loader = XlibSurface::new(entry, instance);
    Ok(loader.create_xlib_surface(&create_info, None)?)
}
