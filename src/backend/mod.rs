//! Concrete display and hardware backends.

pub mod shm;
pub mod wayland;

pub use shm::ShmSurfaces;
pub use wayland::WaylandDisplay;
