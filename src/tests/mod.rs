
mod frame;
mod window;
