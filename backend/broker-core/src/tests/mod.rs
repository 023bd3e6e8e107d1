mod auth;
mod blob;
mod frame;
mod helpers;
mod multiplexer;
mod state;
mod transport;
