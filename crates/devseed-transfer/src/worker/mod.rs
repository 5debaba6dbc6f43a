//! Out-of-process extraction.
//!
//! The parent spawns one worker for a run and sends NUL-terminated JSON
//! requests on its stdin; each response is the strategy file's bytes,
//! terminated the same way, on the worker's stdout.

mod client;
mod frame;
mod protocol;
mod server;

pub use client::WorkerClient;
pub use frame::{BLOCK_SIZE, FrameCopy, FrameReader, MAX_REQUEST_BYTES, SEPARATOR, write_frame};
pub use protocol::ExportRequest;
pub use server::{RequestHandler, serve};
