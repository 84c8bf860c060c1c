//! snapex-lib: static snapshot export for a server-rendered site
//!
//! An export builds the app, runs its production server on a local port,
//! captures the rendered pages and writes them with the prebuilt assets into
//! a destination directory that a static host can serve:
//! - `build`: runs the production build unless in copy-only mode
//! - `server`: spawns the temporary server and waits for it to be ready
//! - `capture`: fetches pages and materializes the destination
//! - `export`: the pipeline, with backup, restore and placeholder recovery

pub mod build;
pub mod capture;
pub mod config;
pub mod consts;
pub mod export;
pub mod export_lock;
pub mod inspect;
pub mod server;
pub mod util;
