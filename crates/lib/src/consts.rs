/// Default destination directory name, relative to the project root.
pub const DEFAULT_DEST_DIR: &str = "_static";

/// Standalone server entry produced by `next build` with `output: "standalone"`.
pub const STANDALONE_DIR: &str = ".next/standalone";
pub const STANDALONE_ENTRY: &str = "server.js";

pub const INDEX_FILE: &str = "index.html";
pub const NOT_FOUND_FILE: &str = "404.html";

/// Static health marker written into every export, relative to the destination.
pub const HEALTH_MARKER: &str = ".well-known/health";
pub const HEALTH_MARKER_BODY: &str = "ok\n";

/// Marker embedded in the placeholder page so `inspect` can tell it apart.
pub const PLACEHOLDER_MARKER: &str = "snapex:placeholder";

pub const LOCK_FILENAME: &str = ".snapex.lock";
